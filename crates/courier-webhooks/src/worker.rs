//! Delivery Worker
//!
//! Background worker that polls for due deliveries and dispatches them.
//! Also returns deliveries stuck in `Processing` (a worker died mid-attempt)
//! to `Scheduled`, and supports graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, EventDelivery};
use crate::services::dispatcher::Dispatcher;
use crate::store::{
    CasPrecondition, DeliveryFilter, DeliveryPatch, Pageable, SortOrder, Stores, MAX_PER_PAGE,
};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of deliveries attempted at the same time.
    pub concurrency: usize,

    /// How often to poll for due deliveries.
    pub poll_interval: Duration,

    /// Maximum deliveries fetched per poll.
    pub batch_size: u64,

    /// A `Processing` delivery untouched for this long is considered abandoned.
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(1000),
            batch_size: 50,
            stale_after: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_PER_PAGE);
        self
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Worker that drives scheduled deliveries through the dispatcher.
pub struct DeliveryWorker {
    stores: Stores,
    dispatcher: Dispatcher,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl DeliveryWorker {
    pub fn new(stores: Stores, dispatcher: Dispatcher, config: WorkerConfig) -> Self {
        Self {
            stores,
            dispatcher,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the worker. Returns after [`Self::shutdown`] once in-flight attempts finish.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            target: "webhook_worker",
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting delivery worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll_interval = interval(self.config.poll_interval);
        let mut stale_interval = interval(self.config.stale_after.max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if self.is_shutdown() {
                        info!(target: "webhook_worker", "Worker shutdown requested, stopping poll loop");
                        break;
                    }
                    self.poll_and_dispatch(&semaphore).await;
                }
                _ = stale_interval.tick() => {
                    if let Err(e) = self.release_stale_deliveries().await {
                        error!(target: "webhook_worker", error = %e, "Failed to release stale deliveries");
                    }
                }
            }
        }

        info!(target: "webhook_worker", "Waiting for in-flight deliveries to complete...");
        let permits = u32::try_from(self.config.concurrency).unwrap_or(u32::MAX);
        let _ = semaphore.acquire_many(permits).await;
        info!(target: "webhook_worker", "Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        info!(target: "webhook_worker", "Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Deliveries due now, oldest first.
    ///
    /// Deliveries parked behind an inactive or deleted subscription or endpoint
    /// are left out until their target is active again.
    pub async fn due_deliveries(&self) -> Result<Vec<EventDelivery>, WebhookError> {
        let filter = DeliveryFilter::default()
            .with_status(DeliveryStatus::Scheduled)
            .due_before(Utc::now())
            .with_active_targets();
        let pageable = Pageable::new(1, self.config.batch_size).with_sort(SortOrder::Asc);
        let (deliveries, _) = self
            .stores
            .deliveries
            .list_deliveries(&filter, pageable)
            .await?;
        Ok(deliveries)
    }

    /// Dispatch every currently due delivery and wait for the attempts.
    ///
    /// Returns the number of deliveries that were claimed and recorded.
    pub async fn run_once(&self) -> Result<usize, WebhookError> {
        let mut processed = 0;
        for delivery in self.due_deliveries().await? {
            if self.dispatcher.process(delivery.id).await?.is_some() {
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn poll_and_dispatch(&self, semaphore: &Arc<Semaphore>) {
        let deliveries = match self.due_deliveries().await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                error!(target: "webhook_worker", error = %e, "Failed to fetch due deliveries");
                return;
            }
        };

        if deliveries.is_empty() {
            return;
        }

        debug!(
            target: "webhook_worker",
            count = deliveries.len(),
            "Fetched due deliveries"
        );

        for delivery in deliveries {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                debug!(target: "webhook_worker", "All worker slots busy, leaving remaining deliveries for the next poll");
                return;
            };

            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = dispatcher.process(delivery.id).await {
                    error!(
                        target: "webhook_worker",
                        delivery_id = %delivery.id,
                        error = %e,
                        "Delivery processing failed"
                    );
                }
            });
        }
    }

    /// Return abandoned `Processing` deliveries to `Scheduled`, due now.
    ///
    /// The abandoned attempt is not counted as a trial.
    pub async fn release_stale_deliveries(&self) -> Result<u64, WebhookError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| WebhookError::Internal(format!("Invalid stale threshold: {e}")))?;
        let now = Utc::now();
        let cutoff = now - stale_after;

        let filter = DeliveryFilter::default()
            .with_status(DeliveryStatus::Processing)
            .updated_before(cutoff);
        let pageable = Pageable::new(1, MAX_PER_PAGE).with_sort(SortOrder::Asc);
        let (stale, _) = self
            .stores
            .deliveries
            .list_deliveries(&filter, pageable)
            .await?;

        let mut released = 0;
        for delivery in stale {
            let outcome = self
                .stores
                .deliveries
                .compare_and_swap(
                    delivery.id,
                    CasPrecondition::status(DeliveryStatus::Processing).updated_before(cutoff),
                    DeliveryPatch::status(DeliveryStatus::Scheduled)
                        .with_next_send_time(Some(now))
                        .with_description("Released after stalled attempt"),
                )
                .await?;
            if outcome.is_swapped() {
                released += 1;
            }
        }

        if released > 0 {
            warn!(target: "webhook_worker", count = released, "Released stale deliveries");
        }
        Ok(released)
    }
}
