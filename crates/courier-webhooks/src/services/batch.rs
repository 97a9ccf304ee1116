//! Operator-driven re-entry of deliveries into the dispatch cycle.
//!
//! Resend, batch retry and force resend all reduce to the same per-record
//! compare-and-swap from the status the delivery was read in back to
//! `Scheduled`. A batch is therefore not transactional: each record either
//! swaps or is skipped, and running the same batch again is harmless.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

use courier_core::{DeliveryId, GroupId, SubscriptionId};

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, EventDelivery};
use crate::services::{ensure_group, StoreResultExt};
use crate::store::{
    CasOutcome, CasPrecondition, DeliveryFilter, DeliveryPatch, Pageable, SortOrder, StoreError,
    Stores, MAX_PER_PAGE,
};

/// Attempts made by [`BatchProcessor::resend`] when the record keeps changing under it.
const RESEND_CAS_ATTEMPTS: usize = 3;

/// Outcome of a filter-driven batch retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchRetryReport {
    /// Deliveries matching the filter.
    pub matched: u64,
    /// Deliveries moved to `Scheduled`.
    pub retried: u64,
    /// Matching deliveries that were not eligible or changed concurrently.
    pub skipped: u64,
}

/// Outcome of an explicit-id force resend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForceResendReport {
    pub successful: u64,
    pub failed: u64,
}

impl ForceResendReport {
    pub fn message(&self) -> String {
        format!("{} successful, {} failed", self.successful, self.failed)
    }
}

/// Executes resend, batch retry, count-affected and force resend.
#[derive(Clone)]
pub struct BatchProcessor {
    stores: Stores,
}

impl BatchProcessor {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Put one delivery back into the dispatch cycle.
    ///
    /// Terminal deliveries are rescheduled with a fresh trial budget. A
    /// delivery that is already `Scheduled` keeps its trial count and budget
    /// and is only made due immediately. A delivery being attempted right now
    /// cannot be resent.
    pub async fn resend(
        &self,
        group_id: GroupId,
        id: DeliveryId,
    ) -> Result<EventDelivery, WebhookError> {
        for _ in 0..RESEND_CAS_ATTEMPTS {
            let delivery = self
                .stores
                .deliveries
                .find_delivery_by_id(id)
                .await
                .or_not_found(WebhookError::DeliveryNotFound)?;
            let delivery = ensure_group(delivery, group_id, WebhookError::DeliveryNotFound)?;

            if delivery.status == DeliveryStatus::Processing {
                return Err(WebhookError::DeliveryInFlight);
            }
            let retry_limit = self.eligible_retry_limit(&delivery).await?;
            let Some(retry_limit) = retry_limit else {
                return Err(WebhookError::SubscriptionInactive);
            };

            match self.reschedule(&delivery, retry_limit).await? {
                CasOutcome::Swapped(updated) => {
                    tracing::info!(
                        target: "webhook_batch",
                        delivery_id = %id,
                        previous_status = %delivery.status,
                        "Delivery resent"
                    );
                    return Ok(updated);
                }
                CasOutcome::Rejected {
                    current: DeliveryStatus::Processing,
                } => return Err(WebhookError::DeliveryInFlight),
                CasOutcome::Rejected { .. } => continue,
            }
        }

        Err(WebhookError::ConcurrentModification)
    }

    /// Resend every delivery the filter affects. See [`Self::count_affected`].
    pub async fn batch_retry(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<BatchRetryReport, WebhookError> {
        let filter = normalize_filter(filter);
        if filter.statuses.is_empty() {
            tracing::debug!(
                target: "webhook_batch",
                "Batch retry filter names no terminal status, nothing to retry"
            );
            return Ok(BatchRetryReport::default());
        }
        let matched = self.stores.deliveries.count_deliveries(&filter).await?;
        let affected = self.collect_affected(&filter).await?;

        let mut report = BatchRetryReport {
            matched,
            ..BatchRetryReport::default()
        };
        for (delivery, retry_limit) in &affected {
            match self.reschedule(delivery, *retry_limit).await {
                Ok(CasOutcome::Swapped(_)) => report.retried += 1,
                Ok(CasOutcome::Rejected { current }) => {
                    tracing::debug!(
                        target: "webhook_batch",
                        delivery_id = %delivery.id,
                        current_status = %current,
                        "Skipping delivery changed during batch retry"
                    );
                }
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        report.skipped = matched.saturating_sub(report.retried);

        tracing::info!(
            target: "webhook_batch",
            matched = report.matched,
            retried = report.retried,
            skipped = report.skipped,
            "Batch retry finished"
        );
        Ok(report)
    }

    /// Number of deliveries [`Self::batch_retry`] would move, without writing.
    ///
    /// A delivery is affected when it matches the filter, is in a terminal
    /// status (`Discarded` unless the filter names statuses), and its
    /// subscription and endpoint are active.
    pub async fn count_affected(&self, filter: &DeliveryFilter) -> Result<u64, WebhookError> {
        let filter = normalize_filter(filter);
        Ok(self.collect_affected(&filter).await?.len() as u64)
    }

    /// Resend an explicit list of deliveries, counting per-id outcomes.
    pub async fn force_resend(
        &self,
        group_id: GroupId,
        ids: &[DeliveryId],
    ) -> Result<ForceResendReport, WebhookError> {
        let mut report = ForceResendReport::default();
        for id in ids {
            match self.resend(group_id, *id).await {
                Ok(_) => report.successful += 1,
                Err(WebhookError::Store(StoreError::Unavailable(reason))) => {
                    return Err(WebhookError::Store(StoreError::Unavailable(reason)))
                }
                Err(e) => {
                    tracing::warn!(
                        target: "webhook_batch",
                        delivery_id = %id,
                        error = %e,
                        "Force resend failed for delivery"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            target: "webhook_batch",
            successful = report.successful,
            failed = report.failed,
            "Force resend finished"
        );
        Ok(report)
    }

    async fn reschedule(
        &self,
        delivery: &EventDelivery,
        retry_limit: u32,
    ) -> Result<CasOutcome, StoreError> {
        let now = Utc::now();
        let patch = if delivery.status == DeliveryStatus::Scheduled {
            let next = delivery.metadata.next_send_time.map_or(now, |t| t.min(now));
            DeliveryPatch::status(DeliveryStatus::Scheduled).with_next_send_time(Some(next))
        } else {
            DeliveryPatch::status(DeliveryStatus::Scheduled)
                .with_num_trials(0)
                .with_retry_limit(retry_limit)
                .with_next_send_time(Some(now))
        };
        self.stores
            .deliveries
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(delivery.status),
                patch.with_description("Delivery resent"),
            )
            .await
    }

    /// Retry limit to resend with, or `None` when the subscription or endpoint is inactive.
    async fn eligible_retry_limit(
        &self,
        delivery: &EventDelivery,
    ) -> Result<Option<u32>, WebhookError> {
        let subscription = match self
            .stores
            .subscriptions
            .find_subscription_by_id(delivery.subscription_id)
            .await
        {
            Ok(s) => s,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let endpoint_active = match self
            .stores
            .endpoints
            .find_endpoint_by_id(delivery.endpoint_id)
            .await
        {
            Ok(e) => e.is_active(),
            Err(StoreError::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };

        Ok((subscription.is_active() && endpoint_active)
            .then_some(subscription.retry_config.retry_count))
    }

    /// Snapshot of affected deliveries with the retry limit each resends with.
    async fn collect_affected(
        &self,
        filter: &DeliveryFilter,
    ) -> Result<Vec<(EventDelivery, u32)>, WebhookError> {
        if filter.statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut eligibility: HashMap<SubscriptionId, Option<u32>> = HashMap::new();
        let mut affected = Vec::new();
        let mut page = 1;
        loop {
            let pageable = Pageable::new(page, MAX_PER_PAGE).with_sort(SortOrder::Asc);
            let (deliveries, pagination) = self
                .stores
                .deliveries
                .list_deliveries(filter, pageable)
                .await?;

            for delivery in deliveries {
                let limit = match eligibility.get(&delivery.subscription_id) {
                    Some(limit) => *limit,
                    None => {
                        let limit = self.eligible_retry_limit(&delivery).await?;
                        eligibility.insert(delivery.subscription_id, limit);
                        limit
                    }
                };
                if let Some(limit) = limit {
                    affected.push((delivery, limit));
                }
            }

            if page >= pagination.total_page {
                break;
            }
            page += 1;
        }
        Ok(affected)
    }
}

/// Restrict a filter to resendable statuses, defaulting to `Discarded`.
///
/// A filter naming only non-terminal statuses affects nothing.
pub fn normalize_filter(filter: &DeliveryFilter) -> DeliveryFilter {
    let mut normalized = filter.clone();
    if normalized.statuses.is_empty() {
        normalized.statuses = vec![DeliveryStatus::Discarded];
    } else {
        normalized.statuses.retain(DeliveryStatus::is_terminal);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_resend_message() {
        let report = ForceResendReport {
            successful: 2,
            failed: 1,
        };
        assert_eq!(report.message(), "2 successful, 1 failed");
        assert_eq!(ForceResendReport::default().message(), "0 successful, 0 failed");
    }

    #[test]
    fn test_normalize_defaults_to_discarded() {
        let normalized = normalize_filter(&DeliveryFilter::default());
        assert_eq!(normalized.statuses, vec![DeliveryStatus::Discarded]);
    }

    #[test]
    fn test_normalize_drops_non_terminal_statuses() {
        let filter = DeliveryFilter::default()
            .with_statuses([DeliveryStatus::Scheduled, DeliveryStatus::Success]);
        assert_eq!(
            normalize_filter(&filter).statuses,
            vec![DeliveryStatus::Success]
        );

        let only_processing = DeliveryFilter::default().with_status(DeliveryStatus::Processing);
        assert!(normalize_filter(&only_processing).statuses.is_empty());
    }
}
