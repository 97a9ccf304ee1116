//! Event ingestion, replay and read paths.
//!
//! Ingestion resolves matching subscriptions before anything is written, so
//! an event nobody listens to is rejected without leaving an event or any
//! delivery behind.

use serde::{Deserialize, Serialize};

use courier_core::{ApplicationId, DeliveryId, EventId, GroupId};

use crate::error::WebhookError;
use crate::models::{Event, EventDelivery};
use crate::services::batch::BatchProcessor;
use crate::services::fan_out::{FanOutEngine, FanOutReport};
use crate::services::matcher::SubscriptionMatcher;
use crate::services::{ensure_group, StoreResultExt};
use crate::store::{DeliveryFilter, EventFilter, Pageable, PaginationData, Stores};
use crate::validation;

/// Input for ingesting an event.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEvent {
    pub app_id: ApplicationId,
    pub event_type: String,
    /// Raw payload bytes, forwarded unchanged.
    pub payload: Vec<u8>,
}

impl CreateEvent {
    /// Build an input whose payload is the JSON encoding of `data`.
    pub fn json(
        app_id: ApplicationId,
        event_type: impl Into<String>,
        data: &serde_json::Value,
    ) -> Result<Self, WebhookError> {
        let payload = serde_json::to_vec(data)
            .map_err(|e| WebhookError::Validation(format!("Invalid event data: {e}")))?;
        Ok(Self {
            app_id,
            event_type: event_type.into(),
            payload,
        })
    }
}

/// Result of replaying an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub fan_out: FanOutReport,
    /// Existing terminal deliveries sent back into the dispatch cycle.
    pub resent: u64,
}

/// Ingestion and read service for events and deliveries.
#[derive(Clone)]
pub struct EventService {
    stores: Stores,
    matcher: SubscriptionMatcher,
    fan_out: FanOutEngine,
    batch: BatchProcessor,
}

impl EventService {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self {
            matcher: SubscriptionMatcher::new(stores.clone()),
            fan_out: FanOutEngine::new(stores.clone()),
            batch: BatchProcessor::new(stores.clone()),
            stores,
        }
    }

    /// Ingest an event and fan it out.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank event type or empty payload.
    /// - `NoMatchingEndpoint` when no active subscription accepts the event.
    /// - `FanOutFailed` when not a single delivery could be scheduled.
    pub async fn create_event(
        &self,
        group_id: GroupId,
        request: CreateEvent,
    ) -> Result<(Event, FanOutReport), WebhookError> {
        validation::validate_event_type(&request.event_type)?;
        if request.payload.is_empty() {
            return Err(WebhookError::Validation(
                "Event data is required".to_string(),
            ));
        }

        let event = Event::new(request.app_id, group_id, request.event_type, request.payload);
        let subscriptions = self.matcher.match_event(&event).await?;
        if subscriptions.is_empty() {
            tracing::info!(
                target: "webhook_delivery",
                app_id = %event.app_id,
                event_type = %event.event_type,
                "Rejecting event without matching endpoint"
            );
            return Err(WebhookError::NoMatchingEndpoint);
        }

        self.stores.events.create_event(&event).await?;
        let report = self.fan_out.fan_out(&event, &subscriptions).await;
        if report.scheduled_count() == 0 {
            return Err(WebhookError::FanOutFailed);
        }
        Ok((event, report))
    }

    /// Fan an existing event out again and resend its finished deliveries.
    ///
    /// Subscriptions added since ingestion get a new delivery; existing
    /// terminal deliveries are resent; deliveries still in the dispatch cycle
    /// are left alone.
    pub async fn replay_event(
        &self,
        group_id: GroupId,
        id: EventId,
    ) -> Result<ReplayReport, WebhookError> {
        let event = self.get_event(group_id, id).await?;
        let subscriptions = self.matcher.match_event(&event).await?;
        let fan_out = self.fan_out.fan_out(&event, &subscriptions).await;

        let mut resent = 0;
        for delivery_id in fan_out.existing_ids() {
            let delivery = self.get_delivery(group_id, delivery_id).await?;
            if !delivery.status.is_terminal() {
                continue;
            }
            match self.batch.resend(group_id, delivery_id).await {
                Ok(_) => resent += 1,
                Err(WebhookError::Store(e)) => return Err(e.into()),
                Err(e) => tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    error = %e,
                    "Replay could not resend delivery"
                ),
            }
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %id,
            created = fan_out.created_count(),
            resent,
            "Event replayed"
        );
        Ok(ReplayReport { fan_out, resent })
    }

    pub async fn get_event(&self, group_id: GroupId, id: EventId) -> Result<Event, WebhookError> {
        let event = self
            .stores
            .events
            .find_event_by_id(id)
            .await
            .or_not_found(WebhookError::EventNotFound)?;
        ensure_group(event, group_id, WebhookError::EventNotFound)
    }

    pub async fn list_events(
        &self,
        filter: &EventFilter,
        pageable: Pageable,
    ) -> Result<(Vec<Event>, PaginationData), WebhookError> {
        Ok(self.stores.events.list_events(filter, pageable).await?)
    }

    pub async fn get_delivery(
        &self,
        group_id: GroupId,
        id: DeliveryId,
    ) -> Result<EventDelivery, WebhookError> {
        let delivery = self
            .stores
            .deliveries
            .find_delivery_by_id(id)
            .await
            .or_not_found(WebhookError::DeliveryNotFound)?;
        ensure_group(delivery, group_id, WebhookError::DeliveryNotFound)
    }

    /// List deliveries. The filter must be scoped to a group.
    pub async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        pageable: Pageable,
    ) -> Result<(Vec<EventDelivery>, PaginationData), WebhookError> {
        if filter.group_id.is_none() {
            return Err(WebhookError::Validation(
                "Delivery queries must be scoped to a group".to_string(),
            ));
        }
        Ok(self
            .stores
            .deliveries
            .list_deliveries(filter, pageable)
            .await?)
    }
}
