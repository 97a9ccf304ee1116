//! Subscription matching for ingested events.

use std::collections::HashSet;

use crate::error::WebhookError;
use crate::models::{Event, Subscription};
use crate::store::Stores;

/// Resolves the active subscriptions that accept an event.
#[derive(Clone)]
pub struct SubscriptionMatcher {
    stores: Stores,
}

impl SubscriptionMatcher {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Active subscriptions of the event's application and group whose filter
    /// accepts the event, oldest first.
    ///
    /// Subscriptions pointing at a missing endpoint are skipped. An empty
    /// result is not an error; ingestion turns it into `NoMatchingEndpoint`.
    pub async fn match_event(&self, event: &Event) -> Result<Vec<Subscription>, WebhookError> {
        let endpoints: HashSet<_> = self
            .stores
            .endpoints
            .list_endpoints_by_app(event.group_id, event.app_id)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();

        if endpoints.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.id,
                app_id = %event.app_id,
                "Application has no endpoints"
            );
            return Ok(Vec::new());
        }

        let payload = event.payload_json();
        let matched: Vec<Subscription> = self
            .stores
            .subscriptions
            .list_subscriptions_by_app(event.group_id, event.app_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active() && endpoints.contains(&s.endpoint_id))
            .filter(|s| s.filter_config.accepts(&event.event_type, payload.as_ref()))
            .collect();

        tracing::debug!(
            target: "webhook_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            matched = matched.len(),
            "Resolved matching subscriptions"
        );

        Ok(matched)
    }
}
