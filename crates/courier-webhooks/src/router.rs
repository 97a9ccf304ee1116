//! Axum router setup for event, delivery and subscription endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::{deliveries, events, subscriptions};
use crate::services::batch::BatchProcessor;
use crate::services::event_service::EventService;
use crate::services::subscription_service::SubscriptionService;
use crate::store::Stores;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub event_service: Arc<EventService>,
    pub batch_processor: Arc<BatchProcessor>,
    pub subscription_service: Arc<SubscriptionService>,
}

impl WebhooksState {
    /// Create state over the given stores.
    ///
    /// `allow_private_urls` lets endpoints target HTTP and internal hosts.
    pub fn new(stores: Stores, allow_private_urls: bool) -> Self {
        Self {
            event_service: Arc::new(EventService::new(stores.clone())),
            batch_processor: Arc::new(BatchProcessor::new(stores.clone())),
            subscription_service: Arc::new(
                SubscriptionService::new(stores).with_allow_private(allow_private_urls),
            ),
        }
    }
}

/// Creates the webhook router with all routes.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        // Events
        .route(
            "/events",
            post(events::create_event_handler).get(events::list_events_handler),
        )
        .route("/events/:id", get(events::get_event_handler))
        .route("/events/:id/replay", put(events::replay_event_handler))
        // Deliveries
        .route("/eventdeliveries", get(deliveries::list_deliveries_handler))
        .route(
            "/eventdeliveries/batchretry",
            post(deliveries::batch_retry_handler),
        )
        .route(
            "/eventdeliveries/countbatchretryevents",
            get(deliveries::count_batch_retry_handler),
        )
        .route(
            "/eventdeliveries/forceresend",
            post(deliveries::force_resend_handler),
        )
        .route("/eventdeliveries/:id", get(deliveries::get_delivery_handler))
        .route(
            "/eventdeliveries/:id/resend",
            put(deliveries::resend_delivery_handler),
        )
        // Endpoints and subscriptions
        .route("/endpoints", post(subscriptions::create_endpoint_handler))
        .route("/endpoints/:id", get(subscriptions::get_endpoint_handler))
        .route(
            "/endpoints/:id/status",
            put(subscriptions::set_endpoint_status_handler),
        )
        .route(
            "/subscriptions",
            post(subscriptions::create_subscription_handler)
                .get(subscriptions::list_subscriptions_handler),
        )
        .route(
            "/subscriptions/:id",
            get(subscriptions::get_subscription_handler)
                .put(subscriptions::update_subscription_handler)
                .delete(subscriptions::delete_subscription_handler),
        )
        .route(
            "/subscriptions/:id/toggle",
            put(subscriptions::toggle_subscription_handler),
        )
        .with_state(state)
}
