//! Error types for the webhook delivery core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::store::StoreError;

/// Webhook core error variants.
///
/// A failed delivery attempt is never one of these: attempts are classified
/// into [`crate::services::dispatcher::AttemptFailure`] and turned into a
/// status transition instead.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Event not found")]
    EventNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Application has no active endpoint subscribed to this event")]
    NoMatchingEndpoint,

    #[error("Delivery is currently being attempted")]
    DeliveryInFlight,

    #[error("Delivery was modified concurrently, try again")]
    ConcurrentModification,

    #[error("Subscription or endpoint is not active")]
    SubscriptionInactive,

    #[error("Invalid delivery status: {0}")]
    InvalidStatus(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No delivery could be scheduled for the event")]
    FanOutFailed,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Returns true for lookups that came back empty.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WebhookError::EventNotFound
                | WebhookError::DeliveryNotFound
                | WebhookError::SubscriptionNotFound
                | WebhookError::EndpointNotFound
                | WebhookError::Store(StoreError::NotFound { .. })
        )
    }
}

/// JSON error response returned by webhook API endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            WebhookError::Store(StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            WebhookError::Store(StoreError::Duplicate(_)) => {
                (StatusCode::CONFLICT, "duplicate_constraint")
            }
            WebhookError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            WebhookError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            WebhookError::SsrfDetected(_) => (StatusCode::BAD_REQUEST, "ssrf_detected"),
            WebhookError::EventNotFound => (StatusCode::NOT_FOUND, "event_not_found"),
            WebhookError::DeliveryNotFound => (StatusCode::NOT_FOUND, "delivery_not_found"),
            WebhookError::SubscriptionNotFound => {
                (StatusCode::NOT_FOUND, "subscription_not_found")
            }
            WebhookError::EndpointNotFound => (StatusCode::NOT_FOUND, "endpoint_not_found"),
            WebhookError::NoMatchingEndpoint => (StatusCode::BAD_REQUEST, "no_matching_endpoint"),
            WebhookError::DeliveryInFlight => (StatusCode::CONFLICT, "delivery_in_flight"),
            WebhookError::ConcurrentModification => {
                (StatusCode::CONFLICT, "concurrent_modification")
            }
            WebhookError::SubscriptionInactive => {
                (StatusCode::BAD_REQUEST, "subscription_inactive")
            }
            WebhookError::InvalidStatus(_) => (StatusCode::BAD_REQUEST, "invalid_status"),
            WebhookError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            WebhookError::FanOutFailed => (StatusCode::INTERNAL_SERVER_ERROR, "fan_out_failed"),
            WebhookError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, WebhookError>;
