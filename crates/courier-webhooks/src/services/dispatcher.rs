//! Delivery dispatch: claim, attempt, record.
//!
//! A worker claims a due `Scheduled` delivery with a compare-and-swap to
//! `Processing`, so at most one worker attempts a delivery at a time. The
//! attempt POSTs the event's opaque payload to the endpoint, signed with the
//! endpoint secret. Whatever the endpoint does, the outcome becomes a status
//! transition through the [`RetryScheduler`]. A failed attempt is never
//! returned as an error.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use courier_core::DeliveryId;

use crate::crypto;
use crate::error::WebhookError;
use crate::models::{
    DeliveryAttempt, DeliveryStatus, Endpoint, Event, EventDelivery, Subscription,
    MAX_RESPONSE_BODY_LEN,
};
use crate::services::alert::AlertTrigger;
use crate::services::retry::RetryScheduler;
use crate::services::StoreResultExt;
use crate::store::{CasOutcome, CasPrecondition, DeliveryPatch, StoreError, Stores};

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

/// Response bytes read from an endpoint, enough for the kept characters of any UTF-8 body.
const MAX_RESPONSE_BODY_BYTES: usize = MAX_RESPONSE_BODY_LEN * 4;

/// Default outbound user agent.
pub const DEFAULT_USER_AGENT: &str = "courier-webhooks/1.0";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub timeout: StdDuration,
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: StdDuration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptFailure {
    #[error("HTTP {status}")]
    Rejected { status: u16 },

    #[error("Request timeout ({0}s)")]
    Timeout(u64),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success {
        status_code: u16,
        response_body: String,
        latency_ms: u64,
    },
    Failure {
        failure: AttemptFailure,
        response_body: Option<String>,
        latency_ms: u64,
    },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The record appended to the delivery's attempt history.
    pub fn to_attempt(&self) -> DeliveryAttempt {
        match self {
            Self::Success {
                status_code,
                response_body,
                latency_ms,
            } => DeliveryAttempt::new(
                true,
                Some(*status_code),
                Some(response_body.clone()),
                None,
                *latency_ms,
            ),
            Self::Failure {
                failure,
                response_body,
                latency_ms,
            } => {
                let status_code = match failure {
                    AttemptFailure::Rejected { status } => Some(*status),
                    _ => None,
                };
                DeliveryAttempt::new(
                    false,
                    status_code,
                    response_body.clone(),
                    Some(failure.to_string()),
                    *latency_ms,
                )
            }
        }
    }
}

/// A claimed delivery together with what is needed to attempt it.
#[derive(Debug, Clone)]
pub struct ClaimedDelivery {
    pub delivery: EventDelivery,
    pub subscription: Subscription,
    pub endpoint: Endpoint,
}

/// Claims and attempts deliveries.
#[derive(Clone)]
pub struct Dispatcher {
    stores: Stores,
    http_client: Client,
    config: DispatcherConfig,
    retry: RetryScheduler,
    alerts: Arc<AlertTrigger>,
}

impl Dispatcher {
    /// Create a dispatcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        stores: Stores,
        config: DispatcherConfig,
        alerts: Arc<AlertTrigger>,
    ) -> Result<Self, WebhookError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            retry: RetryScheduler::new(stores.clone()),
            stores,
            http_client,
            config,
            alerts,
        })
    }

    pub fn alerts(&self) -> &Arc<AlertTrigger> {
        &self.alerts
    }

    /// Claim a delivery for one attempt.
    ///
    /// Returns `None` when the delivery is not claimable: it is not
    /// `Scheduled`, not yet due, its subscription or endpoint is inactive or
    /// deleted, or another worker won the claim. A delivery parked behind an
    /// inactive target stays `Scheduled` and is claimable again once the
    /// target is reactivated.
    pub async fn claim(&self, id: DeliveryId) -> Result<Option<EventDelivery>, WebhookError> {
        Ok(self.claim_with_context(id).await?.map(|c| c.delivery))
    }

    async fn claim_with_context(
        &self,
        id: DeliveryId,
    ) -> Result<Option<ClaimedDelivery>, WebhookError> {
        let delivery = self
            .stores
            .deliveries
            .find_delivery_by_id(id)
            .await
            .or_not_found(WebhookError::DeliveryNotFound)?;

        let now = Utc::now();
        if delivery.status != DeliveryStatus::Scheduled || !delivery.is_due(now) {
            return Ok(None);
        }

        let subscription = match self
            .stores
            .subscriptions
            .find_subscription_by_id(delivery.subscription_id)
            .await
        {
            Ok(s) if s.is_active() => Some(s),
            Ok(_) | Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        let endpoint = match self
            .stores
            .endpoints
            .find_endpoint_by_id(delivery.endpoint_id)
            .await
        {
            Ok(e) if e.is_active() => Some(e),
            Ok(_) | Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let (Some(subscription), Some(endpoint)) = (subscription, endpoint) else {
            tracing::debug!(
                target: "webhook_delivery",
                delivery_id = %id,
                subscription_id = %delivery.subscription_id,
                endpoint_id = %delivery.endpoint_id,
                "Delivery parked, subscription or endpoint not active"
            );
            return Ok(None);
        };

        let outcome = self
            .stores
            .deliveries
            .compare_and_swap(
                id,
                CasPrecondition::status(DeliveryStatus::Scheduled).due_at(now),
                DeliveryPatch::status(DeliveryStatus::Processing),
            )
            .await?;

        match outcome {
            CasOutcome::Swapped(delivery) => {
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %id,
                    attempt_number = delivery.metadata.num_trials + 1,
                    "Delivery claimed"
                );
                Ok(Some(ClaimedDelivery {
                    delivery,
                    subscription,
                    endpoint,
                }))
            }
            CasOutcome::Rejected { current } => {
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %id,
                    current_status = %current,
                    "Delivery not claimable"
                );
                Ok(None)
            }
        }
    }

    /// Send the payload once. Never fails; the outcome classifies what happened.
    pub async fn attempt(
        &self,
        delivery: &EventDelivery,
        endpoint: &Endpoint,
        event: &Event,
    ) -> AttemptOutcome {
        let timestamp = Utc::now().timestamp().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(v) = HeaderValue::from_str(&timestamp) {
            headers.insert(crypto::HEADER_TIMESTAMP, v);
        }
        if let Ok(v) = HeaderValue::from_str(&event.id.to_string()) {
            headers.insert(crypto::HEADER_EVENT_ID, v);
        }
        if let Ok(v) = HeaderValue::from_str(&delivery.id.to_string()) {
            headers.insert(crypto::HEADER_DELIVERY_ID, v);
        }

        if let Some(secret) = endpoint.secret.as_deref().filter(|s| !s.is_empty()) {
            match crypto::signature_header(secret, &timestamp, &event.payload) {
                Ok(signature) => {
                    if let Ok(v) = HeaderValue::from_str(&signature) {
                        headers.insert(crypto::HEADER_SIGNATURE, v);
                    }
                }
                Err(e) => {
                    return AttemptOutcome::Failure {
                        failure: AttemptFailure::Request(e.to_string()),
                        response_body: None,
                        latency_ms: 0,
                    }
                }
            }
        }

        let start = Instant::now();
        let result = self
            .http_client
            .post(&endpoint.target_url)
            .headers(headers)
            .body(event.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let body = read_capped_body(response).await;
                let latency_ms = elapsed_ms(start);

                if response_accepted(status_code) {
                    AttemptOutcome::Success {
                        status_code,
                        response_body: body,
                        latency_ms,
                    }
                } else {
                    AttemptOutcome::Failure {
                        failure: AttemptFailure::Rejected {
                            status: status_code,
                        },
                        response_body: Some(body),
                        latency_ms,
                    }
                }
            }
            Err(e) => {
                let failure = if e.is_timeout() {
                    AttemptFailure::Timeout(self.config.timeout.as_secs())
                } else if e.is_connect() {
                    AttemptFailure::Connection(e.to_string())
                } else {
                    AttemptFailure::Request(e.to_string())
                };
                AttemptOutcome::Failure {
                    failure,
                    response_body: None,
                    latency_ms: elapsed_ms(start),
                }
            }
        }
    }

    /// Claim, attempt and record one delivery.
    ///
    /// Returns the status the delivery ended in, or `None` when it was not
    /// claimable.
    #[tracing::instrument(skip(self), fields(delivery_id = %id))]
    pub async fn process(&self, id: DeliveryId) -> Result<Option<DeliveryStatus>, WebhookError> {
        let Some(claimed) = self.claim_with_context(id).await? else {
            return Ok(None);
        };
        let ClaimedDelivery {
            delivery,
            subscription,
            endpoint,
        } = claimed;

        let event = match self.stores.events.find_event_by_id(delivery.event_id).await {
            Ok(event) => event,
            Err(StoreError::NotFound { .. }) => {
                let outcome = self
                    .stores
                    .deliveries
                    .compare_and_swap(
                        id,
                        CasPrecondition::status(DeliveryStatus::Processing),
                        DeliveryPatch::status(DeliveryStatus::Discarded)
                            .with_next_send_time(None)
                            .with_description("Event no longer exists"),
                    )
                    .await?;
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %id,
                    event_id = %delivery.event_id,
                    "Discarding delivery of a missing event"
                );
                return Ok(outcome.into_swapped().map(|d| d.status));
            }
            Err(e) => {
                self.release_claim(&delivery).await;
                return Err(e.into());
            }
        };

        let outcome = self.attempt(&delivery, &endpoint, &event).await;
        let attempt = outcome.to_attempt();

        let status = match &outcome {
            AttemptOutcome::Success { .. } => self.retry.record_success(&delivery, attempt).await?,
            AttemptOutcome::Failure { failure, .. } => {
                self.retry
                    .record_failure(
                        &delivery,
                        &subscription.retry_config,
                        attempt,
                        &failure.to_string(),
                    )
                    .await?
            }
        };

        if status.is_some() {
            self.alerts.observe(&subscription, outcome.is_success()).await;
        }
        Ok(status)
    }

    /// Return a claimed delivery to `Scheduled` without counting an attempt.
    async fn release_claim(&self, delivery: &EventDelivery) {
        if let Err(e) = self
            .stores
            .deliveries
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(DeliveryStatus::Processing),
                DeliveryPatch::status(DeliveryStatus::Scheduled),
            )
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to release claimed delivery"
            );
        }
    }
}

fn response_accepted(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

/// Read at most [`MAX_RESPONSE_BODY_BYTES`] of a response body. The rest is
/// never pulled off the connection.
async fn read_capped_body(mut response: reqwest::Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < MAX_RESPONSE_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_RESPONSE_BODY_BYTES - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    decode_capped(buf)
}

/// Lossy decode that drops a character split by the byte cap.
fn decode_capped(mut bytes: Vec<u8>) -> String {
    if let Err(e) = std::str::from_utf8(&bytes) {
        if e.error_len().is_none() {
            bytes.truncate(e.valid_up_to());
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_capped_drops_split_character() {
        let mut bytes = "ok ".as_bytes().to_vec();
        bytes.extend_from_slice(&"é".as_bytes()[..1]);
        assert_eq!(decode_capped(bytes), "ok ");
        assert_eq!(decode_capped(b"plain".to_vec()), "plain");
    }

    #[test]
    fn test_only_2xx_is_accepted() {
        assert!(response_accepted(200));
        assert!(response_accepted(204));
        assert!(response_accepted(299));
        assert!(!response_accepted(199));
        assert!(!response_accepted(301));
        assert!(!response_accepted(404));
        assert!(!response_accepted(503));
    }

    #[test]
    fn test_rejected_attempt_keeps_status_code() {
        let outcome = AttemptOutcome::Failure {
            failure: AttemptFailure::Rejected { status: 503 },
            response_body: Some("busy".to_string()),
            latency_ms: 12,
        };
        let attempt = outcome.to_attempt();
        assert!(!attempt.success);
        assert_eq!(attempt.status_code, Some(503));
        assert_eq!(attempt.error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_timeout_attempt_has_no_status_code() {
        let outcome = AttemptOutcome::Failure {
            failure: AttemptFailure::Timeout(10),
            response_body: None,
            latency_ms: 10_000,
        };
        let attempt = outcome.to_attempt();
        assert_eq!(attempt.status_code, None);
        assert_eq!(attempt.error.as_deref(), Some("Request timeout (10s)"));
    }

    #[test]
    fn test_config_builders() {
        let config = DispatcherConfig::default()
            .with_timeout(StdDuration::from_millis(250))
            .with_user_agent("test-agent");
        assert_eq!(config.timeout, StdDuration::from_millis(250));
        assert_eq!(config.user_agent, "test-agent");
    }
}
