//! Domain records for events, endpoints, subscriptions and deliveries.
//!
//! Every record carries a [`DocumentStatus`]; nothing is physically deleted.
//! A record marked [`DocumentStatus::Deleted`] behaves as absent for reads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{
    ApplicationId, AttemptId, DeliveryId, EndpointId, EventId, GroupId, GroupScoped, SourceId,
    SubscriptionId,
};

use crate::error::WebhookError;

/// Maximum number of response body characters kept on an attempt record.
pub const MAX_RESPONSE_BODY_LEN: usize = 4096;

/// Clamp on a single retry delay, in seconds (one year). Guards the
/// saturating backoff against overflowing the next send timestamp.
pub const MAX_RETRY_DELAY_SECS: i64 = 365 * 24 * 60 * 60;

/// Soft-archive flag shared by all records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Active,
    Deleted,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An ingested fact, immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub app_id: ApplicationId,
    pub group_id: GroupId,
    pub event_type: String,
    /// Opaque payload bytes, forwarded to endpoints unchanged.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub document_status: DocumentStatus,
}

impl Event {
    pub fn new(
        app_id: ApplicationId,
        group_id: GroupId,
        event_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: EventId::new(),
            app_id,
            group_id,
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
            document_status: DocumentStatus::Active,
        }
    }

    /// Parse the payload as JSON, if it is JSON.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

impl GroupScoped for Event {
    fn group_id(&self) -> GroupId {
        self.group_id
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    #[default]
    Active,
    Inactive,
}

/// An HTTP receiver registered by an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub app_id: ApplicationId,
    pub group_id: GroupId,
    pub target_url: String,
    /// Shared secret used to sign outbound payloads.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub status: EndpointStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub document_status: DocumentStatus,
}

impl Endpoint {
    pub fn new(app_id: ApplicationId, group_id: GroupId, target_url: impl Into<String>) -> Self {
        Self {
            id: EndpointId::new(),
            app_id,
            group_id,
            target_url: target_url.into(),
            secret: None,
            status: EndpointStatus::Active,
            created_at: Utc::now(),
            document_status: DocumentStatus::Active,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: EndpointStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active && self.document_status == DocumentStatus::Active
    }
}

impl GroupScoped for Endpoint {
    fn group_id(&self) -> GroupId {
        self.group_id
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Incoming,
    #[default]
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Inactive,
}

impl SubscriptionStatus {
    /// The opposite status, used by the toggle operation.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    Linear,
    Exponential,
}

impl RetryStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Exponential => "exponential",
        }
    }
}

/// Retry policy attached to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfiguration {
    #[serde(rename = "type")]
    pub strategy: RetryStrategy,
    /// Base delay in seconds.
    pub duration_secs: u64,
    /// Maximum number of attempts before the delivery is discarded.
    pub retry_count: u32,
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Linear,
            duration_secs: 10,
            retry_count: 3,
        }
    }
}

impl RetryConfiguration {
    pub fn linear(duration_secs: u64, retry_count: u32) -> Self {
        Self {
            strategy: RetryStrategy::Linear,
            duration_secs,
            retry_count,
        }
    }

    pub fn exponential(duration_secs: u64, retry_count: u32) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            duration_secs,
            retry_count,
        }
    }

    pub fn base_delay(&self) -> Duration {
        let secs = i64::try_from(self.duration_secs).unwrap_or(MAX_RETRY_DELAY_SECS);
        Duration::seconds(secs.min(MAX_RETRY_DELAY_SECS))
    }
}

/// Consecutive-failure alerting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfiguration {
    /// Consecutive failed attempts that raise one alert.
    pub threshold: u32,
    /// Observations after which an un-fired counter starts over. Zero never resets.
    pub count: u32,
}

impl Default for AlertConfiguration {
    fn default() -> Self {
        Self {
            threshold: 5,
            count: 0,
        }
    }
}

/// Event type and payload predicate. Evaluation lives in [`crate::filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfiguration {
    /// Accepted event types. Empty or `"*"` accepts every type.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Optional payload expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
}

impl Default for FilterConfiguration {
    fn default() -> Self {
        Self {
            event_types: vec!["*".to_string()],
            filter: None,
        }
    }
}

impl FilterConfiguration {
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: types.into_iter().map(Into::into).collect(),
            filter: None,
        }
    }

    #[must_use]
    pub fn with_expression(mut self, expression: serde_json::Value) -> Self {
        self.filter = Some(expression);
        self
    }
}

/// Binding of an endpoint to a filter, a retry policy and an alert policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub name: String,
    pub group_id: GroupId,
    pub app_id: ApplicationId,
    pub endpoint_id: EndpointId,
    pub source_id: Option<SourceId>,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    pub status: SubscriptionStatus,
    pub filter_config: FilterConfiguration,
    pub retry_config: RetryConfiguration,
    pub alert_config: AlertConfiguration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub document_status: DocumentStatus,
}

impl Subscription {
    pub fn new(endpoint: &Endpoint, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::new(),
            name: name.into(),
            group_id: endpoint.group_id,
            app_id: endpoint.app_id,
            endpoint_id: endpoint.id,
            source_id: None,
            subscription_type: SubscriptionType::Outgoing,
            status: SubscriptionStatus::Active,
            filter_config: FilterConfiguration::default(),
            retry_config: RetryConfiguration::default(),
            alert_config: AlertConfiguration::default(),
            created_at: now,
            updated_at: now,
            document_status: DocumentStatus::Active,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterConfiguration) -> Self {
        self.filter_config = filter;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfiguration) -> Self {
        self.retry_config = retry;
        self
    }

    #[must_use]
    pub fn with_alert(mut self, alert: AlertConfiguration) -> Self {
        self.alert_config = alert;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source_id: SourceId) -> Self {
        self.source_id = Some(source_id);
        self.subscription_type = SubscriptionType::Incoming;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active && self.document_status == DocumentStatus::Active
    }
}

impl GroupScoped for Subscription {
    fn group_id(&self) -> GroupId {
        self.group_id
    }
}

// ---------------------------------------------------------------------------
// Event delivery
// ---------------------------------------------------------------------------

/// Lifecycle of an [`EventDelivery`].
///
/// ```text
/// Scheduled --claim--> Processing --ok--> Success
///                      Processing --fail, retries left--> Scheduled
///                      Processing --fail, exhausted--> Discarded
/// Success | Discarded --resend--> Scheduled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Scheduled,
    Processing,
    Success,
    Discarded,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 4] = [
        Self::Scheduled,
        Self::Processing,
        Self::Success,
        Self::Discarded,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Discarded => "discarded",
        }
    }

    /// Success and Discarded end the dispatch cycle until an operator resends.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Discarded)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "discarded" | "failure" => Ok(Self::Discarded),
            _ => Err(WebhookError::InvalidStatus(s.to_string())),
        }
    }
}

/// Attempt bookkeeping for a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub num_trials: u32,
    pub retry_limit: u32,
    pub strategy: RetryStrategy,
    pub interval_secs: u64,
    /// Set by a retry reschedule or an explicit resend, never by fan-out.
    pub next_send_time: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl DeliveryMetadata {
    pub fn from_retry(retry: &RetryConfiguration) -> Self {
        Self {
            num_trials: 0,
            retry_limit: retry.retry_count,
            strategy: retry.strategy,
            interval_secs: retry.duration_secs,
            next_send_time: None,
            last_sent_at: None,
        }
    }
}

/// One recorded attempt against an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: AttemptId,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(
        success: bool,
        status_code: Option<u16>,
        response_body: Option<String>,
        error: Option<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            status_code,
            response_body: response_body.map(truncate_body),
            error,
            latency_ms,
            success,
            attempted_at: Utc::now(),
        }
    }
}

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_RESPONSE_BODY_LEN {
        body
    } else {
        body.chars().take(MAX_RESPONSE_BODY_LEN).collect()
    }
}

/// The unit of work: delivering one event to one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDelivery {
    pub id: DeliveryId,
    pub event_id: EventId,
    pub app_id: ApplicationId,
    pub endpoint_id: EndpointId,
    pub subscription_id: SubscriptionId,
    pub group_id: GroupId,
    pub status: DeliveryStatus,
    pub metadata: DeliveryMetadata,
    pub description: Option<String>,
    #[serde(default)]
    pub attempts: Vec<DeliveryAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub document_status: DocumentStatus,
}

impl EventDelivery {
    /// A fresh `Scheduled` delivery, due immediately.
    pub fn scheduled(event: &Event, subscription: &Subscription) -> Self {
        let now = Utc::now();
        Self {
            id: DeliveryId::new(),
            event_id: event.id,
            app_id: event.app_id,
            endpoint_id: subscription.endpoint_id,
            subscription_id: subscription.id,
            group_id: event.group_id,
            status: DeliveryStatus::Scheduled,
            metadata: DeliveryMetadata::from_retry(&subscription.retry_config),
            description: None,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
            document_status: DocumentStatus::Active,
        }
    }

    /// Due when no next send time is set or it has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.metadata.next_send_time.map_or(true, |at| at <= now)
    }

    pub fn last_attempt(&self) -> Option<&DeliveryAttempt> {
        self.attempts.last()
    }
}

impl GroupScoped for EventDelivery {
    fn group_id(&self) -> GroupId {
        self.group_id
    }
}
