//! Delivery record store contract.
//!
//! The core never talks to a database driver directly. It consumes the four
//! async store traits below, which return typed [`StoreResult`]s instead of
//! driver sentinels, and serialize concurrent writers on a delivery through
//! [`DeliveryStore::compare_and_swap`].

mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{
    ApplicationId, DeliveryId, EndpointId, EventId, GroupId, SubscriptionId,
};

use crate::models::{
    DeliveryAttempt, DeliveryStatus, Endpoint, EndpointStatus, Event, EventDelivery, Subscription,
    SubscriptionStatus,
};

pub use memory::InMemoryStore;

/// Typed store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pageable {
    pub page: u64,
    pub per_page: u64,
    pub sort: SortOrder,
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            sort: SortOrder::Desc,
        }
    }
}

impl Pageable {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
            sort: SortOrder::Desc,
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Records to skip. Saturates for pages far past the end.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    pub fn pagination(&self, total: u64) -> PaginationData {
        let total_page = total.div_ceil(self.per_page);
        PaginationData {
            total,
            page: self.page,
            per_page: self.per_page,
            prev_page: self.page.saturating_sub(1).max(1),
            next_page: if self.page < total_page {
                self.page + 1
            } else {
                self.page
            },
            total_page,
        }
    }
}

/// Page metadata returned alongside listed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationData {
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub prev_page: u64,
    pub next_page: u64,
    pub total_page: u64,
}

// ---------------------------------------------------------------------------
// Filters and patches
// ---------------------------------------------------------------------------

/// Event list filter. Always scoped to one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub group_id: GroupId,
    pub app_id: Option<ApplicationId>,
    pub event_type: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn for_group(group_id: GroupId) -> Self {
        Self {
            group_id,
            app_id: None,
            event_type: None,
            created_after: None,
            created_before: None,
        }
    }

    #[must_use]
    pub fn with_app(mut self, app_id: ApplicationId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.group_id == self.group_id
            && self.app_id.map_or(true, |a| event.app_id == a)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
            && self.created_after.map_or(true, |t| event.created_at >= t)
            && self.created_before.map_or(true, |t| event.created_at <= t)
    }
}

/// Delivery query filter.
///
/// Unset fields do not constrain. An empty `statuses` list matches every status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    pub group_id: Option<GroupId>,
    pub app_id: Option<ApplicationId>,
    pub event_id: Option<EventId>,
    pub subscription_id: Option<SubscriptionId>,
    pub endpoint_id: Option<EndpointId>,
    pub statuses: Vec<DeliveryStatus>,
    /// Only deliveries due at or before this instant (unset next send time counts as due).
    pub due_before: Option<DateTime<Utc>>,
    /// Only deliveries last written strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Only deliveries whose subscription and endpoint both exist and are active.
    pub active_targets_only: bool,
}

impl DeliveryFilter {
    pub fn for_group(group_id: GroupId) -> Self {
        Self {
            group_id: Some(group_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_app(mut self, app_id: ApplicationId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    #[must_use]
    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    #[must_use]
    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = DeliveryStatus>) -> Self {
        for status in statuses {
            self = self.with_status(status);
        }
        self
    }

    #[must_use]
    pub fn due_before(mut self, at: DateTime<Utc>) -> Self {
        self.due_before = Some(at);
        self
    }

    #[must_use]
    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    #[must_use]
    pub fn with_active_targets(mut self) -> Self {
        self.active_targets_only = true;
        self
    }

    /// Field-level match. `active_targets_only` needs the subscription and
    /// endpoint records and is evaluated by the store.
    pub fn matches(&self, delivery: &EventDelivery) -> bool {
        self.group_id.map_or(true, |g| delivery.group_id == g)
            && self.app_id.map_or(true, |a| delivery.app_id == a)
            && self.event_id.map_or(true, |e| delivery.event_id == e)
            && self
                .subscription_id
                .map_or(true, |s| delivery.subscription_id == s)
            && self.endpoint_id.map_or(true, |e| delivery.endpoint_id == e)
            && (self.statuses.is_empty() || self.statuses.contains(&delivery.status))
            && self.due_before.map_or(true, |t| delivery.is_due(t))
            && self.updated_before.map_or(true, |t| delivery.updated_at < t)
            && self.created_after.map_or(true, |t| delivery.created_at >= t)
            && self.created_before.map_or(true, |t| delivery.created_at <= t)
    }
}

/// Partial update of a delivery. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryPatch {
    pub status: Option<DeliveryStatus>,
    pub num_trials: Option<u32>,
    pub retry_limit: Option<u32>,
    /// `Some(None)` clears the next send time.
    pub next_send_time: Option<Option<DateTime<Utc>>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub attempt: Option<DeliveryAttempt>,
}

impl DeliveryPatch {
    pub fn status(status: DeliveryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_num_trials(mut self, num_trials: u32) -> Self {
        self.num_trials = Some(num_trials);
        self
    }

    #[must_use]
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    #[must_use]
    pub fn with_next_send_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_send_time = Some(at);
        self
    }

    #[must_use]
    pub fn with_last_sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_sent_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: DeliveryAttempt) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Apply the patch in place and bump `updated_at`.
    pub fn apply(self, delivery: &mut EventDelivery) {
        if let Some(status) = self.status {
            delivery.status = status;
        }
        if let Some(num_trials) = self.num_trials {
            delivery.metadata.num_trials = num_trials;
        }
        if let Some(retry_limit) = self.retry_limit {
            delivery.metadata.retry_limit = retry_limit;
        }
        if let Some(next_send_time) = self.next_send_time {
            delivery.metadata.next_send_time = next_send_time;
        }
        if let Some(last_sent_at) = self.last_sent_at {
            delivery.metadata.last_sent_at = Some(last_sent_at);
        }
        if let Some(description) = self.description {
            delivery.description = Some(description);
        }
        if let Some(attempt) = self.attempt {
            delivery.attempts.push(attempt);
        }
        delivery.updated_at = Utc::now();
    }
}

/// Condition a delivery must satisfy for [`DeliveryStore::compare_and_swap`] to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasPrecondition {
    pub expected_status: DeliveryStatus,
    /// Require the delivery to be due at this instant.
    pub due_at: Option<DateTime<Utc>>,
    /// Require the last write to predate this instant.
    pub updated_before: Option<DateTime<Utc>>,
}

impl CasPrecondition {
    pub fn status(expected_status: DeliveryStatus) -> Self {
        Self {
            expected_status,
            due_at: None,
            updated_before: None,
        }
    }

    #[must_use]
    pub fn due_at(mut self, now: DateTime<Utc>) -> Self {
        self.due_at = Some(now);
        self
    }

    #[must_use]
    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn holds(&self, delivery: &EventDelivery) -> bool {
        delivery.status == self.expected_status
            && self.due_at.map_or(true, |now| delivery.is_due(now))
            && self
                .updated_before
                .map_or(true, |at| delivery.updated_at < at)
    }
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The precondition held and the patch was written.
    Swapped(EventDelivery),
    /// The precondition failed. Nothing was written.
    Rejected { current: DeliveryStatus },
}

impl CasOutcome {
    pub fn into_swapped(self) -> Option<EventDelivery> {
        match self {
            Self::Swapped(delivery) => Some(delivery),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_swapped(&self) -> bool {
        matches!(self, Self::Swapped(_))
    }
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: &Event) -> StoreResult<()>;

    /// Soft-deleted events are reported as `NotFound`.
    async fn find_event_by_id(&self, id: EventId) -> StoreResult<Event>;

    async fn list_events(
        &self,
        filter: &EventFilter,
        pageable: Pageable,
    ) -> StoreResult<(Vec<Event>, PaginationData)>;
}

#[async_trait::async_trait]
pub trait EndpointStore: Send + Sync {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()>;

    async fn find_endpoint_by_id(&self, id: EndpointId) -> StoreResult<Endpoint>;

    async fn list_endpoints_by_app(
        &self,
        group_id: GroupId,
        app_id: ApplicationId,
    ) -> StoreResult<Vec<Endpoint>>;

    async fn update_endpoint_status(
        &self,
        id: EndpointId,
        status: EndpointStatus,
    ) -> StoreResult<Endpoint>;
}

#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn create_subscription(&self, subscription: &Subscription) -> StoreResult<()>;

    async fn find_subscription_by_id(&self, id: SubscriptionId) -> StoreResult<Subscription>;

    /// All non-deleted subscriptions of an application, whatever their status.
    async fn list_subscriptions_by_app(
        &self,
        group_id: GroupId,
        app_id: ApplicationId,
    ) -> StoreResult<Vec<Subscription>>;

    async fn update_subscription_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
    ) -> StoreResult<Subscription>;

    /// Replace the editable fields (name, filter, retry and alert policy) of a
    /// live subscription.
    async fn update_subscription(&self, subscription: &Subscription)
        -> StoreResult<Subscription>;

    /// Soft delete. The record is kept but reads report it as `NotFound`.
    async fn delete_subscription(&self, id: SubscriptionId) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Fails with `Duplicate` when the (event, subscription) pair already has a delivery.
    async fn create_delivery(&self, delivery: &EventDelivery) -> StoreResult<()>;

    async fn find_delivery_by_id(&self, id: DeliveryId) -> StoreResult<EventDelivery>;

    async fn find_delivery(
        &self,
        event_id: EventId,
        subscription_id: SubscriptionId,
    ) -> StoreResult<EventDelivery>;

    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        pageable: Pageable,
    ) -> StoreResult<(Vec<EventDelivery>, PaginationData)>;

    async fn count_deliveries(&self, filter: &DeliveryFilter) -> StoreResult<u64>;

    /// Unconditional update.
    async fn update_delivery(&self, id: DeliveryId, patch: DeliveryPatch)
        -> StoreResult<EventDelivery>;

    /// Apply `patch` only if `precondition` holds, atomically.
    async fn compare_and_swap(
        &self,
        id: DeliveryId,
        precondition: CasPrecondition,
        patch: DeliveryPatch,
    ) -> StoreResult<CasOutcome>;
}

/// Store handles passed to every component at construction.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub endpoints: Arc<dyn EndpointStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
}

impl Stores {
    /// Back every store with one shared [`InMemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(InMemoryStore::new()))
    }

    pub fn from_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            events: store.clone(),
            endpoints: store.clone(),
            subscriptions: store.clone(),
            deliveries: store,
        }
    }
}
