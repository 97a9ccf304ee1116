//! In-memory store.
//!
//! Reference backend for the store traits, used by tests and by single-node
//! deployments that accept losing state on restart. Every delivery write,
//! including compare-and-swap, happens under one write lock, so writes are
//! linearizable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use courier_core::{
    ApplicationId, DeliveryId, EndpointId, EventId, GroupId, SubscriptionId,
};

use super::{
    CasOutcome, CasPrecondition, DeliveryFilter, DeliveryPatch, DeliveryStore, EndpointStore,
    EventFilter, EventStore, Pageable, PaginationData, SortOrder, StoreError, StoreResult,
    SubscriptionStore,
};
use crate::models::{
    DocumentStatus, Endpoint, EndpointStatus, Event, EventDelivery, Subscription,
    SubscriptionStatus,
};

#[derive(Default)]
struct DeliveryTable {
    by_id: HashMap<DeliveryId, EventDelivery>,
    by_pair: HashMap<(EventId, SubscriptionId), DeliveryId>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    events: RwLock<HashMap<EventId, Event>>,
    endpoints: RwLock<HashMap<EndpointId, Endpoint>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    deliveries: RwLock<DeliveryTable>,
    rejected_subscriptions: RwLock<HashSet<SubscriptionId>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make delivery creation fail for one subscription (fault injection for tests).
    pub async fn reject_deliveries_for(&self, subscription_id: SubscriptionId) {
        self.rejected_subscriptions
            .write()
            .await
            .insert(subscription_id);
    }

    /// Number of delivery records, including soft-deleted ones.
    pub async fn delivery_count(&self) -> usize {
        self.deliveries.read().await.by_id.len()
    }

    /// Clear all data.
    pub async fn clear(&self) {
        self.events.write().await.clear();
        self.endpoints.write().await.clear();
        self.subscriptions.write().await.clear();
        let mut deliveries = self.deliveries.write().await;
        deliveries.by_id.clear();
        deliveries.by_pair.clear();
    }

    /// Predicate for `DeliveryFilter::active_targets_only`, evaluated against
    /// a snapshot of the subscription and endpoint tables.
    async fn target_check(&self, filter: &DeliveryFilter) -> impl Fn(&EventDelivery) -> bool {
        let targets = if filter.active_targets_only {
            let subscriptions: HashSet<SubscriptionId> = self
                .subscriptions
                .read()
                .await
                .values()
                .filter(|s| s.document_status == DocumentStatus::Active && s.is_active())
                .map(|s| s.id)
                .collect();
            let endpoints: HashSet<EndpointId> = self
                .endpoints
                .read()
                .await
                .values()
                .filter(|e| e.document_status == DocumentStatus::Active && e.is_active())
                .map(|e| e.id)
                .collect();
            Some((subscriptions, endpoints))
        } else {
            None
        };
        move |d: &EventDelivery| {
            targets.as_ref().map_or(true, |(subscriptions, endpoints)| {
                subscriptions.contains(&d.subscription_id) && endpoints.contains(&d.endpoint_id)
            })
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

fn page_of<T: Clone>(
    mut items: Vec<T>,
    pageable: Pageable,
    sort_key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, uuid::Uuid),
) -> (Vec<T>, PaginationData) {
    items.sort_by_key(|item| sort_key(item));
    if pageable.sort == SortOrder::Desc {
        items.reverse();
    }
    let total = items.len() as u64;
    let offset = usize::try_from(pageable.offset()).unwrap_or(usize::MAX);
    let per_page = usize::try_from(pageable.per_page).unwrap_or(usize::MAX);
    let page = items.into_iter().skip(offset).take(per_page).collect();
    (page, pageable.pagination(total))
}

#[async_trait::async_trait]
impl EventStore for InMemoryStore {
    async fn create_event(&self, event: &Event) -> StoreResult<()> {
        self.check_available()?;
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(format!("event {}", event.id)));
        }
        events.insert(event.id, event.clone());
        Ok(())
    }

    async fn find_event_by_id(&self, id: EventId) -> StoreResult<Event> {
        self.check_available()?;
        self.events
            .read()
            .await
            .get(&id)
            .filter(|e| e.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("event", id))
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        pageable: Pageable,
    ) -> StoreResult<(Vec<Event>, PaginationData)> {
        self.check_available()?;
        let matching: Vec<Event> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.document_status == DocumentStatus::Active && filter.matches(e))
            .cloned()
            .collect();
        Ok(page_of(matching, pageable, |e| (e.created_at, *e.id.as_uuid())))
    }
}

#[async_trait::async_trait]
impl EndpointStore for InMemoryStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        self.check_available()?;
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(&endpoint.id) {
            return Err(StoreError::Duplicate(format!("endpoint {}", endpoint.id)));
        }
        endpoints.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn find_endpoint_by_id(&self, id: EndpointId) -> StoreResult<Endpoint> {
        self.check_available()?;
        self.endpoints
            .read()
            .await
            .get(&id)
            .filter(|e| e.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("endpoint", id))
    }

    async fn list_endpoints_by_app(
        &self,
        group_id: GroupId,
        app_id: ApplicationId,
    ) -> StoreResult<Vec<Endpoint>> {
        self.check_available()?;
        let mut endpoints: Vec<Endpoint> = self
            .endpoints
            .read()
            .await
            .values()
            .filter(|e| {
                e.group_id == group_id
                    && e.app_id == app_id
                    && e.document_status == DocumentStatus::Active
            })
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| (e.created_at, e.id));
        Ok(endpoints)
    }

    async fn update_endpoint_status(
        &self,
        id: EndpointId,
        status: EndpointStatus,
    ) -> StoreResult<Endpoint> {
        self.check_available()?;
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(&id)
            .filter(|e| e.document_status == DocumentStatus::Active)
            .ok_or_else(|| StoreError::not_found("endpoint", id))?;
        endpoint.status = status;
        Ok(endpoint.clone())
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn create_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Duplicate(format!(
                "subscription {}",
                subscription.id
            )));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription_by_id(&self, id: SubscriptionId) -> StoreResult<Subscription> {
        self.check_available()?;
        self.subscriptions
            .read()
            .await
            .get(&id)
            .filter(|s| s.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("subscription", id))
    }

    async fn list_subscriptions_by_app(
        &self,
        group_id: GroupId,
        app_id: ApplicationId,
    ) -> StoreResult<Vec<Subscription>> {
        self.check_available()?;
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| {
                s.group_id == group_id
                    && s.app_id == app_id
                    && s.document_status == DocumentStatus::Active
            })
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| (s.created_at, s.id));
        Ok(subscriptions)
    }

    async fn update_subscription_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
    ) -> StoreResult<Subscription> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(&id)
            .filter(|s| s.document_status == DocumentStatus::Active)
            .ok_or_else(|| StoreError::not_found("subscription", id))?;
        subscription.status = status;
        subscription.updated_at = chrono::Utc::now();
        Ok(subscription.clone())
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
    ) -> StoreResult<Subscription> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions
            .get_mut(&subscription.id)
            .filter(|s| s.document_status == DocumentStatus::Active)
            .ok_or_else(|| StoreError::not_found("subscription", subscription.id))?;
        stored.name.clone_from(&subscription.name);
        stored.filter_config = subscription.filter_config.clone();
        stored.retry_config = subscription.retry_config;
        stored.alert_config = subscription.alert_config;
        stored.updated_at = chrono::Utc::now();
        Ok(stored.clone())
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> StoreResult<()> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions
            .get_mut(&id)
            .filter(|s| s.document_status == DocumentStatus::Active)
            .ok_or_else(|| StoreError::not_found("subscription", id))?;
        stored.document_status = DocumentStatus::Deleted;
        stored.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeliveryStore for InMemoryStore {
    async fn create_delivery(&self, delivery: &EventDelivery) -> StoreResult<()> {
        self.check_available()?;
        if self
            .rejected_subscriptions
            .read()
            .await
            .contains(&delivery.subscription_id)
        {
            return Err(StoreError::Unavailable(format!(
                "writes rejected for subscription {}",
                delivery.subscription_id
            )));
        }

        let mut table = self.deliveries.write().await;
        let pair = (delivery.event_id, delivery.subscription_id);
        if table.by_pair.contains_key(&pair) {
            return Err(StoreError::Duplicate(format!(
                "delivery for event {} and subscription {}",
                delivery.event_id, delivery.subscription_id
            )));
        }
        if table.by_id.contains_key(&delivery.id) {
            return Err(StoreError::Duplicate(format!("delivery {}", delivery.id)));
        }
        table.by_pair.insert(pair, delivery.id);
        table.by_id.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn find_delivery_by_id(&self, id: DeliveryId) -> StoreResult<EventDelivery> {
        self.check_available()?;
        self.deliveries
            .read()
            .await
            .by_id
            .get(&id)
            .filter(|d| d.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| StoreError::not_found("delivery", id))
    }

    async fn find_delivery(
        &self,
        event_id: EventId,
        subscription_id: SubscriptionId,
    ) -> StoreResult<EventDelivery> {
        self.check_available()?;
        let table = self.deliveries.read().await;
        table
            .by_pair
            .get(&(event_id, subscription_id))
            .and_then(|id| table.by_id.get(id))
            .filter(|d| d.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found("delivery", format!("{event_id}/{subscription_id}"))
            })
    }

    async fn list_deliveries(
        &self,
        filter: &DeliveryFilter,
        pageable: Pageable,
    ) -> StoreResult<(Vec<EventDelivery>, PaginationData)> {
        self.check_available()?;
        let targets_active = self.target_check(filter).await;
        let matching: Vec<EventDelivery> = self
            .deliveries
            .read()
            .await
            .by_id
            .values()
            .filter(|d| {
                d.document_status == DocumentStatus::Active && filter.matches(d) && targets_active(d)
            })
            .cloned()
            .collect();
        Ok(page_of(matching, pageable, |d| (d.created_at, *d.id.as_uuid())))
    }

    async fn count_deliveries(&self, filter: &DeliveryFilter) -> StoreResult<u64> {
        self.check_available()?;
        let targets_active = self.target_check(filter).await;
        let count = self
            .deliveries
            .read()
            .await
            .by_id
            .values()
            .filter(|d| {
                d.document_status == DocumentStatus::Active && filter.matches(d) && targets_active(d)
            })
            .count();
        Ok(count as u64)
    }

    async fn update_delivery(
        &self,
        id: DeliveryId,
        patch: DeliveryPatch,
    ) -> StoreResult<EventDelivery> {
        self.check_available()?;
        let mut table = self.deliveries.write().await;
        let delivery = table
            .by_id
            .get_mut(&id)
            .filter(|d| d.document_status == DocumentStatus::Active)
            .ok_or_else(|| StoreError::not_found("delivery", id))?;
        patch.apply(delivery);
        Ok(delivery.clone())
    }

    async fn compare_and_swap(
        &self,
        id: DeliveryId,
        precondition: CasPrecondition,
        patch: DeliveryPatch,
    ) -> StoreResult<CasOutcome> {
        self.check_available()?;
        let mut table = self.deliveries.write().await;
        let delivery = table
            .by_id
            .get_mut(&id)
            .filter(|d| d.document_status == DocumentStatus::Active)
            .ok_or_else(|| StoreError::not_found("delivery", id))?;

        if !precondition.holds(delivery) {
            return Ok(CasOutcome::Rejected {
                current: delivery.status,
            });
        }
        patch.apply(delivery);
        Ok(CasOutcome::Swapped(delivery.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryStatus;
    use chrono::{Duration, Utc};

    fn seed() -> (Event, Subscription) {
        let app = ApplicationId::new();
        let group = GroupId::new();
        let endpoint = Endpoint::new(app, group, "https://example.com/hook");
        let subscription = Subscription::new(&endpoint, "orders");
        let event = Event::new(app, group, "order.created", b"{}".to_vec());
        (event, subscription)
    }

    #[tokio::test]
    async fn test_create_delivery_rejects_duplicate_pair() {
        let store = InMemoryStore::new();
        let (event, subscription) = seed();

        let first = EventDelivery::scheduled(&event, &subscription);
        let second = EventDelivery::scheduled(&event, &subscription);
        store.create_delivery(&first).await.unwrap();

        let err = store.create_delivery(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.delivery_count().await, 1);
    }

    #[tokio::test]
    async fn test_deleted_subscription_is_hidden() {
        let store = InMemoryStore::new();
        let (_, subscription) = seed();
        store.create_subscription(&subscription).await.unwrap();

        store.delete_subscription(subscription.id).await.unwrap();

        let err = store
            .find_subscription_by_id(subscription.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store
            .list_subscriptions_by_app(subscription.group_id, subscription.app_id)
            .await
            .unwrap()
            .is_empty());
        // a second delete and an edit both see a missing record
        assert!(store.delete_subscription(subscription.id).await.is_err());
        assert!(store.update_subscription(&subscription).await.is_err());
    }

    #[tokio::test]
    async fn test_find_missing_delivery_is_typed_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .find_delivery_by_id(DeliveryId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "delivery", .. }));
    }

    #[tokio::test]
    async fn test_compare_and_swap_checks_status_and_due_time() {
        let store = InMemoryStore::new();
        let (event, subscription) = seed();
        let mut delivery = EventDelivery::scheduled(&event, &subscription);
        let now = Utc::now();
        delivery.metadata.next_send_time = Some(now + Duration::seconds(60));
        store.create_delivery(&delivery).await.unwrap();

        let not_due = store
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(DeliveryStatus::Scheduled).due_at(now),
                DeliveryPatch::status(DeliveryStatus::Processing),
            )
            .await
            .unwrap();
        assert_eq!(
            not_due,
            CasOutcome::Rejected {
                current: DeliveryStatus::Scheduled
            }
        );

        let later = now + Duration::seconds(61);
        let claimed = store
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(DeliveryStatus::Scheduled).due_at(later),
                DeliveryPatch::status(DeliveryStatus::Processing),
            )
            .await
            .unwrap();
        assert!(claimed.is_swapped());

        let again = store
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(DeliveryStatus::Scheduled).due_at(later),
                DeliveryPatch::status(DeliveryStatus::Processing),
            )
            .await
            .unwrap();
        assert_eq!(
            again,
            CasOutcome::Rejected {
                current: DeliveryStatus::Processing
            }
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = store.find_event_by_id(EventId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(false);
        assert!(matches!(
            store.find_event_by_id(EventId::new()).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_deliveries_pages_in_creation_order() {
        let store = InMemoryStore::new();
        let (event, subscription) = seed();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut sub = subscription.clone();
            sub.id = SubscriptionId::new();
            let mut delivery = EventDelivery::scheduled(&event, &sub);
            delivery.created_at = base + Duration::seconds(i);
            ids.push(delivery.id);
            store.create_delivery(&delivery).await.unwrap();
        }

        let filter = DeliveryFilter::for_group(event.group_id).with_event(event.id);
        let (page, meta) = store
            .list_deliveries(&filter, Pageable::new(1, 2).with_sort(SortOrder::Asc))
            .await
            .unwrap();
        assert_eq!(meta.total, 5);
        assert_eq!(meta.total_page, 3);
        assert_eq!(page.iter().map(|d| d.id).collect::<Vec<_>>(), ids[..2]);

        let (desc, _) = store
            .list_deliveries(&filter, Pageable::new(1, 1))
            .await
            .unwrap();
        assert_eq!(desc[0].id, ids[4]);
    }
}
