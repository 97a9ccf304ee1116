//! Integration tests for event ingestion and fan-out.
//!
//! Tests verify one delivery per matching subscription, idempotence on
//! repeated fan-out, and rejection of events with no matching endpoint.

mod common;

use common::*;
use serde_json::json;

use courier_webhooks::models::{
    DeliveryStatus, FilterConfiguration, RetryConfiguration, Subscription, SubscriptionStatus,
};
use courier_webhooks::services::fan_out::{FanOutEngine, FanOutOutcome};
use courier_webhooks::services::matcher::SubscriptionMatcher;
use courier_webhooks::store::DeliveryFilter;
use courier_webhooks::{CreateEvent, WebhookError};

/// Test: Each matching subscription gets exactly one scheduled delivery.
#[tokio::test]
async fn test_fan_out_creates_one_delivery_per_subscription() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    h.subscription(&endpoint, RetryConfiguration::default()).await;
    h.subscription(&endpoint, RetryConfiguration::default()).await;

    let (event, ids) = h.ingest("order.created", json!({"id": 1})).await;
    assert_eq!(ids.len(), 2);

    for id in ids {
        let delivery = h.delivery(id).await;
        assert_eq!(delivery.event_id, event.id);
        assert_eq!(delivery.status, DeliveryStatus::Scheduled);
        assert_eq!(delivery.metadata.num_trials, 0);
        assert_eq!(delivery.group_id, h.group_id);
    }
}

/// Test: Fanning out the same event twice does not duplicate deliveries.
#[tokio::test]
async fn test_fan_out_is_idempotent() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    h.subscription(&endpoint, RetryConfiguration::default()).await;

    let (event, first_ids) = h.ingest("order.created", json!({"id": 1})).await;
    let subscriptions = SubscriptionMatcher::new(h.stores.clone())
        .match_event(&event)
        .await
        .unwrap();

    let engine = FanOutEngine::new(h.stores.clone());
    let second = engine.fan_out(&event, &subscriptions).await;
    let third = engine.fan_out(&event, &subscriptions).await;

    assert_eq!(second.created_count(), 0);
    assert_eq!(second.existing_ids(), first_ids);
    assert_eq!(third.existing_ids(), first_ids);
    assert_eq!(h.memory.delivery_count().await, 1);
}

/// Test: Concurrent fan-outs of one event converge on a single delivery.
#[tokio::test]
async fn test_concurrent_fan_out_converges() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    h.subscription(&endpoint, RetryConfiguration::default()).await;

    let (event, first_ids) = h.ingest("order.created", json!({"id": 1})).await;
    let subscriptions = SubscriptionMatcher::new(h.stores.clone())
        .match_event(&event)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = FanOutEngine::new(h.stores.clone());
        let event = event.clone();
        let subscriptions = subscriptions.clone();
        handles.push(tokio::spawn(async move {
            engine.fan_out(&event, &subscriptions).await
        }));
    }
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.delivery_ids(), first_ids);
    }
    assert_eq!(h.memory.delivery_count().await, 1);
}

/// Test: No matching endpoint is a client error and persists nothing.
#[tokio::test]
async fn test_no_matching_endpoint_rejected_without_side_effects() {
    let h = Harness::new();

    let input = CreateEvent::json(h.app_id, "order.created", &json!({"id": 1})).unwrap();
    let err = h
        .event_service()
        .create_event(h.group_id, input)
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookError::NoMatchingEndpoint));
    assert_eq!(h.memory.delivery_count().await, 0);
    let count = h
        .stores
        .deliveries
        .count_deliveries(&DeliveryFilter::for_group(h.group_id))
        .await
        .unwrap();
    assert_eq!(count, 0);
}

/// Test: Inactive subscriptions and filtered-out event types do not match.
#[tokio::test]
async fn test_inactive_and_filtered_subscriptions_skipped() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    h.save_subscription(
        Subscription::new(&endpoint, "inactive").with_status(SubscriptionStatus::Inactive),
    )
    .await;
    h.save_subscription(
        Subscription::new(&endpoint, "users-only")
            .with_filter(FilterConfiguration::for_types(["user.created"])),
    )
    .await;
    let orders = h
        .save_subscription(
            Subscription::new(&endpoint, "orders")
                .with_filter(FilterConfiguration::for_types(["order.created"])),
        )
        .await;

    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;
    assert_eq!(ids.len(), 1);
    assert_eq!(h.delivery(ids[0]).await.subscription_id, orders.id);
}

/// Test: Payload filter expressions narrow matching subscriptions.
#[tokio::test]
async fn test_payload_filter_expression_applied() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    h.save_subscription(
        Subscription::new(&endpoint, "eu-only").with_filter(
            FilterConfiguration::default().with_expression(json!({"region": "eu"})),
        ),
    )
    .await;

    let (_, ids) = h.ingest("order.created", json!({"region": "eu"})).await;
    assert_eq!(ids.len(), 1);

    let input = CreateEvent::json(h.app_id, "order.created", &json!({"region": "us"})).unwrap();
    let err = h
        .event_service()
        .create_event(h.group_id, input)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::NoMatchingEndpoint));
}

/// Test: One failing subscription does not stop fan-out to the others.
#[tokio::test]
async fn test_partial_fan_out_reports_failures() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    let healthy = h.subscription(&endpoint, RetryConfiguration::default()).await;
    let broken = h.subscription(&endpoint, RetryConfiguration::default()).await;
    h.memory.reject_deliveries_for(broken.id).await;

    let input = CreateEvent::json(h.app_id, "order.created", &json!({"id": 1})).unwrap();
    let (_, report) = h
        .event_service()
        .create_event(h.group_id, input)
        .await
        .unwrap();

    assert_eq!(report.scheduled_count(), 1);
    assert_eq!(report.failed_count(), 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.subscription_id == broken.id)
        .unwrap();
    assert!(matches!(failed.outcome, FanOutOutcome::Failed { .. }));
    let ok = report
        .outcomes
        .iter()
        .find(|o| o.subscription_id == healthy.id)
        .unwrap();
    assert!(matches!(ok.outcome, FanOutOutcome::Created { .. }));
}

/// Test: When no delivery at all can be scheduled, ingestion fails.
#[tokio::test]
async fn test_total_fan_out_failure_is_an_error() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    let broken = h.subscription(&endpoint, RetryConfiguration::default()).await;
    h.memory.reject_deliveries_for(broken.id).await;

    let input = CreateEvent::json(h.app_id, "order.created", &json!({"id": 1})).unwrap();
    let err = h
        .event_service()
        .create_event(h.group_id, input)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::FanOutFailed));
}

/// Test: Replay creates deliveries for subscriptions added after ingestion.
#[tokio::test]
async fn test_replay_picks_up_new_subscriptions() {
    let h = Harness::new();
    let endpoint = h.endpoint("http://127.0.0.1:9/a", None).await;
    h.subscription(&endpoint, RetryConfiguration::default()).await;
    let (event, _) = h.ingest("order.created", json!({"id": 1})).await;

    h.subscription(&endpoint, RetryConfiguration::default()).await;
    let report = h
        .event_service()
        .replay_event(h.group_id, event.id)
        .await
        .unwrap();

    assert_eq!(report.fan_out.created_count(), 1);
    assert_eq!(report.fan_out.existing_ids().len(), 1);
    // the existing delivery is still Scheduled, so it is not resent
    assert_eq!(report.resent, 0);
    assert_eq!(h.memory.delivery_count().await, 2);
}
