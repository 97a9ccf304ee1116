//! Integration tests for retry scheduling.
//!
//! Tests verify backoff delays, eventual success after failures, and
//! discarding once the retry budget is spent.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

use courier_webhooks::models::{DeliveryStatus, RetryConfiguration};

/// Test: Exponential backoff waits 1s, 2s, 4s, then discards at the fourth trial.
#[tokio::test]
async fn test_exponential_backoff_then_discard() {
    let mock_server = MockServer::start().await;
    let failing = FailingResponder::fail_times(u32::MAX);
    Mock::given(method("POST"))
        .respond_with(failing.clone())
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    h.subscription(&endpoint, RetryConfiguration::exponential(1, 4))
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;
    let id = ids[0];

    for (trial, expected_delay) in [(1u32, 1i64), (2, 2), (3, 4)] {
        let status = h.dispatcher.process(id).await.unwrap();
        assert_eq!(status, Some(DeliveryStatus::Scheduled), "trial {trial}");

        let delivery = h.delivery(id).await;
        assert_eq!(delivery.metadata.num_trials, trial);
        let sent = delivery.metadata.last_sent_at.unwrap();
        let next = delivery.metadata.next_send_time.unwrap();
        assert_eq!((next - sent).num_seconds(), expected_delay, "trial {trial}");

        h.make_due(id).await;
    }

    let status = h.dispatcher.process(id).await.unwrap();
    assert_eq!(status, Some(DeliveryStatus::Discarded));

    let delivery = h.delivery(id).await;
    assert_eq!(delivery.metadata.num_trials, 4);
    assert_eq!(delivery.metadata.next_send_time, None);
    assert_eq!(delivery.attempts.len(), 4);
    assert_eq!(failing.attempt_count(), 4);

    // discarded deliveries are not attempted again
    assert_eq!(h.dispatcher.process(id).await.unwrap(), None);
    assert_eq!(failing.attempt_count(), 4);
}

/// Test: Linear backoff uses the same delay after every failure.
#[tokio::test]
async fn test_linear_backoff_constant_delay() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_times(u32::MAX))
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    h.subscription(&endpoint, RetryConfiguration::linear(7, 5))
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    for _ in 0..3 {
        h.dispatcher.process(ids[0]).await.unwrap();
        let delivery = h.delivery(ids[0]).await;
        let delay = delivery.metadata.next_send_time.unwrap()
            - delivery.metadata.last_sent_at.unwrap();
        assert_eq!(delay.num_seconds(), 7);
        h.make_due(ids[0]).await;
    }
}

/// Test: A delivery that fails twice and then succeeds ends in Success.
#[tokio::test]
async fn test_eventual_success_stops_retries() {
    let mock_server = MockServer::start().await;
    let failing = FailingResponder::fail_times(2);
    Mock::given(method("POST"))
        .respond_with(failing.clone())
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    h.subscription(&endpoint, RetryConfiguration::linear(1, 5))
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    let status = h.drive_to_terminal(ids[0]).await;
    assert_eq!(status, DeliveryStatus::Success);

    let delivery = h.delivery(ids[0]).await;
    assert_eq!(delivery.metadata.num_trials, 3);
    assert_eq!(failing.attempt_count(), 3);
    let outcomes: Vec<bool> = delivery.attempts.iter().map(|a| a.success).collect();
    assert_eq!(outcomes, vec![false, false, true]);
}

/// Test: The trial count grows by exactly one per attempt.
#[tokio::test]
async fn test_trial_count_monotonic() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_with_status(u32::MAX, 400))
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    h.subscription(&endpoint, RetryConfiguration::linear(1, 6))
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    let mut previous = h.delivery(ids[0]).await.metadata.num_trials;
    loop {
        let status = h.dispatcher.process(ids[0]).await.unwrap();
        let current = h.delivery(ids[0]).await.metadata.num_trials;
        assert_eq!(current, previous + 1);
        previous = current;
        if status != Some(DeliveryStatus::Scheduled) {
            break;
        }
        h.make_due(ids[0]).await;
    }
    assert_eq!(previous, 6);
}

/// Test: A retry count of one discards after the first failure.
#[tokio::test]
async fn test_single_attempt_budget() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_times(1))
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    h.subscription(&endpoint, RetryConfiguration::linear(1, 1))
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    assert_eq!(
        h.dispatcher.process(ids[0]).await.unwrap(),
        Some(DeliveryStatus::Discarded)
    );
}
