//! Integration tests for consecutive-failure alerting.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

use courier_webhooks::models::{AlertConfiguration, RetryConfiguration, Subscription};

/// Test: Reaching the failure threshold emits exactly one alert intent.
#[tokio::test]
async fn test_alert_raised_at_threshold() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_times(u32::MAX))
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    let subscription = h
        .save_subscription(
            Subscription::new(&endpoint, "alerting")
                .with_retry(RetryConfiguration::linear(1, 10))
                .with_alert(AlertConfiguration {
                    threshold: 3,
                    count: 0,
                }),
        )
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    for _ in 0..2 {
        h.dispatcher.process(ids[0]).await.unwrap();
        h.make_due(ids[0]).await;
    }
    assert!(h.alerts.intents().is_empty());

    h.dispatcher.process(ids[0]).await.unwrap();
    let intents = h.alerts.intents();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].subscription_id, subscription.id);
    assert_eq!(intents[0].endpoint_id, endpoint.id);
    assert_eq!(intents[0].consecutive_failures, 3);

    // the counter restarted, so one more failure does not re-alert
    h.make_due(ids[0]).await;
    h.dispatcher.process(ids[0]).await.unwrap();
    assert_eq!(h.alerts.intents().len(), 1);
}

/// Test: A success between failures resets the streak.
#[tokio::test]
async fn test_success_resets_failure_streak() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_times(2))
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    let subscription = h
        .save_subscription(
            Subscription::new(&endpoint, "alerting")
                .with_retry(RetryConfiguration::linear(1, 10))
                .with_alert(AlertConfiguration {
                    threshold: 3,
                    count: 0,
                }),
        )
        .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    h.drive_to_terminal(ids[0]).await;
    assert!(h.alerts.intents().is_empty());
    assert_eq!(
        h.dispatcher
            .alerts()
            .consecutive_failures(subscription.id)
            .await,
        0
    );
}

/// Test: A zero threshold disables alerting.
#[tokio::test]
async fn test_zero_threshold_never_alerts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(FailingResponder::fail_times(u32::MAX))
        .mount(&mock_server)
        .await;

    let h = Harness::new();
    let endpoint = h.endpoint(&mock_server.uri(), None).await;
    h.save_subscription(
        Subscription::new(&endpoint, "silent")
            .with_retry(RetryConfiguration::linear(1, 5))
            .with_alert(AlertConfiguration {
                threshold: 0,
                count: 0,
            }),
    )
    .await;
    let (_, ids) = h.ingest("order.created", json!({"id": 1})).await;

    h.drive_to_terminal(ids[0]).await;
    assert!(h.alerts.intents().is_empty());
}
