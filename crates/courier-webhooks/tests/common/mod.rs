//! Common test utilities for courier-webhooks integration tests.
//!
//! Provides an in-memory harness wired like the server, wiremock responders,
//! and seeding helpers for endpoints, subscriptions and events.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use wiremock::{Request, Respond, ResponseTemplate};

use courier_core::{ApplicationId, DeliveryId, GroupId};
use courier_webhooks::crypto;
use courier_webhooks::models::{
    DeliveryStatus, Endpoint, Event, EventDelivery, RetryConfiguration, Subscription,
};
use courier_webhooks::services::alert::{AlertIntent, AlertSink, AlertTrigger};
use courier_webhooks::services::dispatcher::{Dispatcher, DispatcherConfig};
use courier_webhooks::store::{DeliveryPatch, InMemoryStore, Stores};
use courier_webhooks::EventService;

/// Standard test secret
pub const SECRET: &str = "whsec_test_secret_key_12345";

// ---------------------------------------------------------------------------
// RecordingAlertSink - collects alert intents
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAlertSink {
    intents: Mutex<Vec<AlertIntent>>,
}

impl RecordingAlertSink {
    pub fn intents(&self) -> Vec<AlertIntent> {
        self.intents.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, intent: AlertIntent) {
        self.intents.lock().unwrap().push(intent);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Stores, dispatcher and alerting over one in-memory backend.
pub struct Harness {
    pub memory: Arc<InMemoryStore>,
    pub stores: Stores,
    pub alerts: Arc<RecordingAlertSink>,
    pub dispatcher: Dispatcher,
    pub group_id: GroupId,
    pub app_id: ApplicationId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let memory = Arc::new(InMemoryStore::new());
        let stores = Stores::from_memory(memory.clone());
        let alerts = Arc::new(RecordingAlertSink::default());
        let trigger = Arc::new(AlertTrigger::new(alerts.clone()));
        let dispatcher = Dispatcher::new(
            stores.clone(),
            DispatcherConfig::default().with_timeout(timeout),
            trigger,
        )
        .expect("dispatcher");
        Self {
            memory,
            stores,
            alerts,
            dispatcher,
            group_id: GroupId::new(),
            app_id: ApplicationId::new(),
        }
    }

    pub fn event_service(&self) -> EventService {
        EventService::new(self.stores.clone())
    }

    /// Register an endpoint without URL validation (mock servers listen on loopback).
    pub async fn endpoint(&self, url: &str, secret: Option<&str>) -> Endpoint {
        let mut endpoint = Endpoint::new(self.app_id, self.group_id, url);
        if let Some(secret) = secret {
            endpoint = endpoint.with_secret(secret);
        }
        self.stores
            .endpoints
            .create_endpoint(&endpoint)
            .await
            .unwrap();
        endpoint
    }

    pub async fn subscription(&self, endpoint: &Endpoint, retry: RetryConfiguration) -> Subscription {
        self.save_subscription(Subscription::new(endpoint, "test-subscription").with_retry(retry))
            .await
    }

    pub async fn save_subscription(&self, subscription: Subscription) -> Subscription {
        self.stores
            .subscriptions
            .create_subscription(&subscription)
            .await
            .unwrap();
        subscription
    }

    /// Ingest a JSON event through the event service.
    pub async fn ingest(&self, event_type: &str, data: serde_json::Value) -> (Event, Vec<DeliveryId>) {
        let input =
            courier_webhooks::CreateEvent::json(self.app_id, event_type, &data).unwrap();
        let (event, report) = self
            .event_service()
            .create_event(self.group_id, input)
            .await
            .unwrap();
        (event, report.delivery_ids())
    }

    pub async fn delivery(&self, id: DeliveryId) -> EventDelivery {
        self.stores.deliveries.find_delivery_by_id(id).await.unwrap()
    }

    /// Pull a rescheduled delivery's next send time into the past.
    pub async fn make_due(&self, id: DeliveryId) {
        let current = self.delivery(id).await;
        self.stores
            .deliveries
            .update_delivery(
                id,
                DeliveryPatch::status(current.status)
                    .with_next_send_time(Some(Utc::now() - chrono::Duration::seconds(1))),
            )
            .await
            .unwrap();
    }

    /// Force a delivery into `status`, bypassing the state machine.
    pub async fn force_status(&self, id: DeliveryId, status: DeliveryStatus) -> EventDelivery {
        self.stores
            .deliveries
            .update_delivery(id, DeliveryPatch::status(status))
            .await
            .unwrap()
    }

    /// Process a delivery until it stops being rescheduled.
    pub async fn drive_to_terminal(&self, id: DeliveryId) -> DeliveryStatus {
        loop {
            let status = self.dispatcher.process(id).await.unwrap();
            match status {
                Some(DeliveryStatus::Scheduled) => self.make_due(id).await,
                Some(status) => return status,
                None => return self.delivery(id).await.status,
            }
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Check the signature header against `secret`.
    pub fn signature_valid(&self, secret: &str) -> bool {
        match (
            self.header(crypto::HEADER_SIGNATURE),
            self.header(crypto::HEADER_TIMESTAMP),
        ) {
            (Some(signature), Some(timestamp)) => {
                crypto::verify_signature_header(signature, secret, timestamp, &self.body)
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed status
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code).set_body_string("ok")
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    /// Fail `n` times with 500, then return 200.
    pub fn fail_times(n: u32) -> Self {
        Self::fail_with_status(n, 500)
    }

    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// DelayedResponder - adds response delay
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DelayedResponder {
    delay: Duration,
}

impl DelayedResponder {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Respond for DelayedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_delay(self.delay)
    }
}
