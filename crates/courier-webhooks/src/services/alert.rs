//! Consecutive-failure alerting.
//!
//! The trigger keeps a counter per subscription. Failed attempts increment
//! it, a success resets it. Reaching the subscription's threshold emits one
//! [`AlertIntent`] and resets the counter, so a subscription that keeps
//! failing alerts once per `threshold` failures, not on every failure.
//! Delivering the intent (email, chat, pager) is the sink's business.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use courier_core::{EndpointId, GroupId, SubscriptionId};

use crate::models::{AlertConfiguration, Subscription};

/// Request to notify someone that a subscription keeps failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertIntent {
    pub subscription_id: SubscriptionId,
    pub endpoint_id: EndpointId,
    pub group_id: GroupId,
    pub consecutive_failures: u32,
    pub raised_at: DateTime<Utc>,
}

/// Receives alert intents.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, intent: AlertIntent);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone)]
pub struct LoggingAlertSink;

#[async_trait::async_trait]
impl AlertSink for LoggingAlertSink {
    async fn notify(&self, intent: AlertIntent) {
        tracing::warn!(
            target: "webhook_alert",
            subscription_id = %intent.subscription_id,
            endpoint_id = %intent.endpoint_id,
            group_id = %intent.group_id,
            consecutive_failures = intent.consecutive_failures,
            "Subscription reached its failure alert threshold"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct AlertCounter {
    consecutive_failures: u32,
    observed: u32,
}

impl AlertCounter {
    /// Returns the failure count to report when the threshold is crossed.
    fn observe(&mut self, success: bool, config: &AlertConfiguration) -> Option<u32> {
        self.observed = self.observed.saturating_add(1);
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }

        if config.threshold > 0 && self.consecutive_failures >= config.threshold {
            let fired = self.consecutive_failures;
            *self = Self::default();
            return Some(fired);
        }
        if config.count > 0 && self.observed >= config.count {
            *self = Self::default();
        }
        None
    }
}

/// Edge-triggered failure alerting keyed by subscription.
pub struct AlertTrigger {
    counters: Mutex<HashMap<SubscriptionId, AlertCounter>>,
    sink: Arc<dyn AlertSink>,
}

impl Default for AlertTrigger {
    fn default() -> Self {
        Self::new(Arc::new(LoggingAlertSink))
    }
}

impl AlertTrigger {
    #[must_use]
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Record one attempt result. Emits and returns an intent on a threshold crossing.
    pub async fn observe(&self, subscription: &Subscription, success: bool) -> Option<AlertIntent> {
        let fired = {
            let mut counters = self.counters.lock().await;
            let counter = counters.entry(subscription.id).or_default();
            let fired = counter.observe(success, &subscription.alert_config);
            if counter.consecutive_failures == 0 && counter.observed == 0 {
                counters.remove(&subscription.id);
            }
            fired
        }?;

        let intent = AlertIntent {
            subscription_id: subscription.id,
            endpoint_id: subscription.endpoint_id,
            group_id: subscription.group_id,
            consecutive_failures: fired,
            raised_at: Utc::now(),
        };
        self.sink.notify(intent.clone()).await;
        Some(intent)
    }

    /// Current consecutive failure count for a subscription.
    pub async fn consecutive_failures(&self, subscription_id: SubscriptionId) -> u32 {
        self.counters
            .lock()
            .await
            .get(&subscription_id)
            .map_or(0, |c| c.consecutive_failures)
    }
}
