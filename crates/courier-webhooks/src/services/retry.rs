//! Retry scheduling after a delivery attempt.
//!
//! Every attempt increments the trial count by one. A failure either
//! reschedules the delivery after the policy delay or, once the trial count
//! reaches the subscription's retry count, discards it:
//!
//! | strategy    | delay after trial `n`       |
//! |-------------|-----------------------------|
//! | linear      | `base`                      |
//! | exponential | `base * 2^(n - 1)`          |
//!
//! Delays saturate and are clamped to [`MAX_RETRY_DELAY_SECS`] so the next
//! send time always stays a representable timestamp.

use chrono::{DateTime, Duration, Utc};

use crate::error::WebhookError;
use crate::models::{
    DeliveryAttempt, DeliveryStatus, EventDelivery, RetryConfiguration, RetryStrategy,
    MAX_RETRY_DELAY_SECS,
};
use crate::store::{CasOutcome, CasPrecondition, DeliveryPatch, Stores};

/// What to do with a delivery whose attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Reschedule {
        num_trials: u32,
        next_send_time: DateTime<Utc>,
    },
    Discard {
        num_trials: u32,
    },
}

impl RetryDecision {
    pub fn num_trials(&self) -> u32 {
        match self {
            Self::Reschedule { num_trials, .. } | Self::Discard { num_trials } => *num_trials,
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Reschedule { .. } => DeliveryStatus::Scheduled,
            Self::Discard { .. } => DeliveryStatus::Discarded,
        }
    }
}

/// Delay before the next attempt once `num_trials` attempts have been made.
pub fn backoff_delay(retry: &RetryConfiguration, num_trials: u32) -> Duration {
    let secs = match retry.strategy {
        RetryStrategy::Linear => retry.duration_secs,
        RetryStrategy::Exponential => {
            let factor = 1u64
                .checked_shl(num_trials.saturating_sub(1))
                .unwrap_or(u64::MAX);
            retry.duration_secs.saturating_mul(factor)
        }
    };
    let secs = i64::try_from(secs).unwrap_or(MAX_RETRY_DELAY_SECS);
    Duration::seconds(secs.min(MAX_RETRY_DELAY_SECS))
}

/// Applies retry policy to finished attempts.
#[derive(Clone)]
pub struct RetryScheduler {
    stores: Stores,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Pure policy decision for a failed attempt on `delivery`.
    pub fn schedule_next(
        delivery: &EventDelivery,
        retry: &RetryConfiguration,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let num_trials = delivery.metadata.num_trials.saturating_add(1);
        if num_trials >= retry.retry_count {
            RetryDecision::Discard { num_trials }
        } else {
            RetryDecision::Reschedule {
                num_trials,
                next_send_time: now + backoff_delay(retry, num_trials),
            }
        }
    }

    /// Record a failed attempt on a claimed delivery.
    ///
    /// Returns the new status, or `None` when the delivery was no longer in
    /// `Processing` (released as stale by another worker).
    pub async fn record_failure(
        &self,
        delivery: &EventDelivery,
        retry: &RetryConfiguration,
        attempt: DeliveryAttempt,
        reason: &str,
    ) -> Result<Option<DeliveryStatus>, WebhookError> {
        let now = Utc::now();
        let decision = Self::schedule_next(delivery, retry, now);

        let patch = DeliveryPatch::status(decision.status())
            .with_num_trials(decision.num_trials())
            .with_retry_limit(retry.retry_count)
            .with_last_sent_at(now)
            .with_description(reason)
            .with_attempt(attempt);
        let patch = match decision {
            RetryDecision::Reschedule { next_send_time, .. } => {
                patch.with_next_send_time(Some(next_send_time))
            }
            RetryDecision::Discard { .. } => patch.with_next_send_time(None),
        };

        let outcome = self
            .stores
            .deliveries
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(DeliveryStatus::Processing),
                patch,
            )
            .await?;

        match (outcome, decision) {
            (CasOutcome::Swapped(_), RetryDecision::Reschedule { next_send_time, num_trials }) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    event_id = %delivery.event_id,
                    subscription_id = %delivery.subscription_id,
                    error = %reason,
                    attempt_number = num_trials,
                    retry_limit = retry.retry_count,
                    next_send_time = %next_send_time,
                    "Webhook delivery failed, retry scheduled"
                );
                Ok(Some(DeliveryStatus::Scheduled))
            }
            (CasOutcome::Swapped(_), RetryDecision::Discard { num_trials }) => {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    event_id = %delivery.event_id,
                    subscription_id = %delivery.subscription_id,
                    error = %reason,
                    attempt_number = num_trials,
                    "Webhook delivery discarded, retries exhausted"
                );
                Ok(Some(DeliveryStatus::Discarded))
            }
            (CasOutcome::Rejected { current }, _) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    current_status = %current,
                    "Delivery left Processing before its failure was recorded"
                );
                Ok(None)
            }
        }
    }

    /// Finalize a claimed delivery whose attempt succeeded.
    pub async fn record_success(
        &self,
        delivery: &EventDelivery,
        attempt: DeliveryAttempt,
    ) -> Result<Option<DeliveryStatus>, WebhookError> {
        let now = Utc::now();
        let num_trials = delivery.metadata.num_trials.saturating_add(1);
        let status_code = attempt.status_code;
        let latency_ms = attempt.latency_ms;

        let outcome = self
            .stores
            .deliveries
            .compare_and_swap(
                delivery.id,
                CasPrecondition::status(DeliveryStatus::Processing),
                DeliveryPatch::status(DeliveryStatus::Success)
                    .with_num_trials(num_trials)
                    .with_last_sent_at(now)
                    .with_next_send_time(None)
                    .with_description("Event was sent successfully")
                    .with_attempt(attempt),
            )
            .await?;

        match outcome {
            CasOutcome::Swapped(_) => {
                tracing::info!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    event_id = %delivery.event_id,
                    subscription_id = %delivery.subscription_id,
                    response_code = status_code,
                    latency_ms,
                    attempt_number = num_trials,
                    "Webhook delivery succeeded"
                );
                Ok(Some(DeliveryStatus::Success))
            }
            CasOutcome::Rejected { current } => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    current_status = %current,
                    "Delivery left Processing before its success was recorded"
                );
                Ok(None)
            }
        }
    }
}
