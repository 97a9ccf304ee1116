//! Fan-out of an event into one delivery per matched subscription.
//!
//! Fan-out is idempotent: the store's unique (event, subscription) key turns a
//! second fan-out of the same event into a lookup of the existing delivery.
//! Failures are reported per subscription, so one unwritable delivery does not
//! stop the others from being scheduled.

use serde::Serialize;

use courier_core::{DeliveryId, EventId, SubscriptionId};

use crate::models::{Event, EventDelivery, Subscription};
use crate::store::{StoreError, Stores};

/// What happened for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FanOutOutcome {
    Created { delivery_id: DeliveryId },
    Existing { delivery_id: DeliveryId },
    Failed { reason: String },
}

impl FanOutOutcome {
    pub fn delivery_id(&self) -> Option<DeliveryId> {
        match self {
            Self::Created { delivery_id } | Self::Existing { delivery_id } => Some(*delivery_id),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionOutcome {
    pub subscription_id: SubscriptionId,
    #[serde(flatten)]
    pub outcome: FanOutOutcome,
}

/// Per-subscription results of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub event_id: EventId,
    pub outcomes: Vec<SubscriptionOutcome>,
}

impl FanOutReport {
    /// Created plus existing deliveries.
    pub fn scheduled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.delivery_id().is_some())
            .count()
    }

    pub fn created_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, FanOutOutcome::Created { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.scheduled_count()
    }

    pub fn delivery_ids(&self) -> Vec<DeliveryId> {
        self.outcomes
            .iter()
            .filter_map(|o| o.outcome.delivery_id())
            .collect()
    }

    /// Deliveries that existed before this fan-out.
    pub fn existing_ids(&self) -> Vec<DeliveryId> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.outcome {
                FanOutOutcome::Existing { delivery_id } => Some(delivery_id),
                _ => None,
            })
            .collect()
    }
}

/// Creates `Scheduled` deliveries for matched subscriptions.
#[derive(Clone)]
pub struct FanOutEngine {
    stores: Stores,
}

impl FanOutEngine {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn fan_out(&self, event: &Event, subscriptions: &[Subscription]) -> FanOutReport {
        let mut outcomes = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let outcome = self.fan_out_one(event, subscription).await;
            if let FanOutOutcome::Failed { reason } = &outcome {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.id,
                    subscription_id = %subscription.id,
                    error = %reason,
                    "Failed to schedule delivery"
                );
            }
            outcomes.push(SubscriptionOutcome {
                subscription_id: subscription.id,
                outcome,
            });
        }

        let report = FanOutReport {
            event_id: event.id,
            outcomes,
        };
        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.id,
            event_type = %event.event_type,
            created = report.created_count(),
            scheduled = report.scheduled_count(),
            failed = report.failed_count(),
            "Event fanned out"
        );
        report
    }

    async fn fan_out_one(&self, event: &Event, subscription: &Subscription) -> FanOutOutcome {
        let deliveries = &self.stores.deliveries;

        match deliveries.find_delivery(event.id, subscription.id).await {
            Ok(existing) => {
                return FanOutOutcome::Existing {
                    delivery_id: existing.id,
                }
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => {
                return FanOutOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }

        let delivery = EventDelivery::scheduled(event, subscription);
        match deliveries.create_delivery(&delivery).await {
            Ok(()) => FanOutOutcome::Created {
                delivery_id: delivery.id,
            },
            // Lost a race with a concurrent fan-out of the same event.
            Err(StoreError::Duplicate(_)) => {
                match deliveries.find_delivery(event.id, subscription.id).await {
                    Ok(existing) => FanOutOutcome::Existing {
                        delivery_id: existing.id,
                    },
                    Err(e) => FanOutOutcome::Failed {
                        reason: e.to_string(),
                    },
                }
            }
            Err(e) => FanOutOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}
