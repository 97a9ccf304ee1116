//! Webhook event fan-out and delivery.
//!
//! Ingested events are matched against group-scoped subscriptions and fanned
//! out into one delivery record per subscription. Workers claim due
//! deliveries, POST the payload with an HMAC-SHA256 signature, and retry with
//! linear or exponential backoff until the subscription's retry budget is
//! spent. Operators can resend single deliveries or batches of them.

pub mod crypto;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;
pub mod validation;
pub mod worker;

pub use error::{ApiResult, WebhookError};
pub use router::{webhooks_router, WebhooksState};
pub use services::alert::{AlertIntent, AlertSink, AlertTrigger, LoggingAlertSink};
pub use services::batch::{BatchProcessor, BatchRetryReport, ForceResendReport};
pub use services::dispatcher::{Dispatcher, DispatcherConfig};
pub use services::event_service::{CreateEvent, EventService};
pub use services::fan_out::{FanOutEngine, FanOutReport};
pub use services::matcher::SubscriptionMatcher;
pub use services::retry::RetryScheduler;
pub use store::{InMemoryStore, StoreError, Stores};
pub use worker::{DeliveryWorker, WorkerConfig};
