//! courier Core Library
//!
//! Shared identifier types and scoping traits for courier.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (EventId, DeliveryId, SubscriptionId, ...)
//! - [`traits`] - Group scoping (GroupScoped)
//!
//! # Example
//!
//! ```
//! use courier_core::{DeliveryId, EventId};
//!
//! let event_id = EventId::new();
//! let delivery_id = DeliveryId::new();
//! assert_ne!(event_id.as_uuid(), delivery_id.as_uuid());
//! ```

pub mod ids;
pub mod traits;

pub use ids::{
    ApplicationId, AttemptId, DeliveryId, EndpointId, EventId, GroupId, ParseIdError, SourceId,
    SubscriptionId,
};
pub use traits::GroupScoped;
