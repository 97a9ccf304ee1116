//! Strongly Typed Identifiers
//!
//! Every record courier stores is keyed by a UUID, and most operations take
//! several of them at once (an event, a subscription, the delivery joining
//! the two). Wrapping each in its own newtype turns a swapped argument into
//! a compile error instead of a lookup that silently misses.
//!
//! # Example
//!
//! ```
//! use courier_core::{DeliveryId, EventId};
//!
//! let event = EventId::new();
//!
//! fn requires_event(id: EventId) -> String {
//!     id.to_string()
//! }
//!
//! let result = requires_event(event);
//! // requires_event(DeliveryId::new()); // This would not compile!
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Identifier of an ingested event.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_core::EventId;
    /// use uuid::Uuid;
    ///
    /// let uuid = Uuid::new_v4();
    /// let event_id = EventId::from_uuid(uuid);
    /// assert_eq!(event_id.as_uuid(), &uuid);
    ///
    /// let parsed: EventId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
    /// assert_eq!(parsed.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    /// ```
    EventId
);

define_id!(
    /// Identifier of one (event, subscription) delivery record.
    DeliveryId
);

define_id!(
    /// Identifier of a subscription binding an endpoint to filters and policies.
    SubscriptionId
);

define_id!(
    /// Identifier of an HTTP endpoint receiving deliveries.
    EndpointId
);

define_id!(
    /// Identifier of the application that owns events and endpoints.
    ApplicationId
);

define_id!(
    /// Identifier of a group, the isolation boundary for all records.
    GroupId
);

define_id!(
    /// Identifier of an incoming source feeding a subscription.
    SourceId
);

define_id!(
    /// Identifier of a single recorded delivery attempt.
    AttemptId
);
