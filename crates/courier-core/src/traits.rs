//! Group Scoping Traits
//!
//! Every entity handled by courier belongs to exactly one group. Reads and
//! batch operations are always evaluated inside a group, so a request for one
//! group can never observe or mutate another group's records.
//!
//! # Example
//!
//! ```
//! use courier_core::{GroupId, GroupScoped};
//!
//! struct Endpoint {
//!     group_id: GroupId,
//!     url: String,
//! }
//!
//! impl GroupScoped for Endpoint {
//!     fn group_id(&self) -> GroupId {
//!         self.group_id
//!     }
//! }
//!
//! let group = GroupId::new();
//! let endpoint = Endpoint { group_id: group, url: "https://example.com/hook".into() };
//! assert!(endpoint.belongs_to(group));
//! ```

use crate::ids::GroupId;

/// Trait for entities that belong to a specific group.
///
/// This trait is object-safe: `&dyn GroupScoped` works.
pub trait GroupScoped {
    /// Returns the group ID associated with this entity.
    fn group_id(&self) -> GroupId;

    /// Returns true when the entity is owned by `group`.
    fn belongs_to(&self, group: GroupId) -> bool {
        self.group_id() == group
    }
}
