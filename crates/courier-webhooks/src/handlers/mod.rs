//! HTTP handlers.
//!
//! Authentication happens upstream; every request names the group it acts
//! for with a `groupId` query parameter.

pub mod deliveries;
pub mod events;
pub mod subscriptions;

use serde::{Deserialize, Serialize};

use courier_core::GroupId;

use crate::store::{Pageable, PaginationData, SortOrder, DEFAULT_PER_PAGE};

/// Group scope carried by every request.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuery {
    pub group_id: GroupId,
}

/// Paging parameters shared by list endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    #[serde(default)]
    pub sort: SortOrder,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
            sort: SortOrder::default(),
        }
    }
}

impl PageQuery {
    pub fn pageable(&self) -> Pageable {
        Pageable::new(self.page, self.per_page).with_sort(self.sort)
    }
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    DEFAULT_PER_PAGE
}

/// Paged list body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub content: Vec<T>,
    pub pagination: PaginationData,
}

impl<T> Paged<T> {
    pub fn new(content: Vec<T>, pagination: PaginationData) -> Self {
        Self {
            content,
            pagination,
        }
    }
}
