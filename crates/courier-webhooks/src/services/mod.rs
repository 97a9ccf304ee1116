//! Business logic services for the delivery core.

pub mod alert;
pub mod batch;
pub mod dispatcher;
pub mod event_service;
pub mod fan_out;
pub mod matcher;
pub mod retry;
pub mod subscription_service;

use courier_core::{GroupId, GroupScoped};

use crate::error::WebhookError;
use crate::store::{StoreError, StoreResult};

/// Map a typed store `NotFound` to a domain error, keep other failures as store errors.
pub(crate) trait StoreResultExt<T> {
    fn or_not_found(self, err: WebhookError) -> Result<T, WebhookError>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn or_not_found(self, err: WebhookError) -> Result<T, WebhookError> {
        match self {
            Ok(value) => Ok(value),
            Err(StoreError::NotFound { .. }) => Err(err),
            Err(e) => Err(e.into()),
        }
    }
}

/// Records of another group are reported as absent.
pub(crate) fn ensure_group<T: GroupScoped>(
    entity: T,
    group_id: GroupId,
    err: WebhookError,
) -> Result<T, WebhookError> {
    if entity.belongs_to(group_id) {
        Ok(entity)
    } else {
        Err(err)
    }
}
