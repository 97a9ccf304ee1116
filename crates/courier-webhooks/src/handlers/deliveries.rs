//! Delivery query and remediation handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{ApplicationId, DeliveryId, EventId, GroupId, SubscriptionId};

use crate::error::{ApiResult, WebhookError};
use crate::handlers::{GroupQuery, PageQuery, Paged};
use crate::models::{DeliveryStatus, EventDelivery};
use crate::router::WebhooksState;
use crate::services::batch::BatchRetryReport;
use crate::store::DeliveryFilter;

/// Delivery filter parameters. `status` is a comma-separated list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryQuery {
    pub app_id: Option<ApplicationId>,
    pub event_id: Option<EventId>,
    pub subscription_id: Option<SubscriptionId>,
    pub status: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl DeliveryQuery {
    /// Build a group-scoped filter. Unknown status names are rejected.
    pub fn into_filter(self, group_id: GroupId) -> Result<DeliveryFilter, WebhookError> {
        let statuses = self
            .status
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<DeliveryStatus>)
            .collect::<Result<Vec<_>, _>>()?;

        let mut filter = DeliveryFilter::for_group(group_id).with_statuses(statuses);
        filter.app_id = self.app_id;
        filter.event_id = self.event_id;
        filter.subscription_id = self.subscription_id;
        filter.created_after = self.created_after;
        filter.created_before = self.created_before;
        Ok(filter)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForceResendRequest {
    pub ids: Vec<DeliveryId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountResponse {
    pub num: u64,
}

pub async fn list_deliveries_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Query(page): Query<PageQuery>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<Paged<EventDelivery>>> {
    let filter = query.into_filter(scope.group_id)?;
    let (deliveries, pagination) = state
        .event_service
        .list_deliveries(&filter, page.pageable())
        .await?;
    Ok(Json(Paged::new(deliveries, pagination)))
}

pub async fn get_delivery_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<DeliveryId>,
) -> ApiResult<Json<EventDelivery>> {
    let delivery = state.event_service.get_delivery(scope.group_id, id).await?;
    Ok(Json(delivery))
}

/// Put one delivery back into the dispatch cycle.
pub async fn resend_delivery_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<DeliveryId>,
) -> ApiResult<Json<EventDelivery>> {
    let delivery = state.batch_processor.resend(scope.group_id, id).await?;
    Ok(Json(delivery))
}

pub async fn batch_retry_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<BatchRetryReport>> {
    let filter = query.into_filter(scope.group_id)?;
    let report = state.batch_processor.batch_retry(&filter).await?;
    Ok(Json(report))
}

/// Number of deliveries a batch retry with the same filter would resend.
pub async fn count_batch_retry_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Query(query): Query<DeliveryQuery>,
) -> ApiResult<Json<CountResponse>> {
    let filter = query.into_filter(scope.group_id)?;
    let num = state.batch_processor.count_affected(&filter).await?;
    Ok(Json(CountResponse { num }))
}

pub async fn force_resend_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Json(request): Json<ForceResendRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if request.ids.is_empty() {
        return Err(WebhookError::Validation(
            "At least one delivery id is required".to_string(),
        ));
    }
    let report = state
        .batch_processor
        .force_resend(scope.group_id, &request.ids)
        .await?;
    Ok(Json(MessageResponse {
        message: report.message(),
    }))
}
