//! Endpoint and subscription management handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use courier_core::{ApplicationId, EndpointId, SubscriptionId};

use crate::error::ApiResult;
use crate::handlers::GroupQuery;
use crate::models::{Endpoint, EndpointStatus, Subscription};
use crate::router::WebhooksState;
use crate::services::subscription_service::{
    CreateEndpoint, CreateSubscription, UpdateSubscription,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppQuery {
    pub app_id: ApplicationId,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EndpointStatusRequest {
    pub status: EndpointStatus,
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

pub async fn create_endpoint_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Json(request): Json<CreateEndpoint>,
) -> ApiResult<(StatusCode, Json<Endpoint>)> {
    let endpoint = state
        .subscription_service
        .create_endpoint(scope.group_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(endpoint)))
}

pub async fn get_endpoint_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<EndpointId>,
) -> ApiResult<Json<Endpoint>> {
    let endpoint = state
        .subscription_service
        .get_endpoint(scope.group_id, id)
        .await?;
    Ok(Json(endpoint))
}

pub async fn set_endpoint_status_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<EndpointId>,
    Json(request): Json<EndpointStatusRequest>,
) -> ApiResult<Json<Endpoint>> {
    let endpoint = state
        .subscription_service
        .set_endpoint_status(scope.group_id, id, request.status)
        .await?;
    Ok(Json(endpoint))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

pub async fn create_subscription_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Json(request): Json<CreateSubscription>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state
        .subscription_service
        .create_subscription(scope.group_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list_subscriptions_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Query(query): Query<AppQuery>,
) -> ApiResult<Json<Vec<Subscription>>> {
    let subscriptions = state
        .subscription_service
        .list_subscriptions(scope.group_id, query.app_id)
        .await?;
    Ok(Json(subscriptions))
}

pub async fn get_subscription_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<SubscriptionId>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .subscription_service
        .get_subscription(scope.group_id, id)
        .await?;
    Ok(Json(subscription))
}

pub async fn update_subscription_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<SubscriptionId>,
    Json(request): Json<UpdateSubscription>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .subscription_service
        .update_subscription(scope.group_id, id, request)
        .await?;
    Ok(Json(subscription))
}

pub async fn delete_subscription_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<SubscriptionId>,
) -> ApiResult<StatusCode> {
    state
        .subscription_service
        .delete_subscription(scope.group_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flip a subscription between active and inactive.
pub async fn toggle_subscription_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<SubscriptionId>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .subscription_service
        .toggle_status(scope.group_id, id)
        .await?;
    Ok(Json(subscription))
}
