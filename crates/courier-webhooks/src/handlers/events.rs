//! Event ingestion and query handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{ApplicationId, DeliveryId, EventId, GroupId};

use crate::error::ApiResult;
use crate::handlers::{GroupQuery, PageQuery, Paged};
use crate::models::Event;
use crate::router::WebhooksState;
use crate::services::event_service::{CreateEvent, ReplayReport};
use crate::services::fan_out::FanOutReport;
use crate::store::EventFilter;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventRequest {
    pub app_id: ApplicationId,
    pub event_type: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    pub app_id: Option<ApplicationId>,
    pub event_type: Option<String>,
}

/// Event as returned by the API, with its payload decoded when it is JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    pub id: EventId,
    pub app_id: ApplicationId,
    pub group_id: GroupId,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        let data = event.payload_json().unwrap_or_else(|| {
            serde_json::Value::String(String::from_utf8_lossy(&event.payload).into_owned())
        });
        Self {
            id: event.id,
            app_id: event.app_id,
            group_id: event.group_id,
            event_type: event.event_type,
            data,
            created_at: event.created_at,
        }
    }
}

/// Ingestion response: the stored event and the deliveries it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventResponse {
    #[serde(flatten)]
    pub event: EventResponse,
    pub delivery_ids: Vec<DeliveryId>,
    pub failed_subscriptions: usize,
}

impl CreateEventResponse {
    fn new(event: Event, report: &FanOutReport) -> Self {
        Self {
            event: event.into(),
            delivery_ids: report.delivery_ids(),
            failed_subscriptions: report.failed_count(),
        }
    }
}

/// Ingest an event and fan it out to matching subscriptions.
pub async fn create_event_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Json(request): Json<CreateEventRequest>,
) -> ApiResult<(StatusCode, Json<CreateEventResponse>)> {
    let input = CreateEvent::json(request.app_id, request.event_type, &request.data)?;
    let (event, report) = state
        .event_service
        .create_event(scope.group_id, input)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateEventResponse::new(event, &report)),
    ))
}

pub async fn list_events_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListEventsQuery>,
) -> ApiResult<Json<Paged<EventResponse>>> {
    let mut filter = EventFilter::for_group(scope.group_id);
    if let Some(app_id) = query.app_id {
        filter = filter.with_app(app_id);
    }
    filter.event_type = query.event_type;

    let (events, pagination) = state
        .event_service
        .list_events(&filter, page.pageable())
        .await?;
    Ok(Json(Paged::new(
        events.into_iter().map(EventResponse::from).collect(),
        pagination,
    )))
}

pub async fn get_event_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<EventId>,
) -> ApiResult<Json<EventResponse>> {
    let event = state.event_service.get_event(scope.group_id, id).await?;
    Ok(Json(event.into()))
}

/// Re-run fan-out for an event and resend its finished deliveries.
pub async fn replay_event_handler(
    State(state): State<WebhooksState>,
    Query(scope): Query<GroupQuery>,
    Path(id): Path<EventId>,
) -> ApiResult<Json<ReplayReport>> {
    let report = state.event_service.replay_event(scope.group_id, id).await?;
    Ok(Json(report))
}
