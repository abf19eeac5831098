use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use nova_core::{AlertId, TaskId, TelescopeId};
use nova_dispatch::OutcomeEvent;
use nova_registry::Availability;
use nova_scheduler::ScheduleRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "nova-node",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        "telescopes": state.registry.telescope_ids().len(),
    }))
}

pub async fn list_telescopes(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "telescopes": state.registry.snapshot().await }))
}

pub async fn telescope_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let telescope = TelescopeId::new(id);
    match state.registry.queue(&telescope).await {
        Ok(queue) => Ok(Json(json!({ "telescope": telescope, "queue": queue }))),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub availability: Availability,
}

pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<Value>, StatusCode> {
    let telescope = TelescopeId::new(id);
    match state
        .registry
        .set_availability(&telescope, request.availability)
        .await
    {
        Ok(()) => {
            info!(telescope = %telescope, availability = %request.availability, "manual availability override");
            Ok(Json(json!({
                "telescope": telescope,
                "availability": request.availability,
            })))
        }
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub alert_id: Option<String>,
}

pub async fn recent_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, StatusCode> {
    let result = match &query.alert_id {
        Some(id) => state.archive.alert_history(&AlertId::new(id.as_str())),
        None => state
            .archive
            .recent_alerts(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
    };
    match result {
        Ok(alerts) => Ok(Json(json!({ "alerts": alerts }))),
        Err(err) => {
            error!(error = %err, "alert history query failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn recent_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, StatusCode> {
    let result = match &query.alert_id {
        Some(id) => state.archive.tasks_for_alert(&AlertId::new(id.as_str())),
        None => state
            .archive
            .recent_tasks(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
    };
    match result {
        Ok(tasks) => Ok(Json(json!({ "tasks": tasks }))),
        Err(err) => {
            error!(error = %err, "task history query failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let task = Uuid::parse_str(&id)
        .map(TaskId::from)
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    state
        .scheduler
        .submit(ScheduleRequest::Cancel(task))
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    info!(task = %task, "cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task": task, "status": "cancel_requested" })),
    ))
}

/// Inbound execution reports from the telescope network.
pub async fn report_outcome(
    State(state): State<Arc<AppState>>,
    Json(event): Json<OutcomeEvent>,
) -> (StatusCode, Json<Value>) {
    info!(task = %event.task, telescope = %event.telescope, "outcome reported");
    state.monitor.outcome(event).await;
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}
