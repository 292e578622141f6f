//! Task submission, snapshots, cancellation, and event streaming.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use insight_core::{TaskId, TaskPayload};
use insight_tasks::SubmitOutcome;

use crate::dto::{EventsQuery, SubmitTaskRequest, SubmitTaskResponse};
use crate::error::HttpError;
use crate::handlers::require_bearer;
use crate::sse;
use crate::state::AppState;

/// Mime types accepted for uploaded sources, checked at entry.
const SUPPORTED_UPLOAD_MIMES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "text/markdown",
];

/// `POST /tasks` - submit a job or reconnect to a live one.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<Json<SubmitTaskResponse>, HttpError> {
    let priority = request
        .resolved_priority()
        .map_err(HttpError::BadRequest)?;
    let reconnect = request.task_id.clone().map(TaskId::from_string);
    let task_type = request.task_type;

    if let Some(text) = &request.text {
        if text.len() as u64 > state.settings.max_text_file_size {
            return Err(HttpError::BadRequest(format!(
                "text exceeds maximum size of {} bytes",
                state.settings.max_text_file_size
            )));
        }
    }

    let payload = request.into_payload().map_err(HttpError::BadRequest)?;
    if let TaskPayload::Upload { mime, .. } = &payload {
        if !SUPPORTED_UPLOAD_MIMES.contains(&mime.as_str()) {
            return Err(HttpError::BadRequest(format!(
                "unsupported upload format: {mime}"
            )));
        }
    }

    match state
        .dispatcher
        .submit(task_type, payload, priority, reconnect)?
    {
        SubmitOutcome::Created {
            task_id,
            queue_info,
        } => Ok(Json(SubmitTaskResponse {
            task_id,
            status: "created",
            queue_info: Some(queue_info),
        })),
        SubmitOutcome::Reconnected { task_id } => Ok(Json(SubmitTaskResponse {
            task_id,
            status: "reconnected",
            queue_info: None,
        })),
    }
}

/// `GET /tasks/{id}` - point-in-time snapshot for polling clients.
pub async fn snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let task_id = TaskId::from_string(id);
    state
        .dispatcher
        .registry()
        .snapshot(&task_id)
        .map(Json)
        .ok_or_else(|| HttpError::NotFound(format!("task {task_id}")))
}

/// `GET /tasks/{id}/events?since=` - SSE stream with bounded replay.
pub async fn events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let task_id = TaskId::from_string(id);
    let subscription = state
        .dispatcher
        .registry()
        .subscribe(&task_id, query.since)
        .map_err(|e| HttpError::NotFound(e.to_string()))?;
    Ok(sse::task_event_stream(task_id, subscription))
}

/// `POST /tasks/{id}/cancel` - queued tasks settle immediately, running
/// ones cooperatively.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    require_bearer(&state, &headers)?;
    let task_id = TaskId::from_string(id);
    let outcome = state.dispatcher.cancel(&task_id);
    Ok(Json(serde_json::json!({ "outcome": outcome })))
}

/// `GET /queue/stats` - analysis pool counters.
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.stats())
}

/// `GET /queue/tasks` - pending entries in dispatch order.
pub async fn queue_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.queued_tasks())
}
