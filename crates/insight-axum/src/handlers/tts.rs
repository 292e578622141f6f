//! TTS endpoints: request, status, streaming, and queue stats.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use insight_core::DocHash;

use crate::dto::TtsRequest;
use crate::error::HttpError;
use crate::handlers::require_bearer;
use crate::state::AppState;

fn parse_hash(raw: &str) -> Result<DocHash, HttpError> {
    DocHash::parse(raw).ok_or_else(|| HttpError::BadRequest(format!("malformed doc_hash: {raw}")))
}

/// `POST /tts` - request pre-generation.
///
/// Returns the cached metadata immediately when the cache is already
/// complete; otherwise schedules generation on the TTS pool and reports
/// the (possibly partial) current state.
pub async fn request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TtsRequest>,
) -> Result<impl IntoResponse, HttpError> {
    require_bearer(&state, &headers)?;
    let doc_hash = parse_hash(&body.doc_hash)?;
    // 404 early for unknown documents.
    state.store.get_latest(&doc_hash).await?;

    let current = state.tts.status(&doc_hash).await;
    if current.as_ref().is_some_and(|meta| meta.complete) {
        return Ok(Json(serde_json::json!({
            "scheduled": false,
            "meta": current,
        })));
    }
    state.pipeline.schedule_tts(&doc_hash);
    Ok(Json(serde_json::json!({
        "scheduled": true,
        "meta": current,
    })))
}

/// `GET /tts/{hash}/status` - cache metadata, including partial progress.
pub async fn status(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    state
        .tts
        .status(&doc_hash)
        .await
        .map(Json)
        .ok_or_else(|| HttpError::NotFound(format!("no tts cache for {doc_hash}")))
}

/// `GET /tts/{hash}/stream` - SSE chunk stream.
pub async fn stream(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    state.store.get_latest(&doc_hash).await?;
    let receiver = state.tts.subscribe(&doc_hash);
    // Kick generation if the cache isn't complete yet.
    if !state
        .tts
        .status(&doc_hash)
        .await
        .is_some_and(|meta| meta.complete)
    {
        state.pipeline.schedule_tts(&doc_hash);
    }
    Ok(crate::sse::tts_event_stream(receiver))
}

/// `GET /tts/queue` - TTS pool counters.
pub async fn queue(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.tts_stats())
}
