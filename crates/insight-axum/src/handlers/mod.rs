//! HTTP handlers, grouped by surface.

pub mod artifacts;
pub mod tasks;
pub mod tts;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::error::HttpError;
use crate::state::AppState;

/// Bearer-token gate for mutating routes.
pub(crate) fn require_bearer(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or("");
    if state.auth.verify(token) {
        Ok(())
    } else {
        Err(HttpError::Unauthorized)
    }
}
