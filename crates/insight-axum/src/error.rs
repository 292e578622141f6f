//! HTTP error types and mappings from the core error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use insight_store::StoreError;
use insight_tasks::SubmitError;

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid bearer token on a mutating route.
    #[error("Unauthorized")]
    Unauthorized,

    /// The analysis queue rejected the submission.
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Service unavailable (shutdown, unconfigured collaborator).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    /// Stable error discriminant for client-side handling.
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    error_type: Option<String>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, None),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, Some("invalid_input")),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, None),
            Self::QueueFull(_) => (StatusCode::SERVICE_UNAVAILABLE, Some("queue_full")),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
            error_type: error_type.map(str::to_string),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. }
            | StoreError::VersionNotFound { .. }
            | StoreError::TrashEntryNotFound { .. }
            | StoreError::SiblingNotReady { .. } => Self::NotFound(err.to_string()),
            StoreError::Io { .. } | StoreError::CorruptHeader { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<SubmitError> for HttpError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::QueueFull { .. } => Self::QueueFull(err.to_string()),
            SubmitError::UnsupportedType { .. } => Self::BadRequest(err.to_string()),
            SubmitError::ShuttingDown => Self::ServiceUnavailable(err.to_string()),
        }
    }
}
