//! Error types for the result-delivery pipeline.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Stream registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a stream is already active for session {0}")]
    AlreadyActive(String),
}

/// Errors translating one producer event. Never fatal to a session.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("malformed producer event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown producer event kind: {0}")]
    UnknownKind(String),

    #[error("producer event has no kind field")]
    MissingKind,
}

/// Errors starting a generation session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// HTTP-facing error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::EmptyQuery => ApiError::BadRequest(err.to_string()),
            PipelineError::Registry(e) => ApiError::Conflict(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
