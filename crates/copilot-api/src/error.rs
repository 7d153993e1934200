//! Maps the CORE's internal error types onto HTTP status codes (§7 "User-visible
//! behavior"). This crate is the only place those errors become status codes;
//! the CORE itself never knows it's being served over HTTP.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Ingestion(#[from] copilot_ingestion::IngestionError),

    #[error(transparent)]
    Context(#[from] copilot_context::ContextError),

    #[error(transparent)]
    Nlp(#[from] copilot_nlp::NlpError),

    #[error(transparent)]
    Conversation(#[from] copilot_conversation::ConversationError),

    #[error(transparent)]
    Core(#[from] copilot_core::StageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Core(err) if err.kind == copilot_core::StageErrorKind::NotFound => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Core(err) if err.kind == copilot_core::StageErrorKind::Input => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
