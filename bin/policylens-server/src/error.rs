//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a JSON-body HTTP response with an appropriate status code.
//!
//! **Security note:** store and staging errors are logged with full detail
//! but only a generic message is returned to the caller so that file paths,
//! SQL, or other implementation details never leak to clients.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use policylens_core::CoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the policylens-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the interpretation engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Core(e) => match e {
                CoreError::Validation(v) => (StatusCode::BAD_REQUEST, v.to_string()),
                CoreError::DuplicateTask { .. } => (StatusCode::CONFLICT, e.to_string()),
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "Task not found".to_owned()),
                CoreError::Store(_) | CoreError::Staging(_) | CoreError::Internal(_) => {
                    error!(error = %e, "request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },
        };
        (
            status,
            Json(json!({ "success": false, "error": client_message })),
        )
            .into_response()
    }
}

impl From<QueryRejection> for ServerError {
    fn from(e: QueryRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

impl From<JsonRejection> for ServerError {
    fn from(e: JsonRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

impl From<MultipartRejection> for ServerError {
    fn from(e: MultipartRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

impl From<MultipartError> for ServerError {
    fn from(e: MultipartError) -> Self {
        ServerError::BadRequest(format!("failed to read multipart body: {}", e.body_text()))
    }
}

impl From<validator::ValidationErrors> for ServerError {
    fn from(e: validator::ValidationErrors) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}
