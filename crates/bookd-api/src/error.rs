//! Maps internal errors to the JSON error bodies and status codes §6.1 names.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use bookd_core::queue::QueueError;
use bookd_core::registry::RegistryError;

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Locked(u64),
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Locked(retry_after_secs) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "account locked", "retry_after_secs": retry_after_secs }),
            ),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, json!({ "error": "authentication required" }))
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };
        (status, Json(body)).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::UnknownTask(id) => ApiError::NotFound(format!("unknown task: {id}")),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSource(s) => ApiError::NotFound(format!("unknown source: {s}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
