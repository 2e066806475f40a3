//! Platform API errors and their HTTP renderings.
//!
//! Errors are structured values end to end; strings only appear at the
//! response boundary. Ancillary work (analytics fan-out, trending updates)
//! never converts into one of these; it is logged and dropped.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use apitoll_store::StoreError;

/// Error kinds surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Daily plan limit reached")]
    PlanLimitReached { remaining: u32 },
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("{message}")]
    Validation { field: &'static str, message: String },
    #[error("Not found")]
    NotFound,
    #[error("Internal error")]
    Internal,
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound,
            StoreError::UniqueViolation { index, .. } => {
                ApiError::validation(index, "value already in use")
            }
            other => {
                tracing::error!(error = %other, "store error");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Unauthorized" }),
            ),
            ApiError::PlanLimitReached { remaining } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Daily plan limit reached", "remaining": remaining }),
            ),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Rate limit exceeded", "retryAfter": retry_after_secs }),
            ),
            ApiError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "field": field }),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "Not found" })),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal error" }),
            ),
        };
        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
