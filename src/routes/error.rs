use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::retention::RetentionError;

/// Error body returned by every control endpoint.
///
/// `{"error": {"code": "...", "message": "...", "field": "..."}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    /// Machine-readable error code (e.g. `validation_error`).
    pub code: String,
    pub message: String,
    /// Setting that caused the error, when one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorInfo {
                code: code.into(),
                message: message.into(),
                field: None,
            },
        }
    }

    pub fn with_field(mut self, field: Option<String>) -> Self {
        self.error.field = field;
        self
    }
}

#[derive(Debug)]
pub enum ApiError {
    Validation {
        field: Option<String>,
        message: String,
    },
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<RetentionError> for ApiError {
    fn from(err: RetentionError) -> Self {
        match err {
            RetentionError::InvalidDuration(e) => ApiError::Validation {
                field: None,
                message: e.to_string(),
            },
            RetentionError::InvalidConfig { field, reason } => ApiError::Validation {
                message: format!("{field}: {reason}"),
                field: Some(field),
            },
            RetentionError::Busy => ApiError::Conflict(err.to_string()),
            _ => {
                tracing::error!(error = %err, "Retention error");
                ApiError::Internal("An internal error occurred".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("validation_error", message).with_field(field),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("bad_request", msg),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, ErrorResponse::new("conflict", msg)),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("internal_error", msg),
            ),
        };

        (status, Json(body)).into_response()
    }
}
