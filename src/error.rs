//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{DomainError, ErrorCategory};

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::audit::AuditLogError> for AppError {
    fn from(err: crate::audit::AuditLogError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 403 Forbidden
            AppError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, "not_found", Some(what.clone()))
            }

            // Domain errors - the category picks the status
            AppError::Domain(domain_err) => {
                let status = match domain_err.category() {
                    ErrorCategory::BadInput => StatusCode::BAD_REQUEST,
                    ErrorCategory::Conflict => StatusCode::CONFLICT,
                    ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                    ErrorCategory::Internal => {
                        tracing::error!("Storage error: {:?}", domain_err);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, domain_err.code(), Some(domain_err.to_string()))
            }

            // 500 Internal Server Error
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
