//! API Middleware
//!
//! Caller identity extraction and request logging.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{OperationContext, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// =========================================================================
// Request context
// =========================================================================

fn bad_header(message: &str, error_code: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "error_code": error_code
        })),
    )
        .into_response()
}

/// Build the [`OperationContext`] from the identity headers.
///
/// Requests without `X-User-Id` run as an anonymous member; a missing role
/// means `member`. Malformed values are rejected.
pub async fn context_middleware(
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let mut context = OperationContext::new();

    if let Some(user_id_str) = headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()) {
        match Uuid::parse_str(user_id_str) {
            Ok(user_id) => context = context.with_actor(user_id),
            Err(_) => {
                return Err(bad_header("Invalid X-User-Id header format", "invalid_user_id"));
            }
        }
    }

    if let Some(role_str) = headers.get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
        match role_str.parse::<Role>() {
            Ok(role) => context = context.with_role(role),
            Err(_) => {
                return Err(bad_header("Invalid X-User-Role header", "invalid_user_role"));
            }
        }
    }

    // Extract correlation ID or generate new one
    let correlation_id = correlation_id(&headers).unwrap_or_else(Uuid::new_v4);
    context = context.with_correlation_id(correlation_id);

    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Ok(value) = correlation_id.to_string().parse() {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    Ok(response)
}

fn correlation_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
}

// =========================================================================
// Request logging
// =========================================================================

/// Header values never written to the logs
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-mpesa-callback-token",
];

/// Header pairs safe to log, with secrets replaced by `[REDACTED]`
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            // HeaderName is always lowercase
            let shown = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]"
            } else {
                value.to_str().unwrap_or("[invalid utf8]")
            };
            (name.as_str().to_string(), shown.to_string())
        })
        .collect()
}

/// Logs each request and its outcome inside a span carrying the
/// correlation id and caller
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        correlation_id = ?correlation_id(request.headers()),
        user_id = request
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous"),
    );

    async move {
        tracing::debug!(headers = ?mask_headers_for_logging(request.headers()), "Incoming request");

        let started = Instant::now();
        let response = next.run(request).await;
        let status = response.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.is_server_error() {
            tracing::error!(status = %status, elapsed_ms, "Request failed");
        } else {
            tracing::info!(status = %status, elapsed_ms, "Request completed");
        }
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer secret-token".parse().unwrap());
        headers.insert("x-user-id", "user-123".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let auth = masked.iter().find(|(k, _)| k == "authorization");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let user_id = masked.iter().find(|(k, _)| k == "x-user-id");

        assert_eq!(auth.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(user_id.unwrap().1, "user-123");
    }

    #[test]
    fn test_callback_token_is_masked() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mpesa-callback-token", "abc123".parse().unwrap());
        headers.insert("x-user-role", "staff".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);
        assert!(masked.contains(&("x-mpesa-callback-token".to_string(), "[REDACTED]".to_string())));
        assert!(masked.contains(&("x-user-role".to_string(), "staff".to_string())));
    }

    #[test]
    fn test_correlation_id_parsing() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, id.to_string().parse().unwrap());
        assert_eq!(correlation_id(&headers), Some(id));

        headers.insert(CORRELATION_ID_HEADER, "not-a-uuid".parse().unwrap());
        assert_eq!(correlation_id(&headers), None);
    }
}
