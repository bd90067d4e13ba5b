//! API error types and responses.
//!
//! Error codes are stable strings shared with clients; diagnostic detail is
//! logged server-side and never echoed verbatim.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Not enough available credits for a reservation.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Available balance (balance minus in-flight reservations).
        available: i64,
        /// Required amount.
        required: i64,
    },

    /// The user already has the maximum number of in-flight tasks.
    #[error("too many in-flight tasks: {count} (cap {cap})")]
    TooManyInFlight {
        /// Current in-flight count.
        count: usize,
        /// Configured cap.
        cap: usize,
    },

    /// The caller exceeded a submission rate limit.
    #[error("rate limited")]
    RateLimited {
        /// Suggested backoff in seconds.
        retry_after_seconds: u32,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;

        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::InsufficientCredits {
                available,
                required,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "available": available,
                    "required": required
                })),
            ),
            Self::TooManyInFlight { count, cap } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_inflight",
                self.to_string(),
                Some(serde_json::json!({
                    "count": count,
                    "cap": cap
                })),
            ),
            Self::RateLimited {
                retry_after_seconds,
            } => {
                retry_after = Some(*retry_after_seconds);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "too many requests, slow down".to_string(),
                    Some(serde_json::json!({
                        "retryAfterSeconds": retry_after_seconds
                    })),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<wrapgen_store::StoreError> for ApiError {
    fn from(err: wrapgen_store::StoreError) -> Self {
        match err {
            wrapgen_store::StoreError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            wrapgen_store::StoreError::InsufficientCredits {
                available,
                required,
            } => Self::InsufficientCredits {
                available,
                required,
            },
            wrapgen_store::StoreError::TooManyInFlight { count, cap } => {
                Self::TooManyInFlight { count, cap }
            }
            wrapgen_store::StoreError::InvalidTransition { task_id, from, to } => {
                Self::Internal(format!("task {task_id}: invalid transition {from} -> {to}"))
            }
            wrapgen_store::StoreError::Database(msg)
            | wrapgen_store::StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<wrapgen_core::CoreError> for ApiError {
    fn from(err: wrapgen_core::CoreError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
