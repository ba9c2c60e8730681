//! HTTP API error types.
//!
//! Provides a unified `ApiError` enum for consistent error responses across
//! the HTTP API layer. Implements Axum's `IntoResponse` trait to automatically
//! convert errors into appropriate HTTP responses.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rv_harness::governor::GovernorError;
use rv_pipeline::PipelineOutcome;
use serde_json::json;
use thiserror::Error;

/// Errors that can occur in the HTTP API layer, one variant per kind in the
/// error taxonomy every component boundary converts into.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad input at the boundary; no state change.
    #[error("validation: {0}")]
    Validation(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A `ShareGuard` rejection.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The Governor or Queue is at capacity.
    #[error("resource exhausted: {reason}")]
    ResourceExhausted {
        reason: String,
        used: usize,
        cap: usize,
        retry_after_secs: u64,
    },

    /// AI timeout, SQLite busy/locked, transport flap — retried by the Queue.
    #[error("transient: {0}")]
    Transient(String),

    /// Unrecoverable parsing/structure failure or schema violation.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Cancellation due to process termination.
    #[error("shutdown: {0}")]
    Shutdown(String),

    /// An internal server error occurred.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<rv_core::store::StoreError> for ApiError {
    fn from(err: rv_core::store::StoreError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<GovernorError> for ApiError {
    fn from(err: GovernorError) -> Self {
        let (reason, used, cap) = match err {
            GovernorError::SystemExhausted { in_use, limit } => {
                ("system_saturated".to_string(), in_use, limit)
            }
            GovernorError::UserExhausted { in_use, limit, .. } => {
                ("user_saturated".to_string(), in_use, limit)
            }
            GovernorError::DbSaturated { in_use, limit, .. } => {
                ("db_saturated".to_string(), in_use, limit)
            }
        };
        ApiError::ResourceExhausted {
            reason,
            used,
            cap,
            retry_after_secs: 5,
        }
    }
}

impl From<PipelineOutcome> for ApiError {
    fn from(outcome: PipelineOutcome) -> Self {
        match outcome {
            PipelineOutcome::Success => {
                ApiError::InternalError("unexpected success treated as error".into())
            }
            PipelineOutcome::Transient(msg) => ApiError::Transient(msg),
            PipelineOutcome::Fatal(msg) => ApiError::Fatal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            ApiError::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Fatal(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Shutdown(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            ApiError::ResourceExhausted {
                reason, used, cap, ..
            } => json!({ "error": self.to_string(), "reason": reason, "used": used, "cap": cap }),
            _ => json!({ "error": self.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::ResourceExhausted { retry_after_secs, .. } = &self {
            response.headers_mut().insert(
                "retry-after",
                HeaderValue::from_str(&retry_after_secs.to_string()).unwrap(),
            );
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
