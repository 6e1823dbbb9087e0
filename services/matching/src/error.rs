//! Error types for the matching service
//!
//! The taxonomy mirrors how callers must react: missing profiles are
//! surfaced and never retried, wrong-state lifecycle calls are rejected
//! immediately, and infrastructure failures are the only retryable
//! class.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Custom error type for the matching service
#[derive(Error, Debug)]
pub enum MatchError {
    /// Requester or candidate profile does not exist
    #[error("profile not found: {0}")]
    ProfileNotFound(Uuid),

    /// A lifecycle action was attempted from a state that forbids it
    #[error("cannot {action}: pair is in state '{state}'")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    /// Too many requests from one user inside the rate window
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MatchError {
    /// Whether a retry with backoff could succeed.
    ///
    /// Drives the queue worker's release-vs-dead-letter decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchError::Store(StoreError::Unavailable(_)))
    }
}

impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            MatchError::ProfileNotFound(_) => {
                (StatusCode::NOT_FOUND, json!({ "error": self.to_string() }))
            }
            MatchError::InvalidState { .. } => {
                (StatusCode::CONFLICT, json!({ "error": self.to_string() }))
            }
            MatchError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "Too many requests. Please slow down.",
                    "retry_after": retry_after_secs,
                }),
            ),
            MatchError::Store(StoreError::Unavailable(_)) => {
                tracing::error!("storage unavailable: {}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "Service temporarily unavailable" }),
                )
            }
            MatchError::Store(_) => {
                tracing::error!("storage error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Type alias for matching results
pub type MatchResult<T> = Result<T, MatchError>;
