//! Conference coordinator error types.
//!
//! Every validation failure is returned synchronously to the caller of the
//! operation. Errors map to HTTP status codes via the `IntoResponse` impl;
//! persistence and internal details are logged server-side and replaced
//! with generic client messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Conference coordinator error type.
///
/// Maps to HTTP status codes:
/// - `NotFound`, `UnknownPeer`: 404
/// - `Unauthorized`: 401
/// - `Forbidden`: 403
/// - `InvalidState`, `Conflict`: 409
/// - `Locked`: 423
/// - `Capacity`: 429
/// - `BadRequest`: 400
/// - `Persistence`, `Config`, `Internal`: 500
#[derive(Debug, Error)]
pub enum ConferenceError {
    /// Conference, participant, room or message absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad password, or caller lacks host/co-host authority.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks a specific granted permission.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation not valid for the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Conference lock flag is set.
    #[error("Conference is locked")]
    Locked,

    /// Join or admission over the participant limit.
    #[error("Conference at capacity: {0}")]
    Capacity(String),

    /// Relay target or source is not a current member of the conference.
    #[error("Unknown peer")]
    UnknownPeer,

    /// Attempt to violate an exclusivity invariant.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Durable store operation failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConferenceError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConferenceError::NotFound(_) | ConferenceError::UnknownPeer => StatusCode::NOT_FOUND,
            ConferenceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ConferenceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ConferenceError::InvalidState(_) | ConferenceError::Conflict(_) => StatusCode::CONFLICT,
            ConferenceError::Locked => StatusCode::LOCKED,
            ConferenceError::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            ConferenceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ConferenceError::Persistence(_)
            | ConferenceError::Config(_)
            | ConferenceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ConferenceError::NotFound(_) => "NOT_FOUND",
            ConferenceError::Unauthorized(_) => "UNAUTHORIZED",
            ConferenceError::Forbidden(_) => "FORBIDDEN",
            ConferenceError::InvalidState(_) => "INVALID_STATE",
            ConferenceError::Locked => "LOCKED",
            ConferenceError::Capacity(_) => "CAPACITY",
            ConferenceError::UnknownPeer => "UNKNOWN_PEER",
            ConferenceError::Conflict(_) => "CONFLICT",
            ConferenceError::BadRequest(_) => "BAD_REQUEST",
            ConferenceError::Persistence(_) => "PERSISTENCE_ERROR",
            ConferenceError::Config(_) | ConferenceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ConferenceError::Persistence(_)
            | ConferenceError::Config(_)
            | ConferenceError::Internal(_) => "An internal error occurred".to_string(),
            ConferenceError::Locked => "Conference is locked".to_string(),
            ConferenceError::UnknownPeer => "Unknown peer".to_string(),
            ConferenceError::NotFound(msg)
            | ConferenceError::Unauthorized(msg)
            | ConferenceError::Forbidden(msg)
            | ConferenceError::InvalidState(msg)
            | ConferenceError::Capacity(msg)
            | ConferenceError::Conflict(msg)
            | ConferenceError::BadRequest(msg) => msg.clone(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ConferenceError {
    fn into_response(self) -> Response {
        match &self {
            ConferenceError::Persistence(err) => {
                tracing::error!(target: "conf.repository", error = %err, "Persistence operation failed");
            }
            ConferenceError::Config(err) | ConferenceError::Internal(err) => {
                tracing::error!(target: "conf.http", error = %err, "Internal error");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<redis::RedisError> for ConferenceError {
    fn from(err: redis::RedisError) -> Self {
        ConferenceError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ConferenceError {
    fn from(err: serde_json::Error) -> Self {
        ConferenceError::Internal(format!("serialization failed: {err}"))
    }
}
