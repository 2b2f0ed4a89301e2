//! Caller identity middleware.
//!
//! Authentication happens upstream of this service; the gateway forwards
//! the authenticated user in `X-User-Id`. `require_caller` rejects requests
//! without one and stores the `UserId` in request extensions for handlers.

use crate::errors::ConferenceError;
use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use common::types::UserId;
use tracing::instrument;

/// Header carrying the authenticated user id.
pub const CALLER_HEADER: &str = "x-user-id";

/// Upper bound on accepted user id length.
const MAX_USER_ID_LENGTH: usize = 256;

/// Read the caller from request headers. `None` when absent or malformed.
#[must_use]
pub fn caller_from_headers(headers: &HeaderMap) -> Option<UserId> {
    let raw = headers.get(CALLER_HEADER)?.to_str().ok()?.trim();
    if raw.is_empty() || raw.len() > MAX_USER_ID_LENGTH {
        return None;
    }
    Some(UserId::new(raw))
}

/// Reject requests without a caller.
///
/// # Response
///
/// - Returns 401 Unauthorized if `X-User-Id` is missing or malformed
/// - Continues to next handler with `UserId` in extensions otherwise
#[instrument(skip_all, name = "conf.middleware.caller")]
pub async fn require_caller(
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ConferenceError> {
    let caller = caller_from_headers(req.headers()).ok_or_else(|| {
        tracing::debug!(target: "conf.middleware.caller", "Missing or malformed caller header");
        ConferenceError::Unauthorized("Missing caller identity".to_string())
    })?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
