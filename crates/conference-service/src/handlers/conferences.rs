//! Conference lifecycle handlers.
//!
//! - `POST /api/v1/conferences` - Schedule a conference
//! - `POST /api/v1/calendar-events/:event_id/conference` - Schedule from a calendar event
//! - `GET /api/v1/conferences/:id` - Conference summary
//! - `GET /api/v1/conferences/:id/snapshot` - Full state for resynchronization
//! - `GET /api/v1/conferences/:id/analytics` - Aggregate counters
//! - `POST /api/v1/conferences/:id/{start,end,cancel}` - Status transitions (host)
//! - `POST|DELETE /api/v1/conferences/:id/lock` - Lock and unlock (host or co-host)
//! - `PATCH /api/v1/conferences/:id/settings` - Settings change (host)
//! - `POST /api/v1/conferences/:id/join` - Join, returns the peer handle
//! - `POST /api/v1/conferences/:id/participants/:pid/reconnect` - Re-attach after a drop
//!
//! # Security
//!
//! - Passwords and reconnect tokens never reach logs
//! - Summaries never carry the password hash

use super::{parse_body, parse_optional_body};
use crate::errors::ConferenceError;
use crate::middleware::caller_from_headers;
use crate::models::{
    CalendarOverrides, ConferenceAnalytics, ConferenceSnapshot, ConferenceSummary, JoinRequest,
    NewConference, Participant, SettingsUpdate,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use common::secret::SecretString;
use common::types::{ConferenceId, ParticipantId, PeerId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Body of `POST /join`. The user comes from `X-User-Id`; without it the
/// caller joins as a guest.
#[derive(Debug, Deserialize)]
pub struct JoinBody {
    pub display_name: String,
    pub password: Option<SecretString>,
}

/// Response to a successful join.
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub participant: Participant,
    pub peer_id: PeerId,
    pub reconnect_token: String,
    /// WebSocket path delivering this peer's events.
    pub stream_path: String,
    pub snapshot: ConferenceSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct ReconnectBody {
    pub token: String,
}

/// Response to a successful reconnect.
#[derive(Debug, Serialize)]
pub struct ReconnectResponse {
    pub participant: Participant,
    pub reconnect_token: String,
    pub stream_path: String,
    pub snapshot: ConferenceSnapshot,
}

fn stream_path(conference_id: ConferenceId, peer_id: &PeerId) -> String {
    format!("/api/v1/conferences/{conference_id}/peers/{peer_id}/stream")
}

/// Handler for POST /api/v1/conferences
///
/// # Response
///
/// - 201 Created: Conference scheduled
/// - 400 Bad Request: Invalid body or field values
/// - 403 Forbidden: Caller may not create conferences
#[instrument(
    skip_all,
    name = "conf.conference.create",
    fields(method = "POST", endpoint = "/api/v1/conferences")
)]
pub async fn create_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    body: Bytes,
) -> Result<(StatusCode, Json<ConferenceSummary>), ConferenceError> {
    let request: NewConference = parse_body(&body)?;
    let summary = state.coordinator.create_conference(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Handler for POST /api/v1/calendar-events/:event_id/conference
///
/// Title, description and schedule come from the event; the optional body
/// supplies capacity, settings and password.
#[instrument(
    skip_all,
    name = "conf.conference.create_from_calendar",
    fields(method = "POST", endpoint = "/api/v1/calendar-events/{event_id}/conference")
)]
pub async fn create_from_calendar_event(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(event_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ConferenceSummary>), ConferenceError> {
    let overrides: CalendarOverrides = parse_optional_body(&body)?;
    let summary = state
        .coordinator
        .create_from_calendar_event(&caller, &event_id, overrides)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_conference(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(state.coordinator.conference(conference_id).await?))
}

pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSnapshot>, ConferenceError> {
    Ok(Json(state.coordinator.snapshot(conference_id).await?))
}

pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceAnalytics>, ConferenceError> {
    Ok(Json(state.coordinator.analytics(conference_id).await?))
}

pub async fn start_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(state.coordinator.start(&caller, conference_id).await?))
}

pub async fn end_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(state.coordinator.end(&caller, conference_id).await?))
}

pub async fn cancel_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(state.coordinator.cancel(&caller, conference_id).await?))
}

pub async fn lock_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(state.coordinator.lock(&caller, conference_id).await?))
}

pub async fn unlock_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(state.coordinator.unlock(&caller, conference_id).await?))
}

/// Handler for PATCH /api/v1/conferences/:id/settings
///
/// Absent fields are left untouched; `"password": null` clears the password.
#[instrument(
    skip_all,
    name = "conf.conference.update_settings",
    fields(method = "PATCH", conference_id = %conference_id)
)]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
    body: Bytes,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    let update: SettingsUpdate = parse_body(&body)?;
    Ok(Json(
        state
            .coordinator
            .update_settings(&caller, conference_id, update)
            .await?,
    ))
}

/// Handler for POST /api/v1/conferences/:id/join
///
/// The returned event receiver is parked until the peer opens
/// `stream_path`.
///
/// # Response
///
/// - 200 OK: Joined, or placed in the waiting room (`participant.status`)
/// - 401 Unauthorized: Wrong or missing password
/// - 409 Conflict: Conference not joinable, or caller already a member
/// - 423 Locked: Conference is locked
/// - 429 Too Many Requests: Conference at capacity
#[instrument(
    skip_all,
    name = "conf.conference.join",
    fields(method = "POST", conference_id = %conference_id)
)]
pub async fn join_conference(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<JoinResponse>, ConferenceError> {
    let JoinBody {
        display_name,
        password,
    } = parse_body(&body)?;
    let request = JoinRequest {
        user_id: caller_from_headers(&headers),
        display_name,
        password,
    };

    let outcome = state.coordinator.join(conference_id, request).await?;
    state
        .streams
        .park(conference_id, outcome.peer_id.clone(), outcome.events)
        .await;

    Ok(Json(JoinResponse {
        stream_path: stream_path(conference_id, &outcome.peer_id),
        participant: outcome.participant,
        peer_id: outcome.peer_id,
        reconnect_token: outcome.reconnect_token,
        snapshot: outcome.snapshot,
    }))
}

/// Handler for POST /api/v1/conferences/:id/participants/:pid/reconnect
///
/// The presented token is spent; the response carries its replacement.
#[instrument(
    skip_all,
    name = "conf.conference.reconnect",
    fields(method = "POST", conference_id = %conference_id, participant_id = %participant_id)
)]
pub async fn reconnect_participant(
    State(state): State<Arc<AppState>>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<ReconnectResponse>, ConferenceError> {
    let ReconnectBody { token } = parse_body(&body)?;
    let outcome = state
        .coordinator
        .reconnect(conference_id, participant_id, &token)
        .await?;

    let peer_id = outcome.participant.peer_id.clone();
    state
        .streams
        .park(conference_id, peer_id.clone(), outcome.events)
        .await;

    Ok(Json(ReconnectResponse {
        stream_path: stream_path(conference_id, &peer_id),
        participant: outcome.participant,
        reconnect_token: outcome.reconnect_token,
        snapshot: outcome.snapshot,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_path_shape() {
        let id = ConferenceId::new();
        assert_eq!(
            stream_path(id, &PeerId::from("abc")),
            format!("/api/v1/conferences/{id}/peers/abc/stream")
        );
    }

    #[test]
    fn test_join_body_password_is_optional() {
        let body: JoinBody = serde_json::from_str(r#"{"display_name": "Alice"}"#).unwrap();
        assert_eq!(body.display_name, "Alice");
        assert!(body.password.is_none());
    }
}
