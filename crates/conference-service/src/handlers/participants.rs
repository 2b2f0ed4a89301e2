//! Participant handlers: membership, permissions, media and screen share.

use super::parse_body;
use crate::errors::ConferenceError;
use crate::models::{Participant, PermissionUpdate};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use common::types::{ConferenceId, ParticipantId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Body of `PATCH .../media`; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct MediaBody {
    pub audio_muted: Option<bool>,
    pub video_off: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct HandBody {
    pub raised: bool,
}

/// Participants affected by a bulk operation.
#[derive(Debug, Serialize)]
pub struct AffectedParticipants {
    pub participant_ids: Vec<ParticipantId>,
}

pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<Vec<Participant>>, ConferenceError> {
    Ok(Json(
        state.coordinator.active_participants(conference_id).await?,
    ))
}

pub async fn get_participant(
    State(state): State<Arc<AppState>>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .participant(conference_id, participant_id)
            .await?,
    ))
}

pub async fn leave_conference(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .leave(&caller, conference_id, participant_id)
            .await?,
    ))
}

/// Handler for DELETE /api/v1/conferences/:id/participants/:pid
///
/// # Response
///
/// - 200 OK: Participant removed
/// - 401 Unauthorized: Caller is not host or co-host
/// - 403 Forbidden: A co-host tried to remove the host
#[instrument(
    skip_all,
    name = "conf.participant.remove",
    fields(method = "DELETE", conference_id = %conference_id, participant_id = %participant_id)
)]
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .remove(&caller, conference_id, participant_id)
            .await?,
    ))
}

pub async fn make_co_host(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .make_co_host(&caller, conference_id, participant_id)
            .await?,
    ))
}

pub async fn revoke_co_host(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .revoke_co_host(&caller, conference_id, participant_id)
            .await?,
    ))
}

pub async fn update_permissions(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<Participant>, ConferenceError> {
    let update: PermissionUpdate = parse_body(&body)?;
    Ok(Json(
        state
            .coordinator
            .update_permissions(&caller, conference_id, participant_id, update)
            .await?,
    ))
}

/// Handler for PATCH /api/v1/conferences/:id/participants/:pid/media
///
/// Applies the audio flag, then the video flag. An empty body is a
/// bad request.
pub async fn update_media(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<Participant>, ConferenceError> {
    let media: MediaBody = parse_body(&body)?;
    let coordinator = &state.coordinator;

    let mut participant = None;
    if let Some(muted) = media.audio_muted {
        participant = Some(
            coordinator
                .set_audio_muted(&caller, conference_id, participant_id, muted)
                .await?,
        );
    }
    if let Some(off) = media.video_off {
        participant = Some(
            coordinator
                .set_video_off(&caller, conference_id, participant_id, off)
                .await?,
        );
    }

    participant.map(Json).ok_or_else(|| {
        ConferenceError::BadRequest("Expected audio_muted or video_off".to_string())
    })
}

pub async fn set_hand(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<Participant>, ConferenceError> {
    let HandBody { raised } = parse_body(&body)?;
    Ok(Json(
        state
            .coordinator
            .set_hand_raised(&caller, conference_id, participant_id, raised)
            .await?,
    ))
}

#[instrument(skip_all, name = "conf.participant.mute_all", fields(conference_id = %conference_id))]
pub async fn mute_all(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<AffectedParticipants>, ConferenceError> {
    let participant_ids = state.coordinator.mute_all(&caller, conference_id).await?;
    Ok(Json(AffectedParticipants { participant_ids }))
}

pub async fn raised_hands(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<Vec<Participant>>, ConferenceError> {
    Ok(Json(state.coordinator.raised_hands(conference_id).await?))
}

pub async fn lower_all_hands(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<AffectedParticipants>, ConferenceError> {
    let participant_ids = state
        .coordinator
        .lower_all_hands(&caller, conference_id)
        .await?;
    Ok(Json(AffectedParticipants { participant_ids }))
}

/// Current sharer, or `null`.
pub async fn get_screen_sharer(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<Option<Participant>>, ConferenceError> {
    Ok(Json(state.coordinator.screen_sharer(conference_id).await?))
}

pub async fn start_screen_share(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .start_screen_share(&caller, conference_id, participant_id)
            .await?,
    ))
}

pub async fn stop_screen_share(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .stop_screen_share(&caller, conference_id, participant_id)
            .await?,
    ))
}
