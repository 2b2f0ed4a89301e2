//! Waiting room handlers (host or co-host).

use super::participants::AffectedParticipants;
use crate::errors::ConferenceError;
use crate::models::Participant;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::types::{ConferenceId, ParticipantId, UserId};
use std::sync::Arc;
use tracing::instrument;

pub async fn list_waiting_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<Vec<Participant>>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .waiting_room(&caller, conference_id)
            .await?,
    ))
}

pub async fn admit_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .admit_one(&caller, conference_id, participant_id)
            .await?,
    ))
}

/// Handler for POST /api/v1/conferences/:id/waiting-room/admit-all
///
/// Admits in request order until the conference is full; the response
/// lists who got in.
#[instrument(
    skip_all,
    name = "conf.waiting_room.admit_all",
    fields(method = "POST", conference_id = %conference_id)
)]
pub async fn admit_all(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<AffectedParticipants>, ConferenceError> {
    let participant_ids = state.coordinator.admit_all(&caller, conference_id).await?;
    Ok(Json(AffectedParticipants { participant_ids }))
}

pub async fn deny_participant(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .deny(&caller, conference_id, participant_id)
            .await?,
    ))
}
