//! Whiteboard handlers.

use super::parse_body;
use crate::errors::ConferenceError;
use crate::models::WhiteboardState;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use common::types::{ConferenceId, ParticipantId, UserId};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct WhiteboardBody {
    pub document: String,
}

pub async fn get_whiteboard(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<WhiteboardState>, ConferenceError> {
    Ok(Json(state.coordinator.whiteboard(conference_id).await?))
}

pub async fn update_whiteboard(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<WhiteboardState>, ConferenceError> {
    let WhiteboardBody { document } = parse_body(&body)?;
    Ok(Json(
        state
            .coordinator
            .update_whiteboard(&caller, conference_id, participant_id, document)
            .await?,
    ))
}

pub async fn clear_whiteboard(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<WhiteboardState>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .clear_whiteboard(&caller, conference_id, participant_id)
            .await?,
    ))
}
