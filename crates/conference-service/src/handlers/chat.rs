//! Chat handlers.
//!
//! Messages are sent and read as a specific participant, which the caller
//! must own; chat bodies never reach logs.

use super::parse_body;
use crate::errors::ConferenceError;
use crate::models::ChatMessage;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{ChatMessageId, ConferenceId, ParticipantId, UserId};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub body: String,
    /// Private recipient; absent for a message to everyone.
    pub recipient: Option<ParticipantId>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<(StatusCode, Json<ChatMessage>), ConferenceError> {
    let SendMessageBody { body, recipient } = parse_body(&body)?;
    let message = state
        .coordinator
        .send_message(&caller, conference_id, participant_id, &body, recipient)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Vec<ChatMessage>>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .messages(&caller, conference_id, participant_id)
            .await?,
    ))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, message_id)): Path<(ConferenceId, ChatMessageId)>,
) -> Result<StatusCode, ConferenceError> {
    state
        .coordinator
        .delete_message(&caller, conference_id, message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
