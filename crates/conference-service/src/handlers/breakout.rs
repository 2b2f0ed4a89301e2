//! Breakout room handlers.
//!
//! - `GET|POST|DELETE /api/v1/conferences/:id/breakout-rooms` - List, open, close all
//! - `DELETE /api/v1/conferences/:id/breakout-rooms/:number` - Close one room
//! - `POST /api/v1/conferences/:id/breakout-rooms/:number/messages` - Message one room
//! - `POST /api/v1/conferences/:id/room-broadcasts` - Message every open room
//! - `PUT|DELETE /api/v1/conferences/:id/participants/:pid/room` - Place or return to main

use super::parse_body;
use crate::errors::ConferenceError;
use crate::models::{BreakoutRoom, Participant};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{ConferenceId, ParticipantId, UserId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct CreateRoomsBody {
    pub count: u32,
    #[serde(default)]
    pub auto_assign: bool,
}

/// Body of `PUT .../room`. `move` relocates a participant already in a
/// room; without it the participant must be in the main session.
#[derive(Debug, Deserialize)]
pub struct PlacementBody {
    pub room_number: u32,
    #[serde(default, rename = "move")]
    pub move_between_rooms: bool,
}

#[derive(Debug, Deserialize)]
pub struct RoomMessageBody {
    pub body: String,
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<Vec<BreakoutRoom>>, ConferenceError> {
    Ok(Json(state.coordinator.rooms(conference_id).await?))
}

/// Handler for POST /api/v1/conferences/:id/breakout-rooms
///
/// # Response
///
/// - 201 Created: Rooms opened (and populated when `auto_assign`)
/// - 400 Bad Request: `count` outside 1..=50
/// - 409 Conflict: Rooms already open, or breakout rooms disabled
#[instrument(
    skip_all,
    name = "conf.breakout.create",
    fields(method = "POST", conference_id = %conference_id)
)]
pub async fn create_rooms(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
    body: Bytes,
) -> Result<(StatusCode, Json<Vec<BreakoutRoom>>), ConferenceError> {
    let CreateRoomsBody { count, auto_assign } = parse_body(&body)?;
    let rooms = state
        .coordinator
        .create_rooms(&caller, conference_id, count, auto_assign)
        .await?;
    Ok((StatusCode::CREATED, Json(rooms)))
}

pub async fn close_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, room_number)): Path<(ConferenceId, u32)>,
) -> Result<Json<BreakoutRoom>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .close_room(&caller, conference_id, room_number)
            .await?,
    ))
}

pub async fn close_all_rooms(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<Vec<BreakoutRoom>>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .close_all_rooms(&caller, conference_id)
            .await?,
    ))
}

pub async fn assign_to_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
    body: Bytes,
) -> Result<Json<Participant>, ConferenceError> {
    let placement: PlacementBody = parse_body(&body)?;
    let coordinator = &state.coordinator;
    let participant = if placement.move_between_rooms {
        coordinator
            .move_to_room(&caller, conference_id, participant_id, placement.room_number)
            .await?
    } else {
        coordinator
            .assign_to_room(&caller, conference_id, participant_id, placement.room_number)
            .await?
    };
    Ok(Json(participant))
}

pub async fn return_to_main(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, participant_id)): Path<(ConferenceId, ParticipantId)>,
) -> Result<Json<Participant>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .return_to_main(&caller, conference_id, participant_id)
            .await?,
    ))
}

pub async fn send_to_room(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path((conference_id, room_number)): Path<(ConferenceId, u32)>,
    body: Bytes,
) -> Result<StatusCode, ConferenceError> {
    let RoomMessageBody { body } = parse_body(&body)?;
    state
        .coordinator
        .send_to_room(&caller, conference_id, room_number, &body)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn broadcast_to_rooms(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
    body: Bytes,
) -> Result<StatusCode, ConferenceError> {
    let RoomMessageBody { body } = parse_body(&body)?;
    state
        .coordinator
        .broadcast_to_rooms(&caller, conference_id, &body)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_defaults_to_assign() {
        let body: PlacementBody = serde_json::from_str(r#"{"room_number": 2}"#).unwrap();
        assert_eq!(body.room_number, 2);
        assert!(!body.move_between_rooms);

        let body: PlacementBody =
            serde_json::from_str(r#"{"room_number": 1, "move": true}"#).unwrap();
        assert!(body.move_between_rooms);
    }
}
