//! Breakout room partitioning.
//!
//! Rooms are numbered from 1 within one opening. A participant is in at most
//! one open room; closing a room returns its members to the main session.

use super::chat::validate_message_body;
use super::{ConferenceCoordinator, PendingWrites};
use crate::errors::ConferenceError;
use crate::models::{BreakoutRoom, ConferenceStatus, Participant, MAX_BREAKOUT_ROOMS};
use crate::relay::{Audience, RelayEvent, RoomInfo};
use crate::store::{Authority, ConferenceSession};
use chrono::Utc;
use common::types::{BreakoutRoomId, ConferenceId, ParticipantId, UserId};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

impl ConferenceCoordinator {
    /// Open `count` rooms, optionally spreading joined participants over
    /// them round-robin in join order.
    ///
    /// # Errors
    ///
    /// `InvalidState` if breakout rooms are disabled or the conference is
    /// not live, `BadRequest` for a count outside 1..=50, `Conflict` while
    /// rooms are already open, `Unauthorized` without host/co-host authority.
    #[instrument(skip_all, fields(conference_id = %conference_id, count = count))]
    pub async fn create_rooms(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        count: u32,
        auto_assign: bool,
    ) -> Result<Vec<BreakoutRoom>, ConferenceError> {
        if count == 0 || count > MAX_BREAKOUT_ROOMS {
            return Err(ConferenceError::BadRequest(format!(
                "Room count must be between 1 and {MAX_BREAKOUT_ROOMS}"
            )));
        }
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let rooms = {
            let mut session = session.write().await;
            ensure_breakout_available(&session, &authority)?;
            if !session.open_rooms().is_empty() {
                return Err(ConferenceError::Conflict(
                    "Breakout rooms are already open".to_string(),
                ));
            }

            let now = Utc::now();
            for number in 1..=count {
                session.add_room(BreakoutRoom {
                    id: BreakoutRoomId::new(),
                    conference_id,
                    number,
                    name: format!("Room {number}"),
                    is_open: true,
                    created_at: now,
                    closed_at: None,
                    members: BTreeSet::new(),
                });
            }
            let infos: Vec<RoomInfo> = session
                .open_rooms()
                .into_iter()
                .map(RoomInfo::from)
                .collect();
            session.emit(
                Audience::AllJoined,
                RelayEvent::BreakoutRoomsOpened { rooms: infos },
            );

            if auto_assign {
                let joined: Vec<ParticipantId> =
                    session.active_participants().iter().map(|p| p.id).collect();
                for (participant_id, number) in joined.into_iter().zip((1..=count).cycle()) {
                    session.place_in_room(participant_id, number)?;
                    session.emit(
                        Audience::AllJoined,
                        RelayEvent::MovedToRoom {
                            participant_id,
                            room_number: number,
                        },
                    );
                    if let Some(participant) = session.participant(participant_id) {
                        writes.participant(participant);
                    }
                }
            }

            let rooms: Vec<BreakoutRoom> = session.open_rooms().into_iter().cloned().collect();
            for room in &rooms {
                writes.room(room);
            }
            rooms
        };

        self.flush(writes).await;
        info!(
            target: "conf.breakout",
            conference_id = %conference_id,
            rooms = rooms.len(),
            auto_assign,
            "Breakout rooms opened"
        );
        Ok(rooms)
    }

    /// Put a joined participant into an open room.
    ///
    /// # Errors
    ///
    /// `NotFound` if the room never existed, `InvalidState` if it is closed
    /// or the participant is not joined.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn assign_to_room(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        room_number: u32,
    ) -> Result<Participant, ConferenceError> {
        self.place(caller, conference_id, participant_id, room_number, false)
            .await
    }

    /// Move an already assigned participant to another open room.
    ///
    /// # Errors
    ///
    /// As `assign_to_room`, plus `InvalidState` if the participant is in the
    /// main session.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn move_to_room(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        room_number: u32,
    ) -> Result<Participant, ConferenceError> {
        self.place(caller, conference_id, participant_id, room_number, true)
            .await
    }

    async fn place(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        room_number: u32,
        require_assigned: bool,
    ) -> Result<Participant, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let participant = {
            let mut session = session.write().await;
            ensure_breakout_available(&session, &authority)?;
            let target = session.require_joined(participant_id)?;
            if require_assigned && target.breakout_room.is_none() {
                return Err(ConferenceError::InvalidState(
                    "Participant is not in a breakout room".to_string(),
                ));
            }
            let previous = target.breakout_room;

            session.place_in_room(participant_id, room_number)?;
            if let Some(room) = previous.and_then(|n| session.open_room(n)) {
                writes.room(room);
            }
            if let Some(room) = session.open_room(room_number) {
                writes.room(room);
            }
            session.emit(
                Audience::AllJoined,
                RelayEvent::MovedToRoom {
                    participant_id,
                    room_number,
                },
            );
            let participant = session.require_participant(participant_id)?.clone();
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        debug!(
            target: "conf.breakout",
            conference_id = %conference_id,
            participant_id = %participant_id,
            room_number,
            "Participant placed in room"
        );
        Ok(participant)
    }

    /// Return a participant from its room to the main session.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless self or host/co-host, `InvalidState` if the
    /// participant is not in a room.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn return_to_main(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let participant = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_self_or_moderator(&authority, participant_id)?;
            session.require_joined(participant_id)?;
            let Some(number) = session.clear_room_assignment(participant_id) else {
                return Err(ConferenceError::InvalidState(
                    "Participant is not in a breakout room".to_string(),
                ));
            };
            if let Some(room) = session.open_room(number) {
                writes.room(room);
            }
            session.emit(
                Audience::AllJoined,
                RelayEvent::ReturnedToMain { participant_id },
            );
            let participant = session.require_participant(participant_id)?.clone();
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        Ok(participant)
    }

    /// Close one room; its members return to the main session.
    ///
    /// # Errors
    ///
    /// `NotFound` if the room never existed, `InvalidState` if it is
    /// already closed, `Unauthorized` without host/co-host authority.
    #[instrument(skip_all, fields(conference_id = %conference_id, room_number = room_number))]
    pub async fn close_room(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        room_number: u32,
    ) -> Result<BreakoutRoom, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let room = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_moderator(&authority)?;
            let members: Vec<ParticipantId> = session
                .open_room(room_number)
                .map(|room| room.members.iter().copied().collect())
                .unwrap_or_default();
            let Some(room) = session.close_room(room_number, Utc::now()) else {
                return Err(missing_room(&session, room_number));
            };
            for member in members {
                if let Some(participant) = session.participant(member) {
                    writes.participant(participant);
                }
            }
            writes.room(&room);
            room
        };

        self.flush(writes).await;
        info!(
            target: "conf.breakout",
            conference_id = %conference_id,
            room_number,
            "Breakout room closed"
        );
        Ok(room)
    }

    /// Close every open room.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn close_all_rooms(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<Vec<BreakoutRoom>, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let closed = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_moderator(&authority)?;
            let members: Vec<ParticipantId> = session
                .open_rooms()
                .iter()
                .flat_map(|room| room.members.iter().copied())
                .collect();
            let closed = session.close_all_rooms(Utc::now());
            for member in members {
                if let Some(participant) = session.participant(member) {
                    writes.participant(participant);
                }
            }
            for room in &closed {
                writes.room(room);
            }
            closed
        };

        self.flush(writes).await;
        info!(
            target: "conf.breakout",
            conference_id = %conference_id,
            rooms = closed.len(),
            "All breakout rooms closed"
        );
        Ok(closed)
    }

    /// Host/co-host message to the members of one open room.
    ///
    /// # Errors
    ///
    /// `NotFound`/`InvalidState` for missing or closed rooms, `BadRequest`
    /// for an empty or oversized body.
    #[instrument(skip_all, fields(conference_id = %conference_id, room_number = room_number))]
    pub async fn send_to_room(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        room_number: u32,
        body: &str,
    ) -> Result<(), ConferenceError> {
        let body = validate_message_body(body)?;
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        session.ensure_mutable()?;
        session.require_moderator(&authority)?;
        if session.open_room(room_number).is_none() {
            return Err(missing_room(&session, room_number));
        }
        session.emit(
            Audience::Room(room_number),
            RelayEvent::RoomMessage {
                room_number: Some(room_number),
                from: authority.user.clone(),
                body,
            },
        );
        Ok(())
    }

    /// Host/co-host message to the members of every open room.
    ///
    /// # Errors
    ///
    /// `InvalidState` when no rooms are open, `BadRequest` for an empty or
    /// oversized body.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn broadcast_to_rooms(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        body: &str,
    ) -> Result<(), ConferenceError> {
        let body = validate_message_body(body)?;
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        session.ensure_mutable()?;
        session.require_moderator(&authority)?;
        if session.open_rooms().is_empty() {
            return Err(ConferenceError::InvalidState(
                "No breakout rooms are open".to_string(),
            ));
        }
        session.emit(
            Audience::AllRooms,
            RelayEvent::RoomMessage {
                room_number: None,
                from: authority.user.clone(),
                body,
            },
        );
        Ok(())
    }

    /// Every room ever opened, open rooms first.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn rooms(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<BreakoutRoom>, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.rooms().into_iter().cloned().collect())
    }
}

fn ensure_breakout_available(
    session: &ConferenceSession,
    authority: &Authority,
) -> Result<(), ConferenceError> {
    if session.conference().status != ConferenceStatus::InProgress {
        return Err(ConferenceError::InvalidState(
            "Conference is not in progress".to_string(),
        ));
    }
    if !session.conference().settings.enable_breakout_rooms {
        return Err(ConferenceError::InvalidState(
            "Breakout rooms are disabled for this conference".to_string(),
        ));
    }
    session.require_moderator(authority)
}

fn missing_room(session: &ConferenceSession, room_number: u32) -> ConferenceError {
    match session.latest_room(room_number) {
        Some(_) => ConferenceError::InvalidState(format!("Breakout room {room_number} is closed")),
        None => ConferenceError::NotFound(format!("Breakout room {room_number} not found")),
    }
}
