//! Per-conference session aggregate.
//!
//! A `ConferenceSession` owns everything live about one conference: the
//! durable record, participants, peer links, breakout rooms, the chat log
//! and the whiteboard. It is always accessed through the conference's
//! `tokio::sync::RwLock`; mutating helpers here assume the caller holds the
//! write guard and has already validated authority.

use crate::errors::ConferenceError;
use crate::models::{
    BreakoutRoom, ChatMessage, Conference, ConferenceAnalytics, ConferenceSnapshot,
    ConnectionState, Participant, ParticipantStatus, WhiteboardState,
};
use crate::observability::metrics;
use crate::relay::{deliver, Audience, PeerSender, RelayEnvelope, RelayEvent, ShareStopReason};
use chrono::{DateTime, Utc};
use common::types::{ConferenceId, ParticipantId, PeerId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// Caller identity resolved before the conference lock is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub user: UserId,
    /// `Authorizer::is_host` answered true for this conference.
    pub external_host: bool,
}

impl Authority {
    #[must_use]
    pub fn new(user: UserId, external_host: bool) -> Self {
        Self {
            user,
            external_host,
        }
    }
}

/// Live state of one conference.
#[derive(Debug)]
pub struct ConferenceSession {
    conference: Conference,
    participants: HashMap<ParticipantId, Participant>,
    peer_index: HashMap<PeerId, ParticipantId>,
    issued_peer_ids: HashSet<PeerId>,
    links: HashMap<ParticipantId, PeerSender>,
    disconnected_at: HashMap<ParticipantId, Instant>,
    reconnect_nonces: HashMap<ParticipantId, String>,
    rooms: Vec<BreakoutRoom>,
    chat: Vec<ChatMessage>,
    whiteboard: WhiteboardState,
    next_join_order: u64,
    event_seq: AtomicU64,
    /// Held from sequence allocation until every recipient has been handed
    /// the envelope, so each peer sees its events in `seq` order even when
    /// emitters share the read lock.
    emit_order: Mutex<()>,
}

impl ConferenceSession {
    /// Start a session for a freshly scheduled conference.
    #[must_use]
    pub fn new(conference: Conference) -> Self {
        Self {
            conference,
            participants: HashMap::new(),
            peer_index: HashMap::new(),
            issued_peer_ids: HashSet::new(),
            links: HashMap::new(),
            disconnected_at: HashMap::new(),
            reconnect_nonces: HashMap::new(),
            rooms: Vec::new(),
            chat: Vec::new(),
            whiteboard: WhiteboardState::default(),
            next_join_order: 0,
            event_seq: AtomicU64::new(0),
            emit_order: Mutex::new(()),
        }
    }

    /// Rebuild a session from durable records.
    ///
    /// Active participants come back without transports; they are marked
    /// disconnected so the reaper retires them after the grace period.
    #[must_use]
    pub fn hydrate(conference: Conference, participants: Vec<Participant>) -> Self {
        let mut session = Self::new(conference);
        let now = Instant::now();
        for mut participant in participants {
            if participant.status.is_active() {
                participant.connection = ConnectionState::Disconnected;
                session.disconnected_at.insert(participant.id, now);
            }
            participant.breakout_room = None;
            session.next_join_order = session.next_join_order.max(participant.join_order + 1);
            session.issued_peer_ids.insert(participant.peer_id.clone());
            session
                .peer_index
                .insert(participant.peer_id.clone(), participant.id);
            session.participants.insert(participant.id, participant);
        }
        session
    }

    // ------------------------------------------------------------------
    // Conference record
    // ------------------------------------------------------------------

    #[must_use]
    pub fn conference(&self) -> &Conference {
        &self.conference
    }

    pub fn conference_mut(&mut self) -> &mut Conference {
        &mut self.conference
    }

    #[must_use]
    pub fn id(&self) -> ConferenceId {
        self.conference.id
    }

    /// Fails with `InvalidState` once the conference has ended or been cancelled.
    ///
    /// # Errors
    ///
    /// `ConferenceError::InvalidState` for terminal conferences.
    pub fn ensure_mutable(&self) -> Result<(), ConferenceError> {
        if self.conference.status.is_terminal() {
            return Err(ConferenceError::InvalidState(format!(
                "Conference is {}",
                self.conference.status.as_str()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authority
    // ------------------------------------------------------------------

    /// The conference owner, by record or by the authorizer.
    #[must_use]
    pub fn is_host(&self, authority: &Authority) -> bool {
        authority.external_host || self.conference.host_id == authority.user
    }

    /// Host, or a joined participant of this user holding `CO_HOST`.
    #[must_use]
    pub fn is_moderator(&self, authority: &Authority) -> bool {
        self.is_host(authority)
            || self.participants.values().any(|p| {
                p.is_joined() && p.user_id == authority.user && p.permissions.is_co_host()
            })
    }

    /// Whether `participant` belongs to a host or co-host.
    #[must_use]
    pub fn is_moderator_participant(&self, participant: &Participant) -> bool {
        participant.user_id == self.conference.host_id || participant.permissions.is_co_host()
    }

    /// Require host authority.
    ///
    /// # Errors
    ///
    /// `ConferenceError::Unauthorized` if the caller is not the host.
    pub fn require_host(&self, authority: &Authority) -> Result<(), ConferenceError> {
        if self.is_host(authority) {
            Ok(())
        } else {
            Err(ConferenceError::Unauthorized(
                "Host authority required".to_string(),
            ))
        }
    }

    /// Require host or co-host authority.
    ///
    /// # Errors
    ///
    /// `ConferenceError::Unauthorized` if the caller is neither.
    pub fn require_moderator(&self, authority: &Authority) -> Result<(), ConferenceError> {
        if self.is_moderator(authority) {
            Ok(())
        } else {
            Err(ConferenceError::Unauthorized(
                "Host or co-host authority required".to_string(),
            ))
        }
    }

    /// Require that `participant` belongs to the caller, or that the caller moderates.
    ///
    /// # Errors
    ///
    /// `ConferenceError::NotFound` for unknown participants,
    /// `ConferenceError::Unauthorized` for foreign ones.
    pub fn require_self_or_moderator(
        &self,
        authority: &Authority,
        participant_id: ParticipantId,
    ) -> Result<(), ConferenceError> {
        let participant = self.require_participant(participant_id)?;
        if participant.user_id == authority.user || self.is_moderator(authority) {
            Ok(())
        } else {
            Err(ConferenceError::Unauthorized(
                "Not permitted to act on this participant".to_string(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    #[must_use]
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    /// # Errors
    ///
    /// `ConferenceError::NotFound` if the participant is unknown.
    pub fn require_participant(&self, id: ParticipantId) -> Result<&Participant, ConferenceError> {
        self.participants
            .get(&id)
            .ok_or_else(|| ConferenceError::NotFound("Participant not found".to_string()))
    }

    /// # Errors
    ///
    /// `ConferenceError::NotFound` if the participant is unknown.
    pub fn require_participant_mut(
        &mut self,
        id: ParticipantId,
    ) -> Result<&mut Participant, ConferenceError> {
        self.participants
            .get_mut(&id)
            .ok_or_else(|| ConferenceError::NotFound("Participant not found".to_string()))
    }

    /// The participant must exist and be `Joined`.
    ///
    /// # Errors
    ///
    /// `NotFound` if unknown, `InvalidState` if not joined.
    pub fn require_joined(&self, id: ParticipantId) -> Result<&Participant, ConferenceError> {
        let participant = self.require_participant(id)?;
        if participant.is_joined() {
            Ok(participant)
        } else {
            Err(ConferenceError::InvalidState(
                "Participant is not joined".to_string(),
            ))
        }
    }

    #[must_use]
    pub fn participant_by_peer(&self, peer_id: &PeerId) -> Option<&Participant> {
        self.peer_index
            .get(peer_id)
            .and_then(|id| self.participants.get(id))
    }

    /// Joined participants in join order.
    #[must_use]
    pub fn active_participants(&self) -> Vec<&Participant> {
        let mut joined: Vec<&Participant> =
            self.participants.values().filter(|p| p.is_joined()).collect();
        joined.sort_by_key(|p| p.join_order);
        joined
    }

    /// Waiting participants in request order.
    #[must_use]
    pub fn waiting_participants(&self) -> Vec<&Participant> {
        let mut waiting: Vec<&Participant> = self
            .participants
            .values()
            .filter(|p| p.status == ParticipantStatus::InWaitingRoom)
            .collect();
        waiting.sort_by_key(|p| (p.requested_at, p.join_order));
        waiting
    }

    /// Joined participants with raised hands, earliest raise first.
    #[must_use]
    pub fn raised_hands(&self) -> Vec<&Participant> {
        let mut raised: Vec<&Participant> = self
            .participants
            .values()
            .filter(|p| p.is_joined() && p.media.hand_raised)
            .collect();
        raised.sort_by_key(|p| (p.media.hand_raised_at, p.join_order));
        raised
    }

    /// Every participant flagged as sharing.
    #[must_use]
    pub fn screen_sharers(&self) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| p.media.screen_sharing)
            .map(|p| p.id)
            .collect()
    }

    /// The current sharer, if any.
    #[must_use]
    pub fn screen_sharer(&self) -> Option<ParticipantId> {
        self.participants
            .values()
            .find(|p| p.media.screen_sharing)
            .map(|p| p.id)
    }

    #[must_use]
    pub fn joined_count(&self) -> u32 {
        u32::try_from(self.participants.values().filter(|p| p.is_joined()).count())
            .unwrap_or(u32::MAX)
    }

    /// Active (waiting or joined) non-guest participant of `user`.
    #[must_use]
    pub fn active_membership(&self, user: &UserId) -> Option<&Participant> {
        self.participants
            .values()
            .find(|p| !p.is_guest && p.status.is_active() && &p.user_id == user)
    }

    /// Register a new participant with its peer link.
    pub fn insert_participant(&mut self, participant: Participant, link: PeerSender) {
        self.issued_peer_ids.insert(participant.peer_id.clone());
        self.peer_index
            .insert(participant.peer_id.clone(), participant.id);
        self.links.insert(participant.id, link);
        self.participants.insert(participant.id, participant);
    }

    /// Claim the next join position.
    pub fn next_join_order(&mut self) -> u64 {
        let order = self.next_join_order;
        self.next_join_order += 1;
        order
    }

    /// Whether a peer id was ever handed out in this conference.
    #[must_use]
    pub fn peer_id_issued(&self, peer_id: &PeerId) -> bool {
        self.issued_peer_ids.contains(peer_id)
    }

    /// Count a newly joined participant toward totals and the peak.
    pub fn record_admission(&mut self) {
        let joined = self.joined_count();
        self.conference.peak_participants = self.conference.peak_participants.max(joined);
    }

    /// Move a participant to a terminal status with every side effect of
    /// leaving: the screen share ends, breakout membership and raised hand
    /// clear, and the peer link drops.
    pub fn retire(
        &mut self,
        id: ParticipantId,
        status: ParticipantStatus,
        now: DateTime<Utc>,
    ) -> Option<Participant> {
        let sharing = self
            .participants
            .get(&id)
            .is_some_and(|p| p.media.screen_sharing);
        if sharing {
            self.emit(
                Audience::AllJoined,
                RelayEvent::ScreenShareStopped {
                    participant_id: id,
                    reason: ShareStopReason::Left,
                },
            );
        }
        self.clear_room_assignment(id);
        self.links.remove(&id);
        self.disconnected_at.remove(&id);
        self.reconnect_nonces.remove(&id);

        let participant = self.participants.get_mut(&id)?;
        participant.terminate(status, now);
        Some(participant.clone())
    }

    // ------------------------------------------------------------------
    // Links and reconnect state
    // ------------------------------------------------------------------

    /// Replace a participant's event channel.
    pub fn attach_link(&mut self, id: ParticipantId, link: PeerSender) {
        self.links.insert(id, link);
        self.disconnected_at.remove(&id);
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.connection = ConnectionState::Connected;
        }
    }

    /// Whether the participant has an open event channel.
    #[must_use]
    pub fn has_live_link(&self, id: ParticipantId) -> bool {
        self.links.get(&id).is_some_and(|link| !link.is_closed())
    }

    /// Mark a participant's transport as gone.
    pub fn mark_disconnected(&mut self, id: ParticipantId) {
        self.links.remove(&id);
        self.disconnected_at.insert(id, Instant::now());
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.connection = ConnectionState::Disconnected;
        }
    }

    /// Participants disconnected for at least `grace`.
    #[must_use]
    pub fn expired_disconnects(&self, grace: std::time::Duration) -> Vec<ParticipantId> {
        let now = Instant::now();
        let mut expired: Vec<ParticipantId> = self
            .disconnected_at
            .iter()
            .filter(|(_, since)| now.saturating_duration_since(**since) >= grace)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();
        expired
    }

    pub fn set_reconnect_nonce(&mut self, id: ParticipantId, nonce: String) {
        self.reconnect_nonces.insert(id, nonce);
    }

    #[must_use]
    pub fn reconnect_nonce(&self, id: ParticipantId) -> Option<&str> {
        self.reconnect_nonces.get(&id).map(String::as_str)
    }

    /// Drop every peer link (conference over).
    pub fn drop_all_links(&mut self) {
        self.links.clear();
        self.disconnected_at.clear();
        self.reconnect_nonces.clear();
    }

    // ------------------------------------------------------------------
    // Event fan-out
    // ------------------------------------------------------------------

    /// Sequence number of the most recently emitted event.
    #[must_use]
    pub fn current_seq(&self) -> u64 {
        self.event_seq.load(Ordering::SeqCst)
    }

    /// Stamp `event` with the next sequence number and hand it to every
    /// member of `audience`. Members without a link miss the event; the
    /// drop is counted. Returns the sequence number.
    pub fn emit(&self, audience: Audience, event: RelayEvent) -> u64 {
        let _order = self
            .emit_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = RelayEnvelope {
            conference_id: self.conference.id,
            seq,
            event,
        };
        for recipient in self.recipients(audience) {
            match self.links.get(&recipient) {
                Some(link) => {
                    deliver(link, envelope.clone(), audience);
                }
                None => metrics::record_relay_dropped("disconnected"),
            }
        }
        seq
    }

    fn recipients(&self, audience: Audience) -> Vec<ParticipantId> {
        let joined = self.participants.values().filter(|p| p.is_joined());
        match audience {
            Audience::AllJoined => joined.map(|p| p.id).collect(),
            Audience::AllJoinedExcept(excluded) => {
                joined.filter(|p| p.id != excluded).map(|p| p.id).collect()
            }
            Audience::Participant(id) => self
                .participants
                .get(&id)
                .filter(|p| p.status.is_active())
                .map(|p| vec![p.id])
                .unwrap_or_default(),
            Audience::Moderators => joined
                .filter(|p| self.is_moderator_participant(p))
                .map(|p| p.id)
                .collect(),
            Audience::Room(number) => self
                .open_room(number)
                .map(|room| room.members.iter().copied().collect())
                .unwrap_or_default(),
            Audience::AllRooms => self
                .rooms
                .iter()
                .filter(|room| room.is_open)
                .flat_map(|room| room.members.iter().copied())
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Screen share
    // ------------------------------------------------------------------

    /// Clear the share flag of `id`, broadcasting why. Returns false if
    /// the participant was not sharing.
    pub fn stop_share(&mut self, id: ParticipantId, reason: ShareStopReason) -> bool {
        let Some(participant) = self.participants.get_mut(&id) else {
            return false;
        };
        if !participant.media.screen_sharing {
            return false;
        }
        participant.media.screen_sharing = false;
        self.emit(
            Audience::AllJoined,
            RelayEvent::ScreenShareStopped {
                participant_id: id,
                reason,
            },
        );
        true
    }

    /// Stop every active share. Returns the affected participants.
    pub fn stop_all_shares(&mut self, reason: ShareStopReason) -> Vec<ParticipantId> {
        let sharers = self.screen_sharers();
        for id in &sharers {
            self.stop_share(*id, reason);
        }
        sharers
    }

    // ------------------------------------------------------------------
    // Breakout rooms
    // ------------------------------------------------------------------

    /// All rooms ever created, open rooms first, each group by number.
    #[must_use]
    pub fn rooms(&self) -> Vec<&BreakoutRoom> {
        let mut rooms: Vec<&BreakoutRoom> = self.rooms.iter().collect();
        rooms.sort_by_key(|room| (!room.is_open, room.number, room.created_at));
        rooms
    }

    #[must_use]
    pub fn open_rooms(&self) -> Vec<&BreakoutRoom> {
        let mut open: Vec<&BreakoutRoom> = self.rooms.iter().filter(|r| r.is_open).collect();
        open.sort_by_key(|room| room.number);
        open
    }

    #[must_use]
    pub fn open_room(&self, number: u32) -> Option<&BreakoutRoom> {
        self.rooms.iter().find(|r| r.is_open && r.number == number)
    }

    pub fn open_room_mut(&mut self, number: u32) -> Option<&mut BreakoutRoom> {
        self.rooms
            .iter_mut()
            .find(|r| r.is_open && r.number == number)
    }

    /// Most recent room with this number, open or closed.
    #[must_use]
    pub fn latest_room(&self, number: u32) -> Option<&BreakoutRoom> {
        self.rooms
            .iter()
            .filter(|r| r.number == number)
            .max_by_key(|r| (r.is_open, r.created_at))
    }

    pub fn add_room(&mut self, room: BreakoutRoom) {
        self.rooms.push(room);
    }

    #[must_use]
    pub fn rooms_created(&self) -> u32 {
        u32::try_from(self.rooms.len()).unwrap_or(u32::MAX)
    }

    /// Put a joined participant into an open room, leaving any previous one.
    ///
    /// # Errors
    ///
    /// `NotFound` if the room does not exist; `InvalidState` if it is closed.
    pub fn place_in_room(
        &mut self,
        id: ParticipantId,
        number: u32,
    ) -> Result<(), ConferenceError> {
        if self.open_room(number).is_none() {
            return match self.latest_room(number) {
                Some(_) => Err(ConferenceError::InvalidState(format!(
                    "Breakout room {number} is closed"
                ))),
                None => Err(ConferenceError::NotFound(format!(
                    "Breakout room {number} not found"
                ))),
            };
        }
        self.clear_room_assignment(id);
        if let Some(room) = self.open_room_mut(number) {
            room.members.insert(id);
        }
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.breakout_room = Some(number);
        }
        Ok(())
    }

    /// Remove a participant from its room. Returns the room it was in.
    pub fn clear_room_assignment(&mut self, id: ParticipantId) -> Option<u32> {
        let number = self
            .participants
            .get_mut(&id)
            .and_then(|p| p.breakout_room.take())?;
        if let Some(room) = self.open_room_mut(number) {
            room.members.remove(&id);
        }
        Some(number)
    }

    /// Close an open room, clearing every member's assignment.
    /// Returns the closed room.
    pub fn close_room(&mut self, number: u32, now: DateTime<Utc>) -> Option<BreakoutRoom> {
        let room = self.open_room_mut(number)?;
        room.is_open = false;
        room.closed_at = Some(now);
        let members = std::mem::take(&mut room.members);
        let closed = room.clone();

        for member in members {
            if let Some(participant) = self.participants.get_mut(&member) {
                participant.breakout_room = None;
            }
        }
        self.emit(
            Audience::AllJoined,
            RelayEvent::BreakoutRoomClosed {
                room_number: number,
            },
        );
        Some(closed)
    }

    /// Close every open room. Returns the closed rooms.
    pub fn close_all_rooms(&mut self, now: DateTime<Utc>) -> Vec<BreakoutRoom> {
        let numbers: Vec<u32> = self.open_rooms().iter().map(|r| r.number).collect();
        numbers
            .into_iter()
            .filter_map(|number| self.close_room(number, now))
            .collect()
    }

    // ------------------------------------------------------------------
    // Chat and whiteboard
    // ------------------------------------------------------------------

    pub fn push_message(&mut self, message: ChatMessage) {
        self.chat.push(message);
    }

    /// Remove a message by id.
    pub fn remove_message(
        &mut self,
        id: common::types::ChatMessageId,
    ) -> Option<ChatMessage> {
        let position = self.chat.iter().position(|m| m.id == id)?;
        Some(self.chat.remove(position))
    }

    #[must_use]
    pub fn message(&self, id: common::types::ChatMessageId) -> Option<&ChatMessage> {
        self.chat.iter().find(|m| m.id == id)
    }

    /// Messages visible to `participant`, in send order.
    #[must_use]
    pub fn messages_visible_to(&self, participant: ParticipantId) -> Vec<ChatMessage> {
        self.chat
            .iter()
            .filter(|m| m.visible_to(participant))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn whiteboard(&self) -> &WhiteboardState {
        &self.whiteboard
    }

    pub fn whiteboard_mut(&mut self) -> &mut WhiteboardState {
        &mut self.whiteboard
    }

    // ------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------

    /// Full state for resynchronization.
    #[must_use]
    pub fn snapshot(&self) -> ConferenceSnapshot {
        ConferenceSnapshot {
            conference: self.conference.summary(),
            participants: self
                .active_participants()
                .into_iter()
                .cloned()
                .collect(),
            screen_sharer: self.screen_sharer(),
            raised_hands: self.raised_hands().iter().map(|p| p.id).collect(),
            breakout_rooms: self.open_rooms().into_iter().cloned().collect(),
            whiteboard: self.whiteboard.clone(),
            event_seq: self.current_seq(),
        }
    }

    /// Aggregate counters.
    #[must_use]
    pub fn analytics(&self) -> ConferenceAnalytics {
        let waiting = self.waiting_participants().len();
        ConferenceAnalytics {
            conference_id: self.conference.id,
            status: self.conference.status,
            total_participants_joined: self.conference.total_participants_joined,
            peak_participants: self.conference.peak_participants,
            current_participants: self.joined_count(),
            waiting_participants: u32::try_from(waiting).unwrap_or(u32::MAX),
            total_duration_seconds: self.conference.total_duration_seconds,
            recorded_seconds: self.conference.recorded_seconds,
            recording_intervals: u32::try_from(self.conference.recording_intervals.len())
                .unwrap_or(u32::MAX),
            chat_messages: u32::try_from(self.chat.len()).unwrap_or(u32::MAX),
            breakout_rooms_created: self.rooms_created(),
        }
    }

    /// Every participant record (for persistence sweeps).
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{
        ConferenceSettings, ConferenceStatus, MediaState, Permissions, DEFAULT_MAX_PARTICIPANTS,
    };
    use crate::relay::peer_channel;
    use common::types::BreakoutRoomId;

    fn conference() -> Conference {
        Conference {
            id: ConferenceId::new(),
            title: "Weekly sync".to_string(),
            description: None,
            scheduled_start: None,
            scheduled_end: None,
            host_id: UserId::new("host"),
            settings: ConferenceSettings::default(),
            is_locked: false,
            password_hash: None,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            status: ConferenceStatus::InProgress,
            created_at: Utc::now(),
            actual_start: Some(Utc::now()),
            actual_end: None,
            total_duration_seconds: None,
            total_participants_joined: 0,
            peak_participants: 0,
            is_recording: false,
            recording_started_at: None,
            recording_intervals: Vec::new(),
            recorded_seconds: 0,
            calendar_event_id: None,
        }
    }

    fn add(session: &mut ConferenceSession, user: &str, status: ParticipantStatus) -> (
        ParticipantId,
        crate::relay::PeerReceiver,
    ) {
        add_inner(session, user, status, 16)
    }

    fn add_with_capacity(
        session: &mut ConferenceSession,
        user: &str,
        capacity: usize,
    ) -> (ParticipantId, crate::relay::PeerReceiver) {
        add_inner(session, user, ParticipantStatus::Joined, capacity)
    }

    fn add_inner(
        session: &mut ConferenceSession,
        user: &str,
        status: ParticipantStatus,
        capacity: usize,
    ) -> (ParticipantId, crate::relay::PeerReceiver) {
        let order = session.next_join_order();
        let participant = Participant {
            id: ParticipantId::new(),
            conference_id: session.id(),
            user_id: UserId::new(user),
            display_name: user.to_string(),
            is_guest: false,
            status,
            peer_id: PeerId::from(format!("peer-{order}").as_str()),
            media: MediaState::default(),
            permissions: Permissions::ATTENDEE_DEFAULT,
            breakout_room: None,
            connection: ConnectionState::Connected,
            join_order: order,
            requested_at: Utc::now(),
            joined_at: (status == ParticipantStatus::Joined).then(Utc::now),
            left_at: None,
            total_time_seconds: None,
        };
        let id = participant.id;
        let (tx, rx) = peer_channel(capacity);
        session.insert_participant(participant, tx);
        (id, rx)
    }

    fn room(session: &ConferenceSession, number: u32) -> BreakoutRoom {
        BreakoutRoom {
            id: BreakoutRoomId::new(),
            conference_id: session.id(),
            number,
            name: format!("Room {number}"),
            is_open: true,
            created_at: Utc::now(),
            closed_at: None,
            members: std::collections::BTreeSet::new(),
        }
    }

    #[test]
    fn test_emit_increments_sequence_per_event() {
        let mut session = ConferenceSession::new(conference());
        let (_, mut rx_a) = add(&mut session, "a", ParticipantStatus::Joined);
        let (_, mut rx_b) = add(&mut session, "b", ParticipantStatus::Joined);

        let first = session.emit(Audience::AllJoined, RelayEvent::ConferenceCancelled);
        let second = session.emit(Audience::AllJoined, RelayEvent::ConferenceCancelled);

        assert_eq!(first + 1, second);
        assert_eq!(session.current_seq(), second);
        assert_eq!(rx_a.try_recv().unwrap().seq, first);
        assert_eq!(rx_b.try_recv().unwrap().seq, first);
        assert_eq!(rx_a.try_recv().unwrap().seq, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_emitters_deliver_in_sequence_order() {
        let mut session = ConferenceSession::new(conference());
        let (_, mut rx) = add_with_capacity(&mut session, "a", 512);
        let session = std::sync::Arc::new(tokio::sync::RwLock::new(session));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = std::sync::Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let guard = session.read().await;
                    guard.emit(Audience::AllJoined, RelayEvent::ConferenceCancelled);
                    drop(guard);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut seqs = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            seqs.push(envelope.seq);
        }
        assert_eq!(seqs.len(), 400);
        assert!(seqs.windows(2).all(|pair| matches!(pair, [a, b] if a < b)));
    }

    #[test]
    fn test_emit_skips_member_without_link() {
        let mut session = ConferenceSession::new(conference());
        let (a, _rx_a) = add(&mut session, "a", ParticipantStatus::Joined);
        let (_, mut rx_b) = add(&mut session, "b", ParticipantStatus::Joined);
        session.mark_disconnected(a);

        let seq = session.emit(Audience::Participant(a), RelayEvent::ConferenceCancelled);
        assert_eq!(seq, 1);
        assert!(rx_b.try_recv().is_err());

        session.emit(Audience::AllJoined, RelayEvent::ConferenceCancelled);
        assert_eq!(rx_b.try_recv().unwrap().seq, 2);
    }

    #[test]
    fn test_all_joined_except_skips_excluded_and_waiting() {
        let mut session = ConferenceSession::new(conference());
        let (a, mut rx_a) = add(&mut session, "a", ParticipantStatus::Joined);
        let (_, mut rx_b) = add(&mut session, "b", ParticipantStatus::Joined);
        let (_, mut rx_w) = add(&mut session, "w", ParticipantStatus::InWaitingRoom);

        session.emit(Audience::AllJoinedExcept(a), RelayEvent::ConferenceCancelled);

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_w.try_recv().is_err());
    }

    #[test]
    fn test_moderators_audience() {
        let mut session = ConferenceSession::new(conference());
        let (_, mut rx_host) = add(&mut session, "host", ParticipantStatus::Joined);
        let (co, mut rx_co) = add(&mut session, "co", ParticipantStatus::Joined);
        let (_, mut rx_plain) = add(&mut session, "plain", ParticipantStatus::Joined);
        session
            .participant_mut(co)
            .unwrap()
            .permissions
            .insert(Permissions::CO_HOST_BUNDLE);

        session.emit(Audience::Moderators, RelayEvent::ConferenceCancelled);

        assert!(rx_host.try_recv().is_ok());
        assert!(rx_co.try_recv().is_ok());
        assert!(rx_plain.try_recv().is_err());
    }

    #[test]
    fn test_queries_are_ordered() {
        let mut session = ConferenceSession::new(conference());
        let (a, _rx_a) = add(&mut session, "a", ParticipantStatus::Joined);
        let (b, _rx_b) = add(&mut session, "b", ParticipantStatus::Joined);
        let now = Utc::now();

        {
            let pb = session.participant_mut(b).unwrap();
            pb.media.hand_raised = true;
            pb.media.hand_raised_at = Some(now);
        }
        {
            let pa = session.participant_mut(a).unwrap();
            pa.media.hand_raised = true;
            pa.media.hand_raised_at = Some(now + chrono::Duration::seconds(1));
        }

        let active: Vec<ParticipantId> =
            session.active_participants().iter().map(|p| p.id).collect();
        assert_eq!(active, vec![a, b]);

        let raised: Vec<ParticipantId> = session.raised_hands().iter().map(|p| p.id).collect();
        assert_eq!(raised, vec![b, a]);
    }

    #[test]
    fn test_room_placement_keeps_membership_consistent() {
        let mut session = ConferenceSession::new(conference());
        let (a, _rx) = add(&mut session, "a", ParticipantStatus::Joined);
        let first = room(&session, 1);
        let second = room(&session, 2);
        session.add_room(first);
        session.add_room(second);

        session.place_in_room(a, 1).unwrap();
        session.place_in_room(a, 2).unwrap();

        assert_eq!(session.participant(a).unwrap().breakout_room, Some(2));
        assert!(!session.open_room(1).unwrap().members.contains(&a));
        assert!(session.open_room(2).unwrap().members.contains(&a));

        assert!(matches!(
            session.place_in_room(a, 9),
            Err(ConferenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_close_room_clears_assignments() {
        let mut session = ConferenceSession::new(conference());
        let (a, _rx) = add(&mut session, "a", ParticipantStatus::Joined);
        let first = room(&session, 1);
        session.add_room(first);
        session.place_in_room(a, 1).unwrap();

        let closed = session.close_room(1, Utc::now()).unwrap();

        assert!(!closed.is_open);
        assert!(closed.members.is_empty());
        assert_eq!(session.participant(a).unwrap().breakout_room, None);
        assert!(matches!(
            session.place_in_room(a, 1),
            Err(ConferenceError::InvalidState(_))
        ));
    }

    #[test]
    fn test_retire_clears_side_effects() {
        let mut session = ConferenceSession::new(conference());
        let (a, _rx_a) = add(&mut session, "a", ParticipantStatus::Joined);
        let (_, mut rx_b) = add(&mut session, "b", ParticipantStatus::Joined);
        let first = room(&session, 1);
        session.add_room(first);
        session.place_in_room(a, 1).unwrap();
        session.participant_mut(a).unwrap().media.screen_sharing = true;

        let retired = session
            .retire(a, ParticipantStatus::Left, Utc::now())
            .unwrap();

        assert_eq!(retired.status, ParticipantStatus::Left);
        assert!(session.screen_sharer().is_none());
        assert!(session.open_room(1).unwrap().members.is_empty());
        assert!(!session.has_live_link(a));
        let event = rx_b.try_recv().unwrap();
        assert!(matches!(
            event.event,
            RelayEvent::ScreenShareStopped {
                reason: ShareStopReason::Left,
                ..
            }
        ));
    }

    #[test]
    fn test_ensure_mutable_rejects_terminal() {
        let mut session = ConferenceSession::new(conference());
        assert!(session.ensure_mutable().is_ok());
        session.conference_mut().status = ConferenceStatus::Ended;
        assert!(matches!(
            session.ensure_mutable(),
            Err(ConferenceError::InvalidState(_))
        ));
    }

    #[test]
    fn test_hydrate_marks_active_disconnected() {
        let mut source = ConferenceSession::new(conference());
        let (a, _rx) = add(&mut source, "a", ParticipantStatus::Joined);
        let records: Vec<Participant> = source.participants().cloned().collect();

        let session = ConferenceSession::hydrate(source.conference().clone(), records);

        let participant = session.participant(a).unwrap();
        assert_eq!(participant.connection, ConnectionState::Disconnected);
        assert!(session.peer_id_issued(&participant.peer_id));
        assert_eq!(
            session.expired_disconnects(std::time::Duration::ZERO),
            vec![a]
        );
    }

    #[test]
    fn test_authority_checks() {
        let mut session = ConferenceSession::new(conference());
        let (co, _rx) = add(&mut session, "co", ParticipantStatus::Joined);

        let host = Authority::new(UserId::new("host"), false);
        let co_user = Authority::new(UserId::new("co"), false);
        let outsider = Authority::new(UserId::new("outsider"), false);
        let delegated = Authority::new(UserId::new("delegate"), true);

        assert!(session.is_host(&host));
        assert!(session.is_host(&delegated));
        assert!(!session.is_moderator(&co_user));

        session
            .participant_mut(co)
            .unwrap()
            .permissions
            .insert(Permissions::CO_HOST);
        assert!(session.is_moderator(&co_user));
        assert!(!session.is_host(&co_user));
        assert!(session.require_moderator(&outsider).is_err());
        assert!(session.require_self_or_moderator(&co_user, co).is_ok());
    }
}
