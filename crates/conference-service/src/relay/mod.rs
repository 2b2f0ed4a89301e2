//! Event relay between the coordinator and connected peers.
//!
//! Every participant with a live transport owns a bounded
//! `tokio::sync::mpsc` channel. Events are stamped with a per-conference
//! sequence number and handed to channels with `try_send`, so fan-out never
//! blocks the conference lock. Full or closed channels drop the event and
//! are counted; the originating operation still succeeds.

pub mod binding;
pub mod streams;

pub use binding::{ReconnectToken, ReconnectTokenManager};
pub use streams::StreamRegistry;

use crate::models::{BreakoutRoom, ChatMessage, ConferenceSettings, LeaveReason, Participant, Permissions};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::types::{ChatMessageId, ConferenceId, ParticipantId, PeerId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Sending half of a peer's event channel.
pub type PeerSender = mpsc::Sender<RelayEnvelope>;

/// Receiving half of a peer's event channel.
pub type PeerReceiver = mpsc::Receiver<RelayEnvelope>;

/// Create a bounded peer event channel.
#[must_use]
pub fn peer_channel(capacity: usize) -> (PeerSender, PeerReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Kind of a relayed signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    #[serde(rename = "ice")]
    IceCandidate,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice",
        }
    }
}

/// Why a screen share ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareStopReason {
    /// Sharer or a moderator stopped it.
    Stopped,
    /// Another participant started sharing.
    Preempted,
    /// `SHARE_SCREEN` was revoked.
    PermissionRevoked,
    /// Screen sharing was disabled for the conference.
    Disabled,
    /// The sharer left or the conference ended.
    Left,
}

/// Summary of an opened breakout room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub number: u32,
    pub name: String,
}

impl From<&BreakoutRoom> for RoomInfo {
    fn from(room: &BreakoutRoom) -> Self {
        Self {
            number: room.number,
            name: room.name.clone(),
        }
    }
}

/// Event delivered to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    ConferenceStarted {
        started_at: DateTime<Utc>,
    },
    ConferenceEnded {
        ended_at: DateTime<Utc>,
    },
    ConferenceCancelled,
    ConferenceLocked {
        by: UserId,
    },
    ConferenceUnlocked {
        by: UserId,
    },
    SettingsChanged {
        settings: ConferenceSettings,
        max_participants: u32,
    },
    ParticipantJoined {
        participant: Box<Participant>,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
        reason: LeaveReason,
    },
    ParticipantRemoved {
        participant_id: ParticipantId,
    },
    /// Sent to the removed participant before its link is dropped.
    Removed,
    ParticipantDisconnected {
        participant_id: ParticipantId,
    },
    ParticipantReconnected {
        participant_id: ParticipantId,
    },
    WaitingRoomEntered {
        participant_id: ParticipantId,
        display_name: String,
    },
    /// Sent to a waiting participant on admission.
    Admitted,
    /// Sent to a waiting participant on denial.
    Denied,
    PermissionsChanged {
        participant_id: ParticipantId,
        permissions: Permissions,
    },
    MediaChanged {
        participant_id: ParticipantId,
        audio_muted: bool,
        video_off: bool,
    },
    HandRaised {
        participant_id: ParticipantId,
        raised_at: DateTime<Utc>,
    },
    HandLowered {
        participant_id: ParticipantId,
    },
    ScreenShareStarted {
        participant_id: ParticipantId,
    },
    ScreenShareStopped {
        participant_id: ParticipantId,
        reason: ShareStopReason,
    },
    BreakoutRoomsOpened {
        rooms: Vec<RoomInfo>,
    },
    MovedToRoom {
        participant_id: ParticipantId,
        room_number: u32,
    },
    ReturnedToMain {
        participant_id: ParticipantId,
    },
    BreakoutRoomClosed {
        room_number: u32,
    },
    /// Moderator message to one room (`room_number`) or all open rooms.
    RoomMessage {
        room_number: Option<u32>,
        from: UserId,
        body: String,
    },
    RecordingStarted {
        by: UserId,
        started_at: DateTime<Utc>,
    },
    RecordingStopped {
        by: UserId,
        duration_seconds: i64,
    },
    ChatMessage {
        message: ChatMessage,
    },
    ChatMessageDeleted {
        message_id: ChatMessageId,
    },
    WhiteboardUpdated {
        document: String,
        version: u64,
        modified_by: ParticipantId,
    },
    Signal {
        kind: SignalKind,
        from: PeerId,
        payload: serde_json::Value,
    },
}

/// An event stamped with its conference and sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub conference_id: ConferenceId,
    pub seq: u64,
    #[serde(flatten)]
    pub event: RelayEvent,
}

/// Set of peers an event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every joined participant.
    AllJoined,
    /// Every joined participant except one.
    AllJoinedExcept(ParticipantId),
    /// One participant (joined or waiting).
    Participant(ParticipantId),
    /// Hosts and co-hosts.
    Moderators,
    /// Members of one breakout room.
    Room(u32),
    /// Members of every open breakout room.
    AllRooms,
}

impl Audience {
    /// Bounded metric label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Audience::AllJoined => "all_joined",
            Audience::AllJoinedExcept(_) => "all_joined_except",
            Audience::Participant(_) => "participant",
            Audience::Moderators => "moderators",
            Audience::Room(_) => "room",
            Audience::AllRooms => "all_rooms",
        }
    }
}

/// Hand one envelope to a peer channel without waiting.
///
/// Returns false when the event was dropped.
pub fn deliver(sender: &PeerSender, envelope: RelayEnvelope, audience: Audience) -> bool {
    match sender.try_send(envelope) {
        Ok(()) => {
            metrics::record_relay_event(audience.label());
            true
        }
        Err(TrySendError::Full(envelope)) => {
            tracing::debug!(
                target: "conf.relay",
                conference_id = %envelope.conference_id,
                seq = envelope.seq,
                "Peer channel full, dropping event"
            );
            metrics::record_relay_dropped("full");
            false
        }
        Err(TrySendError::Closed(envelope)) => {
            tracing::debug!(
                target: "conf.relay",
                conference_id = %envelope.conference_id,
                seq = envelope.seq,
                "Peer channel closed, dropping event"
            );
            metrics::record_relay_dropped("closed");
            false
        }
    }
}
