//! Data models for conferences and their child entities.
//!
//! `Conference`, `Participant`, `BreakoutRoom` and `ChatMessage` are the
//! durable records written through the repository. Client-facing views
//! (`ConferenceSummary`, `ConferenceSnapshot`) never carry the password hash.

pub mod permissions;

pub use permissions::{PermissionFlags, PermissionUpdate, Permissions};

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{BreakoutRoomId, ChatMessageId, ConferenceId, ParticipantId, PeerId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lower bound for `max_participants`.
pub const MIN_PARTICIPANTS: u32 = 1;

/// Default participant limit when none is requested.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 100;

/// Maximum number of breakout rooms created at once.
pub const MAX_BREAKOUT_ROOMS: u32 = 50;

/// Maximum chat message length in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 4000;

/// Maximum whiteboard document size in bytes (1 MiB).
pub const MAX_WHITEBOARD_BYTES: usize = 1024 * 1024;

// ============================================================================
// Conference
// ============================================================================

/// Conference lifecycle status.
///
/// `Scheduled -> InProgress -> Ended`, `Scheduled -> Cancelled`.
/// `Ended` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConferenceStatus {
    Scheduled,
    InProgress,
    Ended,
    Cancelled,
}

impl ConferenceStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ConferenceStatus::Ended | ConferenceStatus::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConferenceStatus::Scheduled => "scheduled",
            ConferenceStatus::InProgress => "in_progress",
            ConferenceStatus::Ended => "ended",
            ConferenceStatus::Cancelled => "cancelled",
        }
    }
}

/// Capability flags of a conference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceSettings {
    pub enable_chat: bool,
    pub enable_screen_share: bool,
    pub enable_recording: bool,
    pub enable_whiteboard: bool,
    pub enable_breakout_rooms: bool,
    pub enable_waiting_room: bool,
    pub mute_on_entry: bool,
    /// Permissions granted to attendees at join.
    pub attendee_permissions: Permissions,
}

impl Default for ConferenceSettings {
    fn default() -> Self {
        Self {
            enable_chat: true,
            enable_screen_share: true,
            enable_recording: false,
            enable_whiteboard: true,
            enable_breakout_rooms: false,
            enable_waiting_room: false,
            mute_on_entry: false,
            attendee_permissions: Permissions::ATTENDEE_DEFAULT,
        }
    }
}

/// One closed or open recording interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInterval {
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub started_by: UserId,
}

/// Durable conference record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conference {
    pub id: ConferenceId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub host_id: UserId,
    pub settings: ConferenceSettings,
    pub is_locked: bool,
    /// bcrypt hash of the join password.
    pub password_hash: Option<String>,
    pub max_participants: u32,
    pub status: ConferenceStatus,
    pub created_at: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub total_duration_seconds: Option<i64>,
    pub total_participants_joined: u32,
    pub peak_participants: u32,
    pub is_recording: bool,
    pub recording_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recording_intervals: Vec<RecordingInterval>,
    #[serde(default)]
    pub recorded_seconds: i64,
    pub calendar_event_id: Option<String>,
}

impl Conference {
    /// Client-facing view without the password hash.
    #[must_use]
    pub fn summary(&self) -> ConferenceSummary {
        ConferenceSummary {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            scheduled_start: self.scheduled_start,
            scheduled_end: self.scheduled_end,
            host_id: self.host_id.clone(),
            settings: self.settings,
            is_locked: self.is_locked,
            has_password: self.password_hash.is_some(),
            max_participants: self.max_participants,
            status: self.status,
            created_at: self.created_at,
            actual_start: self.actual_start,
            actual_end: self.actual_end,
            total_duration_seconds: self.total_duration_seconds,
            total_participants_joined: self.total_participants_joined,
            peak_participants: self.peak_participants,
            is_recording: self.is_recording,
            recording_started_at: self.recording_started_at,
            calendar_event_id: self.calendar_event_id.clone(),
        }
    }
}

/// Client-facing conference view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceSummary {
    pub id: ConferenceId,
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub host_id: UserId,
    pub settings: ConferenceSettings,
    pub is_locked: bool,
    pub has_password: bool,
    pub max_participants: u32,
    pub status: ConferenceStatus,
    pub created_at: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub total_duration_seconds: Option<i64>,
    pub total_participants_joined: u32,
    pub peak_participants: u32,
    pub is_recording: bool,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub calendar_event_id: Option<String>,
}

/// Request to schedule a conference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewConference {
    pub title: String,
    pub description: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub settings: Option<ConferenceSettings>,
    pub password: Option<SecretString>,
}

impl NewConference {
    /// Validate the request fields.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title must not be empty".to_string());
        }
        if let Some(max) = self.max_participants {
            if max < MIN_PARTICIPANTS {
                return Err(format!(
                    "Maximum participants must be at least {MIN_PARTICIPANTS}"
                ));
            }
        }
        if let (Some(start), Some(end)) = (self.scheduled_start, self.scheduled_end) {
            if end < start {
                return Err("Scheduled end precedes scheduled start".to_string());
            }
        }
        Ok(())
    }
}

/// Host-initiated settings change; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub enable_chat: Option<bool>,
    pub enable_screen_share: Option<bool>,
    pub enable_recording: Option<bool>,
    pub enable_whiteboard: Option<bool>,
    pub enable_breakout_rooms: Option<bool>,
    pub enable_waiting_room: Option<bool>,
    pub mute_on_entry: Option<bool>,
    pub max_participants: Option<u32>,
    /// `Some(None)` clears the password; `Some(Some(p))` replaces it.
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub password: Option<Option<SecretString>>,
}

fn deserialize_double_option<'de, D>(
    deserializer: D,
) -> Result<Option<Option<SecretString>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<SecretString>::deserialize(deserializer).map(Some)
}

/// Fields a caller may set when seeding a conference from a calendar event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarOverrides {
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub settings: Option<ConferenceSettings>,
    pub password: Option<SecretString>,
}

/// Calendar event used to seed a conference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

// ============================================================================
// Participant
// ============================================================================

/// Participant membership status.
///
/// `InWaitingRoom -> Joined -> {Left, Removed}`; a waiting participant may
/// also leave or be denied (`Removed`). `Left` and `Removed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    InWaitingRoom,
    Joined,
    Left,
    Removed,
}

impl ParticipantStatus {
    /// Waiting or joined.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            ParticipantStatus::InWaitingRoom | ParticipantStatus::Joined
        )
    }
}

/// Transport connection state of a joined participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    /// Transport dropped, within the reconnect grace period.
    Disconnected,
}

/// Media flags of a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    pub audio_muted: bool,
    pub video_off: bool,
    pub hand_raised: bool,
    pub hand_raised_at: Option<DateTime<Utc>>,
    pub screen_sharing: bool,
}

/// Why a participant stopped being an active member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// Participant chose to leave.
    Voluntary,
    /// Removed by host or co-host.
    Removed,
    /// Denied admission from the waiting room.
    Denied,
    /// Disconnect grace period expired.
    Timeout,
    /// Conference ended or was cancelled.
    ConferenceEnded,
}

/// One user's membership instance within a conference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub conference_id: ConferenceId,
    pub user_id: UserId,
    pub display_name: String,
    pub is_guest: bool,
    pub status: ParticipantStatus,
    pub peer_id: PeerId,
    pub media: MediaState,
    pub permissions: Permissions,
    /// Number of the open breakout room this participant is in.
    pub breakout_room: Option<u32>,
    pub connection: ConnectionState,
    /// Monotonic per-conference position, orders "join time ascending".
    pub join_order: u64,
    pub requested_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub total_time_seconds: Option<i64>,
}

impl Participant {
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.status == ParticipantStatus::Joined
    }

    /// Move to a terminal status, stamping leave time and total time.
    pub fn terminate(&mut self, status: ParticipantStatus, now: DateTime<Utc>) {
        self.status = status;
        self.left_at = Some(now);
        self.total_time_seconds = Some(
            self.joined_at
                .map_or(0, |joined| (now - joined).num_seconds().max(0)),
        );
        self.media.screen_sharing = false;
        self.media.hand_raised = false;
        self.media.hand_raised_at = None;
        self.breakout_room = None;
    }
}

/// Request to join a conference.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    /// Authenticated user; `None` joins as a guest.
    pub user_id: Option<UserId>,
    pub display_name: String,
    pub password: Option<SecretString>,
}

// ============================================================================
// Breakout rooms, chat, whiteboard
// ============================================================================

/// A temporary sub-partition of a conference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutRoom {
    pub id: BreakoutRoomId,
    pub conference_id: ConferenceId,
    pub number: u32,
    pub name: String,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub members: BTreeSet<ParticipantId>,
}

/// One chat log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub conference_id: ConferenceId,
    pub sender: ParticipantId,
    pub sender_name: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Private recipient; `None` for messages to everyone.
    pub recipient: Option<ParticipantId>,
}

impl ChatMessage {
    /// Whether `participant` may read this message.
    #[must_use]
    pub fn visible_to(&self, participant: ParticipantId) -> bool {
        match self.recipient {
            None => true,
            Some(recipient) => recipient == participant || self.sender == participant,
        }
    }
}

/// Shared drawing surface, last writer wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhiteboardState {
    pub document: String,
    pub version: u64,
    pub last_modified_by: Option<ParticipantId>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Read models
// ============================================================================

/// Full state used by clients to resynchronize.
#[derive(Debug, Clone, Serialize)]
pub struct ConferenceSnapshot {
    pub conference: ConferenceSummary,
    /// Joined participants in join order.
    pub participants: Vec<Participant>,
    pub screen_sharer: Option<ParticipantId>,
    /// Participants with raised hands, earliest first.
    pub raised_hands: Vec<ParticipantId>,
    pub breakout_rooms: Vec<BreakoutRoom>,
    pub whiteboard: WhiteboardState,
    /// Sequence number of the last event emitted before this snapshot.
    pub event_seq: u64,
}

/// Aggregate counters for a conference, readable in any status.
#[derive(Debug, Clone, Serialize)]
pub struct ConferenceAnalytics {
    pub conference_id: ConferenceId,
    pub status: ConferenceStatus,
    pub total_participants_joined: u32,
    pub peak_participants: u32,
    pub current_participants: u32,
    pub waiting_participants: u32,
    pub total_duration_seconds: Option<i64>,
    pub recorded_seconds: i64,
    pub recording_intervals: u32,
    pub chat_messages: u32,
    pub breakout_rooms_created: u32,
}
