//! Conference coordinator services.
//!
//! `ConferenceCoordinator` is the single entry point for every operation.
//! Each component lives in its own module as an `impl` block:
//!
//! - `lifecycle`: create, start, end, cancel, join, lock, settings, reads
//! - `participants`: leave, remove, permissions, media, bulk toggles
//! - `connections`: transport disconnect, reconnect, grace-period reaper
//! - `waiting_room`: admit, admit all, deny
//! - `screen_share`: single-sharer arbitration
//! - `breakout`: room partitioning and messaging
//! - `recording`: start/stop with interval bookkeeping
//! - `chat`, `whiteboard`: shared surfaces
//! - `signaling`: offer/answer/ICE relay
//!
//! Every mutating operation follows the same shape: resolve the caller's
//! authority (collaborator I/O, no lock held), take the conference write
//! lock, validate, mutate, emit events, collect `PendingWrites`, release the
//! lock, then flush the writes to the repository.

pub mod breakout;
pub mod chat;
pub mod connections;
pub mod lifecycle;
pub mod participants;
pub mod recording;
pub mod screen_share;
pub mod signaling;
pub mod waiting_room;
pub mod whiteboard;

#[cfg(test)]
pub(crate) mod test_support;

use crate::collaborators::{Authorizer, CalendarSource};
use crate::config::{
    Config, DEFAULT_DISCONNECT_GRACE_PERIOD_SECONDS, DEFAULT_PASSWORD_HASH_COST,
    DEFAULT_PEER_CHANNEL_CAPACITY, DEFAULT_REAPER_INTERVAL_SECONDS,
};
use crate::errors::ConferenceError;
use crate::models::{
    BreakoutRoom, ChatMessage, Conference, ConferenceSnapshot, Participant,
};
use crate::observability::metrics;
use crate::relay::{PeerReceiver, ReconnectTokenManager};
use crate::repositories::ConferenceRepository;
use crate::store::{Authority, SessionStore, SharedSession};
use common::types::{ChatMessageId, ConferenceId, PeerId, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Tunables of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub peer_channel_capacity: usize,
    pub password_hash_cost: u32,
    pub disconnect_grace_period: Duration,
    pub reaper_interval: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            peer_channel_capacity: DEFAULT_PEER_CHANNEL_CAPACITY,
            password_hash_cost: DEFAULT_PASSWORD_HASH_COST,
            disconnect_grace_period: Duration::from_secs(DEFAULT_DISCONNECT_GRACE_PERIOD_SECONDS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECONDS),
        }
    }
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            peer_channel_capacity: config.peer_channel_capacity,
            password_hash_cost: config.password_hash_cost,
            disconnect_grace_period: config.disconnect_grace_period(),
            reaper_interval: config.reaper_interval(),
        }
    }
}

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    pub participant: Participant,
    pub peer_id: PeerId,
    /// Single-use token for re-attaching after a transport drop.
    pub reconnect_token: String,
    /// Event stream for this participant.
    pub events: PeerReceiver,
    pub snapshot: ConferenceSnapshot,
}

/// Result of a successful reconnect.
#[derive(Debug)]
pub struct ReconnectOutcome {
    pub participant: Participant,
    /// Replacement token; the presented one is spent.
    pub reconnect_token: String,
    pub events: PeerReceiver,
    pub snapshot: ConferenceSnapshot,
}

/// Durable records touched by one operation, written after the lock drops.
#[derive(Debug, Default)]
pub(crate) struct PendingWrites {
    conference: Option<Conference>,
    participants: Vec<Participant>,
    chat_message: Option<ChatMessage>,
    deleted_message: Option<(ConferenceId, ChatMessageId)>,
    rooms: Vec<BreakoutRoom>,
}

impl PendingWrites {
    pub(crate) fn conference(&mut self, conference: &Conference) -> &mut Self {
        self.conference = Some(conference.clone());
        self
    }

    pub(crate) fn participant(&mut self, participant: &Participant) -> &mut Self {
        self.participants.retain(|p| p.id != participant.id);
        self.participants.push(participant.clone());
        self
    }

    pub(crate) fn chat_message(&mut self, message: &ChatMessage) -> &mut Self {
        self.chat_message = Some(message.clone());
        self
    }

    pub(crate) fn deleted_message(
        &mut self,
        conference_id: ConferenceId,
        message_id: ChatMessageId,
    ) -> &mut Self {
        self.deleted_message = Some((conference_id, message_id));
        self
    }

    pub(crate) fn room(&mut self, room: &BreakoutRoom) -> &mut Self {
        self.rooms.retain(|r| r.id != room.id);
        self.rooms.push(room.clone());
        self
    }
}

/// Records the wall time of an operation on drop.
pub(crate) struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub(crate) fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        metrics::record_operation_duration(self.operation, self.start.elapsed());
    }
}

/// Coordinates conferences: lifecycle, membership, relay and shared resources.
pub struct ConferenceCoordinator {
    store: Arc<SessionStore>,
    repository: Arc<dyn ConferenceRepository>,
    authorizer: Arc<dyn Authorizer>,
    calendar: Option<Arc<dyn CalendarSource>>,
    tokens: ReconnectTokenManager,
    settings: CoordinatorSettings,
}

impl ConferenceCoordinator {
    #[must_use]
    pub fn new(
        settings: CoordinatorSettings,
        repository: Arc<dyn ConferenceRepository>,
        authorizer: Arc<dyn Authorizer>,
        tokens: ReconnectTokenManager,
    ) -> Self {
        Self {
            store: Arc::new(SessionStore::new()),
            repository,
            authorizer,
            calendar: None,
            tokens,
            settings,
        }
    }

    /// Attach a calendar source for `create_from_calendar_event`.
    #[must_use]
    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarSource>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn ConferenceRepository> {
        &self.repository
    }

    #[must_use]
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Look up (or hydrate) a conference session.
    pub(crate) async fn session(&self, id: ConferenceId) -> Result<SharedSession, ConferenceError> {
        self.store.get_or_load(id, self.repository.as_ref()).await
    }

    /// Resolve the caller's authority over a conference.
    pub(crate) async fn authority(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<Authority, ConferenceError> {
        let external_host = self.authorizer.is_host(caller, conference_id).await?;
        Ok(Authority::new(caller.clone(), external_host))
    }

    /// Write-behind persistence. Failures are logged and counted; the
    /// in-memory state stays authoritative.
    pub(crate) async fn flush(&self, writes: PendingWrites) {
        if let Some(conference) = writes.conference {
            if let Err(e) = self.repository.save_conference(&conference).await {
                persistence_failed("save_conference", conference.id, &e);
            }
        }
        for participant in writes.participants {
            if let Err(e) = self.repository.save_participant(&participant).await {
                persistence_failed("save_participant", participant.conference_id, &e);
            }
        }
        if let Some(message) = writes.chat_message {
            if let Err(e) = self.repository.save_chat_message(&message).await {
                persistence_failed("save_chat_message", message.conference_id, &e);
            }
        }
        if let Some((conference_id, message_id)) = writes.deleted_message {
            if let Err(e) = self
                .repository
                .delete_chat_message(conference_id, message_id)
                .await
            {
                persistence_failed("delete_chat_message", conference_id, &e);
            }
        }
        for room in writes.rooms {
            if let Err(e) = self.repository.save_breakout_room(&room).await {
                persistence_failed("save_breakout_room", room.conference_id, &e);
            }
        }
    }
}

fn persistence_failed(operation: &'static str, conference_id: ConferenceId, error: &ConferenceError) {
    warn!(
        target: "conf.repository",
        conference_id = %conference_id,
        operation,
        error = %error,
        "Persistence failed after commit, in-memory state kept"
    );
    metrics::record_persistence_failure(operation);
}
