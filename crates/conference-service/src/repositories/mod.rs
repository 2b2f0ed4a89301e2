//! Durable storage for conference records.
//!
//! The session store is the source of truth while a conference is live;
//! repositories receive write-behind copies after each committed mutation
//! and serve cold reads when a conference is not yet cached.

pub mod redis;

pub use self::redis::RedisConferenceRepository;

use crate::errors::ConferenceError;
use crate::models::{BreakoutRoom, ChatMessage, Conference, Participant};
use async_trait::async_trait;
use common::types::{BreakoutRoomId, ChatMessageId, ConferenceId, ParticipantId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence boundary for conferences and their child records.
#[async_trait]
pub trait ConferenceRepository: Send + Sync {
    /// Insert or replace the conference record.
    async fn save_conference(&self, conference: &Conference) -> Result<(), ConferenceError>;

    /// Insert or replace one participant record.
    async fn save_participant(&self, participant: &Participant) -> Result<(), ConferenceError>;

    /// Append a chat message.
    async fn save_chat_message(&self, message: &ChatMessage) -> Result<(), ConferenceError>;

    /// Delete a chat message. Deleting an absent message is not an error.
    async fn delete_chat_message(
        &self,
        conference_id: ConferenceId,
        message_id: ChatMessageId,
    ) -> Result<(), ConferenceError>;

    /// Insert or replace a breakout room record.
    async fn save_breakout_room(&self, room: &BreakoutRoom) -> Result<(), ConferenceError>;

    async fn fetch_conference(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Option<Conference>, ConferenceError>;

    async fn fetch_participants(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError>;

    /// Chat log in send order.
    async fn fetch_chat_messages(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<ChatMessage>, ConferenceError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), ConferenceError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct StoredConference {
    conference: Option<Conference>,
    participants: HashMap<ParticipantId, Participant>,
    chat: Vec<ChatMessage>,
    rooms: HashMap<BreakoutRoomId, BreakoutRoom>,
}

/// Process-local repository, used when no Redis URL is configured.
#[derive(Debug, Default)]
pub struct InMemoryConferenceRepository {
    conferences: RwLock<HashMap<ConferenceId, StoredConference>>,
}

impl InMemoryConferenceRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Breakout rooms stored for a conference, by room number.
    pub async fn breakout_rooms(&self, conference_id: ConferenceId) -> Vec<BreakoutRoom> {
        let conferences = self.conferences.read().await;
        let mut rooms: Vec<BreakoutRoom> = conferences
            .get(&conference_id)
            .map(|stored| stored.rooms.values().cloned().collect())
            .unwrap_or_default();
        rooms.sort_by_key(|room| (room.number, room.created_at));
        rooms
    }
}

#[async_trait]
impl ConferenceRepository for InMemoryConferenceRepository {
    async fn save_conference(&self, conference: &Conference) -> Result<(), ConferenceError> {
        let mut conferences = self.conferences.write().await;
        conferences.entry(conference.id).or_default().conference = Some(conference.clone());
        Ok(())
    }

    async fn save_participant(&self, participant: &Participant) -> Result<(), ConferenceError> {
        let mut conferences = self.conferences.write().await;
        conferences
            .entry(participant.conference_id)
            .or_default()
            .participants
            .insert(participant.id, participant.clone());
        Ok(())
    }

    async fn save_chat_message(&self, message: &ChatMessage) -> Result<(), ConferenceError> {
        let mut conferences = self.conferences.write().await;
        let stored = conferences.entry(message.conference_id).or_default();
        stored.chat.retain(|existing| existing.id != message.id);
        stored.chat.push(message.clone());
        Ok(())
    }

    async fn delete_chat_message(
        &self,
        conference_id: ConferenceId,
        message_id: ChatMessageId,
    ) -> Result<(), ConferenceError> {
        let mut conferences = self.conferences.write().await;
        if let Some(stored) = conferences.get_mut(&conference_id) {
            stored.chat.retain(|message| message.id != message_id);
        }
        Ok(())
    }

    async fn save_breakout_room(&self, room: &BreakoutRoom) -> Result<(), ConferenceError> {
        let mut conferences = self.conferences.write().await;
        conferences
            .entry(room.conference_id)
            .or_default()
            .rooms
            .insert(room.id, room.clone());
        Ok(())
    }

    async fn fetch_conference(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Option<Conference>, ConferenceError> {
        let conferences = self.conferences.read().await;
        Ok(conferences
            .get(&conference_id)
            .and_then(|stored| stored.conference.clone()))
    }

    async fn fetch_participants(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError> {
        let conferences = self.conferences.read().await;
        let mut participants: Vec<Participant> = conferences
            .get(&conference_id)
            .map(|stored| stored.participants.values().cloned().collect())
            .unwrap_or_default();
        participants.sort_by_key(|p| p.join_order);
        Ok(participants)
    }

    async fn fetch_chat_messages(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<ChatMessage>, ConferenceError> {
        let conferences = self.conferences.read().await;
        Ok(conferences
            .get(&conference_id)
            .map(|stored| stored.chat.clone())
            .unwrap_or_default())
    }
}
