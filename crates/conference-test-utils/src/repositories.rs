//! Repository double whose writes can be switched to fail.

use async_trait::async_trait;
use common::types::{ChatMessageId, ConferenceId};
use conference_service::errors::ConferenceError;
use conference_service::models::{BreakoutRoom, ChatMessage, Conference, Participant};
use conference_service::repositories::{ConferenceRepository, InMemoryConferenceRepository};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory repository that fails every write while `fail_writes` is set.
///
/// Reads always succeed, so hydration tests can still load what was
/// written before the switch.
#[derive(Debug, Default)]
pub struct FailingRepository {
    inner: InMemoryConferenceRepository,
    fail_writes: AtomicBool,
    failed_writes: AtomicUsize,
}

impl FailingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Number of writes rejected so far.
    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ConferenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(ConferenceError::Persistence(
                "injected write failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ConferenceRepository for FailingRepository {
    async fn save_conference(&self, conference: &Conference) -> Result<(), ConferenceError> {
        self.check()?;
        self.inner.save_conference(conference).await
    }

    async fn save_participant(&self, participant: &Participant) -> Result<(), ConferenceError> {
        self.check()?;
        self.inner.save_participant(participant).await
    }

    async fn save_chat_message(&self, message: &ChatMessage) -> Result<(), ConferenceError> {
        self.check()?;
        self.inner.save_chat_message(message).await
    }

    async fn delete_chat_message(
        &self,
        conference_id: ConferenceId,
        message_id: ChatMessageId,
    ) -> Result<(), ConferenceError> {
        self.check()?;
        self.inner.delete_chat_message(conference_id, message_id).await
    }

    async fn save_breakout_room(&self, room: &BreakoutRoom) -> Result<(), ConferenceError> {
        self.check()?;
        self.inner.save_breakout_room(room).await
    }

    async fn fetch_conference(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Option<Conference>, ConferenceError> {
        self.inner.fetch_conference(conference_id).await
    }

    async fn fetch_participants(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError> {
        self.inner.fetch_participants(conference_id).await
    }

    async fn fetch_chat_messages(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<ChatMessage>, ConferenceError> {
        self.inner.fetch_chat_messages(conference_id).await
    }
}
