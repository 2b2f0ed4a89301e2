//! Session store: the authoritative live state of every conference.
//!
//! The outer map is guarded by a `tokio::sync::RwLock` held only for lookup
//! and insertion. Each conference has its own `RwLock<ConferenceSession>`;
//! all mutations of one conference serialize on that lock while different
//! conferences proceed independently.

pub mod session;

pub use session::{Authority, ConferenceSession};

use crate::errors::ConferenceError;
use crate::observability::metrics;
use crate::repositories::ConferenceRepository;
use common::types::ConferenceId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Shared handle to one conference's guarded session.
pub type SharedSession = Arc<RwLock<ConferenceSession>>;

/// Map of live conference sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ConferenceId, SharedSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// # Errors
    ///
    /// `ConferenceError::Conflict` if the id is already present.
    pub async fn insert(&self, session: ConferenceSession) -> Result<SharedSession, ConferenceError> {
        let id = session.id();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(ConferenceError::Conflict(format!(
                "Conference {id} already exists"
            )));
        }
        let shared = Arc::new(RwLock::new(session));
        sessions.insert(id, Arc::clone(&shared));
        metrics::set_conferences_active(sessions.len());
        Ok(shared)
    }

    /// Cached session, if any.
    pub async fn get(&self, id: ConferenceId) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Cached session, or one hydrated from the repository.
    ///
    /// # Errors
    ///
    /// `ConferenceError::NotFound` if neither the cache nor the repository
    /// knows the conference; repository errors propagate.
    #[instrument(skip_all, fields(conference_id = %id))]
    pub async fn get_or_load(
        &self,
        id: ConferenceId,
        repository: &dyn ConferenceRepository,
    ) -> Result<SharedSession, ConferenceError> {
        if let Some(session) = self.get(id).await {
            return Ok(session);
        }

        let conference = repository
            .fetch_conference(id)
            .await?
            .ok_or_else(|| ConferenceError::NotFound("Conference not found".to_string()))?;
        let participants = repository.fetch_participants(id).await?;
        let chat = repository.fetch_chat_messages(id).await?;

        let mut hydrated = ConferenceSession::hydrate(conference, participants);
        for message in chat {
            hydrated.push_message(message);
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have hydrated the same conference meanwhile.
        let shared = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(hydrated)))
            .clone();
        metrics::set_conferences_active(sessions.len());
        debug!(target: "conf.store", conference_id = %id, "Hydrated conference from repository");
        Ok(shared)
    }

    /// Evict a session from the cache.
    pub async fn remove(&self, id: ConferenceId) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        metrics::set_conferences_active(sessions.len());
        removed
    }

    /// Every cached session.
    pub async fn all(&self) -> Vec<SharedSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
