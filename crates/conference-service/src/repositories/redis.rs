//! Redis-backed conference repository.
//!
//! # Key Patterns
//!
//! - `conference:{id}:record` - Conference record (JSON string)
//! - `conference:{id}:participants` - Participant records (HASH, field = participant id)
//! - `conference:{id}:chat` - Chat messages (HASH, field = message id)
//! - `conference:{id}:rooms` - Breakout rooms (HASH, field = room id)
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so each operation clones it instead of locking.

use super::ConferenceRepository;
use crate::errors::ConferenceError;
use crate::models::{BreakoutRoom, ChatMessage, Conference, Participant};
use crate::observability::metrics;
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use common::types::{ChatMessageId, ConferenceId};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, instrument, warn};

fn record_key(conference_id: ConferenceId) -> String {
    format!("conference:{conference_id}:record")
}

fn participants_key(conference_id: ConferenceId) -> String {
    format!("conference:{conference_id}:participants")
}

fn chat_key(conference_id: ConferenceId) -> String {
    format!("conference:{conference_id}:chat")
}

fn rooms_key(conference_id: ConferenceId) -> String {
    format!("conference:{conference_id}:rooms")
}

/// Conference repository over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisConferenceRepository {
    connection: MultiplexedConnection,
}

impl RedisConferenceRepository {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `ConferenceError::Persistence` if the URL is invalid or the
    /// connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, ConferenceError> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may carry credentials; never log it.
            error!(target: "conf.repository", error = %e, "Failed to open Redis client");
            ConferenceError::Persistence(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "conf.repository", error = %e, "Failed to connect to Redis");
                ConferenceError::Persistence(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }

    async fn hset_json<T: serde::Serialize + Sync>(
        &self,
        operation: &'static str,
        key: String,
        field: String,
        value: &T,
    ) -> Result<(), ConferenceError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: Result<(), _> = conn.hset(&key, field, json).await;
        metrics::record_redis_latency(operation, start.elapsed());
        result.map_err(|e| {
            warn!(target: "conf.repository", error = %e, operation, "Redis write failed");
            ConferenceError::from(e)
        })
    }

    async fn hgetall_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        key: String,
    ) -> Result<Vec<T>, ConferenceError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: Result<HashMap<String, String>, _> = conn.hgetall(&key).await;
        metrics::record_redis_latency(operation, start.elapsed());
        let entries = result.map_err(|e| {
            warn!(target: "conf.repository", error = %e, operation, "Redis read failed");
            ConferenceError::from(e)
        })?;

        entries
            .values()
            .map(|json| serde_json::from_str(json).map_err(ConferenceError::from))
            .collect()
    }
}

#[async_trait]
impl ConferenceRepository for RedisConferenceRepository {
    #[instrument(skip_all, fields(conference_id = %conference.id))]
    async fn save_conference(&self, conference: &Conference) -> Result<(), ConferenceError> {
        let json = serde_json::to_string(conference)?;
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: Result<(), _> = conn.set(record_key(conference.id), json).await;
        metrics::record_redis_latency("set", start.elapsed());
        result.map_err(|e| {
            warn!(target: "conf.repository", error = %e, "Failed to save conference");
            ConferenceError::from(e)
        })
    }

    #[instrument(skip_all, fields(conference_id = %participant.conference_id, participant_id = %participant.id))]
    async fn save_participant(&self, participant: &Participant) -> Result<(), ConferenceError> {
        self.hset_json(
            "hset",
            participants_key(participant.conference_id),
            participant.id.to_string(),
            participant,
        )
        .await
    }

    #[instrument(skip_all, fields(conference_id = %message.conference_id))]
    async fn save_chat_message(&self, message: &ChatMessage) -> Result<(), ConferenceError> {
        self.hset_json(
            "hset",
            chat_key(message.conference_id),
            message.id.to_string(),
            message,
        )
        .await
    }

    #[instrument(skip_all, fields(conference_id = %conference_id))]
    async fn delete_chat_message(
        &self,
        conference_id: ConferenceId,
        message_id: ChatMessageId,
    ) -> Result<(), ConferenceError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: Result<(), _> = conn
            .hdel(chat_key(conference_id), message_id.to_string())
            .await;
        metrics::record_redis_latency("hdel", start.elapsed());
        result.map_err(|e| {
            warn!(target: "conf.repository", error = %e, "Failed to delete chat message");
            ConferenceError::from(e)
        })
    }

    #[instrument(skip_all, fields(conference_id = %room.conference_id, room = room.number))]
    async fn save_breakout_room(&self, room: &BreakoutRoom) -> Result<(), ConferenceError> {
        self.hset_json(
            "hset",
            rooms_key(room.conference_id),
            room.id.to_string(),
            room,
        )
        .await
    }

    #[instrument(skip_all, fields(conference_id = %conference_id))]
    async fn fetch_conference(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Option<Conference>, ConferenceError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: Result<Option<String>, _> = conn.get(record_key(conference_id)).await;
        metrics::record_redis_latency("get", start.elapsed());
        let json = result.map_err(|e| {
            warn!(target: "conf.repository", error = %e, "Failed to fetch conference");
            ConferenceError::from(e)
        })?;

        json.map(|json| serde_json::from_str(&json).map_err(ConferenceError::from))
            .transpose()
    }

    #[instrument(skip_all, fields(conference_id = %conference_id))]
    async fn fetch_participants(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError> {
        let mut participants: Vec<Participant> = self
            .hgetall_json("hgetall", participants_key(conference_id))
            .await?;
        participants.sort_by_key(|p| p.join_order);
        Ok(participants)
    }

    #[instrument(skip_all, fields(conference_id = %conference_id))]
    async fn fetch_chat_messages(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<ChatMessage>, ConferenceError> {
        let mut messages: Vec<ChatMessage> =
            self.hgetall_json("hgetall", chat_key(conference_id)).await?;
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }

    async fn ping(&self) -> Result<(), ConferenceError> {
        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result: Result<String, _> = ::redis::cmd("PING").query_async(&mut conn).await;
        metrics::record_redis_latency("ping", start.elapsed());
        result.map(|_| ()).map_err(ConferenceError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_key_format() {
        let id = ConferenceId::new();
        assert_eq!(record_key(id), format!("conference:{id}:record"));
        assert_eq!(participants_key(id), format!("conference:{id}:participants"));
        assert_eq!(chat_key(id), format!("conference:{id}:chat"));
        assert_eq!(rooms_key(id), format!("conference:{id}:rooms"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_persistence_error() {
        let result = RedisConferenceRepository::connect("http://localhost:6379").await;
        assert!(matches!(result, Err(ConferenceError::Persistence(_))));
    }
}
