//! In-conference chat: public and private messages, deletion, history.

use super::{ConferenceCoordinator, PendingWrites};
use crate::errors::ConferenceError;
use crate::models::{ChatMessage, MAX_CHAT_MESSAGE_CHARS};
use crate::relay::{Audience, RelayEvent};
use chrono::Utc;
use common::types::{ChatMessageId, ConferenceId, ParticipantId, UserId};
use tracing::{debug, info, instrument};

impl ConferenceCoordinator {
    /// Send a chat message, to everyone or privately to `recipient`.
    ///
    /// # Errors
    ///
    /// `InvalidState` if chat is disabled or the sender is not joined,
    /// `Unauthorized` unless the caller owns the sender, `BadRequest` for an
    /// empty or oversized body, `NotFound` for an absent recipient.
    #[instrument(skip_all, fields(conference_id = %conference_id, sender = %sender))]
    pub async fn send_message(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        sender: ParticipantId,
        body: &str,
        recipient: Option<ParticipantId>,
    ) -> Result<ChatMessage, ConferenceError> {
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let message = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            if !session.conference().settings.enable_chat {
                return Err(ConferenceError::InvalidState(
                    "Chat is disabled for this conference".to_string(),
                ));
            }
            let from = session.require_participant(sender)?;
            if &from.user_id != caller {
                return Err(ConferenceError::Unauthorized(
                    "Messages can only be sent as yourself".to_string(),
                ));
            }
            let from = session.require_joined(sender)?;
            let sender_name = from.display_name.clone();
            let body = validate_message_body(body)?;
            if let Some(to) = recipient {
                let joined = session.participant(to).is_some_and(|p| p.is_joined());
                if !joined {
                    return Err(ConferenceError::NotFound(
                        "Recipient not found".to_string(),
                    ));
                }
            }

            let message = ChatMessage {
                id: ChatMessageId::new(),
                conference_id,
                sender,
                sender_name,
                body,
                sent_at: Utc::now(),
                recipient,
            };
            session.push_message(message.clone());
            let audience = match recipient {
                Some(to) => Audience::Participant(to),
                None => Audience::AllJoinedExcept(sender),
            };
            session.emit(
                audience,
                RelayEvent::ChatMessage {
                    message: message.clone(),
                },
            );
            writes.chat_message(&message);
            message
        };

        self.flush(writes).await;
        debug!(
            target: "conf.chat",
            conference_id = %conference_id,
            message_id = %message.id,
            private = message.recipient.is_some(),
            "Chat message sent"
        );
        Ok(message)
    }

    /// Delete a message. Allowed for its sender and the host.
    ///
    /// # Errors
    ///
    /// `NotFound` if the message does not exist, `Forbidden` for anyone else.
    #[instrument(skip_all, fields(conference_id = %conference_id, message_id = %message_id))]
    pub async fn delete_message(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        message_id: ChatMessageId,
    ) -> Result<(), ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            let message = session
                .message(message_id)
                .ok_or_else(|| ConferenceError::NotFound("Message not found".to_string()))?;
            let own = session
                .participant(message.sender)
                .is_some_and(|p| &p.user_id == caller);
            if !own && !session.is_host(&authority) {
                return Err(ConferenceError::Forbidden(
                    "Only the sender or the host may delete a message".to_string(),
                ));
            }

            session.remove_message(message_id);
            session.emit(
                Audience::AllJoined,
                RelayEvent::ChatMessageDeleted { message_id },
            );
            writes.deleted_message(conference_id, message_id);
        }

        self.flush(writes).await;
        info!(
            target: "conf.chat",
            conference_id = %conference_id,
            message_id = %message_id,
            "Chat message deleted"
        );
        Ok(())
    }

    /// Messages visible to `participant`: every public message plus private
    /// ones it sent or received, in send order.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless the caller owns the participant.
    pub async fn messages(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Vec<ChatMessage>, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        let participant = session.require_participant(participant_id)?;
        if &participant.user_id != caller {
            return Err(ConferenceError::Unauthorized(
                "Chat history is only visible to its participant".to_string(),
            ));
        }
        Ok(session.messages_visible_to(participant_id))
    }
}

/// Trim a message body and check its length.
pub(crate) fn validate_message_body(body: &str) -> Result<String, ConferenceError> {
    let body = body.trim();
    if body.is_empty() || body.chars().count() > MAX_CHAT_MESSAGE_CHARS {
        return Err(ConferenceError::BadRequest(format!(
            "Message must be 1 to {MAX_CHAT_MESSAGE_CHARS} characters"
        )));
    }
    Ok(body.to_string())
}
