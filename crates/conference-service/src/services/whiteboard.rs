//! Shared whiteboard, last writer wins.

use super::ConferenceCoordinator;
use crate::errors::ConferenceError;
use crate::models::{WhiteboardState, MAX_WHITEBOARD_BYTES};
use crate::relay::{Audience, RelayEvent};
use chrono::Utc;
use common::types::{ConferenceId, ParticipantId, UserId};
use tracing::{debug, instrument};

impl ConferenceCoordinator {
    /// Replace the whiteboard document.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the whiteboard is disabled or the participant is
    /// not joined, `Unauthorized` unless the caller owns the participant,
    /// `Forbidden` without the whiteboard permission, `BadRequest` for a
    /// document over 1 MiB.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn update_whiteboard(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        document: String,
    ) -> Result<WhiteboardState, ConferenceError> {
        if document.len() > MAX_WHITEBOARD_BYTES {
            return Err(ConferenceError::BadRequest(format!(
                "Whiteboard document exceeds {MAX_WHITEBOARD_BYTES} bytes"
            )));
        }
        self.write_whiteboard(caller, conference_id, participant_id, document)
            .await
    }

    /// Empty the whiteboard. Same authority as `update_whiteboard`.
    ///
    /// # Errors
    ///
    /// As `update_whiteboard`.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn clear_whiteboard(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<WhiteboardState, ConferenceError> {
        self.write_whiteboard(caller, conference_id, participant_id, String::new())
            .await
    }

    async fn write_whiteboard(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        document: String,
    ) -> Result<WhiteboardState, ConferenceError> {
        let session = self.session(conference_id).await?;
        let mut session = session.write().await;
        session.ensure_mutable()?;
        if !session.conference().settings.enable_whiteboard {
            return Err(ConferenceError::InvalidState(
                "Whiteboard is disabled for this conference".to_string(),
            ));
        }
        let author = session.require_participant(participant_id)?;
        if &author.user_id != caller {
            return Err(ConferenceError::Unauthorized(
                "Whiteboard edits can only be made as yourself".to_string(),
            ));
        }
        let author = session.require_joined(participant_id)?;
        if !author.permissions.can_use_whiteboard() {
            return Err(ConferenceError::Forbidden(
                "Whiteboard permission required".to_string(),
            ));
        }

        let whiteboard = session.whiteboard_mut();
        whiteboard.document = document;
        whiteboard.version += 1;
        whiteboard.last_modified_by = Some(participant_id);
        whiteboard.last_modified_at = Some(Utc::now());
        let state = whiteboard.clone();

        session.emit(
            Audience::AllJoined,
            RelayEvent::WhiteboardUpdated {
                document: state.document.clone(),
                version: state.version,
                modified_by: participant_id,
            },
        );
        debug!(
            target: "conf.whiteboard",
            conference_id = %conference_id,
            version = state.version,
            bytes = state.document.len(),
            "Whiteboard updated"
        );
        Ok(state)
    }

    /// Current whiteboard state.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn whiteboard(
        &self,
        conference_id: ConferenceId,
    ) -> Result<WhiteboardState, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.whiteboard().clone())
    }
}
