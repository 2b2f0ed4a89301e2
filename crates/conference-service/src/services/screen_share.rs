//! Screen-share arbitration: at most one sharer per conference.
//!
//! The check-and-set runs under the conference write lock, so concurrent
//! starts serialize and the last one wins by preempting the others.

use super::{ConferenceCoordinator, PendingWrites};
use crate::errors::ConferenceError;
use crate::models::Participant;
use crate::observability::metrics;
use crate::relay::{Audience, RelayEvent, ShareStopReason};
use common::types::{ConferenceId, ParticipantId, UserId};
use tracing::{error, info, instrument};

impl ConferenceCoordinator {
    /// Start sharing, preempting any current sharer.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless the caller owns the participant, `InvalidState`
    /// if sharing is disabled or the participant is not joined, `Forbidden`
    /// without the share permission.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn start_screen_share(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let (participant, preempted) = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            let target = session.require_participant(participant_id)?;
            if &target.user_id != caller {
                return Err(ConferenceError::Unauthorized(
                    "Only the participant may share its screen".to_string(),
                ));
            }
            if !session.conference().settings.enable_screen_share {
                return Err(ConferenceError::InvalidState(
                    "Screen sharing is disabled for this conference".to_string(),
                ));
            }
            let target = session.require_joined(participant_id)?;
            if !target.permissions.can_share_screen() {
                return Err(ConferenceError::Forbidden(
                    "Screen share permission required".to_string(),
                ));
            }
            if target.media.screen_sharing {
                return Ok(target.clone());
            }

            let others: Vec<ParticipantId> = session
                .screen_sharers()
                .into_iter()
                .filter(|id| *id != participant_id)
                .collect();
            if others.len() > 1 {
                error!(
                    target: "conf.screen_share",
                    conference_id = %conference_id,
                    sharers = others.len(),
                    "Multiple concurrent screen sharers observed, clearing all"
                );
            }
            for other in &others {
                session.stop_share(*other, ShareStopReason::Preempted);
                metrics::record_screen_share_preemption();
                if let Some(participant) = session.participant(*other) {
                    writes.participant(participant);
                }
            }

            let target = session.require_participant_mut(participant_id)?;
            target.media.screen_sharing = true;
            let participant = target.clone();
            session.emit(
                Audience::AllJoined,
                RelayEvent::ScreenShareStarted { participant_id },
            );
            writes.participant(&participant);
            (participant, others)
        };

        self.flush(writes).await;
        info!(
            target: "conf.screen_share",
            conference_id = %conference_id,
            participant_id = %participant_id,
            preempted = preempted.len(),
            "Screen share started"
        );
        Ok(participant)
    }

    /// Stop a participant's share.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless self or host/co-host, `InvalidState` if the
    /// participant is not sharing.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn stop_screen_share(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let participant = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_self_or_moderator(&authority, participant_id)?;
            if !session.stop_share(participant_id, ShareStopReason::Stopped) {
                return Err(ConferenceError::InvalidState(
                    "Participant is not sharing".to_string(),
                ));
            }
            let participant = session.require_participant(participant_id)?.clone();
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        info!(
            target: "conf.screen_share",
            conference_id = %conference_id,
            participant_id = %participant_id,
            "Screen share stopped"
        );
        Ok(participant)
    }
}
