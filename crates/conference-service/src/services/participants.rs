//! Participant registry operations: leaving, moderation, permissions and
//! media state.

use super::{ConferenceCoordinator, PendingWrites};
use crate::errors::ConferenceError;
use crate::models::{LeaveReason, Participant, ParticipantStatus, PermissionUpdate, Permissions};
use crate::relay::{Audience, RelayEvent, ShareStopReason};
use crate::store::ConferenceSession;
use chrono::Utc;
use common::types::{ConferenceId, ParticipantId, UserId};
use tracing::{debug, info, instrument};

impl ConferenceCoordinator {
    /// Leave voluntarily. Only the participant's own user may do this.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown participants, `Unauthorized` for someone
    /// else's, `InvalidState` if already gone.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn leave(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let participant = {
            let mut session = session.write().await;
            let target = session.require_participant(participant_id)?;
            if &target.user_id != caller {
                return Err(ConferenceError::Unauthorized(
                    "Only the participant may leave".to_string(),
                ));
            }
            if !target.status.is_active() {
                return Err(ConferenceError::InvalidState(
                    "Participant already left".to_string(),
                ));
            }

            let participant = retire_with_notice(
                &mut session,
                participant_id,
                ParticipantStatus::Left,
                LeaveReason::Voluntary,
            )?;
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            total_time_seconds = participant.total_time_seconds,
            "Participant left"
        );
        Ok(participant)
    }

    /// Remove a participant. A co-host cannot remove the host.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority, `Forbidden` when a
    /// co-host targets the host, `InvalidState` if the target is gone.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn remove(
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
            session.require_moderator(&authority)?;
            let target = session.require_participant(participant_id)?;
            if !target.status.is_active() {
                return Err(ConferenceError::InvalidState(
                    "Participant is no longer present".to_string(),
                ));
            }
            if target.user_id == session.conference().host_id && !session.is_host(&authority) {
                return Err(ConferenceError::Forbidden(
                    "Co-hosts cannot remove the host".to_string(),
                ));
            }

            session.emit(Audience::Participant(participant_id), RelayEvent::Removed);
            let participant = session
                .retire(participant_id, ParticipantStatus::Removed, Utc::now())
                .ok_or_else(|| ConferenceError::NotFound("Participant not found".to_string()))?;
            session.emit(
                Audience::AllJoined,
                RelayEvent::ParticipantRemoved { participant_id },
            );
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            removed_by = %caller,
            "Participant removed"
        );
        Ok(participant)
    }

    /// Grant the co-host bundle.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-hosts, `NotFound`/`InvalidState` for the target.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn make_co_host(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        self.change_permissions(caller, conference_id, participant_id, |permissions| {
            permissions.insert(Permissions::CO_HOST_BUNDLE);
        })
        .await
    }

    /// Revoke co-host authority. The rest of the bundle stays.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-hosts, `NotFound`/`InvalidState` for the target.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn revoke_co_host(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        self.change_permissions(caller, conference_id, participant_id, |permissions| {
            permissions.remove(Permissions::CO_HOST);
        })
        .await
    }

    /// Grant or revoke individual permissions.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an empty update, `Unauthorized` for non-hosts,
    /// `NotFound`/`InvalidState` for the target.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn update_permissions(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        update: PermissionUpdate,
    ) -> Result<Participant, ConferenceError> {
        if update.is_empty() {
            return Err(ConferenceError::BadRequest(
                "Permission update changes nothing".to_string(),
            ));
        }
        self.change_permissions(caller, conference_id, participant_id, |permissions| {
            update.apply_to(permissions);
        })
        .await
    }

    async fn change_permissions<F>(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        change: F,
    ) -> Result<Participant, ConferenceError>
    where
        F: FnOnce(&mut Permissions) + Send,
    {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let participant = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_host(&authority)?;
            session.require_joined(participant_id)?;

            let target = session.require_participant_mut(participant_id)?;
            let before = target.permissions;
            change(&mut target.permissions);
            let after = target.permissions;

            if before.can_share_screen() && !after.can_share_screen() {
                session.stop_share(participant_id, ShareStopReason::PermissionRevoked);
            }
            if before != after {
                session.emit(
                    Audience::AllJoined,
                    RelayEvent::PermissionsChanged {
                        participant_id,
                        permissions: after,
                    },
                );
            }

            let participant = session.require_participant(participant_id)?.clone();
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        debug!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            permissions = ?participant.permissions,
            "Permissions changed"
        );
        Ok(participant)
    }

    /// Mute or unmute a participant's audio.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless self or host/co-host; `InvalidState` unless joined.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn set_audio_muted(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        muted: bool,
    ) -> Result<Participant, ConferenceError> {
        self.change_media(caller, conference_id, participant_id, |participant| {
            let changed = participant.media.audio_muted != muted;
            participant.media.audio_muted = muted;
            changed.then(|| media_changed(participant))
        })
        .await
    }

    /// Turn a participant's video off or on.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless self or host/co-host; `InvalidState` unless joined.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn set_video_off(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        off: bool,
    ) -> Result<Participant, ConferenceError> {
        self.change_media(caller, conference_id, participant_id, |participant| {
            let changed = participant.media.video_off != off;
            participant.media.video_off = off;
            changed.then(|| media_changed(participant))
        })
        .await
    }

    /// Raise or lower a hand. Raising stamps the raise time.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless self or host/co-host; `InvalidState` unless joined.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn set_hand_raised(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        raised: bool,
    ) -> Result<Participant, ConferenceError> {
        self.change_media(caller, conference_id, participant_id, |participant| {
            if participant.media.hand_raised == raised {
                return None;
            }
            Some(if raised {
                let now = Utc::now();
                participant.media.hand_raised = true;
                participant.media.hand_raised_at = Some(now);
                RelayEvent::HandRaised {
                    participant_id: participant.id,
                    raised_at: now,
                }
            } else {
                participant.media.hand_raised = false;
                participant.media.hand_raised_at = None;
                RelayEvent::HandLowered {
                    participant_id: participant.id,
                }
            })
        })
        .await
    }

    async fn change_media<F>(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        change: F,
    ) -> Result<Participant, ConferenceError>
    where
        F: FnOnce(&mut Participant) -> Option<RelayEvent> + Send,
    {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let participant = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_self_or_moderator(&authority, participant_id)?;
            session.require_joined(participant_id)?;

            let target = session.require_participant_mut(participant_id)?;
            let event = change(target);
            let participant = target.clone();
            if let Some(event) = event {
                session.emit(Audience::AllJoined, event);
                writes.participant(&participant);
            }
            participant
        };

        self.flush(writes).await;
        Ok(participant)
    }

    /// Mute every joined participant except the caller's own.
    /// Returns the participants that changed.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn mute_all(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<Vec<ParticipantId>, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let muted = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_moderator(&authority)?;

            let targets: Vec<ParticipantId> = session
                .active_participants()
                .into_iter()
                .filter(|p| p.user_id != authority.user && !p.media.audio_muted)
                .map(|p| p.id)
                .collect();
            for id in &targets {
                if let Some(participant) = session.participant_mut(*id) {
                    participant.media.audio_muted = true;
                    let event = media_changed(participant);
                    writes.participant(participant);
                    session.emit(Audience::AllJoined, event);
                }
            }
            targets
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            count = muted.len(),
            "Muted all participants"
        );
        Ok(muted)
    }

    /// Lower every raised hand. Returns the participants that changed.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn lower_all_hands(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<Vec<ParticipantId>, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let lowered = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_moderator(&authority)?;

            let targets: Vec<ParticipantId> =
                session.raised_hands().iter().map(|p| p.id).collect();
            for id in &targets {
                if let Some(participant) = session.participant_mut(*id) {
                    participant.media.hand_raised = false;
                    participant.media.hand_raised_at = None;
                    writes.participant(participant);
                }
                session.emit(
                    Audience::AllJoined,
                    RelayEvent::HandLowered { participant_id: *id },
                );
            }
            targets
        };

        self.flush(writes).await;
        Ok(lowered)
    }

    /// Joined participants in join order.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn active_participants(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.active_participants().into_iter().cloned().collect())
    }

    /// One participant record, in any status.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences or participants.
    pub async fn participant(
        &self,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Participant, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        session.require_participant(participant_id).cloned()
    }

    /// Joined participants with raised hands, earliest raise first.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn raised_hands(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.raised_hands().into_iter().cloned().collect())
    }

    /// The current screen sharer.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn screen_sharer(
        &self,
        conference_id: ConferenceId,
    ) -> Result<Option<Participant>, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session
            .screen_sharer()
            .and_then(|id| session.participant(id))
            .cloned())
    }
}

/// Retire a participant and broadcast `ParticipantLeft` to those remaining.
pub(crate) fn retire_with_notice(
    session: &mut ConferenceSession,
    participant_id: ParticipantId,
    status: ParticipantStatus,
    reason: LeaveReason,
) -> Result<Participant, ConferenceError> {
    let participant = session
        .retire(participant_id, status, Utc::now())
        .ok_or_else(|| ConferenceError::NotFound("Participant not found".to_string()))?;
    session.emit(
        Audience::AllJoined,
        RelayEvent::ParticipantLeft {
            participant_id,
            reason,
        },
    );
    Ok(participant)
}

fn media_changed(participant: &Participant) -> RelayEvent {
    RelayEvent::MediaChanged {
        participant_id: participant.id,
        audio_muted: participant.media.audio_muted,
        video_off: participant.media.video_off,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{all_features, coordinator, drain, host, join, live};
    use super::*;
    use crate::models::ConferenceSettings;

    #[tokio::test]
    async fn test_leave_requires_own_user() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        let result = coordinator
            .leave(&UserId::new("mallory"), id, alice.participant.id)
            .await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));

        let left = coordinator
            .leave(&UserId::new("alice"), id, alice.participant.id)
            .await
            .unwrap();
        assert_eq!(left.status, ParticipantStatus::Left);
        assert!(left.left_at.is_some());
        assert!(left.total_time_seconds.is_some());

        let again = coordinator
            .leave(&UserId::new("alice"), id, alice.participant.id)
            .await;
        assert!(matches!(again, Err(ConferenceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_leave_clears_share_and_broadcasts() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let mut bob = join(&coordinator, id, "bob").await;
        coordinator
            .start_screen_share(&UserId::new("alice"), id, alice.participant.id)
            .await
            .unwrap();
        drain(&mut bob.events);

        coordinator
            .leave(&UserId::new("alice"), id, alice.participant.id)
            .await
            .unwrap();

        let events = drain(&mut bob.events);
        assert!(matches!(
            events.first(),
            Some(RelayEvent::ScreenShareStopped {
                reason: ShareStopReason::Left,
                ..
            })
        ));
        assert!(matches!(
            events.get(1),
            Some(RelayEvent::ParticipantLeft {
                reason: LeaveReason::Voluntary,
                ..
            })
        ));
        assert!(coordinator.screen_sharer(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_co_host_cannot_remove_host() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let host_join = join(&coordinator, id, "host").await;
        let alice = join(&coordinator, id, "alice").await;
        coordinator
            .make_co_host(&host(), id, alice.participant.id)
            .await
            .unwrap();

        let result = coordinator
            .remove(&UserId::new("alice"), id, host_join.participant.id)
            .await;
        assert!(matches!(result, Err(ConferenceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_remove_notifies_target_first() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let mut alice = join(&coordinator, id, "alice").await;
        let mut bob = join(&coordinator, id, "bob").await;
        drain(&mut alice.events);
        drain(&mut bob.events);

        let removed = coordinator
            .remove(&host(), id, alice.participant.id)
            .await
            .unwrap();
        assert_eq!(removed.status, ParticipantStatus::Removed);

        assert!(matches!(
            drain(&mut alice.events).as_slice(),
            [RelayEvent::Removed]
        ));
        assert!(drain(&mut bob.events)
            .iter()
            .any(|e| matches!(e, RelayEvent::ParticipantRemoved { .. })));
    }

    #[tokio::test]
    async fn test_attendee_cannot_remove() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;

        let result = coordinator
            .remove(&UserId::new("alice"), id, bob.participant.id)
            .await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_co_host_grant_and_revoke() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        let granted = coordinator
            .make_co_host(&host(), id, alice.participant.id)
            .await
            .unwrap();
        assert_eq!(granted.permissions, Permissions::CO_HOST_BUNDLE);

        let revoked = coordinator
            .revoke_co_host(&host(), id, alice.participant.id)
            .await
            .unwrap();
        assert!(!revoked.permissions.is_co_host());
        assert!(revoked.permissions.can_record());
    }

    #[tokio::test]
    async fn test_only_host_changes_permissions() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;
        coordinator
            .make_co_host(&host(), id, alice.participant.id)
            .await
            .unwrap();

        let result = coordinator
            .make_co_host(&UserId::new("alice"), id, bob.participant.id)
            .await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_revoking_share_permission_stops_share() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        coordinator
            .start_screen_share(&UserId::new("alice"), id, alice.participant.id)
            .await
            .unwrap();

        coordinator
            .update_permissions(
                &host(),
                id,
                alice.participant.id,
                PermissionUpdate {
                    can_share_screen: Some(false),
                    ..PermissionUpdate::default()
                },
            )
            .await
            .unwrap();

        assert!(coordinator.screen_sharer(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_media_toggles_self_or_moderator() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        let muted = coordinator
            .set_audio_muted(&UserId::new("alice"), id, alice.participant.id, true)
            .await
            .unwrap();
        assert!(muted.media.audio_muted);

        let video = coordinator
            .set_video_off(&host(), id, alice.participant.id, true)
            .await
            .unwrap();
        assert!(video.media.video_off);

        let foreign = coordinator
            .set_audio_muted(&UserId::new("bob"), id, alice.participant.id, false)
            .await;
        assert!(matches!(foreign, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_raised_hands_ordered_by_raise_time() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;

        coordinator
            .set_hand_raised(&UserId::new("bob"), id, bob.participant.id, true)
            .await
            .unwrap();
        coordinator
            .set_hand_raised(&UserId::new("alice"), id, alice.participant.id, true)
            .await
            .unwrap();

        let raised: Vec<ParticipantId> = coordinator
            .raised_hands(id)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(raised, vec![bob.participant.id, alice.participant.id]);

        let lowered = coordinator.lower_all_hands(&host(), id).await.unwrap();
        assert_eq!(lowered.len(), 2);
        assert!(coordinator.raised_hands(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mute_all_skips_caller() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let host_join = join(&coordinator, id, "host").await;
        let alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;

        let muted = coordinator.mute_all(&host(), id).await.unwrap();
        assert_eq!(muted.len(), 2);

        let host_record = coordinator
            .participant(id, host_join.participant.id)
            .await
            .unwrap();
        assert!(!host_record.media.audio_muted);
        for attendee in [alice.participant.id, bob.participant.id] {
            let record = coordinator.participant(id, attendee).await.unwrap();
            assert!(record.media.audio_muted);
        }
    }

    #[tokio::test]
    async fn test_media_on_waiting_participant_is_invalid_state() {
        let coordinator = coordinator();
        let id = live(
            &coordinator,
            ConferenceSettings {
                enable_waiting_room: true,
                ..all_features()
            },
        )
        .await;
        let waiting = join(&coordinator, id, "alice").await;

        let result = coordinator
            .set_audio_muted(&UserId::new("alice"), id, waiting.participant.id, true)
            .await;
        assert!(matches!(result, Err(ConferenceError::InvalidState(_))));
    }
}
