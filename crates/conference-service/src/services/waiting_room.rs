//! Waiting room gate: hosts and co-hosts admit or deny pending participants.

use super::participants::retire_with_notice;
use super::{ConferenceCoordinator, PendingWrites};
use crate::errors::ConferenceError;
use crate::models::{LeaveReason, Participant, ParticipantStatus};
use crate::relay::{Audience, RelayEvent};
use crate::store::ConferenceSession;
use chrono::Utc;
use common::types::{ConferenceId, ParticipantId, UserId};
use tracing::{info, instrument};

impl ConferenceCoordinator {
    /// Waiting participants in request order.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority.
    pub async fn waiting_room(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<Vec<Participant>, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        session.require_moderator(&authority)?;
        Ok(session
            .waiting_participants()
            .into_iter()
            .cloned()
            .collect())
    }

    /// Admit one waiting participant.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority, `InvalidState` if the
    /// participant is not waiting, `Capacity` if the conference is full.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn admit_one(
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
            let participant = admit(&mut session, participant_id)?;
            writes.participant(&participant);
            writes.conference(session.conference());
            participant
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            "Participant admitted"
        );
        Ok(participant)
    }

    /// Admit waiting participants in request order until capacity is reached.
    /// Returns the admitted participants; the rest stay waiting.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn admit_all(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<Vec<ParticipantId>, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let (admitted, remaining) = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_moderator(&authority)?;

            let waiting: Vec<ParticipantId> =
                session.waiting_participants().iter().map(|p| p.id).collect();
            let mut admitted = Vec::new();
            for id in &waiting {
                if session.joined_count() >= session.conference().max_participants {
                    break;
                }
                let participant = admit(&mut session, *id)?;
                writes.participant(&participant);
                admitted.push(participant.id);
            }
            if !admitted.is_empty() {
                writes.conference(session.conference());
            }
            let remaining = waiting.len() - admitted.len();
            (admitted, remaining)
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            admitted = admitted.len(),
            remaining,
            "Admitted waiting participants"
        );
        Ok(admitted)
    }

    /// Deny a waiting participant; it becomes `Removed`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority, `InvalidState` if the
    /// participant is not waiting.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn deny(
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
            require_waiting(&session, participant_id)?;

            session.emit(Audience::Participant(participant_id), RelayEvent::Denied);
            let participant = retire_with_notice(
                &mut session,
                participant_id,
                ParticipantStatus::Removed,
                LeaveReason::Denied,
            )?;
            writes.participant(&participant);
            participant
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            "Participant denied"
        );
        Ok(participant)
    }
}

fn require_waiting(
    session: &ConferenceSession,
    participant_id: ParticipantId,
) -> Result<(), ConferenceError> {
    let participant = session.require_participant(participant_id)?;
    if participant.status == ParticipantStatus::InWaitingRoom {
        Ok(())
    } else {
        Err(ConferenceError::InvalidState(
            "Participant is not in the waiting room".to_string(),
        ))
    }
}

/// Move a waiting participant to `Joined`, notifying it and everyone else.
fn admit(
    session: &mut ConferenceSession,
    participant_id: ParticipantId,
) -> Result<Participant, ConferenceError> {
    require_waiting(session, participant_id)?;
    let max = session.conference().max_participants;
    if session.joined_count() >= max {
        return Err(ConferenceError::Capacity(format!(
            "Conference is limited to {max} participants"
        )));
    }

    let participant = session.require_participant_mut(participant_id)?;
    participant.status = ParticipantStatus::Joined;
    participant.joined_at = Some(Utc::now());
    let participant = participant.clone();

    session.conference_mut().total_participants_joined += 1;
    session.record_admission();
    session.emit(Audience::Participant(participant_id), RelayEvent::Admitted);
    session.emit(
        Audience::AllJoinedExcept(participant_id),
        RelayEvent::ParticipantJoined {
            participant: Box::new(participant.clone()),
        },
    );
    Ok(participant)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{all_features, coordinator, drain, host, join, live};
    use super::*;
    use crate::models::{ConferenceSettings, SettingsUpdate};

    fn gated() -> ConferenceSettings {
        ConferenceSettings {
            enable_waiting_room: true,
            ..all_features()
        }
    }

    #[tokio::test]
    async fn test_waiting_participants_are_not_joined() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        let alice = join(&coordinator, id, "alice").await;

        assert_eq!(alice.participant.status, ParticipantStatus::InWaitingRoom);
        assert!(alice.participant.joined_at.is_none());
        assert!(coordinator.active_participants(id).await.unwrap().is_empty());

        let waiting = coordinator.waiting_room(&host(), id).await.unwrap();
        assert_eq!(waiting.len(), 1);
    }

    #[tokio::test]
    async fn test_host_bypasses_waiting_room() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        let host_join = join(&coordinator, id, "host").await;
        assert_eq!(host_join.participant.status, ParticipantStatus::Joined);
    }

    #[tokio::test]
    async fn test_admit_one_notifies_participant() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        let mut alice = join(&coordinator, id, "alice").await;

        let admitted = coordinator
            .admit_one(&host(), id, alice.participant.id)
            .await
            .unwrap();
        assert_eq!(admitted.status, ParticipantStatus::Joined);
        assert!(admitted.joined_at.is_some());
        assert!(drain(&mut alice.events)
            .iter()
            .any(|e| matches!(e, RelayEvent::Admitted)));

        let again = coordinator.admit_one(&host(), id, alice.participant.id).await;
        assert!(matches!(again, Err(ConferenceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_admit_all_stops_at_capacity() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        coordinator
            .update_settings(
                &host(),
                id,
                SettingsUpdate {
                    max_participants: Some(2),
                    ..SettingsUpdate::default()
                },
            )
            .await
            .unwrap();

        let a = join(&coordinator, id, "a").await;
        let b = join(&coordinator, id, "b").await;
        let c = join(&coordinator, id, "c").await;

        let admitted = coordinator.admit_all(&host(), id).await.unwrap();
        assert_eq!(admitted, vec![a.participant.id, b.participant.id]);

        let waiting = coordinator.waiting_room(&host(), id).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting.first().map(|p| p.id), Some(c.participant.id));

        let full = coordinator.admit_one(&host(), id, c.participant.id).await;
        assert!(matches!(full, Err(ConferenceError::Capacity(_))));
    }

    #[tokio::test]
    async fn test_deny_removes_waiting_participant() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        let mut alice = join(&coordinator, id, "alice").await;

        let denied = coordinator
            .deny(&host(), id, alice.participant.id)
            .await
            .unwrap();
        assert_eq!(denied.status, ParticipantStatus::Removed);
        assert_eq!(denied.total_time_seconds, Some(0));
        assert!(drain(&mut alice.events)
            .iter()
            .any(|e| matches!(e, RelayEvent::Denied)));
    }

    #[tokio::test]
    async fn test_attendee_cannot_admit() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        join(&coordinator, id, "host").await;
        let alice = join(&coordinator, id, "alice").await;

        let result = coordinator
            .admit_one(&UserId::new("alice"), id, alice.participant.id)
            .await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_moderators_hear_about_new_arrivals() {
        let coordinator = coordinator();
        let id = live(&coordinator, gated()).await;
        let mut host_join = join(&coordinator, id, "host").await;
        drain(&mut host_join.events);

        join(&coordinator, id, "alice").await;
        assert!(matches!(
            drain(&mut host_join.events).as_slice(),
            [RelayEvent::WaitingRoomEntered { .. }]
        ));
    }
}
