//! Transport connection tracking.
//!
//! A participant whose event stream drops stays `Joined` but `Disconnected`
//! for the grace period. Reconnecting with the binding token issued at join
//! re-attaches a fresh stream; otherwise the reaper retires the participant.
//!
//! # Graceful Shutdown
//!
//! The reaper task exits when its cancellation token is triggered.

use super::participants::retire_with_notice;
use super::{ConferenceCoordinator, PendingWrites, ReconnectOutcome};
use crate::errors::ConferenceError;
use crate::models::{LeaveReason, ParticipantStatus};
use crate::relay::{peer_channel, Audience, RelayEvent};
use common::types::{ConferenceId, ParticipantId, PeerId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

impl ConferenceCoordinator {
    /// Report that a peer's transport closed.
    ///
    /// Ignored when the participant already re-attached a live stream, so a
    /// stale socket closing after a reconnect changes nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences, `UnknownPeer` for unknown peers.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn peer_disconnected(
        &self,
        conference_id: ConferenceId,
        peer_id: &PeerId,
    ) -> Result<(), ConferenceError> {
        let session = self.session(conference_id).await?;
        let mut session = session.write().await;

        let participant = session
            .participant_by_peer(peer_id)
            .ok_or(ConferenceError::UnknownPeer)?;
        let participant_id = participant.id;
        let joined = participant.is_joined();
        if !participant.status.is_active() {
            return Ok(());
        }
        if session.has_live_link(participant_id) {
            debug!(
                target: "conf.participants",
                participant_id = %participant_id,
                "Ignoring close of a superseded stream"
            );
            return Ok(());
        }

        session.mark_disconnected(participant_id);
        if joined {
            session.emit(
                Audience::AllJoinedExcept(participant_id),
                RelayEvent::ParticipantDisconnected { participant_id },
            );
        }
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            "Participant disconnected"
        );
        Ok(())
    }

    /// Re-attach a participant with the binding token from join or the
    /// previous reconnect. The presented token is spent.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for invalid or spent tokens, `InvalidState` if the
    /// conference is over or the participant is no longer present.
    #[instrument(skip_all, fields(conference_id = %conference_id, participant_id = %participant_id))]
    pub async fn reconnect(
        &self,
        conference_id: ConferenceId,
        participant_id: ParticipantId,
        token: &str,
    ) -> Result<ReconnectOutcome, ConferenceError> {
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let outcome = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            let participant = session.require_participant(participant_id)?;
            if !participant.status.is_active() {
                return Err(ConferenceError::InvalidState(
                    "Participant is no longer present".to_string(),
                ));
            }

            let valid = session.reconnect_nonce(participant_id).is_some_and(|nonce| {
                self.tokens
                    .validate(conference_id, participant_id, nonce, token)
            });
            if !valid {
                warn!(
                    target: "conf.participants",
                    conference_id = %conference_id,
                    participant_id = %participant_id,
                    "Rejected reconnect with invalid token"
                );
                return Err(ConferenceError::Unauthorized(
                    "Invalid reconnect token".to_string(),
                ));
            }

            let rotated = self.tokens.issue(conference_id, participant_id)?;
            session.set_reconnect_nonce(participant_id, rotated.nonce);
            let (link, events) = peer_channel(self.settings.peer_channel_capacity);
            session.attach_link(participant_id, link);

            let participant = session.require_participant(participant_id)?.clone();
            if participant.is_joined() {
                session.emit(
                    Audience::AllJoinedExcept(participant_id),
                    RelayEvent::ParticipantReconnected { participant_id },
                );
            }
            writes.participant(&participant);

            ReconnectOutcome {
                snapshot: session.snapshot(),
                participant,
                reconnect_token: rotated.token,
                events,
            }
        };

        self.flush(writes).await;
        info!(
            target: "conf.participants",
            conference_id = %conference_id,
            participant_id = %participant_id,
            "Participant reconnected"
        );
        Ok(outcome)
    }

    /// Retire every participant disconnected longer than the grace period.
    /// Returns how many were retired.
    #[instrument(skip_all)]
    pub async fn reap_disconnected(&self) -> usize {
        let grace = self.settings.disconnect_grace_period;
        let mut reaped = 0;

        for session in self.store.all().await {
            let mut writes = PendingWrites::default();
            {
                let mut session = session.write().await;
                for participant_id in session.expired_disconnects(grace) {
                    match retire_with_notice(
                        &mut session,
                        participant_id,
                        ParticipantStatus::Left,
                        LeaveReason::Timeout,
                    ) {
                        Ok(participant) => {
                            writes.participant(&participant);
                            reaped += 1;
                        }
                        Err(e) => {
                            debug!(
                                target: "conf.participants",
                                participant_id = %participant_id,
                                error = %e,
                                "Disconnected participant already gone"
                            );
                        }
                    }
                }
            }
            self.flush(writes).await;
        }

        if reaped > 0 {
            info!(
                target: "conf.participants",
                reaped,
                "Retired participants after disconnect grace period"
            );
        }
        reaped
    }

    /// Run the disconnect reaper until `cancel_token` fires.
    #[instrument(skip_all, name = "conf.task.reaper")]
    pub async fn run_reaper(self: Arc<Self>, cancel_token: CancellationToken) {
        info!(
            target: "conf.task.reaper",
            grace_period_seconds = self.settings.disconnect_grace_period.as_secs(),
            interval_seconds = self.settings.reaper_interval.as_secs(),
            "Starting disconnect reaper"
        );

        let mut interval = tokio::time::interval(self.settings.reaper_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reap_disconnected().await;
                }
                () = cancel_token.cancelled() => {
                    info!(
                        target: "conf.task.reaper",
                        "Reaper received shutdown signal, exiting"
                    );
                    break;
                }
            }
        }
    }

    /// Spawn `run_reaper` on the runtime.
    #[must_use]
    pub fn spawn_reaper(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run_reaper(cancel_token))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{all_features, coordinator, drain, join, live};
    use super::*;
    use crate::models::ConnectionState;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_reconnect_within_grace() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let mut bob = join(&coordinator, id, "bob").await;
        drain(&mut bob.events);

        drop(alice.events);
        coordinator
            .peer_disconnected(id, &alice.peer_id)
            .await
            .unwrap();
        assert!(matches!(
            drain(&mut bob.events).as_slice(),
            [RelayEvent::ParticipantDisconnected { .. }]
        ));

        let record = coordinator.participant(id, alice.participant.id).await.unwrap();
        assert_eq!(record.status, ParticipantStatus::Joined);
        assert_eq!(record.connection, ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_secs(10)).await;
        let outcome = coordinator
            .reconnect(id, alice.participant.id, &alice.reconnect_token)
            .await
            .unwrap();
        assert_eq!(outcome.participant.connection, ConnectionState::Connected);
        assert_ne!(outcome.reconnect_token, alice.reconnect_token);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(coordinator.reap_disconnected().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_expiry_retires_participant() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        drop(alice.events);
        coordinator
            .peer_disconnected(id, &alice.peer_id)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(coordinator.reap_disconnected().await, 0);

        tokio::time::advance(coordinator.settings().disconnect_grace_period).await;
        assert_eq!(coordinator.reap_disconnected().await, 1);

        let record = coordinator.participant(id, alice.participant.id).await.unwrap();
        assert_eq!(record.status, ParticipantStatus::Left);
    }

    #[tokio::test]
    async fn test_spent_token_is_rejected() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        coordinator
            .reconnect(id, alice.participant.id, &alice.reconnect_token)
            .await
            .unwrap();
        let replay = coordinator
            .reconnect(id, alice.participant.id, &alice.reconnect_token)
            .await;
        assert!(matches!(replay, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_foreign_token_is_rejected() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;

        let result = coordinator
            .reconnect(id, bob.participant.id, &alice.reconnect_token)
            .await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_stale_stream_close_is_ignored() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        let _fresh = coordinator
            .reconnect(id, alice.participant.id, &alice.reconnect_token)
            .await
            .unwrap();
        coordinator
            .peer_disconnected(id, &alice.peer_id)
            .await
            .unwrap();

        let record = coordinator.participant(id, alice.participant.id).await.unwrap();
        assert_eq!(record.connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;

        let result = coordinator
            .peer_disconnected(id, &PeerId::from("nobody"))
            .await;
        assert!(matches!(result, Err(ConferenceError::UnknownPeer)));
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let coordinator = Arc::new(coordinator());
        let cancel_token = CancellationToken::new();
        let handle = Arc::clone(&coordinator).spawn_reaper(cancel_token.clone());

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
