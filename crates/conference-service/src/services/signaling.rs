//! WebRTC signaling relay.
//!
//! Offers, answers and ICE candidates are forwarded between two joined
//! peers of the same conference. Payloads are opaque and never inspected;
//! only a read lock is taken.

use super::ConferenceCoordinator;
use crate::errors::ConferenceError;
use crate::observability::metrics;
use crate::relay::{Audience, RelayEvent, SignalKind};
use common::types::{ConferenceId, PeerId};
use serde_json::Value;
use tracing::{debug, instrument};

impl ConferenceCoordinator {
    /// Forward an SDP offer.
    ///
    /// # Errors
    ///
    /// `UnknownPeer` unless both peers are joined members.
    pub async fn relay_offer(
        &self,
        conference_id: ConferenceId,
        from: &PeerId,
        to: &PeerId,
        payload: Value,
    ) -> Result<u64, ConferenceError> {
        self.relay_signal(conference_id, from, to, SignalKind::Offer, payload)
            .await
    }

    /// Forward an SDP answer.
    ///
    /// # Errors
    ///
    /// `UnknownPeer` unless both peers are joined members.
    pub async fn relay_answer(
        &self,
        conference_id: ConferenceId,
        from: &PeerId,
        to: &PeerId,
        payload: Value,
    ) -> Result<u64, ConferenceError> {
        self.relay_signal(conference_id, from, to, SignalKind::Answer, payload)
            .await
    }

    /// Forward an ICE candidate.
    ///
    /// # Errors
    ///
    /// `UnknownPeer` unless both peers are joined members.
    pub async fn relay_ice_candidate(
        &self,
        conference_id: ConferenceId,
        from: &PeerId,
        to: &PeerId,
        payload: Value,
    ) -> Result<u64, ConferenceError> {
        self.relay_signal(conference_id, from, to, SignalKind::IceCandidate, payload)
            .await
    }

    /// Forward a signaling message of any kind. Returns the event sequence
    /// number it was stamped with. Delivery is best-effort: a joined target
    /// whose stream is down misses the message without failing the call.
    ///
    /// # Errors
    ///
    /// `UnknownPeer` when either peer is unknown or not joined, or
    /// `from == to`.
    #[instrument(skip_all, fields(conference_id = %conference_id, kind = kind.as_str()))]
    pub async fn relay_signal(
        &self,
        conference_id: ConferenceId,
        from: &PeerId,
        to: &PeerId,
        kind: SignalKind,
        payload: Value,
    ) -> Result<u64, ConferenceError> {
        if from == to {
            return Err(ConferenceError::UnknownPeer);
        }
        let session = self.session(conference_id).await?;
        let session = session.read().await;

        let sender = session
            .participant_by_peer(from)
            .filter(|p| p.is_joined())
            .ok_or(ConferenceError::UnknownPeer)?;
        let target = session
            .participant_by_peer(to)
            .filter(|p| p.is_joined())
            .ok_or(ConferenceError::UnknownPeer)?;

        let seq = session.emit(
            Audience::Participant(target.id),
            RelayEvent::Signal {
                kind,
                from: sender.peer_id.clone(),
                payload,
            },
        );
        metrics::record_signal(kind.as_str());
        debug!(
            target: "conf.relay",
            conference_id = %conference_id,
            seq,
            "Signal relayed"
        );
        Ok(seq)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{all_features, coordinator, drain, join, live};
    use super::*;
    use common::types::UserId;
    use serde_json::json;

    #[tokio::test]
    async fn test_offer_reaches_target_only() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let mut alice = join(&coordinator, id, "alice").await;
        let mut bob = join(&coordinator, id, "bob").await;
        let mut carol = join(&coordinator, id, "carol").await;
        drain(&mut alice.events);
        drain(&mut bob.events);
        drain(&mut carol.events);

        let payload = json!({ "sdp": "v=0" });
        coordinator
            .relay_offer(id, &alice.peer_id, &bob.peer_id, payload.clone())
            .await
            .unwrap();

        let events = drain(&mut bob.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events.first(),
            Some(RelayEvent::Signal {
                kind: SignalKind::Offer,
                from,
                payload: received,
            }) if from == &alice.peer_id && received == &payload
        ));
        assert!(drain(&mut carol.events).is_empty());
        assert!(drain(&mut alice.events).is_empty());
    }

    #[tokio::test]
    async fn test_self_signal_is_unknown_peer() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;

        let result = coordinator
            .relay_answer(id, &alice.peer_id, &alice.peer_id, json!({}))
            .await;
        assert!(matches!(result, Err(ConferenceError::UnknownPeer)));
    }

    #[tokio::test]
    async fn test_signal_to_departed_peer_is_unknown() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;
        coordinator
            .leave(&UserId::new("bob"), id, bob.participant.id)
            .await
            .unwrap();

        let result = coordinator
            .relay_ice_candidate(id, &alice.peer_id, &bob.peer_id, json!({ "candidate": "" }))
            .await;
        assert!(matches!(result, Err(ConferenceError::UnknownPeer)));
    }

    #[tokio::test]
    async fn test_signal_to_disconnected_member_is_best_effort() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let mut alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;
        drop(bob.events);
        coordinator
            .peer_disconnected(id, &bob.peer_id)
            .await
            .unwrap();
        drain(&mut alice.events);

        let record = coordinator.participant(id, bob.participant.id).await.unwrap();
        assert!(record.is_joined());

        let seq = coordinator
            .relay_offer(id, &alice.peer_id, &bob.peer_id, json!({ "sdp": "v=0" }))
            .await
            .unwrap();
        assert!(seq > 0);
        assert!(drain(&mut alice.events).is_empty());
    }

    #[tokio::test]
    async fn test_signal_across_conferences_is_unknown() {
        let coordinator = coordinator();
        let first = live(&coordinator, all_features()).await;
        let second = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, first, "alice").await;
        let bob = join(&coordinator, second, "bob").await;

        let result = coordinator
            .relay_offer(first, &alice.peer_id, &bob.peer_id, json!({}))
            .await;
        assert!(matches!(result, Err(ConferenceError::UnknownPeer)));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;

        let bob_peer = &bob.peer_id;
        let first = coordinator
            .relay_offer(id, &alice.peer_id, bob_peer, json!({}))
            .await
            .unwrap();
        let second = coordinator
            .relay_ice_candidate(id, &alice.peer_id, bob_peer, json!({}))
            .await
            .unwrap();
        assert!(second > first);
    }
}
