//! Parking lot for peer event receivers between join and stream attach.
//!
//! `join` and `reconnect` hand back a `PeerReceiver` that an HTTP response
//! cannot carry. The handler parks it here under `(conference, peer)` and
//! the peer claims it when it opens its WebSocket stream.

use super::PeerReceiver;
use crate::observability::metrics;
use common::types::{ConferenceId, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Receivers waiting for their peer to attach, plus a count of attached
/// streams.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    parked: Mutex<HashMap<(ConferenceId, PeerId), PeerReceiver>>,
    active: AtomicUsize,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a receiver, replacing any earlier one for the same peer.
    ///
    /// Receivers whose sending half is gone (participant left, conference
    /// ended) are pruned on every park.
    pub async fn park(&self, conference_id: ConferenceId, peer_id: PeerId, events: PeerReceiver) {
        let mut parked = self.parked.lock().await;
        parked.retain(|_, receiver| !receiver.is_closed());
        parked.insert((conference_id, peer_id), events);
    }

    /// Take the parked receiver for a peer. Each receiver is claimed once.
    pub async fn claim(
        &self,
        conference_id: ConferenceId,
        peer_id: &PeerId,
    ) -> Option<PeerReceiver> {
        self.parked
            .lock()
            .await
            .remove(&(conference_id, peer_id.clone()))
    }

    /// Count a stream as attached.
    pub fn stream_opened(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        metrics::set_peer_streams_active(active);
    }

    /// Count a stream as detached.
    pub fn stream_closed(&self) {
        let previous = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        metrics::set_peer_streams_active(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of parked receivers.
    pub async fn len(&self) -> usize {
        self.parked.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.parked.lock().await.is_empty()
    }
}
