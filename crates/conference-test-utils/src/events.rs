//! Helpers for reading peer event channels.

use conference_service::relay::{PeerReceiver, RelayEnvelope, RelayEvent};

/// Every envelope currently queued on a receiver, without waiting.
pub fn drain_envelopes(events: &mut PeerReceiver) -> Vec<RelayEnvelope> {
    let mut drained = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        drained.push(envelope);
    }
    drained
}

/// Every event currently queued on a receiver, without waiting.
pub fn drain(events: &mut PeerReceiver) -> Vec<RelayEvent> {
    drain_envelopes(events)
        .into_iter()
        .map(|envelope| envelope.event)
        .collect()
}
