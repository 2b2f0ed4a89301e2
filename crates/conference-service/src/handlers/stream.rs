//! Peer event stream and signaling.
//!
//! - `GET /api/v1/conferences/:id/peers/:peer_id/stream` - WebSocket carrying
//!   the peer's events as JSON text frames; inbound text frames are
//!   signaling messages
//! - `POST /api/v1/conferences/:id/peers/:peer_id/signals` - Signaling over HTTP
//!
//! The peer handle issued at join is the credential for both routes. When
//! the socket closes, the coordinator is told the transport dropped so the
//! reconnect grace period starts.

use super::parse_body;
use crate::errors::ConferenceError;
use crate::relay::{PeerReceiver, SignalKind};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use common::types::{ConferenceId, PeerId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Signaling message from a peer, over either transport.
#[derive(Debug, Deserialize)]
pub struct SignalBody {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub to: PeerId,
    /// Opaque SDP or ICE payload, forwarded untouched.
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct SignalAccepted {
    pub seq: u64,
}

/// Handler for POST /api/v1/conferences/:id/peers/:peer_id/signals
///
/// # Response
///
/// - 202 Accepted: Relayed, with the event sequence number
/// - 404 Not Found: Either peer is not a connected member (`UNKNOWN_PEER`)
pub async fn post_signal(
    State(state): State<Arc<AppState>>,
    Path((conference_id, peer_id)): Path<(ConferenceId, PeerId)>,
    body: Bytes,
) -> Result<(StatusCode, Json<SignalAccepted>), ConferenceError> {
    let signal: SignalBody = parse_body(&body)?;
    let seq = state
        .coordinator
        .relay_signal(conference_id, &peer_id, &signal.to, signal.kind, signal.payload)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(SignalAccepted { seq })))
}

/// Handler for GET /api/v1/conferences/:id/peers/:peer_id/stream
///
/// Claims the receiver parked by join or reconnect. A receiver can be
/// claimed once; a second attach is `UNKNOWN_PEER`.
#[instrument(
    skip_all,
    name = "conf.peer.stream",
    fields(conference_id = %conference_id)
)]
pub async fn peer_stream(
    State(state): State<Arc<AppState>>,
    Path((conference_id, peer_id)): Path<(ConferenceId, PeerId)>,
    ws: WebSocketUpgrade,
) -> Result<Response, ConferenceError> {
    let events = state
        .streams
        .claim(conference_id, &peer_id)
        .await
        .ok_or(ConferenceError::UnknownPeer)?;

    Ok(ws.on_upgrade(move |socket| serve_stream(state, conference_id, peer_id, events, socket)))
}

async fn serve_stream(
    state: Arc<AppState>,
    conference_id: ConferenceId,
    peer_id: PeerId,
    mut events: PeerReceiver,
    socket: WebSocket,
) {
    let (mut sink, mut inbound) = socket.split();
    state.streams.stream_opened();
    info!(target: "conf.relay", conference_id = %conference_id, "Peer stream attached");

    // Ends when the coordinator drops the peer's link or the socket fails.
    let forward = async move {
        while let Some(envelope) = events.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "conf.relay", error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(target: "conf.relay", error = %e, "Close frame not delivered");
        }
    };

    let receive = async {
        while let Some(Ok(message)) = inbound.next().await {
            match message {
                Message::Text(text) => {
                    relay_inbound(&state, conference_id, &peer_id, &text).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        () = forward => {}
        () = receive => {}
    }

    // Receiver is dropped with `forward`, so the link no longer counts as live.
    state.streams.stream_closed();
    match state
        .coordinator
        .peer_disconnected(conference_id, &peer_id)
        .await
    {
        Ok(()) => {
            info!(target: "conf.relay", conference_id = %conference_id, "Peer stream detached");
        }
        Err(e) => {
            debug!(
                target: "conf.relay",
                conference_id = %conference_id,
                error = %e,
                "Detached stream had no active participant"
            );
        }
    }
}

async fn relay_inbound(state: &AppState, conference_id: ConferenceId, from: &PeerId, text: &str) {
    let signal: SignalBody = match serde_json::from_str(text) {
        Ok(signal) => signal,
        Err(e) => {
            debug!(target: "conf.relay", error = %e, "Ignoring malformed inbound frame");
            return;
        }
    };
    if let Err(e) = state
        .coordinator
        .relay_signal(conference_id, from, &signal.to, signal.kind, signal.payload)
        .await
    {
        debug!(
            target: "conf.relay",
            conference_id = %conference_id,
            error = %e,
            "Inbound signal rejected"
        );
    }
}
