//! HTTP request handlers for the conference coordinator.
//!
//! Handlers translate HTTP into coordinator calls and nothing more: every
//! authorization and state check lives in `services`.

pub mod breakout;
pub mod chat;
pub mod conferences;
pub mod metrics;
pub mod participants;
pub mod recording;
pub mod stream;
pub mod waiting_room;
pub mod whiteboard;

pub use breakout::{
    assign_to_room, broadcast_to_rooms, close_all_rooms, close_room, create_rooms, list_rooms,
    return_to_main, send_to_room,
};
pub use chat::{delete_message, list_messages, send_message};
pub use conferences::{
    cancel_conference, create_conference, create_from_calendar_event, end_conference,
    get_analytics, get_conference, get_snapshot, join_conference, lock_conference,
    reconnect_participant, start_conference, unlock_conference, update_settings,
};
pub use metrics::metrics_handler;
pub use participants::{
    get_participant, get_screen_sharer, leave_conference, list_participants, lower_all_hands,
    make_co_host, mute_all, raised_hands, remove_participant, revoke_co_host, set_hand,
    start_screen_share, stop_screen_share, update_media, update_permissions,
};
pub use recording::{start_recording, stop_recording};
pub use stream::{peer_stream, post_signal};
pub use waiting_room::{admit_all, admit_participant, deny_participant, list_waiting_room};
pub use whiteboard::{clear_whiteboard, get_whiteboard, update_whiteboard};

use crate::errors::ConferenceError;
use serde::de::DeserializeOwned;

/// Deserialize a JSON request body.
///
/// Parsed by hand so malformed bodies map to 400 with the standard error
/// shape instead of Axum's default 422 rejection.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ConferenceError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "conf.http", error = %e, "Invalid request body");
        ConferenceError::BadRequest("Invalid request body".to_string())
    })
}

/// Like `parse_body`, but an empty body yields `T::default()`.
pub(crate) fn parse_optional_body<T: DeserializeOwned + Default>(
    body: &[u8],
) -> Result<T, ConferenceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}
