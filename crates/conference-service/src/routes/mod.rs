//! HTTP routes for the conference coordinator.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_caller};
use crate::observability::{health_router, HealthState};
use crate::relay::StreamRegistry;
use crate::services::ConferenceCoordinator;
use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Conference coordinator.
    pub coordinator: Arc<ConferenceCoordinator>,

    /// Event receivers waiting for their peer's stream.
    pub streams: Arc<StreamRegistry>,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - Liveness and readiness probes - public, unversioned
/// - `/metrics` - Prometheus metrics endpoint - public, unversioned
/// - `/api/v1/conferences/:id/join` - Join (caller optional, guests allowed)
/// - `/api/v1/conferences/:id/participants/:pid/reconnect` - Reconnect (token authenticated)
/// - `/api/v1/conferences/:id/peers/:peer_id/...` - Event stream and signaling (peer handle)
/// - Every other `/api/v1` route requires `X-User-Id`
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - Request timeout from configuration
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let timeout = state.config.request_timeout();

    // Routes that carry their own credential (or none)
    let public_routes = Router::new()
        .route(
            "/api/v1/conferences/:id/join",
            post(handlers::join_conference),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/reconnect",
            post(handlers::reconnect_participant),
        )
        .route(
            "/api/v1/conferences/:id/peers/:peer_id/stream",
            get(handlers::peer_stream),
        )
        .route(
            "/api/v1/conferences/:id/peers/:peer_id/signals",
            post(handlers::post_signal),
        )
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        // Lifecycle
        .route("/api/v1/conferences", post(handlers::create_conference))
        .route(
            "/api/v1/calendar-events/:event_id/conference",
            post(handlers::create_from_calendar_event),
        )
        .route("/api/v1/conferences/:id", get(handlers::get_conference))
        .route(
            "/api/v1/conferences/:id/snapshot",
            get(handlers::get_snapshot),
        )
        .route(
            "/api/v1/conferences/:id/analytics",
            get(handlers::get_analytics),
        )
        .route(
            "/api/v1/conferences/:id/start",
            post(handlers::start_conference),
        )
        .route("/api/v1/conferences/:id/end", post(handlers::end_conference))
        .route(
            "/api/v1/conferences/:id/cancel",
            post(handlers::cancel_conference),
        )
        .route(
            "/api/v1/conferences/:id/lock",
            post(handlers::lock_conference).delete(handlers::unlock_conference),
        )
        .route(
            "/api/v1/conferences/:id/settings",
            patch(handlers::update_settings),
        )
        // Participants
        .route(
            "/api/v1/conferences/:id/participants",
            get(handlers::list_participants),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid",
            get(handlers::get_participant).delete(handlers::remove_participant),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/leave",
            post(handlers::leave_conference),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/co-host",
            post(handlers::make_co_host).delete(handlers::revoke_co_host),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/permissions",
            patch(handlers::update_permissions),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/media",
            patch(handlers::update_media),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/hand",
            put(handlers::set_hand),
        )
        .route("/api/v1/conferences/:id/mute-all", post(handlers::mute_all))
        .route(
            "/api/v1/conferences/:id/hands",
            get(handlers::raised_hands).delete(handlers::lower_all_hands),
        )
        // Screen share
        .route(
            "/api/v1/conferences/:id/screen-share",
            get(handlers::get_screen_sharer),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/screen-share",
            post(handlers::start_screen_share).delete(handlers::stop_screen_share),
        )
        // Waiting room
        .route(
            "/api/v1/conferences/:id/waiting-room",
            get(handlers::list_waiting_room),
        )
        .route(
            "/api/v1/conferences/:id/waiting-room/admit-all",
            post(handlers::admit_all),
        )
        .route(
            "/api/v1/conferences/:id/waiting-room/:pid/admit",
            post(handlers::admit_participant),
        )
        .route(
            "/api/v1/conferences/:id/waiting-room/:pid/deny",
            post(handlers::deny_participant),
        )
        // Breakout rooms
        .route(
            "/api/v1/conferences/:id/breakout-rooms",
            get(handlers::list_rooms)
                .post(handlers::create_rooms)
                .delete(handlers::close_all_rooms),
        )
        .route(
            "/api/v1/conferences/:id/breakout-rooms/:number",
            delete(handlers::close_room),
        )
        .route(
            "/api/v1/conferences/:id/breakout-rooms/:number/messages",
            post(handlers::send_to_room),
        )
        .route(
            "/api/v1/conferences/:id/room-broadcasts",
            post(handlers::broadcast_to_rooms),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/room",
            put(handlers::assign_to_room).delete(handlers::return_to_main),
        )
        // Recording
        .route(
            "/api/v1/conferences/:id/recording",
            post(handlers::start_recording).delete(handlers::stop_recording),
        )
        // Chat
        .route(
            "/api/v1/conferences/:id/participants/:pid/messages",
            get(handlers::list_messages).post(handlers::send_message),
        )
        .route(
            "/api/v1/conferences/:id/messages/:message_id",
            delete(handlers::delete_message),
        )
        // Whiteboard
        .route(
            "/api/v1/conferences/:id/whiteboard",
            get(handlers::get_whiteboard),
        )
        .route(
            "/api/v1/conferences/:id/participants/:pid/whiteboard",
            put(handlers::update_whiteboard).delete(handlers::clear_whiteboard),
        )
        .route_layer(middleware::from_fn(require_caller))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(protected_routes)
        .merge(health_router(health_state))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
