//! Health endpoints for the conference coordinator.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (accepting joins, repository reachable?)
//!
//! The `/metrics` endpoint is served by the API router from the
//! `metrics-exporter-prometheus` handle.

use crate::repositories::ConferenceRepository;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Liveness and readiness flags, plus the repository probed on `/ready`.
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
    repository: Option<Arc<dyn ConferenceRepository>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            repository: None,
        }
    }

    /// Also require `repository` to answer a ping before reporting ready.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn ConferenceRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (during shutdown drain).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if !state.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if let Some(repository) = &state.repository {
        if let Err(e) = repository.ping().await {
            warn!(target: "conf.health", error = %e, "Repository ping failed");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}
