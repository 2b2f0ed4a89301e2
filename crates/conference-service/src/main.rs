//! Conference Coordinator
//!
//! HTTP and WebSocket service coordinating real-time conferences.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the repository (Redis when `REDIS_URL` is set, else in-memory)
//! 4. Build the coordinator and spawn the disconnect reaper
//! 5. Serve the API, health and metrics routes
//! 6. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]

use common::secret::ExposeSecret;
use conference_service::collaborators::AllowAllAuthorizer;
use conference_service::config::Config;
use conference_service::observability::{init_metrics_recorder, HealthState};
use conference_service::relay::{ReconnectTokenManager, StreamRegistry};
use conference_service::repositories::{
    ConferenceRepository, InMemoryConferenceRepository, RedisConferenceRepository,
};
use conference_service::routes::{self, AppState};
use conference_service::services::{ConferenceCoordinator, CoordinatorSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background tasks get to observe cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conference_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conference Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        redis = config.redis_url.is_some(),
        disconnect_grace_period_seconds = config.disconnect_grace_period_seconds,
        reaper_interval_seconds = config.reaper_interval_seconds,
        peer_channel_capacity = config.peer_channel_capacity,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let repository: Arc<dyn ConferenceRepository> = match &config.redis_url {
        Some(url) => {
            info!("Connecting to Redis...");
            let repository = RedisConferenceRepository::connect(url.expose_secret()).await?;
            info!("Redis connection established");
            Arc::new(repository)
        }
        None => {
            warn!("REDIS_URL not set, conference state will not survive a restart");
            Arc::new(InMemoryConferenceRepository::new())
        }
    };
    repository.ping().await.map_err(|e| {
        error!(error = %e, "Repository not reachable");
        e
    })?;
    let health_state = Arc::new(HealthState::new().with_repository(Arc::clone(&repository)));

    let tokens = ReconnectTokenManager::new(config.reconnect_secret_bytes()?)?;
    let coordinator = Arc::new(ConferenceCoordinator::new(
        CoordinatorSettings::from(&config),
        repository,
        Arc::new(AllowAllAuthorizer),
        tokens,
    ));

    let shutdown_token = CancellationToken::new();
    let reaper_handle = Arc::clone(&coordinator).spawn_reaper(shutdown_token.child_token());

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        coordinator,
        streams: Arc::new(StreamRegistry::new()),
        config,
    });
    let app = routes::build_routes(state, Arc::clone(&health_state), metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    health_state.set_ready();
    info!("Conference Coordinator listening on {}", addr);

    let server_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_token.cancel();
        })
        .await?;

    // Mark as not ready immediately so traffic stops arriving
    health_state.set_not_ready();
    shutdown_token.cancel();

    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, reaper_handle)
        .await
        .is_err()
    {
        warn!("Disconnect reaper did not stop in time");
    }

    info!("Conference Coordinator shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
