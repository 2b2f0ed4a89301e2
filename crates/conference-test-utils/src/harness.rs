//! In-process harness for the conference coordinator.
//!
//! Wires a coordinator over an in-memory (or caller-supplied) repository
//! into the real router, and drives requests through it with `oneshot`.

use crate::builders::ConferenceBuilder;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::types::{ConferenceId, UserId};
use conference_service::collaborators::{AllowAllAuthorizer, Authorizer, CalendarSource};
use conference_service::config::Config;
use conference_service::middleware::CALLER_HEADER;
use conference_service::models::{ConferenceSettings, JoinRequest, NewConference};
use conference_service::observability::HealthState;
use conference_service::relay::{ReconnectTokenManager, StreamRegistry};
use conference_service::repositories::{ConferenceRepository, InMemoryConferenceRepository};
use conference_service::routes::{self, AppState};
use conference_service::services::{ConferenceCoordinator, CoordinatorSettings, JoinOutcome};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

/// User that owns every conference the harness schedules.
pub const HOST: &str = "host";

/// Base64 of 32 bytes `0x00..=0x1f`.
const TEST_RECONNECT_SECRET: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

/// Test harness exposing the coordinator directly and through its router.
///
/// # Example
/// ```rust,ignore
/// let harness = TestHarness::new();
/// let conference = harness.live_conference(all_features()).await;
/// let (status, body) = harness
///     .post(&format!("/api/v1/conferences/{conference}/lock"), Some(HOST), "")
///     .await;
/// assert_eq!(status, 200);
/// ```
pub struct TestHarness {
    pub state: Arc<AppState>,
    router: Router,
}

impl TestHarness {
    /// Harness over an in-memory repository that permits every role.
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryConferenceRepository::new()),
            Arc::new(AllowAllAuthorizer),
            None,
        )
    }

    /// Harness over the given collaborators.
    pub fn with_parts(
        repository: Arc<dyn ConferenceRepository>,
        authorizer: Arc<dyn Authorizer>,
        calendar: Option<Arc<dyn CalendarSource>>,
    ) -> Self {
        let config = test_config(&[]);
        let tokens = ReconnectTokenManager::new(
            config
                .reconnect_secret_bytes()
                .expect("test secret must decode"),
        )
        .expect("test secret must be accepted");

        let health_state = Arc::new(HealthState::new().with_repository(Arc::clone(&repository)));
        health_state.set_ready();

        let mut coordinator = ConferenceCoordinator::new(
            CoordinatorSettings::from(&config),
            repository,
            authorizer,
            tokens,
        );
        if let Some(calendar) = calendar {
            coordinator = coordinator.with_calendar(calendar);
        }

        let state = Arc::new(AppState {
            coordinator: Arc::new(coordinator),
            streams: Arc::new(StreamRegistry::new()),
            config,
        });

        // Local handle, so tests never touch the global recorder
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let router = routes::build_routes(Arc::clone(&state), health_state, metrics_handle);

        Self { state, router }
    }

    pub fn coordinator(&self) -> &ConferenceCoordinator {
        &self.state.coordinator
    }

    /// Schedule a conference owned by [`HOST`].
    pub async fn scheduled_conference(&self, settings: ConferenceSettings) -> ConferenceId {
        self.create(ConferenceBuilder::new().with_settings(settings).build())
            .await
    }

    /// Schedule `request` as [`HOST`].
    pub async fn create(&self, request: NewConference) -> ConferenceId {
        self.coordinator()
            .create_conference(&UserId::new(HOST), request)
            .await
            .expect("create_conference should succeed")
            .id
    }

    /// Schedule and start a conference owned by [`HOST`].
    pub async fn live_conference(&self, settings: ConferenceSettings) -> ConferenceId {
        let conference_id = self.scheduled_conference(settings).await;
        self.coordinator()
            .start(&UserId::new(HOST), conference_id)
            .await
            .expect("start should succeed");
        conference_id
    }

    /// Join `user` directly through the coordinator.
    pub async fn join(&self, conference_id: ConferenceId, user: &str) -> JoinOutcome {
        self.coordinator()
            .join(
                conference_id,
                JoinRequest {
                    user_id: Some(UserId::new(user)),
                    display_name: user.to_string(),
                    password: None,
                },
            )
            .await
            .expect("join should succeed")
    }

    /// Send a request through the router and decode the JSON response.
    ///
    /// Empty response bodies decode to `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        caller: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(caller) = caller {
            builder = builder.header(CALLER_HEADER, caller);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("request should build");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    pub async fn get(&self, path: &str, caller: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, path, caller, "").await
    }

    pub async fn post(&self, path: &str, caller: Option<&str>, body: &str) -> (StatusCode, Value) {
        self.request(Method::POST, path, caller, body).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for tests: a fixed reconnect secret and the cheapest
/// bcrypt cost, with `overrides` applied on top.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        (
            "CONF_RECONNECT_SECRET".to_string(),
            TEST_RECONNECT_SECRET.to_string(),
        ),
        ("CONF_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("CONF_PASSWORD_HASH_COST".to_string(), "4".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("test configuration should load")
}

/// Settings with every optional feature on and the waiting room off.
pub fn all_features() -> ConferenceSettings {
    ConferenceSettings {
        enable_chat: true,
        enable_screen_share: true,
        enable_recording: true,
        enable_whiteboard: true,
        enable_breakout_rooms: true,
        enable_waiting_room: false,
        mute_on_entry: false,
        ..ConferenceSettings::default()
    }
}
