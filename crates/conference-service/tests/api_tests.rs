//! HTTP API integration tests.
//!
//! Requests go through the real router (caller middleware, handlers,
//! error mapping) via `oneshot`; no socket is bound.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use axum::http::{Method, StatusCode};
use common::types::{ConferenceId, PeerId};
use conference_service::relay::{RelayEvent, SignalKind};
use conference_test_utils::{all_features, drain, ConferenceBuilder, TestHarness, HOST};
use serde_json::{json, Value};

fn conference_path(conference_id: ConferenceId, rest: &str) -> String {
    format!("/api/v1/conferences/{conference_id}{rest}")
}

/// Create and start a conference over HTTP, returning its id.
async fn create_and_start(harness: &TestHarness, body: Value) -> Result<ConferenceId> {
    let (status, created) = harness
        .post("/api/v1/conferences", Some(HOST), &body.to_string())
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {created}");
    let conference_id: ConferenceId = serde_json::from_value(created["id"].clone())?;

    let (status, _) = harness
        .post(&conference_path(conference_id, "/start"), Some(HOST), "")
        .await;
    assert_eq!(status, StatusCode::OK);
    Ok(conference_id)
}

async fn join(
    harness: &TestHarness,
    conference_id: ConferenceId,
    user: Option<&str>,
) -> (StatusCode, Value) {
    let body = json!({ "display_name": user.unwrap_or("Guest") });
    harness
        .post(
            &conference_path(conference_id, "/join"),
            user,
            &body.to_string(),
        )
        .await
}

// ============================================================================
// Caller and body handling
// ============================================================================

#[tokio::test]
async fn test_create_requires_caller() {
    let harness = TestHarness::new();

    let (status, body) = harness
        .post("/api/v1/conferences", None, r#"{"title": "Standup"}"#)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_create_with_malformed_body_is_bad_request() {
    let harness = TestHarness::new();

    let (status, body) = harness
        .post("/api/v1/conferences", Some(HOST), "{not json")
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_create_with_blank_title_is_bad_request() {
    let harness = TestHarness::new();

    let (status, body) = harness
        .post("/api/v1/conferences", Some(HOST), r#"{"title": "   "}"#)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_create_returns_summary_without_password_hash() -> Result<()> {
    let harness = TestHarness::new();

    let (status, body) = harness
        .post(
            "/api/v1/conferences",
            Some(HOST),
            r#"{"title": "Board meeting", "password": "hunter22", "max_participants": 8}"#,
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "scheduled");
    assert_eq!(body["host_id"], HOST);
    assert_eq!(body["has_password"], true);
    assert_eq!(body["max_participants"], 8);
    assert!(body.get("password_hash").is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_conference_is_not_found() {
    let harness = TestHarness::new();

    let (status, body) = harness
        .get(&conference_path(ConferenceId::new(), ""), Some(HOST))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_guest_join_parks_event_stream() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Open house" })).await?;

    let (status, body) = join(&harness, conference_id, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["participant"]["is_guest"], true);
    assert_eq!(body["participant"]["status"], "joined");
    assert!(body["reconnect_token"].as_str().is_some_and(|t| !t.is_empty()));
    let peer_id = body["peer_id"].as_str().expect("peer id");
    assert_eq!(
        body["stream_path"],
        conference_path(conference_id, &format!("/peers/{peer_id}/stream"))
    );
    assert_eq!(harness.state.streams.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_join_wrong_password_is_unauthorized() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id =
        create_and_start(&harness, json!({ "title": "Private", "password": "s3cret-pass" }))
            .await?;

    let (status, body) = harness
        .post(
            &conference_path(conference_id, "/join"),
            Some("alice"),
            r#"{"display_name": "alice", "password": "guess"}"#,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = harness
        .post(
            &conference_path(conference_id, "/join"),
            Some("alice"),
            r#"{"display_name": "alice", "password": "s3cret-pass"}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_join_locked_conference_is_locked() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Locked" })).await?;

    let (status, body) = harness
        .post(&conference_path(conference_id, "/lock"), Some(HOST), "")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_locked"], true);

    let (status, body) = join(&harness, conference_id, Some("alice")).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"]["code"], "LOCKED");

    let (_, participants) = harness
        .get(&conference_path(conference_id, "/participants"), Some(HOST))
        .await;
    assert_eq!(participants.as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_join_over_capacity_is_too_many_requests() -> Result<()> {
    let harness = TestHarness::new();
    let body = ConferenceBuilder::new().titled("Pair").capacity(2).json();
    let conference_id = create_and_start(&harness, body).await?;

    assert_eq!(join(&harness, conference_id, Some("a")).await.0, StatusCode::OK);
    assert_eq!(join(&harness, conference_id, Some("b")).await.0, StatusCode::OK);

    let (status, body) = join(&harness, conference_id, Some("c")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "CAPACITY");
    Ok(())
}

#[tokio::test]
async fn test_non_host_cannot_lock() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Team" })).await?;

    let (status, body) = harness
        .post(&conference_path(conference_id, "/lock"), Some("alice"), "")
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    Ok(())
}

// ============================================================================
// Signaling and reconnect
// ============================================================================

#[tokio::test]
async fn test_signal_reaches_target_peer() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Call" })).await?;

    let (_, alice) = join(&harness, conference_id, Some("alice")).await;
    let (_, bob) = join(&harness, conference_id, Some("bob")).await;
    let alice_peer = alice["peer_id"].as_str().expect("peer id").to_string();
    let bob_peer = bob["peer_id"].as_str().expect("peer id").to_string();

    let signal = json!({ "type": "offer", "to": bob_peer, "payload": { "sdp": "v=0" } });
    let (status, accepted) = harness
        .post(
            &conference_path(conference_id, &format!("/peers/{alice_peer}/signals")),
            None,
            &signal.to_string(),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(accepted["seq"].as_u64().is_some());

    let mut bob_events = harness
        .state
        .streams
        .claim(conference_id, &PeerId::from(bob_peer.as_str()))
        .await
        .expect("bob's receiver is parked");
    let events = drain(&mut bob_events);
    assert!(events.iter().any(|event| matches!(
        event,
        RelayEvent::Signal { kind: SignalKind::Offer, from, payload }
            if from.as_str() == alice_peer && payload["sdp"] == "v=0"
    )));
    Ok(())
}

#[tokio::test]
async fn test_signal_to_unknown_peer_is_not_found() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Call" })).await?;
    let (_, alice) = join(&harness, conference_id, Some("alice")).await;
    let alice_peer = alice["peer_id"].as_str().expect("peer id");

    let signal = json!({ "type": "ice", "to": "nobody", "payload": {} });
    let (status, body) = harness
        .post(
            &conference_path(conference_id, &format!("/peers/{alice_peer}/signals")),
            None,
            &signal.to_string(),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "UNKNOWN_PEER");
    Ok(())
}

#[tokio::test]
async fn test_stream_for_unparked_peer_is_rejected() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Call" })).await?;

    let (status, _) = harness
        .get(
            &conference_path(conference_id, "/peers/not-a-peer/stream"),
            None,
        )
        .await;

    // Missing upgrade headers or an unknown peer, never a successful attach
    assert!(status.is_client_error());
    Ok(())
}

#[tokio::test]
async fn test_reconnect_with_token_issues_new_token() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Flaky wifi" })).await?;
    let (_, alice) = join(&harness, conference_id, Some("alice")).await;
    let participant_id = alice["participant"]["id"].as_str().expect("id").to_string();
    let token = alice["reconnect_token"].as_str().expect("token").to_string();
    let path = conference_path(
        conference_id,
        &format!("/participants/{participant_id}/reconnect"),
    );

    let (status, body) = harness
        .post(&path, None, &json!({ "token": token }).to_string())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["reconnect_token"], token.as_str());
    assert_eq!(body["participant"]["connection"], "connected");

    let (status, body) = harness
        .post(&path, None, &json!({ "token": token }).to_string())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    Ok(())
}

// ============================================================================
// Moderation surfaces
// ============================================================================

#[tokio::test]
async fn test_breakout_rooms_over_http() -> Result<()> {
    let harness = TestHarness::new();
    let body = ConferenceBuilder::new()
        .titled("Workshop")
        .with_settings(all_features())
        .json();
    let conference_id = create_and_start(&harness, body).await?;
    for user in ["p0", "p1", "p2", "p3", "p4"] {
        assert_eq!(join(&harness, conference_id, Some(user)).await.0, StatusCode::OK);
    }

    let (status, rooms) = harness
        .post(
            &conference_path(conference_id, "/breakout-rooms"),
            Some(HOST),
            r#"{"count": 2, "auto_assign": true}"#,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let mut sizes: Vec<usize> = rooms
        .as_array()
        .expect("rooms")
        .iter()
        .map(|room| room["members"].as_array().map_or(0, Vec::len))
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 3]);

    let (status, closed) = harness
        .request(
            Method::DELETE,
            &conference_path(conference_id, "/breakout-rooms"),
            Some(HOST),
            "",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(closed
        .as_array()
        .expect("rooms")
        .iter()
        .all(|room| room["is_open"] == false));
    Ok(())
}

#[tokio::test]
async fn test_chat_send_and_delete() -> Result<()> {
    let harness = TestHarness::new();
    let conference_id = create_and_start(&harness, json!({ "title": "Chatty" })).await?;
    let (_, alice) = join(&harness, conference_id, Some("alice")).await;
    let participant_id = alice["participant"]["id"].as_str().expect("id").to_string();
    let messages_path =
        conference_path(conference_id, &format!("/participants/{participant_id}/messages"));

    let (status, message) = harness
        .post(&messages_path, Some("alice"), r#"{"body": "hello all"}"#)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["body"], "hello all");
    let message_id = message["id"].as_str().expect("message id").to_string();

    let (status, log) = harness.get(&messages_path, Some("alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log.as_array().map(Vec::len), Some(1));

    let (status, _) = harness
        .request(
            Method::DELETE,
            &conference_path(conference_id, &format!("/messages/{message_id}")),
            Some(HOST),
            "",
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, log) = harness.get(&messages_path, Some("alice")).await;
    assert_eq!(log.as_array().map(Vec::len), Some(0));
    Ok(())
}

// ============================================================================
// Operational endpoints
// ============================================================================

#[tokio::test]
async fn test_health_and_metrics_are_public() {
    let harness = TestHarness::new();

    let (status, _) = harness.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = harness.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = harness.get("/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}
