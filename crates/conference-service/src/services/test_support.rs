//! Fixtures shared by the service unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{ConferenceCoordinator, CoordinatorSettings, JoinOutcome};
use crate::collaborators::AllowAllAuthorizer;
use crate::models::{ConferenceSettings, ConferenceSummary, JoinRequest, NewConference};
use crate::relay::{PeerReceiver, ReconnectTokenManager, RelayEvent};
use crate::repositories::InMemoryConferenceRepository;
use common::types::{ConferenceId, UserId};
use std::sync::Arc;

pub(crate) const HOST: &str = "host";

pub(crate) fn coordinator() -> ConferenceCoordinator {
    ConferenceCoordinator::new(
        CoordinatorSettings {
            password_hash_cost: 4,
            ..CoordinatorSettings::default()
        },
        Arc::new(InMemoryConferenceRepository::new()),
        Arc::new(AllowAllAuthorizer),
        ReconnectTokenManager::new(vec![9u8; 32]).unwrap(),
    )
}

pub(crate) fn host() -> UserId {
    UserId::new(HOST)
}

/// Schedule a conference owned by `host` with the given settings.
pub(crate) async fn scheduled(
    coordinator: &ConferenceCoordinator,
    settings: ConferenceSettings,
) -> ConferenceSummary {
    coordinator
        .create_conference(
            &host(),
            NewConference {
                title: "Test conference".to_string(),
                settings: Some(settings),
                ..NewConference::default()
            },
        )
        .await
        .unwrap()
}

/// Schedule and start a conference owned by `host`.
pub(crate) async fn live(
    coordinator: &ConferenceCoordinator,
    settings: ConferenceSettings,
) -> ConferenceId {
    let conference = scheduled(coordinator, settings).await;
    coordinator.start(&host(), conference.id).await.unwrap();
    conference.id
}

pub(crate) async fn join(
    coordinator: &ConferenceCoordinator,
    conference_id: ConferenceId,
    user: &str,
) -> JoinOutcome {
    coordinator
        .join(
            conference_id,
            JoinRequest {
                user_id: Some(UserId::new(user)),
                display_name: user.to_string(),
                password: None,
            },
        )
        .await
        .unwrap()
}

/// Every event currently queued on a receiver.
pub(crate) fn drain(events: &mut PeerReceiver) -> Vec<RelayEvent> {
    let mut drained = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        drained.push(envelope.event);
    }
    drained
}

pub(crate) fn all_features() -> ConferenceSettings {
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
