//! Session lifecycle: scheduling, start/end/cancel, admission, lock and
//! settings, plus the read-side views.

use super::recording::finish_recording;
use super::{ConferenceCoordinator, JoinOutcome, OperationTimer, PendingWrites};
use crate::collaborators::ROLE_CREATE_CONFERENCE;
use crate::errors::ConferenceError;
use crate::models::{
    CalendarOverrides, Conference, ConferenceAnalytics, ConferenceSnapshot, ConferenceStatus,
    ConferenceSummary, ConnectionState, JoinRequest, LeaveReason, MediaState, NewConference,
    Participant, ParticipantStatus, Permissions, SettingsUpdate, DEFAULT_MAX_PARTICIPANTS,
    MIN_PARTICIPANTS,
};
use crate::observability::metrics;
use crate::relay::{peer_channel, Audience, RelayEvent, ShareStopReason};
use crate::store::{Authority, ConferenceSession};
use chrono::Utc;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ConferenceId, ParticipantId, PeerId, UserId};
use tracing::{debug, info, instrument};

/// Longest accepted display name, in characters.
const MAX_DISPLAY_NAME_CHARS: usize = 100;

impl ConferenceCoordinator {
    /// Schedule a new conference owned by `caller`.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the create role, `BadRequest` for invalid input.
    #[instrument(skip_all, fields(host_id = %caller))]
    pub async fn create_conference(
        &self,
        caller: &UserId,
        request: NewConference,
    ) -> Result<ConferenceSummary, ConferenceError> {
        self.create_inner(caller, request, None).await
    }

    /// Schedule a conference seeded from a calendar event.
    ///
    /// Title, description and time window come from the event; the event id
    /// is stored on the record. The seed is one-time: later calendar edits
    /// are not followed.
    ///
    /// # Errors
    ///
    /// `NotFound` if no calendar is configured or the event does not exist,
    /// plus every error of `create_conference`.
    #[instrument(skip_all, fields(host_id = %caller))]
    pub async fn create_from_calendar_event(
        &self,
        caller: &UserId,
        event_id: &str,
        overrides: CalendarOverrides,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let calendar = self
            .calendar
            .as_ref()
            .ok_or_else(|| ConferenceError::NotFound("No calendar source configured".to_string()))?;
        let event = calendar
            .fetch_event(event_id)
            .await?
            .ok_or_else(|| ConferenceError::NotFound("Calendar event not found".to_string()))?;

        let request = NewConference {
            title: event.title,
            description: event.description,
            scheduled_start: event.start,
            scheduled_end: event.end,
            max_participants: overrides.max_participants,
            settings: overrides.settings,
            password: overrides.password,
        };
        self.create_inner(caller, request, Some(event.event_id)).await
    }

    async fn create_inner(
        &self,
        caller: &UserId,
        request: NewConference,
        calendar_event_id: Option<String>,
    ) -> Result<ConferenceSummary, ConferenceError> {
        if !self
            .authorizer
            .has_role(caller, ROLE_CREATE_CONFERENCE)
            .await?
        {
            return Err(ConferenceError::Forbidden(
                "Not permitted to create conferences".to_string(),
            ));
        }
        request.validate().map_err(ConferenceError::BadRequest)?;

        let password_hash = match request.password {
            Some(password) => Some(self.hash_password(password).await?),
            None => None,
        };

        let conference = Conference {
            id: ConferenceId::new(),
            title: request.title.trim().to_string(),
            description: request.description,
            scheduled_start: request.scheduled_start,
            scheduled_end: request.scheduled_end,
            host_id: caller.clone(),
            settings: request.settings.unwrap_or_default(),
            is_locked: false,
            password_hash,
            max_participants: request.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS),
            status: ConferenceStatus::Scheduled,
            created_at: Utc::now(),
            actual_start: None,
            actual_end: None,
            total_duration_seconds: None,
            total_participants_joined: 0,
            peak_participants: 0,
            is_recording: false,
            recording_started_at: None,
            recording_intervals: Vec::new(),
            recorded_seconds: 0,
            calendar_event_id,
        };
        let summary = conference.summary();

        self.store
            .insert(ConferenceSession::new(conference.clone()))
            .await?;

        let mut writes = PendingWrites::default();
        writes.conference(&conference);
        self.flush(writes).await;

        info!(
            target: "conf.lifecycle",
            conference_id = %summary.id,
            max_participants = summary.max_participants,
            "Conference scheduled"
        );
        Ok(summary)
    }

    /// `Scheduled -> InProgress`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-hosts, `InvalidState` unless scheduled.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn start(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let summary = {
            let mut session = session.write().await;
            session.require_host(&authority)?;
            if session.conference().status != ConferenceStatus::Scheduled {
                return Err(ConferenceError::InvalidState(format!(
                    "Cannot start a conference that is {}",
                    session.conference().status.as_str()
                )));
            }

            let now = Utc::now();
            let conference = session.conference_mut();
            conference.status = ConferenceStatus::InProgress;
            conference.actual_start = Some(now);
            session.emit(
                Audience::AllJoined,
                RelayEvent::ConferenceStarted { started_at: now },
            );
            writes.conference(session.conference());
            session.conference().summary()
        };

        self.flush(writes).await;
        info!(target: "conf.lifecycle", conference_id = %conference_id, "Conference started");
        Ok(summary)
    }

    /// `InProgress -> Ended`, closing every shared resource and membership.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-hosts, `InvalidState` unless in progress.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn end(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let summary = {
            let mut session = session.write().await;
            session.require_host(&authority)?;
            if session.conference().status != ConferenceStatus::InProgress {
                return Err(ConferenceError::InvalidState(format!(
                    "Cannot end a conference that is {}",
                    session.conference().status.as_str()
                )));
            }

            let now = Utc::now();
            finish_recording(&mut session, &authority.user, now);
            session.stop_all_shares(ShareStopReason::Left);
            for room in session.close_all_rooms(now) {
                writes.room(&room);
            }

            let conference = session.conference_mut();
            conference.status = ConferenceStatus::Ended;
            conference.actual_end = Some(now);
            conference.total_duration_seconds = conference
                .actual_start
                .map(|start| (now - start).num_seconds().max(0));

            let waiting = notify_waiting(&session, &RelayEvent::ConferenceEnded { ended_at: now });
            session.emit(
                Audience::AllJoined,
                RelayEvent::ConferenceEnded { ended_at: now },
            );
            debug!(target: "conf.lifecycle", waiting, "Notified waiting participants of end");

            for participant in retire_all(&mut session, now) {
                writes.participant(&participant);
            }
            session.drop_all_links();

            writes.conference(session.conference());
            session.conference().summary()
        };

        self.flush(writes).await;
        info!(
            target: "conf.lifecycle",
            conference_id = %conference_id,
            duration_seconds = summary.total_duration_seconds,
            "Conference ended"
        );
        Ok(summary)
    }

    /// `Scheduled -> Cancelled`; early joiners are moved to `Left`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-hosts, `InvalidState` unless scheduled.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn cancel(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let summary = {
            let mut session = session.write().await;
            session.require_host(&authority)?;
            if session.conference().status != ConferenceStatus::Scheduled {
                return Err(ConferenceError::InvalidState(format!(
                    "Cannot cancel a conference that is {}",
                    session.conference().status.as_str()
                )));
            }

            let now = Utc::now();
            session.stop_all_shares(ShareStopReason::Left);
            session.conference_mut().status = ConferenceStatus::Cancelled;
            notify_waiting(&session, &RelayEvent::ConferenceCancelled);
            session.emit(Audience::AllJoined, RelayEvent::ConferenceCancelled);

            for participant in retire_all(&mut session, now) {
                writes.participant(&participant);
            }
            session.drop_all_links();

            writes.conference(session.conference());
            session.conference().summary()
        };

        self.flush(writes).await;
        info!(target: "conf.lifecycle", conference_id = %conference_id, "Conference cancelled");
        Ok(summary)
    }

    /// Admit a participant, directly or into the waiting room.
    ///
    /// Checks run in a fixed order: unknown conference, terminal status,
    /// duplicate active membership, password, lock flag, capacity.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, `Conflict`, `Unauthorized`, `Locked`,
    /// `Capacity` as listed above; `BadRequest` for an empty display name.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn join(
        &self,
        conference_id: ConferenceId,
        request: JoinRequest,
    ) -> Result<JoinOutcome, ConferenceError> {
        let _timer = OperationTimer::start("join");
        let result = self.join_inner(conference_id, request).await;
        match &result {
            Ok(outcome) if outcome.participant.status == ParticipantStatus::InWaitingRoom => {
                metrics::record_join("waiting");
            }
            Ok(_) => metrics::record_join("joined"),
            Err(e) => metrics::record_join(join_outcome_label(e)),
        }
        result
    }

    async fn join_inner(
        &self,
        conference_id: ConferenceId,
        request: JoinRequest,
    ) -> Result<JoinOutcome, ConferenceError> {
        let display_name = request.display_name.trim().to_string();
        if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(ConferenceError::BadRequest(format!(
                "Display name must be 1 to {MAX_DISPLAY_NAME_CHARS} characters"
            )));
        }

        let session = self.session(conference_id).await?;
        let (user_id, is_guest) = match request.user_id {
            Some(user) => (user, false),
            None => (UserId::guest(), true),
        };
        let authority = if is_guest {
            Authority::new(user_id.clone(), false)
        } else {
            self.authority(&user_id, conference_id).await?
        };

        // Verify the password outside the lock; admission re-checks that the
        // hash it was verified against is still current.
        let (is_host, verified_hash) = {
            let session = session.read().await;
            session.ensure_mutable()?;
            (
                session.is_host(&authority),
                session.conference().password_hash.clone(),
            )
        };
        let password_ok = match (verified_hash.clone(), request.password) {
            (None, _) => true,
            (Some(_), _) if is_host => true,
            (Some(_), None) => false,
            (Some(hash), Some(password)) => verify_password(password, hash).await?,
        };

        let mut writes = PendingWrites::default();
        let outcome = {
            let mut session = session.write().await;

            session.ensure_mutable()?;
            if !is_guest {
                if let Some(existing) = session.active_membership(&user_id) {
                    return Err(ConferenceError::Conflict(format!(
                        "User already has an active participant {}",
                        existing.id
                    )));
                }
            }
            if !is_host {
                if session.conference().password_hash != verified_hash {
                    return Err(ConferenceError::Unauthorized(
                        "Conference password changed, retry".to_string(),
                    ));
                }
                if !password_ok {
                    return Err(ConferenceError::Unauthorized(
                        "Invalid conference password".to_string(),
                    ));
                }
            }
            if session.conference().is_locked {
                return Err(ConferenceError::Locked);
            }
            let max = session.conference().max_participants;
            if session.joined_count() >= max {
                return Err(ConferenceError::Capacity(format!(
                    "Conference is limited to {max} participants"
                )));
            }

            let peer_id = self.unique_peer_id(&session)?;
            let participant_id = ParticipantId::new();
            let token = self.tokens.issue(conference_id, participant_id)?;
            let settings = session.conference().settings;
            let waiting = settings.enable_waiting_room && !is_host;
            let now = Utc::now();

            let participant = Participant {
                id: participant_id,
                conference_id,
                user_id,
                display_name,
                is_guest,
                status: if waiting {
                    ParticipantStatus::InWaitingRoom
                } else {
                    ParticipantStatus::Joined
                },
                peer_id: peer_id.clone(),
                media: MediaState {
                    audio_muted: settings.mute_on_entry && !is_host,
                    ..MediaState::default()
                },
                permissions: if is_host {
                    Permissions::HOST_DEFAULT
                } else {
                    settings.attendee_permissions
                },
                breakout_room: None,
                connection: ConnectionState::Connected,
                join_order: session.next_join_order(),
                requested_at: now,
                joined_at: (!waiting).then_some(now),
                left_at: None,
                total_time_seconds: None,
            };

            let (link, events) = peer_channel(self.settings.peer_channel_capacity);
            session.insert_participant(participant.clone(), link);
            session.set_reconnect_nonce(participant_id, token.nonce);

            if waiting {
                session.emit(
                    Audience::Moderators,
                    RelayEvent::WaitingRoomEntered {
                        participant_id,
                        display_name: participant.display_name.clone(),
                    },
                );
            } else {
                session.conference_mut().total_participants_joined += 1;
                session.record_admission();
                session.emit(
                    Audience::AllJoinedExcept(participant_id),
                    RelayEvent::ParticipantJoined {
                        participant: Box::new(participant.clone()),
                    },
                );
            }

            writes.participant(&participant);
            writes.conference(session.conference());

            JoinOutcome {
                snapshot: session.snapshot(),
                participant,
                peer_id,
                reconnect_token: token.token,
                events,
            }
        };

        self.flush(writes).await;
        info!(
            target: "conf.lifecycle",
            conference_id = %conference_id,
            participant_id = %outcome.participant.id,
            waiting = outcome.participant.status == ParticipantStatus::InWaitingRoom,
            "Participant joined"
        );
        Ok(outcome)
    }

    /// Set the lock flag; new joins fail with `Locked`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority, `InvalidState` once ended.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn lock(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        self.set_locked(caller, conference_id, true).await
    }

    /// Clear the lock flag.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without host/co-host authority, `InvalidState` once ended.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn unlock(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        self.set_locked(caller, conference_id, false).await
    }

    async fn set_locked(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        locked: bool,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let summary = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_moderator(&authority)?;

            if session.conference().is_locked != locked {
                session.conference_mut().is_locked = locked;
                let by = authority.user.clone();
                session.emit(
                    Audience::AllJoined,
                    if locked {
                        RelayEvent::ConferenceLocked { by }
                    } else {
                        RelayEvent::ConferenceUnlocked { by }
                    },
                );
                writes.conference(session.conference());
            }
            session.conference().summary()
        };

        self.flush(writes).await;
        info!(target: "conf.lifecycle", conference_id = %conference_id, locked, "Lock changed");
        Ok(summary)
    }

    /// Change capability flags, the participant limit or the password.
    ///
    /// Disabling screen share stops the active share; disabling recording
    /// stops an active recording; disabling breakout rooms closes them.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for non-hosts, `InvalidState` once ended, `BadRequest`
    /// for a zero participant limit.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn update_settings(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
        update: SettingsUpdate,
    ) -> Result<ConferenceSummary, ConferenceError> {
        if update.max_participants.is_some_and(|max| max < MIN_PARTICIPANTS) {
            return Err(ConferenceError::BadRequest(format!(
                "Maximum participants must be at least {MIN_PARTICIPANTS}"
            )));
        }
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;

        let password_hash = match update.password {
            Some(Some(password)) => Some(Some(self.hash_password(password).await?)),
            Some(None) => Some(None),
            None => None,
        };

        let mut writes = PendingWrites::default();
        let summary = {
            let mut session = session.write().await;
            session.ensure_mutable()?;
            session.require_host(&authority)?;
            let now = Utc::now();

            {
                let conference = session.conference_mut();
                let settings = &mut conference.settings;
                apply(&mut settings.enable_chat, update.enable_chat);
                apply(&mut settings.enable_screen_share, update.enable_screen_share);
                apply(&mut settings.enable_recording, update.enable_recording);
                apply(&mut settings.enable_whiteboard, update.enable_whiteboard);
                apply(&mut settings.enable_breakout_rooms, update.enable_breakout_rooms);
                apply(&mut settings.enable_waiting_room, update.enable_waiting_room);
                apply(&mut settings.mute_on_entry, update.mute_on_entry);
                if let Some(max) = update.max_participants {
                    conference.max_participants = max;
                }
                if let Some(hash) = password_hash {
                    conference.password_hash = hash;
                }
            }

            let settings = session.conference().settings;
            if !settings.enable_screen_share {
                for id in session.stop_all_shares(ShareStopReason::Disabled) {
                    if let Some(participant) = session.participant(id) {
                        writes.participant(participant);
                    }
                }
            }
            if !settings.enable_recording {
                finish_recording(&mut session, &authority.user, now);
            }
            if !settings.enable_breakout_rooms {
                for room in session.close_all_rooms(now) {
                    writes.room(&room);
                }
            }

            session.emit(
                Audience::AllJoined,
                RelayEvent::SettingsChanged {
                    settings,
                    max_participants: session.conference().max_participants,
                },
            );
            writes.conference(session.conference());
            session.conference().summary()
        };

        self.flush(writes).await;
        info!(target: "conf.lifecycle", conference_id = %conference_id, "Settings updated");
        Ok(summary)
    }

    /// Conference summary.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn conference(
        &self,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.conference().summary())
    }

    /// Full state for resynchronization, readable in any status.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn snapshot(
        &self,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSnapshot, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.snapshot())
    }

    /// Aggregate counters, readable in any status.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown conferences.
    pub async fn analytics(
        &self,
        conference_id: ConferenceId,
    ) -> Result<ConferenceAnalytics, ConferenceError> {
        let session = self.session(conference_id).await?;
        let session = session.read().await;
        Ok(session.analytics())
    }

    fn unique_peer_id(&self, session: &ConferenceSession) -> Result<PeerId, ConferenceError> {
        loop {
            let candidate = self.tokens.generate_peer_id()?;
            if !session.peer_id_issued(&candidate) {
                return Ok(candidate);
            }
        }
    }

    async fn hash_password(&self, password: SecretString) -> Result<String, ConferenceError> {
        let cost = self.settings.password_hash_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), cost))
            .await
            .map_err(|e| ConferenceError::Internal(format!("Password hashing task failed: {e}")))?
            .map_err(|e| ConferenceError::Internal(format!("Password hashing failed: {e}")))
    }
}

async fn verify_password(password: SecretString, hash: String) -> Result<bool, ConferenceError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password.expose_secret(), &hash))
        .await
        .map_err(|e| ConferenceError::Internal(format!("Password check task failed: {e}")))?
        .map_err(|e| ConferenceError::Internal(format!("Password check failed: {e}")))
}

fn apply(flag: &mut bool, update: Option<bool>) {
    if let Some(value) = update {
        *flag = value;
    }
}

/// Send `event` to every waiting participant. Returns how many were addressed.
fn notify_waiting(session: &ConferenceSession, event: &RelayEvent) -> usize {
    let waiting: Vec<ParticipantId> = session.waiting_participants().iter().map(|p| p.id).collect();
    for id in &waiting {
        session.emit(Audience::Participant(*id), event.clone());
    }
    waiting.len()
}

/// Move every active participant to `Left`.
fn retire_all(session: &mut ConferenceSession, now: chrono::DateTime<Utc>) -> Vec<Participant> {
    let active: Vec<ParticipantId> = session
        .participants()
        .filter(|p| p.status.is_active())
        .map(|p| p.id)
        .collect();
    active
        .into_iter()
        .filter_map(|id| session.retire(id, ParticipantStatus::Left, now))
        .inspect(|p| {
            debug!(
                target: "conf.lifecycle",
                participant_id = %p.id,
                reason = ?LeaveReason::ConferenceEnded,
                "Participant closed out"
            );
        })
        .collect()
}

fn join_outcome_label(error: &ConferenceError) -> &'static str {
    match error {
        ConferenceError::NotFound(_) => "not_found",
        ConferenceError::InvalidState(_) => "invalid_state",
        ConferenceError::Conflict(_) => "conflict",
        ConferenceError::Unauthorized(_) => "unauthorized",
        ConferenceError::Locked => "locked",
        ConferenceError::Capacity(_) => "capacity",
        ConferenceError::BadRequest(_) => "bad_request",
        _ => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::super::test_support::{
        all_features, coordinator, drain, host, join, live, scheduled, HOST,
    };
    use super::*;
    use crate::models::ConferenceSettings;

    #[tokio::test]
    async fn test_create_rejects_zero_capacity() {
        let coordinator = coordinator();
        let result = coordinator
            .create_conference(
                &host(),
                NewConference {
                    title: "Empty".to_string(),
                    max_participants: Some(0),
                    ..NewConference::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ConferenceError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_start_is_host_only_and_once() {
        let coordinator = coordinator();
        let conference = scheduled(&coordinator, ConferenceSettings::default()).await;

        let stranger = coordinator
            .start(&UserId::new("stranger"), conference.id)
            .await;
        assert!(matches!(stranger, Err(ConferenceError::Unauthorized(_))));

        let started = coordinator.start(&host(), conference.id).await.unwrap();
        assert_eq!(started.status, ConferenceStatus::InProgress);
        assert!(started.actual_start.is_some());

        let again = coordinator.start(&host(), conference.id).await;
        assert!(matches!(again, Err(ConferenceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_end_twice_is_invalid_state() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;

        let ended = coordinator.end(&host(), id).await.unwrap();
        assert_eq!(ended.status, ConferenceStatus::Ended);
        assert!(ended.total_duration_seconds.is_some());

        let again = coordinator.end(&host(), id).await;
        assert!(matches!(again, Err(ConferenceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_end_moves_everyone_to_left() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let mut alice = join(&coordinator, id, "alice").await;
        let bob = join(&coordinator, id, "bob").await;

        coordinator.end(&host(), id).await.unwrap();

        let events = drain(&mut alice.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, RelayEvent::ConferenceEnded { .. })));

        let participants = coordinator.repository().fetch_participants(id).await.unwrap();
        assert!(participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Left));
        let bob_record = participants.iter().find(|p| p.id == bob.participant.id).unwrap();
        assert!(bob_record.total_time_seconds.is_some());

        let snapshot = coordinator.snapshot(id).await.unwrap();
        assert!(snapshot.participants.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_only_from_scheduled() {
        let coordinator = coordinator();
        let conference = scheduled(&coordinator, ConferenceSettings::default()).await;
        let early = join(&coordinator, conference.id, "early").await;

        let cancelled = coordinator.cancel(&host(), conference.id).await.unwrap();
        assert_eq!(cancelled.status, ConferenceStatus::Cancelled);

        let stored = coordinator
            .repository()
            .fetch_participants(conference.id)
            .await
            .unwrap();
        let early_record = stored.iter().find(|p| p.id == early.participant.id).unwrap();
        assert_eq!(early_record.status, ParticipantStatus::Left);

        let id = live(&coordinator, ConferenceSettings::default()).await;
        let result = coordinator.cancel(&host(), id).await;
        assert!(matches!(result, Err(ConferenceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_join_after_end_is_invalid_state() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        coordinator.end(&host(), id).await.unwrap();

        let result = coordinator
            .join(
                id,
                JoinRequest {
                    user_id: Some(UserId::new("late")),
                    display_name: "Late".to_string(),
                    password: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ConferenceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_join_unknown_conference_is_not_found() {
        let coordinator = coordinator();
        let result = coordinator
            .join(
                ConferenceId::new(),
                JoinRequest {
                    user_id: None,
                    display_name: "Guest".to_string(),
                    password: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ConferenceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_membership_conflicts() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        join(&coordinator, id, "alice").await;

        let again = coordinator
            .join(
                id,
                JoinRequest {
                    user_id: Some(UserId::new("alice")),
                    display_name: "Alice again".to_string(),
                    password: None,
                },
            )
            .await;
        assert!(matches!(again, Err(ConferenceError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_guests_get_generated_identity() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;

        let outcome = coordinator
            .join(
                id,
                JoinRequest {
                    user_id: None,
                    display_name: "Visitor".to_string(),
                    password: None,
                },
            )
            .await
            .unwrap();

        assert!(outcome.participant.is_guest);
        assert!(outcome.participant.user_id.as_str().starts_with("guest-"));
        assert_eq!(outcome.peer_id.as_str().len(), 32);
    }

    #[tokio::test]
    async fn test_password_checks() {
        let coordinator = coordinator();
        let conference = coordinator
            .create_conference(
                &host(),
                NewConference {
                    title: "Private".to_string(),
                    password: Some(SecretString::from("open sesame")),
                    ..NewConference::default()
                },
            )
            .await
            .unwrap();
        assert!(conference.has_password);

        let request = |user: &str, password: Option<&str>| JoinRequest {
            user_id: Some(UserId::new(user)),
            display_name: user.to_string(),
            password: password.map(SecretString::from),
        };

        let missing = coordinator.join(conference.id, request("a", None)).await;
        assert!(matches!(missing, Err(ConferenceError::Unauthorized(_))));

        let wrong = coordinator
            .join(conference.id, request("b", Some("nope")))
            .await;
        assert!(matches!(wrong, Err(ConferenceError::Unauthorized(_))));

        let right = coordinator
            .join(conference.id, request("c", Some("open sesame")))
            .await;
        assert!(right.is_ok());

        let host_without = coordinator.join(conference.id, request(HOST, None)).await;
        assert!(host_without.is_ok());
    }

    #[tokio::test]
    async fn test_locked_blocks_everyone() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        coordinator.lock(&host(), id).await.unwrap();

        let result = coordinator
            .join(
                id,
                JoinRequest {
                    user_id: Some(host()),
                    display_name: "Host".to_string(),
                    password: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ConferenceError::Locked)));

        coordinator.unlock(&host(), id).await.unwrap();
        join(&coordinator, id, "alice").await;
    }

    #[tokio::test]
    async fn test_lock_requires_moderator() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        join(&coordinator, id, "alice").await;

        let result = coordinator.lock(&UserId::new("alice"), id).await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_mute_on_entry_and_permissions() {
        let coordinator = coordinator();
        let id = live(
            &coordinator,
            ConferenceSettings {
                mute_on_entry: true,
                ..all_features()
            },
        )
        .await;

        let host_join = join(&coordinator, id, HOST).await;
        let attendee = join(&coordinator, id, "alice").await;

        assert!(!host_join.participant.media.audio_muted);
        assert_eq!(host_join.participant.permissions, Permissions::HOST_DEFAULT);
        assert!(attendee.participant.media.audio_muted);
        assert_eq!(
            attendee.participant.permissions,
            Permissions::ATTENDEE_DEFAULT
        );
    }

    #[tokio::test]
    async fn test_peak_never_decreases() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        join(&coordinator, id, "bob").await;

        coordinator
            .leave(&UserId::new("alice"), id, alice.participant.id)
            .await
            .unwrap();

        let analytics = coordinator.analytics(id).await.unwrap();
        assert_eq!(analytics.peak_participants, 2);
        assert_eq!(analytics.current_participants, 1);
        assert_eq!(analytics.total_participants_joined, 2);
    }

    #[tokio::test]
    async fn test_disabling_screen_share_stops_active_share() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;
        let alice = join(&coordinator, id, "alice").await;
        coordinator
            .start_screen_share(&UserId::new("alice"), id, alice.participant.id)
            .await
            .unwrap();

        coordinator
            .update_settings(
                &host(),
                id,
                SettingsUpdate {
                    enable_screen_share: Some(false),
                    ..SettingsUpdate::default()
                },
            )
            .await
            .unwrap();

        let snapshot = coordinator.snapshot(id).await.unwrap();
        assert!(snapshot.screen_sharer.is_none());
        assert!(!snapshot.conference.settings.enable_screen_share);
    }

    #[tokio::test]
    async fn test_update_settings_changes_password() {
        let coordinator = coordinator();
        let id = live(&coordinator, all_features()).await;

        let summary = coordinator
            .update_settings(
                &host(),
                id,
                SettingsUpdate {
                    password: Some(Some(SecretString::from("new"))),
                    max_participants: Some(5),
                    ..SettingsUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(summary.has_password);
        assert_eq!(summary.max_participants, 5);

        let result = coordinator
            .join(
                id,
                JoinRequest {
                    user_id: Some(UserId::new("alice")),
                    display_name: "Alice".to_string(),
                    password: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ConferenceError::Unauthorized(_))));
    }
}
