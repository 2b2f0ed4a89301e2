//! Recording controller.
//!
//! Recording is a flag plus a list of closed intervals. Pause and resume are
//! a stop followed by a start, so `recorded_seconds` is the sum of intervals
//! rather than the span from first start to last stop.

use super::{ConferenceCoordinator, PendingWrites};
use crate::errors::ConferenceError;
use crate::models::{ConferenceStatus, ConferenceSummary, RecordingInterval};
use crate::relay::{Audience, RelayEvent};
use crate::store::{Authority, ConferenceSession};
use chrono::{DateTime, Utc};
use common::types::{ConferenceId, UserId};
use tracing::{info, instrument};

impl ConferenceCoordinator {
    /// Start recording.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the conference is live, recording is enabled and
    /// not already running; `Unauthorized` without host authority or the
    /// record permission.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn start_recording(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let summary = {
            let mut session = session.write().await;
            ensure_recordable(&session)?;
            require_recorder(&session, &authority)?;
            if session.conference().is_recording {
                return Err(ConferenceError::InvalidState(
                    "Recording already in progress".to_string(),
                ));
            }

            let now = Utc::now();
            let conference = session.conference_mut();
            conference.is_recording = true;
            conference.recording_started_at = Some(now);
            session.emit(
                Audience::AllJoined,
                RelayEvent::RecordingStarted {
                    by: authority.user.clone(),
                    started_at: now,
                },
            );
            writes.conference(session.conference());
            session.conference().summary()
        };

        self.flush(writes).await;
        info!(target: "conf.recording", conference_id = %conference_id, "Recording started");
        Ok(summary)
    }

    /// Stop recording, closing the open interval.
    ///
    /// # Errors
    ///
    /// `InvalidState` if not recording or the conference is not live;
    /// `Unauthorized` without host authority or the record permission.
    #[instrument(skip_all, fields(conference_id = %conference_id))]
    pub async fn stop_recording(
        &self,
        caller: &UserId,
        conference_id: ConferenceId,
    ) -> Result<ConferenceSummary, ConferenceError> {
        let authority = self.authority(caller, conference_id).await?;
        let session = self.session(conference_id).await?;
        let mut writes = PendingWrites::default();

        let (summary, duration) = {
            let mut session = session.write().await;
            if session.conference().status != ConferenceStatus::InProgress {
                return Err(ConferenceError::InvalidState(
                    "Conference is not in progress".to_string(),
                ));
            }
            require_recorder(&session, &authority)?;
            let Some(duration) = finish_recording(&mut session, &authority.user, Utc::now())
            else {
                return Err(ConferenceError::InvalidState(
                    "Recording is not in progress".to_string(),
                ));
            };
            writes.conference(session.conference());
            (session.conference().summary(), duration)
        };

        self.flush(writes).await;
        info!(
            target: "conf.recording",
            conference_id = %conference_id,
            duration_seconds = duration,
            "Recording stopped"
        );
        Ok(summary)
    }
}

/// Close the open recording interval, if any, and broadcast the stop.
/// Returns the interval length in seconds.
pub(crate) fn finish_recording(
    session: &mut ConferenceSession,
    by: &UserId,
    now: DateTime<Utc>,
) -> Option<i64> {
    let conference = session.conference_mut();
    if !conference.is_recording {
        return None;
    }
    conference.is_recording = false;
    let started_at = conference.recording_started_at.take().unwrap_or(now);
    let duration = (now - started_at).num_seconds().max(0);
    conference.recording_intervals.push(RecordingInterval {
        started_at,
        stopped_at: Some(now),
        started_by: by.clone(),
    });
    conference.recorded_seconds += duration;

    session.emit(
        Audience::AllJoined,
        RelayEvent::RecordingStopped {
            by: by.clone(),
            duration_seconds: duration,
        },
    );
    Some(duration)
}

fn ensure_recordable(session: &ConferenceSession) -> Result<(), ConferenceError> {
    let conference = session.conference();
    if conference.status != ConferenceStatus::InProgress {
        return Err(ConferenceError::InvalidState(
            "Conference is not in progress".to_string(),
        ));
    }
    if !conference.settings.enable_recording {
        return Err(ConferenceError::InvalidState(
            "Recording is disabled for this conference".to_string(),
        ));
    }
    Ok(())
}

/// Host and co-hosts may always record. Other joined participants need an
/// explicit `can_record` grant; revoking that flag from a co-host does not
/// strip the co-host's own authority.
fn require_recorder(session: &ConferenceSession, authority: &Authority) -> Result<(), ConferenceError> {
    if session.is_moderator(authority) {
        return Ok(());
    }
    let holds_permission = session
        .active_membership(&authority.user)
        .is_some_and(|p| p.is_joined() && p.permissions.can_record());
    if holds_permission {
        Ok(())
    } else {
        Err(ConferenceError::Unauthorized(
            "Recording requires host or co-host authority or the record permission".to_string(),
        ))
    }
}
