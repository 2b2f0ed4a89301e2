//! Recording handlers.
//!
//! - `POST /api/v1/conferences/:id/recording` - Start recording
//! - `DELETE /api/v1/conferences/:id/recording` - Stop recording

use crate::errors::ConferenceError;
use crate::models::ConferenceSummary;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::types::{ConferenceId, UserId};
use std::sync::Arc;

pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .start_recording(&caller, conference_id)
            .await?,
    ))
}

pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<UserId>,
    Path(conference_id): Path<ConferenceId>,
) -> Result<Json<ConferenceSummary>, ConferenceError> {
    Ok(Json(
        state
            .coordinator
            .stop_recording(&caller, conference_id)
            .await?,
    ))
}
