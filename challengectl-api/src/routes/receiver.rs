//! Receiver (listener) protocol (§6.2): assignment state transitions
//! reported by a receiver agent, plus the waterfall image upload. Same
//! `AgentAuth` extractor as the worker routes; the push-channel side of
//! this protocol lives in `ws::agent_ws_handler`, not here.

use axum::extract::{Multipart, Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use challengectl_core::{AgentKind, EntityIdType, Outcome, RecordingAssignmentId};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AgentAuth;
use crate::state::AppState;
use crate::ws::WsEvent;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assignments/:assignment_id/started", post(recording_started))
        .route("/assignments/:assignment_id/completed", post(recording_completed))
        .route("/assignments/:assignment_id/failed", post(recording_failed))
}

#[derive(Debug, Serialize)]
struct Ack {
    ok: bool,
}

const ACK: Ack = Ack { ok: true };

/// Every handler here must be the assignment's own receiver; nothing short
/// of that credential is allowed to drive its state machine.
async fn require_owned_assignment(
    state: &AppState,
    auth: &AgentAuth,
    assignment_id: RecordingAssignmentId,
) -> ApiResult<challengectl_core::RecordingAssignment> {
    if auth.agent.kind != AgentKind::Receiver {
        return Err(ApiError::permission_denied("receiver"));
    }
    let assignment = state
        .persistence
        .recordings
        .get_assignment(assignment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("recording_assignment"))?;
    if assignment.receiver_agent_id != auth.agent.id {
        return Err(ApiError::permission_denied("assignment"));
    }
    Ok(assignment)
}

/// §6.2 `recording started`: pending -> recording.
async fn recording_started(
    auth: AgentAuth,
    State(state): State<AppState>,
    Path(assignment_id): Path<RecordingAssignmentId>,
) -> ApiResult<Json<Ack>> {
    require_owned_assignment(&state, &auth, assignment_id).await?;
    state.persistence.recordings.mark_recording_started(assignment_id).await?;
    Ok(Json(ACK))
}

#[derive(Debug, Deserialize)]
struct RecordingFailedRequest {
    error: String,
}

/// §6.2 `recording failed`.
async fn recording_failed(
    auth: AgentAuth,
    State(state): State<AppState>,
    Path(assignment_id): Path<RecordingAssignmentId>,
    Json(body): Json<RecordingFailedRequest>,
) -> ApiResult<Json<Ack>> {
    let assignment = require_owned_assignment(&state, &auth, assignment_id).await?;
    let now = Utc::now();
    state
        .persistence
        .recordings
        .complete_assignment(
            assignment_id,
            Outcome::Failure,
            None,
            None,
            None,
            None,
            None,
            Some(body.error),
            now,
        )
        .await?;

    state.events.broadcast_to_operators(WsEvent::AssignmentCancelled {
        assignment_id,
        at: now,
    });
    let _ = assignment;
    Ok(Json(ACK))
}

/// §6.2 `recording completed`: multipart body carrying the waterfall image
/// plus its declared dimensions/sample rate/duration as form fields,
/// following the teacher's artifact-upload shape (store by hash, then
/// record the recording referencing that path).
async fn recording_completed(
    auth: AgentAuth,
    State(state): State<AppState>,
    Path(assignment_id): Path<RecordingAssignmentId>,
    mut multipart: Multipart,
) -> ApiResult<Json<Ack>> {
    require_owned_assignment(&state, &auth, assignment_id).await?;

    let mut image_bytes: Option<Vec<u8>> = None;
    let mut image_filename = "waterfall.png".to_string();
    let mut image_media_type = "image/png".to_string();
    let mut image_width: Option<i32> = None;
    let mut image_height: Option<i32> = None;
    let mut sample_rate_hz: Option<i64> = None;
    let mut duration_secs: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("multipart", e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                image_filename = field.file_name().unwrap_or("waterfall.png").to_string();
                image_media_type = field
                    .content_type()
                    .unwrap_or("image/png")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request("image", e.to_string()))?;
                image_bytes = Some(bytes.to_vec());
            }
            "image_width" => image_width = field_as::<i32>(field).await?,
            "image_height" => image_height = field_as::<i32>(field).await?,
            "sample_rate_hz" => sample_rate_hz = field_as::<i64>(field).await?,
            "duration_secs" => duration_secs = field_as::<i64>(field).await?,
            _ => {}
        }
    }

    let image_path = match image_bytes {
        Some(bytes) => {
            let artifact = state
                .persistence
                .artifacts
                .store_bytes(&bytes, &image_filename, &image_media_type)
                .await?;
            Some(artifact.hash)
        }
        None => None,
    };

    let now = Utc::now();
    state
        .persistence
        .recordings
        .complete_assignment(
            assignment_id,
            Outcome::Success,
            image_path,
            image_width,
            image_height,
            sample_rate_hz,
            duration_secs,
            None,
            now,
        )
        .await?;

    Ok(Json(ACK))
}

async fn field_as<T: std::str::FromStr>(field: axum::extract::multipart::Field<'_>) -> ApiResult<Option<T>> {
    let text = field
        .text()
        .await
        .map_err(|e| ApiError::bad_request("field", e.to_string()))?;
    Ok(text.parse::<T>().ok())
}
