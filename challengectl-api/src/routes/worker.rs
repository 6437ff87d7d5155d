//! Worker (transmitter) protocol (§6.1) plus the agent-side enrollment
//! endpoint (§4.3). Handlers stay thin: extract, call a store/service
//! function, translate the result — the same shape the teacher's
//! `routes::agents` handlers take.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use challengectl_core::{
    AgentId, AgentKind, ChallengeId, DeviceDescriptor, EntityIdType, Outcome, TransmissionId,
};

use crate::auth::hash_credential;
use crate::error::{ApiError, ApiResult};
use crate::middleware::rate_limit::{client_ip_from_headers, Bucket};
use crate::middleware::AgentAuth;
use crate::services::{assignment, recording};
use crate::state::AppState;
use crate::ws::WsEvent;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enroll", post(enroll))
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/poll", post(poll))
        .route("/complete", post(complete))
        .route("/signout", post(signout))
        .route("/log", post(push_log))
        .route("/artifacts/:hash", axum::routing::get(download_artifact))
}

#[derive(Debug, Serialize)]
struct Ack {
    ok: bool,
}

const ACK: Ack = Ack { ok: true };

#[derive(Debug, Deserialize)]
struct EnrollRequest {
    token: String,
    credential: String,
    hostname: String,
    mac: Option<String>,
    machine_id: Option<String>,
    #[serde(default)]
    devices: Vec<DeviceDescriptor>,
}

#[derive(Debug, Serialize)]
struct EnrollResponse {
    agent_id: AgentId,
}

/// §4.3: the agent's one-shot enrollment POST. Unauthenticated by bearer
/// token (the agent has none yet) — the enrollment token plus a credential
/// matching the hash the operator already stored is the proof of identity.
async fn enroll(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<EnrollRequest>,
) -> ApiResult<Json<EnrollResponse>> {
    let ip = client_ip_from_headers(&headers, addr.ip());
    state
        .rate_limiters
        .check(Bucket::Register, &ip.to_string())
        .map_err(ApiError::rate_limited)?;

    let token_row = state
        .persistence
        .identity
        .get_enrollment_token(&body.token)
        .await?
        .ok_or_else(ApiError::invalid_credential)?;

    let target = state
        .persistence
        .store
        .get_agent(token_row.target_agent_id)
        .await?
        .ok_or_else(ApiError::invalid_credential)?;

    crate::auth::verify_provisioning_credential(&body.credential, &target.credential_hash)?;

    let new_hash = hash_credential(&body.credential, state.auth_config.bcrypt_cost)?;
    let now = Utc::now();
    let agent_id = state
        .persistence
        .identity
        .consume_enrollment_token(
            &body.token,
            &new_hash,
            Some(&ip.to_string()),
            &body.hostname,
            body.mac.as_deref(),
            body.machine_id.as_deref(),
            now,
        )
        .await?;

    state
        .persistence
        .store
        .upsert_devices(agent_id, &body.devices)
        .await?;

    state.events.broadcast_to_operators(WsEvent::AgentStatus {
        agent_id,
        online: true,
        at: now,
    });

    Ok(Json(EnrollResponse { agent_id }))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    kind: AgentKind,
    hostname: String,
    #[serde(default)]
    devices: Vec<DeviceDescriptor>,
}

/// §6.1 `register`: an already-enrolled agent (re-)declares its hostname
/// and device inventory on boot. `kind` must match what enrollment fixed —
/// a worker can't relabel itself from transmitter to receiver after the fact.
async fn register(auth: AgentAuth, State(state): State<AppState>, Json(body): Json<RegisterRequest>) -> ApiResult<Json<Ack>> {
    if body.kind != auth.agent.kind {
        return Err(ApiError::bad_request("kind", "does not match enrolled agent kind"));
    }

    let now = Utc::now();
    state
        .persistence
        .store
        .register_heartbeat(
            auth.agent.id,
            auth.presented.ip.as_deref(),
            Some(&body.hostname),
            auth.presented.mac.as_deref(),
            auth.presented.machine_id.as_deref(),
            now,
        )
        .await?;
    state
        .persistence
        .store
        .upsert_devices(auth.agent.id, &body.devices)
        .await?;

    state.events.broadcast_to_operators(WsEvent::AgentStatus {
        agent_id: auth.agent.id,
        online: true,
        at: now,
    });

    Ok(Json(ACK))
}

/// §6.1 `heartbeat`: updates last-heartbeat/ip/hostname; rate-limited per
/// agent id rather than per IP since a NATed fleet shares an address.
async fn heartbeat(auth: AgentAuth, State(state): State<AppState>) -> ApiResult<Json<Ack>> {
    state
        .rate_limiters
        .check(Bucket::Heartbeat, &auth.agent.id.to_string())
        .map_err(ApiError::rate_limited)?;

    let now = Utc::now();
    state
        .persistence
        .store
        .register_heartbeat(
            auth.agent.id,
            auth.presented.ip.as_deref(),
            auth.presented.hostname.as_deref(),
            auth.presented.mac.as_deref(),
            auth.presented.machine_id.as_deref(),
            now,
        )
        .await?;

    Ok(Json(ACK))
}

/// §6.1 `poll` response: `null` when nothing was assigned.
#[derive(Debug, Serialize)]
struct PollResponse {
    challenge_id: ChallengeId,
    transmission_id: TransmissionId,
    name: String,
    frequency_hz: i64,
    modulation: challengectl_core::ModulationKind,
    payload_text: Option<String>,
    payload_artifact_hash: Option<String>,
    modulation_params: serde_json::Value,
    assignment_expiry: chrono::DateTime<Utc>,
}

/// §6.1 `poll`: the heart of the Assignment Engine's external surface.
/// On a successful dispatch, also runs the Recording Coordinator (§4.6) —
/// it must see the transmission before the worker ever reports completion.
async fn poll(auth: AgentAuth, State(state): State<AppState>) -> ApiResult<Json<Option<PollResponse>>> {
    let now = Utc::now();
    let dispatch = assignment::dispatch_next(
        &state.persistence,
        &state.controller_config,
        &auth.agent,
        now,
    )
    .await?;

    let Some(dispatch) = dispatch else {
        return Ok(Json(None));
    };

    recording::maybe_assign_recording(
        &state.persistence,
        &state.events,
        &state.recording_config,
        &dispatch.challenge,
        dispatch.transmission_id,
        dispatch.frequency_hz,
        now,
    )
    .await?;

    state.events.broadcast_to_operators(WsEvent::ChallengeAssigned {
        challenge_id: dispatch.challenge.id,
        agent_id: auth.agent.id,
        at: now,
    });

    let spec = &dispatch.challenge.spec;
    Ok(Json(Some(PollResponse {
        challenge_id: dispatch.challenge.id,
        transmission_id: dispatch.transmission_id,
        name: dispatch.challenge.name.clone(),
        frequency_hz: dispatch.frequency_hz,
        modulation: spec.modulation,
        payload_text: spec.payload_text.clone(),
        payload_artifact_hash: spec.payload_artifact_hash.clone(),
        modulation_params: serde_json::to_value(&spec.modulation_params).unwrap_or_default(),
        assignment_expiry: dispatch
            .challenge
            .assignment_expiry
            .unwrap_or(now),
    })))
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    challenge_id: ChallengeId,
    transmission_id: TransmissionId,
    outcome: Outcome,
    error: Option<String>,
    device_id: Option<String>,
}

/// §6.1 `complete` / §4.5.9. On `failure`, also gives the Recording
/// Coordinator a chance to cancel a still-pending assignment for this
/// transmission (§4.6 last paragraph).
async fn complete(auth: AgentAuth, State(state): State<AppState>, Json(body): Json<CompleteRequest>) -> ApiResult<Json<Ack>> {
    let now = Utc::now();
    state
        .persistence
        .store
        .complete_assignment(
            auth.agent.id,
            body.challenge_id,
            body.transmission_id,
            body.device_id.as_deref(),
            body.outcome,
            body.error.as_deref(),
            now,
        )
        .await?;

    if matches!(body.outcome, Outcome::Failure) {
        recording::cancel_for_failed_transmission(
            &state.persistence,
            &state.events,
            body.transmission_id,
            now,
        )
        .await?;
    }

    state.events.broadcast_to_operators(WsEvent::TransmissionComplete {
        transmission_id: body.transmission_id,
        challenge_id: body.challenge_id,
        outcome: body.outcome,
        at: now,
    });

    Ok(Json(ACK))
}

/// §6.1 `signout`: marks offline immediately rather than waiting on the
/// agent-offline sweep, and does the same cleanup that sweep would do
/// (requeue owned challenges, cancel the receiver's pending recordings).
async fn signout(auth: AgentAuth, State(state): State<AppState>) -> ApiResult<Json<Ack>> {
    let now = Utc::now();
    state.persistence.store.mark_agent_offline(auth.agent.id).await?;
    state.persistence.store.requeue_owned_by(auth.agent.id).await?;
    if auth.agent.kind == AgentKind::Receiver {
        state
            .persistence
            .recordings
            .cancel_assignments_for_receiver(auth.agent.id, now)
            .await?;
    }

    state.events.broadcast_to_operators(WsEvent::AgentStatus {
        agent_id: auth.agent.id,
        online: false,
        at: now,
    });

    Ok(Json(ACK))
}

#[derive(Debug, Deserialize)]
struct PushLogRequest {
    level: String,
    message: String,
}

/// §6.1 `push log`: forwarded to the Event Bus for operator consumption,
/// and to the process's own structured log at a level derived from the
/// agent's declared severity.
async fn push_log(auth: AgentAuth, State(state): State<AppState>, Json(body): Json<PushLogRequest>) -> ApiResult<Json<Ack>> {
    let now = Utc::now();
    match body.level.to_lowercase().as_str() {
        "error" => tracing::error!(agent_id = %auth.agent.id, message = %body.message, "agent log"),
        "warn" | "warning" => tracing::warn!(agent_id = %auth.agent.id, message = %body.message, "agent log"),
        _ => tracing::info!(agent_id = %auth.agent.id, message = %body.message, "agent log"),
    }

    state.events.broadcast_to_operators(WsEvent::Log {
        message: format!("[{}] {}: {}", auth.agent.id, body.level, body.message),
        at: now,
    });

    Ok(Json(ACK))
}

/// §6.1 `download artifact`: any authenticated agent (transmitters fetch
/// their challenge payload; receivers have no occasion to but aren't
/// excluded) can pull a blob by its content hash.
async fn download_artifact(
    _auth: AgentAuth,
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    let metadata = state
        .persistence
        .artifacts
        .get_metadata(&hash)
        .await?
        .ok_or_else(|| ApiError::not_found("artifact"))?;
    let bytes = state.persistence.artifacts.read_bytes(&hash).await?;

    let mut response = bytes.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_str(&metadata.media_type)
            .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream")),
    );
    Ok(response)
}
