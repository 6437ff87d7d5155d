//! System-wide operator views and controls (§6.3): pause/resume,
//! dashboard summary, transmission/recording history, live sweep metrics.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use challengectl_core::{ChallengeId, Recording, SystemState, TransmissionRecord};

use crate::error::ApiResult;
use crate::jobs::SweepSnapshot;
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::OperatorAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/transmissions", get(transmissions))
        .route("/recordings", get(recordings))
}

#[derive(Debug, Serialize)]
struct Dashboard {
    system: SystemState,
    sweeps: SweepSnapshot,
    agent_count: usize,
    online_agent_count: usize,
    challenge_count: usize,
}

async fn dashboard(_auth: OperatorAuth, State(state): State<AppState>) -> ApiResult<Json<Dashboard>> {
    let system = state.persistence.store.get_system_state().await?;
    let agents = state.persistence.store.list_agents().await?;
    let challenges = state.persistence.store.list_challenges().await?;
    let online_agent_count = agents
        .iter()
        .filter(|a| a.status == challengectl_core::AgentStatus::Online)
        .count();

    Ok(Json(Dashboard {
        system,
        sweeps: state.sweep_metrics.snapshot(),
        agent_count: agents.len(),
        online_agent_count,
        challenge_count: challenges.len(),
    }))
}

async fn pause(auth: OperatorAuth, State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state.persistence.store.set_paused(true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume(auth: OperatorAuth, State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state.persistence.store.set_paused(false).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    challenge_id: Option<ChallengeId>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn transmissions(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<TransmissionRecord>>> {
    Ok(Json(
        state
            .persistence
            .store
            .list_transmissions(query.challenge_id, query.limit)
            .await?,
    ))
}

async fn recordings(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Recording>>> {
    Ok(Json(
        state
            .persistence
            .recordings
            .list_recordings(query.challenge_id, query.limit)
            .await?,
    ))
}
