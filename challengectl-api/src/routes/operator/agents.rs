//! Operator agent management (§6.3): enable/disable/delete and read.
//! Mutations require `OperatorAuth` plus a matching CSRF token.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use challengectl_core::{Agent, AgentId};

use crate::error::ApiResult;
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::OperatorAuth;
use crate::state::AppState;
use crate::ws::WsEvent;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents))
        .route("/:agent_id", get(get_agent).delete(delete_agent))
        .route("/:agent_id/enable", post(enable_agent))
        .route("/:agent_id/disable", post(disable_agent))
}

async fn list_agents(_auth: OperatorAuth, State(state): State<AppState>) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(state.persistence.store.list_agents().await?))
}

async fn get_agent(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<Json<Agent>> {
    let agent = state
        .persistence
        .store
        .get_agent(agent_id)
        .await?
        .ok_or_else(|| crate::error::ApiError::not_found("agent"))?;
    Ok(Json(agent))
}

async fn set_enabled(
    state: &AppState,
    agent_id: AgentId,
    enabled: bool,
) -> ApiResult<()> {
    state.persistence.store.set_agent_enabled(agent_id, enabled).await?;
    if !enabled {
        state.persistence.store.requeue_owned_by(agent_id).await?;
    }
    state.events.broadcast_to_operators(WsEvent::AgentEnabled {
        agent_id,
        enabled,
        at: Utc::now(),
    });
    Ok(())
}

async fn enable_agent(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    set_enabled(&state, agent_id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_agent(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    set_enabled(&state, agent_id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_agent(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state.persistence.store.requeue_owned_by(agent_id).await?;
    state.persistence.store.delete_agent(agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
