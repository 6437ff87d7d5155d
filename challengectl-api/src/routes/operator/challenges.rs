//! Operator challenge CRUD plus manual trigger (§6.3).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use challengectl_core::{Challenge, ChallengeId, ChallengeSpec, EntityIdType};

use crate::error::ApiResult;
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::OperatorAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_challenges).post(create_challenge))
        .route(
            "/:challenge_id",
            get(get_challenge).put(update_challenge).delete(delete_challenge),
        )
        .route("/:challenge_id/enable", post(enable_challenge))
        .route("/:challenge_id/disable", post(disable_challenge))
        .route("/:challenge_id/trigger", post(trigger_challenge))
}

async fn list_challenges(_auth: OperatorAuth, State(state): State<AppState>) -> ApiResult<Json<Vec<Challenge>>> {
    Ok(Json(state.persistence.store.list_challenges().await?))
}

async fn get_challenge(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(challenge_id): Path<ChallengeId>,
) -> ApiResult<Json<Challenge>> {
    let challenge = state
        .persistence
        .store
        .get_challenge(challenge_id)
        .await?
        .ok_or_else(|| crate::error::ApiError::not_found("challenge"))?;
    Ok(Json(challenge))
}

#[derive(Debug, Deserialize)]
struct CreateChallengeRequest {
    name: String,
    spec: ChallengeSpec,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn create_challenge(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateChallengeRequest>,
) -> ApiResult<Json<Challenge>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    let challenge = state
        .persistence
        .store
        .create_challenge(
            ChallengeId::now_v7(),
            &body.name,
            &body.spec,
            body.priority,
            body.enabled,
        )
        .await?;
    Ok(Json(challenge))
}

#[derive(Debug, Deserialize)]
struct UpdateChallengeRequest {
    name: String,
    spec: ChallengeSpec,
    priority: i32,
}

async fn update_challenge(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(challenge_id): Path<ChallengeId>,
    Json(body): Json<UpdateChallengeRequest>,
) -> ApiResult<Json<Challenge>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    let challenge = state
        .persistence
        .store
        .update_challenge(challenge_id, &body.name, &body.spec, body.priority)
        .await?;
    Ok(Json(challenge))
}

async fn delete_challenge(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(challenge_id): Path<ChallengeId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state.persistence.store.delete_challenge(challenge_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_challenge(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(challenge_id): Path<ChallengeId>,
) -> ApiResult<Json<Challenge>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    Ok(Json(state.persistence.store.set_challenge_enabled(challenge_id, true).await?))
}

async fn disable_challenge(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(challenge_id): Path<ChallengeId>,
) -> ApiResult<Json<Challenge>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    Ok(Json(state.persistence.store.set_challenge_enabled(challenge_id, false).await?))
}

/// §6.3 "trigger": operator forces an immediate reassignment window,
/// bypassing the usual reassignment delay (§4.5.5).
async fn trigger_challenge(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(challenge_id): Path<ChallengeId>,
) -> ApiResult<Json<Challenge>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    Ok(Json(state.persistence.store.trigger_challenge_now(challenge_id).await?))
}
