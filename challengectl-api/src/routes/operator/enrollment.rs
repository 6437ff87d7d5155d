//! Enrollment token management (§4.3, §6.3). Two audiences share this
//! module: an operator creates/lists/deletes tokens by hand, and a
//! provisioning-credential holder drives the same flow end to end
//! through `/provision`, gated by `ProvisioningAuth` instead of
//! `OperatorAuth` — that route can create a pending agent and hand back
//! credentials but can't touch anything else (§4.3's "cannot modify
//! existing agents, read challenges, or perform any other admin
//! operation").

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use challengectl_core::{AgentId, AgentKind, EnrollmentToken, EnrollmentTokenId, EntityIdType};

use crate::auth::{generate_credential, hash_credential};
use crate::error::ApiResult;
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::{OperatorAuth, ProvisioningAuth};
use crate::state::AppState;

/// Default token lifetime for operator-issued enrollment tokens.
const TOKEN_TTL: chrono::Duration = chrono::Duration::hours(24);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::get(list_tokens).post(create_token))
        .route("/:token_id", axum::routing::delete(delete_token))
}

pub fn provisioning_router() -> Router<AppState> {
    Router::new().route("/provision", post(provision))
}

#[derive(Debug, Deserialize)]
struct CreateTokenRequest {
    kind: AgentKind,
    hostname: String,
}

#[derive(Debug, Serialize)]
struct CreateTokenResponse {
    agent_id: AgentId,
    token: EnrollmentToken,
    credential: String,
}

/// Operator-initiated enrollment (§4.3): generate a credential, create a
/// pending agent row holding its hash, then issue a token an agent can
/// redeem with that same credential.
async fn create_token(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTokenRequest>,
) -> ApiResult<Json<CreateTokenResponse>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;

    let credential = generate_credential();
    let credential_hash = hash_credential(&credential, state.auth_config.bcrypt_cost)?;
    let agent_id = AgentId::now_v7();

    let agent = state
        .persistence
        .store
        .create_pending_agent(agent_id, body.kind, &body.hostname, &credential_hash)
        .await?;

    let now = Utc::now();
    let token = state
        .persistence
        .identity
        .create_enrollment_token(agent.id, &auth.user.username, TOKEN_TTL, now)
        .await?;

    Ok(Json(CreateTokenResponse {
        agent_id: agent.id,
        token,
        credential,
    }))
}

async fn list_tokens(_auth: OperatorAuth, State(state): State<AppState>) -> ApiResult<Json<Vec<EnrollmentToken>>> {
    Ok(Json(state.persistence.identity.list_enrollment_tokens().await?))
}

async fn delete_token(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token_id): Path<EnrollmentTokenId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    state.persistence.identity.delete_enrollment_token(token_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ProvisionRequest {
    runner_name: String,
    #[serde(default)]
    kind: Option<AgentKind>,
}

#[derive(Debug, Serialize)]
struct ProvisionResponse {
    agent_id: AgentId,
    enrollment_token: String,
    credential: String,
    config: ProvisionConfig,
}

/// The minimal config payload a freshly provisioned agent needs to call
/// `/worker/enroll` with no further operator involvement (§4.3
/// stateless-automated shape).
#[derive(Debug, Serialize)]
struct ProvisionConfig {
    enrollment_token: String,
    credential: String,
    hostname: String,
}

/// Stateless-automated enrollment: a provisioning-credential holder POSTs
/// a runner name and gets back everything needed to bring that runner up
/// as an enrolled agent, performing the full operator-initiated flow on
/// its behalf in one round trip.
async fn provision(
    auth: ProvisioningAuth,
    State(state): State<AppState>,
    Json(body): Json<ProvisionRequest>,
) -> ApiResult<Json<ProvisionResponse>> {
    let kind = body.kind.unwrap_or(AgentKind::Transmitter);
    let credential = generate_credential();
    let credential_hash = hash_credential(&credential, state.auth_config.bcrypt_cost)?;
    let agent_id = AgentId::now_v7();

    let agent = state
        .persistence
        .store
        .create_pending_agent(agent_id, kind, &body.runner_name, &credential_hash)
        .await?;

    let now = Utc::now();
    let created_by = format!("provisioning:{}", auth.credential.id);
    let token = state
        .persistence
        .identity
        .create_enrollment_token(agent.id, &created_by, TOKEN_TTL, now)
        .await?;

    Ok(Json(ProvisionResponse {
        agent_id: agent.id,
        enrollment_token: token.token.clone(),
        credential: credential.clone(),
        config: ProvisionConfig {
            enrollment_token: token.token,
            credential,
            hostname: body.runner_name,
        },
    }))
}
