//! Provisioning credential management (§6.3): the keys that let
//! `/operator/provision` run unattended.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use challengectl_core::{EntityIdType, ProvisioningCredential, ProvisioningKeyId};

use crate::auth::{generate_credential, hash_credential};
use crate::error::ApiResult;
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::OperatorAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_credentials).post(create_credential))
        .route("/:credential_id/enable", post(enable_credential))
        .route("/:credential_id/disable", post(disable_credential))
        .route("/:credential_id", axum::routing::delete(delete_credential))
}

#[derive(Debug, Deserialize)]
struct CreateCredentialRequest {
    description: String,
}

#[derive(Debug, Serialize)]
struct CreateCredentialResponse {
    credential: ProvisioningCredential,
    secret: String,
}

async fn create_credential(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateCredentialRequest>,
) -> ApiResult<Json<CreateCredentialResponse>> {
    check_csrf_headers(&headers, &state.auth_config)?;

    let secret = generate_credential();
    let hash = hash_credential(&secret, state.auth_config.bcrypt_cost)?;
    let credential = state
        .persistence
        .identity
        .create_provisioning_credential(
            ProvisioningKeyId::now_v7(),
            &hash,
            &body.description,
            &auth.user.username,
            Utc::now(),
        )
        .await?;

    Ok(Json(CreateCredentialResponse { credential, secret }))
}

async fn list_credentials(
    _auth: OperatorAuth,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ProvisioningCredential>>> {
    Ok(Json(state.persistence.identity.list_provisioning_credentials().await?))
}

async fn enable_credential(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(credential_id): Path<ProvisioningKeyId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state
        .persistence
        .identity
        .set_provisioning_credential_enabled(credential_id, true)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_credential(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(credential_id): Path<ProvisioningKeyId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state
        .persistence
        .identity
        .set_provisioning_credential_enabled(credential_id, false)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_credential(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(credential_id): Path<ProvisioningKeyId>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    let _ = auth;
    state.persistence.identity.delete_provisioning_credential(credential_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
