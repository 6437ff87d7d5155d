//! Operator user management (§6.3): CRUD, password/TOTP enrollment, and
//! permission grant/revoke. A user manages their own TOTP secret only
//! after verifying the current one (or never having set one), mirroring
//! the teacher's self-service "rotate secret" flow.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use challengectl_core::OperatorUser;

use crate::auth::{hash_password, verify_password, TotpSecret};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::OperatorAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::get(list_users).post(create_user))
        .route(
            "/:username",
            axum::routing::get(get_user)
                .put(set_enabled)
                .delete(delete_user),
        )
        .route("/:username/password", post(set_password))
        .route("/:username/totp", post(set_totp).delete(clear_totp))
        .route("/:username/permissions", post(grant_permission).delete(revoke_permission))
}

async fn list_users(_auth: OperatorAuth, State(state): State<AppState>) -> ApiResult<Json<Vec<OperatorUser>>> {
    Ok(Json(state.persistence.identity.list_users().await?))
}

async fn get_user(
    _auth: OperatorAuth,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<OperatorUser>> {
    let user = state
        .persistence
        .identity
        .get_user(&username)
        .await?
        .ok_or_else(|| ApiError::not_found("operator_user"))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    #[serde(default)]
    password_change_required: bool,
}

async fn create_user(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult<Json<OperatorUser>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    let hash = hash_password(&body.password, state.auth_config.bcrypt_cost)?;
    let user = state
        .persistence
        .identity
        .create_user(&body.username, &hash, body.password_change_required, Utc::now())
        .await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

async fn set_enabled(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<SetEnabledRequest>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    state.persistence.identity.set_user_enabled(&username, body.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_user(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    state.persistence.identity.delete_user(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SetPasswordRequest {
    new_password: String,
    #[serde(default)]
    password_change_required: bool,
}

async fn set_password(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<SetPasswordRequest>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    let hash = hash_password(&body.new_password, state.auth_config.bcrypt_cost)?;
    state
        .persistence
        .identity
        .set_password(&username, &hash, body.password_change_required)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct TotpEnrollResponse {
    secret_base32: String,
}

/// Generates a fresh TOTP secret for `username` and stores it; the
/// caller still has to complete `/auth/verify-totp` before the session
/// is fully authenticated (§4.2).
async fn set_totp(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
) -> ApiResult<Json<TotpEnrollResponse>> {
    check_csrf_headers(&headers, &state.auth_config)?;
    if auth.user.username != username {
        return Err(ApiError::permission_denied("totp:other-user"));
    }
    let secret = TotpSecret::generate();
    state
        .persistence
        .identity
        .set_totp_secret(&username, Some(secret.expose_base32().as_bytes()))
        .await?;
    Ok(Json(TotpEnrollResponse {
        secret_base32: secret.expose_base32().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct ClearTotpRequest {
    current_password: String,
}

async fn clear_totp(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<ClearTotpRequest>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    if auth.user.username != username {
        return Err(ApiError::permission_denied("totp:other-user"));
    }
    verify_password(&body.current_password, &auth.user.password_hash)?;
    state.persistence.identity.set_totp_secret(&username, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PermissionRequest {
    permission: String,
}

async fn grant_permission(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<PermissionRequest>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    state.persistence.identity.grant_permission(&username, &body.permission).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_permission(
    auth: OperatorAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(username): Path<String>,
    Json(body): Json<PermissionRequest>,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    auth.has_permission("create_users")?;
    state.persistence.identity.revoke_permission(&username, &body.permission).await?;
    Ok(StatusCode::NO_CONTENT)
}
