//! Operator login state machine (§4.2): `unauthenticated -> password-verified
//! -> authenticated`. Session and CSRF cookies are set here; every other
//! operator route reads them back via `OperatorAuth`.

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::auth::{verify_password, verify_totp_code, TotpSecret};
use crate::error::{ApiError, ApiResult};
use crate::middleware::auth_extract::check_csrf_headers;
use crate::middleware::rate_limit::{client_ip_from_headers, Bucket};
use crate::middleware::PasswordVerifiedAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/verify-totp", post(verify_totp))
        .route("/logout", post(logout))
}

fn cookie(name: &str, value: &str, max_age_secs: i64, http_only: bool) -> String {
    let http_only_flag = if http_only { "; HttpOnly" } else { "" };
    format!(
        "{name}={value}; Path=/; Max-Age={max_age_secs}; SameSite=Strict{http_only_flag}"
    )
}

fn session_response(state: &AppState, token: &str, csrf: &str, body: impl Serialize) -> Response {
    let max_age = chrono::Duration::hours(24).num_seconds();
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    headers.append(
        header::SET_COOKIE,
        cookie(&state.auth_config.session_cookie_name, token, max_age, true)
            .parse()
            .expect("cookie header value"),
    );
    headers.append(
        header::SET_COOKIE,
        cookie(&state.auth_config.csrf_cookie_name, csrf, max_age, false)
            .parse()
            .expect("cookie header value"),
    );
    response
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    status: &'static str,
}

/// §4.2: invalid/disabled/unknown user all return the same generic
/// failure, so a caller can't enumerate valid usernames.
async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Response> {
    let ip = client_ip_from_headers(&headers, addr.ip());
    state
        .rate_limiters
        .check(Bucket::Login, &ip.to_string())
        .map_err(ApiError::rate_limited)?;

    let user = state
        .persistence
        .identity
        .get_user(&body.username)
        .await?
        .filter(|u| u.enabled)
        .ok_or_else(ApiError::invalid_credential)?;

    verify_password(&body.password, &user.password_hash)?;

    let now = Utc::now();
    let has_totp = user.totp_secret_encrypted.is_some();
    let session = state
        .persistence
        .identity
        .create_session(&user.username, !has_totp, now)
        .await?;
    state.persistence.identity.record_login(&user.username, now).await?;

    let csrf = challengectl_store::IdentityStore::generate_opaque_token();
    let status = if has_totp { "totp_required" } else { "authenticated" };
    Ok(session_response(&state, &session.token, &csrf, LoginResponse { status }))
}

#[derive(Debug, Deserialize)]
struct VerifyTotpRequest {
    code: String,
}

/// §4.2: requires the `password-verified` session cookie already set by
/// `login`. Uses `PasswordVerifiedAuth`, not `OperatorAuth`, since
/// `OperatorAuth` itself now rejects any session that hasn't completed this
/// step — this is the one route that must be reachable before it does.
async fn verify_totp(
    auth: PasswordVerifiedAuth,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<VerifyTotpRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let ip = client_ip_from_headers(&headers, addr.ip());
    state
        .rate_limiters
        .check(Bucket::VerifyTotp, &ip.to_string())
        .map_err(ApiError::rate_limited)?;

    let encrypted = auth
        .user
        .totp_secret_encrypted
        .as_ref()
        .ok_or_else(ApiError::invalid_credential)?;
    let secret = TotpSecret::from_base32(
        std::str::from_utf8(encrypted).map_err(|_| ApiError::invalid_credential())?,
    );

    let now = Utc::now();
    verify_totp_code(&secret, &auth.user.username, &body.code, now, &state.replay_cache)?;
    state.persistence.identity.mark_totp_verified(&auth.session_token).await?;

    Ok(Json(LoginResponse { status: "authenticated" }))
}

/// Uses `PasswordVerifiedAuth` rather than `OperatorAuth`: a session stuck
/// mid-TOTP still needs a way out without waiting for it to expire.
async fn logout(
    auth: PasswordVerifiedAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    check_csrf_headers(&headers, &state.auth_config)?;
    state.persistence.identity.delete_session(&auth.session_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
