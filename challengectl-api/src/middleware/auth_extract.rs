//! Typed extractors for the three credential kinds (§3, §4.2): operator
//! session cookie, agent bearer token with host binding, and
//! provisioning bearer token. Adapted from the teacher's
//! `AuthExtractor`/`FromRequestParts` pattern, split into three since
//! ChallengeCtl's protocols don't share one `AuthContext` shape.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;

use challengectl_core::{Agent, AgentId, EntityIdType, OperatorUser, ProvisioningCredential};

use axum::RequestPartsExt;

use crate::auth::{verify_agent_credential, verify_provisioning_credential, PresentedHostIdentity};
use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::rate_limit::client_ip_from_headers;

pub fn parse_cookies_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let Some(header) = headers.get(axum::http::header::COOKIE) else {
        return cookies;
    };
    let Ok(header) = header.to_str() else {
        return cookies;
    };
    for pair in header.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            cookies.insert(k.to_string(), v.to_string());
        }
    }
    cookies
}

pub fn parse_cookies(parts: &Parts) -> HashMap<String, String> {
    parse_cookies_from_headers(&parts.headers)
}

/// A session that has passed password verification, renewed the same way
/// `OperatorAuth` does, but not yet necessarily past the TOTP step (§4.2:
/// `unauthenticated -> password-verified -> authenticated`). Only
/// `/auth/verify-totp` accepts this — every other operator route requires
/// the fully-`authenticated` `OperatorAuth` below.
struct LoadedSession {
    user: OperatorUser,
    token: String,
    totp_verified: bool,
}

async fn load_session(
    parts: &mut Parts,
    state: &crate::state::AppState,
) -> ApiResult<LoadedSession> {
    let cookies = parse_cookies(parts);
    let token = cookies
        .get(&state.auth_config.session_cookie_name)
        .cloned()
        .ok_or(ApiError::invalid_credential())?;

    let now = Utc::now();
    let session = state
        .persistence
        .identity
        .get_session(&token)
        .await?
        .ok_or(ApiError::invalid_credential())?;

    if session.expires_at < now {
        return Err(ApiError::invalid_credential());
    }

    let user = state
        .persistence
        .identity
        .get_user(&session.username)
        .await?
        .ok_or(ApiError::invalid_credential())?;

    if !user.enabled {
        return Err(ApiError::invalid_credential());
    }

    state.persistence.identity.renew_session(&token, now).await?;

    Ok(LoadedSession {
        user,
        token,
        totp_verified: session.totp_verified,
    })
}

/// A password-verified session, used only by `/auth/verify-totp` (§4.2)
/// since that's the one route that must be reachable before the TOTP step
/// completes. Every other route uses `OperatorAuth` instead.
#[derive(Debug, Clone)]
pub struct PasswordVerifiedAuth {
    pub user: OperatorUser,
    pub session_token: String,
}

impl FromRequestParts<crate::state::AppState> for PasswordVerifiedAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::state::AppState,
    ) -> Result<Self, Self::Rejection> {
        let loaded = load_session(parts, state).await?;
        Ok(PasswordVerifiedAuth {
            user: loaded.user,
            session_token: loaded.token,
        })
    }
}

/// A fully authenticated operator (§4.2's `authenticated` state), with
/// their session renewed (any authenticated request extends the sliding
/// 24h window). A user enrolled in TOTP whose session hasn't yet passed
/// `/auth/verify-totp` is rejected here exactly like an invalid session —
/// the second factor gates every operator capability, not just login.
#[derive(Debug, Clone)]
pub struct OperatorAuth {
    pub user: OperatorUser,
    pub session_token: String,
    pub totp_verified: bool,
}

impl OperatorAuth {
    pub fn has_permission(&self, permission: &str) -> ApiResult<()> {
        if self.user.permissions.iter().any(|p| p == permission) {
            Ok(())
        } else {
            Err(ApiError::permission_denied(permission))
        }
    }
}

impl FromRequestParts<crate::state::AppState> for OperatorAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::state::AppState,
    ) -> Result<Self, Self::Rejection> {
        let loaded = load_session(parts, state).await?;

        let totp_required = loaded.user.totp_secret_encrypted.is_some();
        if totp_required && !loaded.totp_verified {
            return Err(ApiError::invalid_credential());
        }

        Ok(OperatorAuth {
            user: loaded.user,
            session_token: loaded.token,
            totp_verified: loaded.totp_verified,
        })
    }
}

/// §4.2: mutating operator requests must also present the CSRF token
/// matching the `cc_csrf` cookie.
pub fn check_csrf(parts: &Parts, auth_config: &AuthConfig) -> ApiResult<()> {
    check_csrf_headers(&parts.headers, auth_config)
}

pub fn check_csrf_headers(headers: &HeaderMap, auth_config: &AuthConfig) -> ApiResult<()> {
    let cookies = parse_cookies_from_headers(headers);
    let cookie_value = cookies.get(&auth_config.csrf_cookie_name);
    let header_value = headers.get("x-csrf-token").and_then(|h| h.to_str().ok());

    match (cookie_value, header_value) {
        (Some(c), Some(h)) if c == h => Ok(()),
        _ => Err(ApiError::bad_request("csrf", "missing or mismatched CSRF token")),
    }
}

/// An authenticated agent (transmitter or receiver), verified by bearer
/// token plus §4.2 host binding. Identifiers are read from headers:
/// `X-Agent-Id`, `X-Agent-Hostname`, `X-Agent-Mac`, `X-Agent-Machine-Id`,
/// with the IP taken from the connection (or `X-Forwarded-For`).
#[derive(Debug, Clone)]
pub struct AgentAuth {
    pub agent: Agent,
    pub presented: PresentedHostIdentity,
}

impl FromRequestParts<crate::state::AppState> for AgentAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::state::AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let agent_id_header = header_str(parts, "x-agent-id").ok_or(ApiError::invalid_credential())?;
        let agent_id = AgentId::new(
            uuid::Uuid::parse_str(&agent_id_header).map_err(|_| ApiError::invalid_credential())?,
        );

        let agent = state
            .persistence
            .store
            .get_agent(agent_id)
            .await?
            .ok_or(ApiError::invalid_credential())?;

        if !agent.enabled {
            return Err(ApiError::invalid_credential());
        }

        let ConnectInfo(addr) = parts
            .extract::<ConnectInfo<SocketAddr>>()
            .await
            .map_err(|_| ApiError::internal("missing connect info"))?;

        let presented = PresentedHostIdentity {
            ip: Some(client_ip_from_headers(&parts.headers, addr.ip()).to_string()),
            hostname: header_str(parts, "x-agent-hostname"),
            mac: header_str(parts, "x-agent-mac"),
            machine_id: header_str(parts, "x-agent-machine-id"),
        };

        verify_agent_credential(
            &agent,
            &token,
            &presented,
            Utc::now(),
            state.auth_config.host_binding_grace_secs,
        )?;

        Ok(AgentAuth { agent, presented })
    }
}

/// A verified provisioning credential (§4.3, unauthenticated-enrollment
/// automation path). No key id is presented, so we compare the bearer
/// token against every enabled credential's hash.
#[derive(Debug, Clone)]
pub struct ProvisioningAuth {
    pub credential: ProvisioningCredential,
}

impl FromRequestParts<crate::state::AppState> for ProvisioningAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::state::AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let credentials = state.persistence.identity.list_provisioning_credentials().await?;
        let matched = credentials
            .into_iter()
            .filter(|c| c.enabled)
            .find(|c| verify_provisioning_credential(&token, &c.credential_hash).is_ok())
            .ok_or(ApiError::invalid_credential())?;

        state
            .persistence
            .identity
            .touch_provisioning_credential(matched.id, Utc::now())
            .await?;

        Ok(ProvisioningAuth { credential: matched })
    }
}

fn bearer_token(parts: &Parts) -> ApiResult<String> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::invalid_credential())?;
    header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(ApiError::invalid_credential())
}

fn header_str(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}
