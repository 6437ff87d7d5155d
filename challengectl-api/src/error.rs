//! API-facing error shape (§7). Mirrors the teacher's `ErrorCode`/`ApiError`
//! exactly: a status-family enum, a struct with convenience constructors per
//! category, and `IntoResponse` rendering a generic message while the real
//! cause is logged server-side — §7's "no error surface ever leaks stack
//! detail, credential material, or presented TOTP codes" rule.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use challengectl_core::{AuthError, AuthzError, CoreError, StateError, StoreError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Authentication (§7) — all surfaced generically to prevent enumeration.
    InvalidCredential,
    // Authorization
    PermissionDenied,
    // Validation
    BadRequest,
    // Conflict
    Conflict,
    // State
    NotAssignedToYou,
    NotInExpectedState,
    // Transient
    WriterBusy,
    RateLimited,
    UpstreamIo,
    // Fatal
    InvariantViolated,
    StoreCorruption,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorCode::InvalidCredential => StatusCode::UNAUTHORIZED,
            ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::NotAssignedToYou | ErrorCode::NotInExpectedState => StatusCode::CONFLICT,
            ErrorCode::WriterBusy | ErrorCode::UpstreamIo => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InvariantViolated | ErrorCode::StoreCorruption | ErrorCode::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::InvalidCredential => "invalid credential",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::BadRequest => "bad request",
            ErrorCode::Conflict => "conflict",
            ErrorCode::NotAssignedToYou => "not assigned to you",
            ErrorCode::NotInExpectedState => "not in expected state",
            ErrorCode::WriterBusy => "writer busy, retry shortly",
            ErrorCode::RateLimited => "rate limited",
            ErrorCode::UpstreamIo => "upstream I/O error",
            ErrorCode::InvariantViolated => "internal invariant violated",
            ErrorCode::StoreCorruption => "storage error",
            ErrorCode::NotFound => "not found",
            ErrorCode::Internal => "internal error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn invalid_credential() -> Self {
        Self::new(ErrorCode::InvalidCredential, ErrorCode::InvalidCredential.default_message())
    }

    pub fn permission_denied(permission: &str) -> Self {
        Self::new(
            ErrorCode::PermissionDenied,
            format!("permission denied: {permission}"),
        )
    }

    pub fn bad_request(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, format!("{field}: {}", reason.into()))
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, reason.into())
    }

    pub fn not_found(entity: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{entity} not found"))
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(ErrorCode::RateLimited, ErrorCode::RateLimited.default_message())
            .with_details(format!("retry_after={retry_after_secs}"))
    }

    pub fn writer_busy() -> Self {
        Self::new(ErrorCode::WriterBusy, ErrorCode::WriterBusy.default_message())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        tracing::error!(reason = %reason.into(), "internal error");
        Self::new(ErrorCode::Internal, ErrorCode::Internal.default_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        (status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Store(e) => e.into(),
            CoreError::Auth(e) => e.into(),
            CoreError::Authz(e) => e.into(),
            CoreError::Validation(e) => e.into(),
            CoreError::State(e) => e.into(),
            CoreError::Config(e) => {
                tracing::error!(error = %e, "configuration error surfaced to a request");
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                tracing::debug!(entity, id, "store: not found");
                ApiError::not_found(entity)
            }
            StoreError::Conflict { reason } => ApiError::conflict(reason),
            StoreError::Busy => ApiError::writer_busy(),
            StoreError::InvariantViolation { reason } => {
                tracing::error!(reason, "invariant violated");
                ApiError::new(ErrorCode::InvariantViolated, ErrorCode::InvariantViolated.default_message())
            }
            StoreError::Backend { reason } => {
                tracing::error!(reason, "store backend error");
                ApiError::new(ErrorCode::StoreCorruption, ErrorCode::StoreCorruption.default_message())
            }
        }
    }
}

/// §7: every `AuthError` variant collapses to the same generic message; the
/// variant only exists to drive the `warn!` log that carries the real cause.
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::warn!(kind = %err, "authentication failure");
        ApiError::invalid_credential()
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::PermissionDenied { permission } => ApiError::permission_denied(&permission),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MissingField { field } => ApiError::bad_request(&field, "required"),
            ValidationError::InvalidValue { field, reason } => ApiError::bad_request(&field, reason),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotAssignedToYou => {
                ApiError::new(ErrorCode::NotAssignedToYou, ErrorCode::NotAssignedToYou.default_message())
            }
            StateError::NotInExpectedState { reason } => {
                ApiError::new(ErrorCode::NotInExpectedState, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_collapses_to_generic_message() {
        let api_err: ApiError = AuthError::HostMismatch.into();
        assert_eq!(api_err.message, "invalid credential");
        assert_eq!(api_err.code, ErrorCode::InvalidCredential);
    }

    #[test]
    fn not_found_carries_entity_name() {
        let api_err: ApiError = StoreError::NotFound {
            entity: "agent",
            id: "abc".into(),
        }
        .into();
        assert_eq!(api_err.code, ErrorCode::NotFound);
        assert!(api_err.message.contains("agent"));
    }

    #[test]
    fn status_codes_match_families() {
        assert_eq!(ErrorCode::InvalidCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::PermissionDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
