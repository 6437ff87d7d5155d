//! Error taxonomy for ChallengeCtl (§7 of the design).
//!
//! Leaf error enums group by concern, a master `CoreError` composes them with
//! `#[from]`, mirroring how the Store, the Assignment Engine, and the API
//! layer each surface typed failures instead of panicking.

use thiserror::Error;

/// Errors from the Store's transactional interface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("writer busy")]
    Busy,

    #[error("storage backend error: {reason}")]
    Backend { reason: String },
}

/// Authentication failures. All are surfaced to callers as a single generic
/// message (§7); the variant only drives logging and status-code choice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential")]
    Invalid,

    #[error("credential expired")]
    Expired,

    #[error("host identity mismatch")]
    HostMismatch,

    #[error("replayed one-time code")]
    Replay,
}

/// Authorization failures: the caller is known, but lacks a permission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("permission denied: {permission}")]
    PermissionDenied { permission: String },
}

/// Request validation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// State-machine violations: the request is well-formed but not valid given
/// current entity state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("challenge is not assigned to this agent")]
    NotAssignedToYou,

    #[error("entity is not in the expected state: {reason}")]
    NotInExpectedState { reason: String },
}

/// Configuration loading/parsing failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type threaded through Store, engine, and API layers.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Authz(#[from] AuthzError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    State(#[from] StateError),

    #[error("{0}")]
    Config(#[from] ConfigError),
}

pub type CoreResult<T> = Result<T, CoreError>;
