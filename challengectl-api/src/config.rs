//! Process configuration for the API crate (SPEC_FULL.md §1), mirroring the
//! teacher's `ApiConfig::from_env()` pattern, extended with the auth, sweep,
//! and recording-coordinator knobs this domain needs.

use std::time::Duration;

/// CORS and rate-limit knobs, shaped exactly like the teacher's `ApiConfig`.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub cors_origins: Vec<String>,
    pub cors_allow_credentials: bool,
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: true,
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// `CHALLENGECTL_CORS_ORIGINS` (comma-separated; empty = allow all dev-mode),
    /// `CHALLENGECTL_CORS_ALLOW_CREDENTIALS`, `CHALLENGECTL_CORS_MAX_AGE_SECS`.
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("CHALLENGECTL_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("CHALLENGECTL_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let cors_max_age_secs = std::env::var("CHALLENGECTL_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86400);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }
        self.cors_origins.iter().any(|allowed| allowed == origin)
    }
}

/// §10 rate-limit bucket definitions. Each is its own `governor` quota,
/// keyed the way `middleware::rate_limit` decides (by IP, agent id, or
/// provisioning key id per bucket).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitBucket {
    pub requests: u32,
    pub period: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// login, verify_totp: 5/15min per source IP.
    pub login: RateLimitBucket,
    pub verify_totp: RateLimitBucket,
    /// heartbeat: 1000/min per agent.
    pub heartbeat: RateLimitBucket,
    /// register/enroll: 100/min per source IP.
    pub register: RateLimitBucket,
    /// provisioning: 100/hour per provisioning key id.
    pub provisioning: RateLimitBucket,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RateLimitBucket { requests: 5, period: Duration::from_secs(15 * 60) },
            verify_totp: RateLimitBucket { requests: 5, period: Duration::from_secs(15 * 60) },
            heartbeat: RateLimitBucket { requests: 1000, period: Duration::from_secs(60) },
            register: RateLimitBucket { requests: 100, period: Duration::from_secs(60) },
            provisioning: RateLimitBucket { requests: 100, period: Duration::from_secs(60 * 60) },
        }
    }
}

/// Auth knobs: TOTP window, bcrypt cost, cookie names (SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
    pub session_cookie_name: String,
    pub csrf_cookie_name: String,
    /// §4.2: an agent whose heartbeat is this stale is treated as
    /// reconnecting and skips host-binding comparison.
    pub host_binding_grace_secs: i64,
    /// §4.2: minimum matching host-identity factors required otherwise.
    pub host_binding_min_factors: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: 12,
            session_cookie_name: "cc_session".to_string(),
            csrf_cookie_name: "cc_csrf".to_string(),
            host_binding_grace_secs: 90,
            host_binding_min_factors: 2,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(cost) = std::env::var("CHALLENGECTL_BCRYPT_COST") {
            if let Ok(cost) = cost.parse() {
                config.bcrypt_cost = cost;
            }
        }
        config
    }
}

/// §4.7 Maintenance sweep intervals, matching the teacher's
/// `SagaCleanupConfig::from_env()` shape.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub agent_offline_interval: Duration,
    pub assignment_expiry_interval: Duration,
    pub session_expiry_interval: Duration,
    pub totp_replay_interval: Duration,
    /// §4.2: agent heartbeat silence threshold before offline/reconnect-grace.
    pub agent_stale_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            agent_offline_interval: Duration::from_secs(30),
            assignment_expiry_interval: Duration::from_secs(30),
            session_expiry_interval: Duration::from_secs(60),
            totp_replay_interval: Duration::from_secs(60),
            agent_stale_after: Duration::from_secs(90),
        }
    }
}

impl SweepConfig {
    /// `CHALLENGECTL_SWEEP_AGENT_OFFLINE_SECS`, `..._ASSIGNMENT_EXPIRY_SECS`,
    /// `..._SESSION_EXPIRY_SECS`, `..._TOTP_REPLAY_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_u64("CHALLENGECTL_SWEEP_AGENT_OFFLINE_SECS") {
            config.agent_offline_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CHALLENGECTL_SWEEP_ASSIGNMENT_EXPIRY_SECS") {
            config.assignment_expiry_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CHALLENGECTL_SWEEP_SESSION_EXPIRY_SECS") {
            config.session_expiry_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CHALLENGECTL_SWEEP_TOTP_REPLAY_SECS") {
            config.totp_replay_interval = Duration::from_secs(secs);
        }
        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// §4.6 Recording Coordinator thresholds.
#[derive(Debug, Clone, Copy)]
pub struct RecordingConfig {
    pub score_threshold: f64,
    /// Dispatched-recording slack before expected-start (§4.6 step 2).
    pub start_slack_secs: i64,
    pub default_duration_secs: i64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            score_threshold: 10.0,
            start_slack_secs: 2,
            default_duration_secs: 30,
        }
    }
}

impl RecordingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(t) = std::env::var("CHALLENGECTL_RECORDING_SCORE_THRESHOLD") {
            if let Ok(t) = t.parse() {
                config.score_threshold = t;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_limits_match_spec() {
        let config = RateLimitConfig::default();
        assert_eq!(config.login.requests, 5);
        assert_eq!(config.heartbeat.requests, 1000);
        assert_eq!(config.provisioning.period, Duration::from_secs(3600));
    }

    #[test]
    fn default_bcrypt_cost_is_twelve() {
        assert_eq!(AuthConfig::default().bcrypt_cost, 12);
    }

    #[test]
    fn cors_allows_all_in_dev_mode() {
        let config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.example"));
    }
}
