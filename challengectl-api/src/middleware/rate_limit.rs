//! §10 rate limiting: five independent buckets (login, verify_totp,
//! heartbeat, register/enroll, provisioning), each keyed by the entity
//! the bucket is supposed to throttle (source IP, agent id, or
//! provisioning key id). Adapted from the teacher's
//! `middleware::auth::RateLimitState`, generalized from its two-key
//! (Ip/Tenant) model to five named buckets with independent quotas.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};

use crate::config::{RateLimitBucket, RateLimitConfig};

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Bucket {
    Login,
    VerifyTotp,
    Heartbeat,
    Register,
    Provisioning,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct RateLimitKey {
    bucket: Bucket,
    subject: String,
}

pub struct RateLimiters {
    config: RateLimitConfig,
    limiters: DashMap<RateLimitKey, Arc<DirectRateLimiter>>,
}

impl RateLimiters {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: DashMap::new(),
        }
    }

    fn bucket_config(&self, bucket: Bucket) -> RateLimitBucket {
        match bucket {
            Bucket::Login => self.config.login,
            Bucket::VerifyTotp => self.config.verify_totp,
            Bucket::Heartbeat => self.config.heartbeat,
            Bucket::Register => self.config.register,
            Bucket::Provisioning => self.config.provisioning,
        }
    }

    /// Returns `Ok(())` if `subject` still has quota in `bucket`, or
    /// `Err(retry_after_secs)` once exhausted.
    pub fn check(&self, bucket: Bucket, subject: &str) -> Result<(), u64> {
        let key = RateLimitKey {
            bucket,
            subject: subject.to_string(),
        };
        let limiter = self.limiters.entry(key).or_insert_with(|| {
            let cfg = self.bucket_config(bucket);
            let requests = NonZeroU32::new(cfg.requests).unwrap_or(NonZeroU32::MIN);
            let quota = Quota::with_period(cfg.period / cfg.requests.max(1))
                .unwrap_or_else(|| Quota::per_second(requests))
                .allow_burst(requests);
            Arc::new(RateLimiter::direct(quota))
        });

        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until
                    .wait_time_from(DefaultClock::default().now())
                    .as_secs()
                    .max(1);
                Err(retry_after)
            }
        }
    }
}

pub struct RateLimitedError {
    pub retry_after: u64,
}

impl IntoResponse for RateLimitedError {
    fn into_response(self) -> Response {
        let body = crate::error::ApiError::rate_limited(self.retry_after);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

/// Checks `X-Forwarded-For` then `X-Real-IP` before falling back to the
/// connection's own address, matching the teacher's `extract_client_ip`.
pub fn client_ip_from_headers(headers: &axum::http::HeaderMap, fallback: IpAddr) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return ip;
        }
    }
    fallback
}

pub fn client_ip(request: &Request, fallback: IpAddr) -> IpAddr {
    client_ip_from_headers(request.headers(), fallback)
}

/// Per-bucket IP-keyed middleware, one `axum::middleware::from_fn` per
/// route group. Each just fixes the `Bucket` and otherwise shares the
/// same IP-extraction and quota-check logic.
macro_rules! ip_bucket_middleware {
    ($name:ident, $bucket:expr) => {
        pub async fn $name(
            State(limiters): State<Arc<RateLimiters>>,
            ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
            request: Request,
            next: Next,
        ) -> Result<Response, RateLimitedError> {
            let ip = client_ip(&request, addr.ip());
            limiters
                .check($bucket, &ip.to_string())
                .map_err(|retry_after| RateLimitedError { retry_after })?;
            Ok(next.run(request).await)
        }
    };
}

ip_bucket_middleware!(enforce_login_bucket, Bucket::Login);
ip_bucket_middleware!(enforce_verify_totp_bucket, Bucket::VerifyTotp);
ip_bucket_middleware!(enforce_register_bucket, Bucket::Register);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_quota_then_recovers_message() {
        let mut config = RateLimitConfig::default();
        config.login.requests = 2;
        config.login.period = std::time::Duration::from_secs(60);
        let limiters = RateLimiters::new(config);

        assert!(limiters.check(Bucket::Login, "1.2.3.4").is_ok());
        assert!(limiters.check(Bucket::Login, "1.2.3.4").is_ok());
        assert!(limiters.check(Bucket::Login, "1.2.3.4").is_err());
    }

    #[test]
    fn buckets_are_independent_per_subject() {
        let mut config = RateLimitConfig::default();
        config.login.requests = 1;
        let limiters = RateLimiters::new(config);

        assert!(limiters.check(Bucket::Login, "1.2.3.4").is_ok());
        assert!(limiters.check(Bucket::Login, "5.6.7.8").is_ok());
    }
}
