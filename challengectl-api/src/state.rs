//! Shared application state, threaded into every handler via axum's
//! `FromRef`, mirroring the teacher's `state.rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRef;
use challengectl_core::ControllerConfig;
use challengectl_store::Persistence;

use crate::auth::SharedReplayCache;
use crate::config::{ApiConfig, AuthConfig, RecordingConfig, SweepConfig};
use crate::jobs::SweepMetrics;
use crate::middleware::rate_limit::RateLimiters;
use crate::ws::EventBus;

#[derive(Clone)]
pub struct AppState {
    pub persistence: Persistence,
    pub controller_config: Arc<ControllerConfig>,
    pub api_config: Arc<ApiConfig>,
    pub auth_config: Arc<AuthConfig>,
    pub sweep_config: Arc<SweepConfig>,
    pub recording_config: Arc<RecordingConfig>,
    pub rate_limiters: Arc<RateLimiters>,
    pub replay_cache: SharedReplayCache,
    pub sweep_metrics: Arc<SweepMetrics>,
    pub events: EventBus,
    pub started_at: Instant,
}

/// Generates `impl FromRef<AppState> for $ty` that clones `$field` out of
/// the shared state, the way the teacher's `impl_from_ref!` macro does, so
/// individual extractors (e.g. `State<Arc<ApiConfig>>`) don't need the
/// whole `AppState`.
macro_rules! impl_from_ref {
    ($ty:ty, $field:ident) => {
        impl FromRef<AppState> for $ty {
            fn from_ref(state: &AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

impl_from_ref!(Persistence, persistence);
impl_from_ref!(Arc<ControllerConfig>, controller_config);
impl_from_ref!(Arc<ApiConfig>, api_config);
impl_from_ref!(Arc<AuthConfig>, auth_config);
impl_from_ref!(Arc<SweepConfig>, sweep_config);
impl_from_ref!(Arc<RecordingConfig>, recording_config);
impl_from_ref!(Arc<RateLimiters>, rate_limiters);
impl_from_ref!(SharedReplayCache, replay_cache);
impl_from_ref!(Arc<SweepMetrics>, sweep_metrics);
impl_from_ref!(EventBus, events);
