//! HTTP/WS server for ChallengeCtl: the Identity & Session layer, the
//! Assignment Engine's public surface, the Recording Coordinator's
//! receiver protocol, and the maintenance sweeps that keep all three
//! consistent. Module layout mirrors the teacher's `caliber-api`: a thin
//! `routes` tree over `services`/`store`, `middleware` for the auth/rate-
//! limit seams, and `state` carrying everything through `FromRef`.

pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use config::{ApiConfig, AuthConfig, RateLimitConfig, RecordingConfig, SweepConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::build_router;
pub use state::AppState;

use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Wraps `routes::build_router()` with the CORS policy derived from
/// `ApiConfig` and the teacher's request-tracing layer. Split out from
/// `build_router` so tests can exercise routing without the HTTP-layer
/// concerns.
pub fn app(state: AppState) -> axum::Router {
    let cors = cors_layer(&state.api_config);

    build_router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(api_config: &ApiConfig) -> CorsLayer {
    let allow_origin = if api_config.cors_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<_> = api_config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::HeaderName::from_static("x-csrf-token")])
        .max_age(std::time::Duration::from_secs(api_config.cors_max_age_secs));

    if api_config.cors_allow_credentials {
        cors = cors.allow_credentials(true);
    }

    cors
}
