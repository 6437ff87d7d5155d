//! ChallengeCtl server entry point: loads the controller config, brings
//! up persistence, spawns the maintenance sweeps, and serves the axum
//! app. Shaped like the teacher's `caliber-api` `main.rs` (config, then
//! db, then router, then bind-and-serve-with-graceful-shutdown) with
//! OpenTelemetry swapped for a plain `tracing_subscriber` init since
//! this domain has no collector to export to.

use std::net::SocketAddr;
use std::sync::Arc;

use challengectl_api::config::{ApiConfig, AuthConfig, RateLimitConfig, RecordingConfig, SweepConfig};
use challengectl_api::middleware::rate_limit::RateLimiters;
use challengectl_api::ws::EventBus;
use challengectl_api::{app, AppState};
use challengectl_core::ControllerConfig;
use challengectl_store::{DbConfig, Persistence};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> challengectl_core::CoreResult<()> {
    init_tracing();

    let config_path =
        std::env::var("CHALLENGECTL_CONFIG_PATH").unwrap_or_else(|_| "challengectl.yaml".to_string());
    let controller_config = if std::path::Path::new(&config_path).exists() {
        ControllerConfig::from_file(&config_path)?.apply_env_overrides()
    } else {
        tracing::warn!(path = %config_path, "no controller config file found, using defaults");
        ControllerConfig::from_yaml_str("{}")?.apply_env_overrides()
    };

    let db_config = DbConfig::from_env();
    let artifact_root =
        std::env::var("CHALLENGECTL_ARTIFACT_ROOT").unwrap_or_else(|_| "./artifacts".to_string());
    let persistence = Persistence::connect(&db_config, artifact_root).await?;

    let imported = persistence
        .store
        .import_challenge_specs(
            &controller_config
                .challenges
                .iter()
                .map(|c| (c.name.clone(), c.spec.clone(), c.priority, c.enabled))
                .collect::<Vec<_>>(),
        )
        .await
        .map_err(challengectl_core::CoreError::Store)?;
    tracing::info!(imported, "seeded initial challenges from controller config");

    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();
    let sweep_config = SweepConfig::from_env();
    let recording_config = RecordingConfig::from_env();
    let rate_limit_config = RateLimitConfig::default();

    let events = EventBus::new();
    let rate_limiters = Arc::new(RateLimiters::new(rate_limit_config));
    let replay_cache = Arc::new(challengectl_api::auth::TotpReplayCache::new());
    let sweep_metrics = Arc::new(challengectl_api::jobs::SweepMetrics::new());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweep_handle = tokio::spawn(challengectl_api::jobs::run_sweeps(
        persistence.clone(),
        events.clone(),
        sweep_config.clone(),
        replay_cache.clone(),
        sweep_metrics.clone(),
        shutdown_rx,
    ));

    let bind_address = controller_config.bind_address.clone();
    let bind_port = controller_config.bind_port;

    let state = AppState {
        persistence,
        controller_config: Arc::new(controller_config),
        api_config: Arc::new(api_config),
        auth_config: Arc::new(auth_config),
        sweep_config: Arc::new(sweep_config),
        recording_config: Arc::new(recording_config),
        rate_limiters,
        replay_cache,
        sweep_metrics,
        events,
        started_at: std::time::Instant::now(),
    };

    let router = app(state);

    let addr: SocketAddr = format!("{bind_address}:{bind_port}")
        .parse()
        .map_err(|e| challengectl_core::ConfigError::InvalidValue {
            field: "bind_address".into(),
            reason: format!("{e}"),
        })?;

    tracing::info!(%addr, "starting ChallengeCtl controller");
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        challengectl_core::ConfigError::InvalidValue {
            field: "bind_address".into(),
            reason: format!("failed to bind {addr}: {e}"),
        }
    })?;

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = sweep_handle.await;

    Ok(())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("challengectl_api=info,tower_http=info,info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
}
