//! Route assembly. Each protocol surface gets its own module and its own
//! `Router<AppState>`; this module only nests them under their path
//! prefixes, the way the teacher's `routes::create_api_router` nests
//! per-resource routers under `/api/v1`.

pub mod auth;
pub mod operator;
pub mod receiver;
pub mod worker;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws::{agent_ws_handler, operator_ws_handler};

async fn health() -> &'static str {
    "ok"
}

/// Builds the full application router. `/operator/provision` is merged in
/// from a router built separately from `operator::router()` since it
/// authenticates with a provisioning credential instead of `OperatorAuth`
/// (§4.3) — the two trees share a path prefix but not a gate.
pub fn build_router() -> Router<AppState> {
    let operator = operator::router().merge(operator::provisioning_router());

    Router::new()
        .route("/healthz", get(health))
        .nest("/worker", worker::router())
        .nest("/receiver", receiver::router())
        .nest("/auth", auth::router())
        .nest("/operator", operator)
        .route("/ws/operator", get(operator_ws_handler))
        .route("/ws/agent", get(agent_ws_handler))
}
