//! Operator API surface (§6.3): every route here requires `OperatorAuth`
//! via the extractor on each handler, with mutating routes additionally
//! checking the CSRF token. Nested under `/operator` by the parent router.

mod agents;
mod challenges;
mod enrollment;
mod provisioning;
mod system;
mod users;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/agents", agents::router())
        .nest("/challenges", challenges::router())
        .nest("/enrollment-tokens", enrollment::router())
        .nest("/provisioning-credentials", provisioning::router())
        .nest("/users", users::router())
        .merge(system::router())
}

/// The stateless-automated `/provision` endpoint lives outside
/// `OperatorAuth` entirely (it's gated by `ProvisioningAuth` instead), so
/// it's mounted separately by the parent router rather than nested here.
pub fn provisioning_router() -> Router<AppState> {
    enrollment::provisioning_router()
}
