//! The ChallengeCtl store: one Postgres-backed relational database behind
//! a single-writer/many-reader discipline (§4.1, §5), plus a
//! content-addressed filesystem blob store for challenge payload
//! artifacts (§4.4).
//!
//! `Store` bundles the agent/challenge/transmission operations that
//! compose into the Assignment Engine's transactions; `IdentityStore`,
//! `RecordingStore`, and `ArtifactStore` cover the remaining tables,
//! kept separate because they're used by mostly disjoint callers
//! (operator auth, the Recording Coordinator, file upload) rather than
//! because they need a different transaction discipline — all four
//! share the same `Writer`.

mod artifacts;
mod config;
mod identity_store;
mod recording_store;
mod rowmap;
mod schema;
mod store;
mod writer;

pub use artifacts::ArtifactStore;
pub use config::DbConfig;
pub use identity_store::IdentityStore;
pub use recording_store::RecordingStore;
pub use schema::bootstrap;
pub use store::{is_agent_stale, Store};
pub use writer::{ReadConn, WriteConn, Writer};

use std::path::PathBuf;

use challengectl_core::CoreResult;

/// Everything a running ChallengeCtl process needs from persistence,
/// constructed once at startup and cloned into request/job handlers.
#[derive(Clone)]
pub struct Persistence {
    pub store: Store,
    pub identity: IdentityStore,
    pub recordings: RecordingStore,
    pub artifacts: ArtifactStore,
}

impl Persistence {
    /// Creates the connection pool, runs schema bootstrap, and wires up
    /// every store module against the same `Writer`.
    pub async fn connect(db_config: &DbConfig, artifact_root: impl Into<PathBuf>) -> CoreResult<Self> {
        let pool = db_config.create_pool()?;

        {
            let client = pool.get().await.map_err(|e| {
                challengectl_core::ConfigError::InvalidValue {
                    field: "database".into(),
                    reason: format!("failed to acquire bootstrap connection: {e}"),
                }
            })?;
            bootstrap(&client).await.map_err(|e| {
                challengectl_core::ConfigError::InvalidValue {
                    field: "database".into(),
                    reason: format!("schema bootstrap failed: {e}"),
                }
            })?;
        }

        let writer = Writer::new(pool);

        Ok(Self {
            store: Store::new(writer.clone()),
            identity: IdentityStore::new(writer.clone()),
            recordings: RecordingStore::new(writer.clone()),
            artifacts: ArtifactStore::new(writer, artifact_root),
        })
    }
}
