//! Connection pool configuration, mirroring the teacher's `DbConfig`
//! (`from_env` + `create_pool`), minus the pgrx-extension assumptions.

use challengectl_core::{ConfigError, CoreResult};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_size: usize,
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "challengectl".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Environment variables:
    /// - `CHALLENGECTL_DB_HOST`, `CHALLENGECTL_DB_PORT`, `CHALLENGECTL_DB_NAME`,
    ///   `CHALLENGECTL_DB_USER`, `CHALLENGECTL_DB_PASSWORD`, `CHALLENGECTL_DB_POOL_SIZE`,
    ///   `CHALLENGECTL_DB_TIMEOUT`.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("CHALLENGECTL_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("CHALLENGECTL_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("CHALLENGECTL_DB_NAME").unwrap_or_else(|_| "challengectl".to_string()),
            user: std::env::var("CHALLENGECTL_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("CHALLENGECTL_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("CHALLENGECTL_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("CHALLENGECTL_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    pub fn create_pool(&self) -> CoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                ConfigError::InvalidValue {
                    field: "database".into(),
                    reason: format!("failed to create pool: {e}"),
                }
                .into()
            })
    }
}
