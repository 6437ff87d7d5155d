//! The single-writer / many-reader discipline (§4.1, §5).
//!
//! `with_write` serializes callers behind a process-wide `tokio::sync::Mutex`
//! and wraps the body in a real `BEGIN`/`COMMIT` pair so every invariant in
//! §3 is enforced transactionally, exactly like the backend's own advisory
//! locking the spec gestures at (`BEGIN IMMEDIATE` on a single-file
//! database) — just expressed against Postgres instead of swapping the
//! storage engine out from under the teacher's dependency stack.
//!
//! `with_read` never touches the writer lock; readers may observe state
//! from immediately before any concurrent writer committed (§4.1).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use challengectl_core::StoreError;
use deadpool_postgres::{Object, Pool};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

/// How long a caller waits to acquire the writer before failing `Busy`.
const WRITER_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection borrowed for the duration of one write transaction.
/// `BEGIN` has already run by the time a closure sees this; `COMMIT` or
/// `ROLLBACK` runs after the closure returns.
pub struct WriteConn {
    conn: Object,
}

impl WriteConn {
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        self.conn.execute(sql, params).await.map_err(backend_err)
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        self.conn.query(sql, params).await.map_err(backend_err)
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, StoreError> {
        self.conn.query_opt(sql, params).await.map_err(backend_err)
    }

    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, StoreError> {
        self.conn.query_one(sql, params).await.map_err(backend_err)
    }
}

/// A connection borrowed for one read. No transaction is opened; a plain
/// autocommit read runs under the pooled connection's own session.
pub struct ReadConn {
    conn: Object,
}

impl ReadConn {
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        self.conn.query(sql, params).await.map_err(backend_err)
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, StoreError> {
        self.conn.query_opt(sql, params).await.map_err(backend_err)
    }

    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, StoreError> {
        self.conn.query_one(sql, params).await.map_err(backend_err)
    }
}

fn backend_err(e: tokio_postgres::Error) -> StoreError {
    StoreError::Backend {
        reason: e.to_string(),
    }
}

/// Owns the pool and the writer mutex. Cloned freely (the pool and the
/// `Arc<Mutex<_>>` are both cheap to clone); every clone serializes against
/// the same writer.
#[derive(Clone)]
pub struct Writer {
    pool: Pool,
    writer_lock: Arc<Mutex<()>>,
}

impl Writer {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            writer_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Acquires the exclusive writer, runs `f` inside `BEGIN`/`COMMIT`.
    /// Any error returned by `f` rolls back the entire transaction and is
    /// propagated unchanged (§7 propagation rule).
    pub async fn with_write<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&WriteConn) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let _permit = tokio::time::timeout(WRITER_ACQUIRE_TIMEOUT, self.writer_lock.lock())
            .await
            .map_err(|_| StoreError::Busy)?;

        let conn = self.pool.get().await.map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })?;
        conn.batch_execute("BEGIN").await.map_err(backend_err)?;

        let wc = WriteConn { conn };
        let result = f(&wc).await;

        match &result {
            Ok(_) => {
                wc.conn.batch_execute("COMMIT").await.map_err(backend_err)?;
            }
            Err(_) => {
                // Best-effort: the connection is dropped and recycled by
                // the pool even if ROLLBACK itself fails.
                let _ = wc.conn.batch_execute("ROLLBACK").await;
            }
        }

        result
    }

    /// May run concurrently with other readers and with a writer; does not
    /// wait on the writer lock.
    pub async fn with_read<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&ReadConn) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let conn = self.pool.get().await.map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })?;
        let rc = ReadConn { conn };
        f(&rc).await
    }
}
