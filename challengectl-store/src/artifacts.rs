//! Content-addressed artifact storage (§4.4).
//!
//! Payload files (images, audio, arbitrary blobs referenced by a
//! challenge's `payload_artifact_hash`) are written to a temp file while
//! hashing with SHA-256, then atomically renamed into place at
//! `<root>/<hash>`. If a blob with that hash already exists, the temp
//! file is discarded instead — content-addressing makes storage
//! naturally deduplicated.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use challengectl_core::{Artifact, StoreError};

use crate::writer::Writer;

#[derive(Clone)]
pub struct ArtifactStore {
    writer: Writer,
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(writer: Writer, root: impl Into<PathBuf>) -> Self {
        Self {
            writer,
            root: root.into(),
        }
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// Streams `bytes` to a temp file under `root`, hashing as it goes,
    /// then renames into its final content-addressed location. Returns
    /// the artifact metadata row, inserting it only if this hash hasn't
    /// been seen before (§4.4 dedup invariant).
    pub async fn store_bytes(
        &self,
        bytes: &[u8],
        original_filename: &str,
        media_type: &str,
    ) -> Result<Artifact, StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(io_err)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hex::encode(hasher.finalize());

        let final_path = self.blob_path(&hash);
        if tokio::fs::metadata(&final_path).await.is_err() {
            let tmp_path = self.root.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
            let mut tmp = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
            tmp.write_all(bytes).await.map_err(io_err)?;
            tmp.flush().await.map_err(io_err)?;
            drop(tmp);
            tokio::fs::rename(&tmp_path, &final_path)
                .await
                .map_err(io_err)?;
        }

        let now = Utc::now();
        let size_bytes = bytes.len() as i64;
        let storage_path = final_path.to_string_lossy().into_owned();

        self.writer
            .with_write(|wc| {
                let hash = hash.clone();
                let original_filename = original_filename.to_string();
                let media_type = media_type.to_string();
                let storage_path = storage_path.clone();
                async move {
                    let existing = wc
                        .query_opt("SELECT hash FROM artifacts WHERE hash = $1", &[&hash])
                        .await?;
                    if existing.is_none() {
                        wc.execute(
                            "INSERT INTO artifacts
                             (hash, original_filename, size_bytes, media_type, storage_path, created_at)
                             VALUES ($1, $2, $3, $4, $5, $6)",
                            &[
                                &hash,
                                &original_filename,
                                &size_bytes,
                                &media_type,
                                &storage_path,
                                &now,
                            ],
                        )
                        .await?;
                    }
                    Ok(Artifact {
                        hash,
                        original_filename,
                        size_bytes,
                        media_type,
                        storage_path,
                        created_at: now,
                    })
                }
            })
            .await
    }

    pub async fn get_metadata(&self, hash: &str) -> Result<Option<Artifact>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let row = rc
                    .query_opt("SELECT * FROM artifacts WHERE hash = $1", &[&hash])
                    .await?;
                Ok(row.map(|r| Artifact {
                    hash: r.get("hash"),
                    original_filename: r.get("original_filename"),
                    size_bytes: r.get("size_bytes"),
                    media_type: r.get("media_type"),
                    storage_path: r.get("storage_path"),
                    created_at: r.get("created_at"),
                }))
            })
            .await
    }

    pub async fn list_metadata(&self) -> Result<Vec<Artifact>, StoreError> {
        self.writer
            .with_read(|rc| async move {
                let rows = rc
                    .query("SELECT * FROM artifacts ORDER BY created_at DESC", &[])
                    .await?;
                Ok(rows
                    .iter()
                    .map(|r| Artifact {
                        hash: r.get("hash"),
                        original_filename: r.get("original_filename"),
                        size_bytes: r.get("size_bytes"),
                        media_type: r.get("media_type"),
                        storage_path: r.get("storage_path"),
                        created_at: r.get("created_at"),
                    })
                    .collect())
            })
            .await
    }

    /// Refuses to delete a blob still referenced by any challenge's
    /// `spec->>'payload_artifact_hash'` (§4.4). The caller is expected to
    /// have already confirmed the challenge that owned this artifact was
    /// deleted or updated to drop the reference.
    pub async fn delete(&self, hash: &str) -> Result<(), StoreError> {
        let path = self.blob_path(hash);
        self.writer
            .with_write(|wc| {
                let path = path.clone();
                async move {
                    let referenced = wc
                        .query_opt(
                            "SELECT 1 FROM challenges WHERE spec ->> 'payload_artifact_hash' = $1",
                            &[&hash],
                        )
                        .await?;
                    if referenced.is_some() {
                        return Err(StoreError::Conflict {
                            reason: format!("artifact {hash} is still referenced by a challenge"),
                        });
                    }
                    wc.execute("DELETE FROM artifacts WHERE hash = $1", &[&hash])
                        .await?;
                    let _ = tokio::fs::remove_file(&path).await;
                    Ok(())
                }
            })
            .await
    }

    pub async fn read_bytes(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(hash);
        tokio::fs::read(&path).await.map_err(io_err)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Backend {
        reason: format!("artifact storage I/O error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        let mut hasher = Sha256::new();
        hasher.update(b"");
        let hash = hex::encode(hasher.finalize());
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85"
        );
    }
}
