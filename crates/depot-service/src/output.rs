//! Content-addressed storage of job execution outputs.
//!
//! Walks an execution's output tree, hashes every regular file and
//! places it at `base_path/<execution_id>/<hash>`. A destination that
//! already carries the hash is not copied again, so re-running storage
//! for the same output is safe and cheap. Hashing and copying run on a
//! bounded worker pool independent of the request-dispatch pool.

use crate::ServiceResult;
use depot_core::{Checksum, OutputFile};
use depot_metadata::MetadataStore;
use depot_metadata::models::OutputFileRow;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Read size for streaming hashes (64 KiB).
const HASH_CHUNK_SIZE: usize = 64 * 1024;

pub struct OutputStorageService {
    store: Arc<dyn MetadataStore>,
    base_path: PathBuf,
    parallelism: usize,
}

impl OutputStorageService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        config: &depot_core::config::OutputConfig,
    ) -> Self {
        Self {
            store,
            base_path: config.base_path.clone(),
            parallelism: config.parallelism,
        }
    }

    /// Store every regular file under `source_tree` content-addressed.
    ///
    /// The traversal is ordered (paths sorted) and complete before any
    /// result is returned: the output list covers the whole tree or the
    /// call fails. Calling twice on the same tree yields the same
    /// checksums and performs no additional physical copy.
    pub async fn store_result(
        &self,
        execution_id: Uuid,
        source_tree: &Path,
    ) -> ServiceResult<Vec<OutputFile>> {
        let files = collect_regular_files(source_tree).await?;
        tracing::debug!(
            execution_id = %execution_id,
            count = files.len(),
            "Storing execution outputs"
        );

        let destination_dir = self.base_path.join(execution_id.to_string());
        tokio::fs::create_dir_all(&destination_dir).await?;

        // Bounded pool; `buffered` keeps results in traversal order.
        let outputs: Vec<OutputFile> = futures::stream::iter(files)
            .map(|path| self.store_one(execution_id, &destination_dir, path))
            .buffered(self.parallelism)
            .try_collect()
            .await?;
        Ok(outputs)
    }

    async fn store_one(
        &self,
        execution_id: Uuid,
        destination_dir: &Path,
        source: PathBuf,
    ) -> ServiceResult<OutputFile> {
        let (checksum, size_bytes) = hash_file(&source).await?;
        let destination = destination_dir.join(checksum.as_str());

        if !tokio::fs::try_exists(&destination).await? {
            let tmp = destination_dir.join(format!(".tmp-{}", Uuid::new_v4()));
            tokio::fs::copy(&source, &tmp).await?;
            if let Err(err) = tokio::fs::rename(&tmp, &destination).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(err.into());
            }
        } else {
            tracing::trace!(
                checksum = %checksum,
                "Output already stored, skipping copy"
            );
        }

        let row = OutputFileRow {
            execution_id,
            checksum: checksum.as_str().to_string(),
            size_bytes,
            url: format!("file://{}", destination.display()),
            created_at: OffsetDateTime::now_utc(),
            downloaded: false,
            deleted: false,
        };
        self.store.record_output_file(&row).await?;

        // Re-read the record: a concurrent or earlier run may have won
        // the insert, and its timestamps are the authoritative ones.
        let stored = self
            .store
            .get_output_file(execution_id, checksum.as_str())
            .await?
            .unwrap_or(row);
        Ok(stored.into_domain()?)
    }

    /// All recorded outputs of an execution.
    pub async fn list_result(&self, execution_id: Uuid) -> ServiceResult<Vec<OutputFile>> {
        let rows = self.store.list_output_files(execution_id).await?;
        let mut outputs = Vec::with_capacity(rows.len());
        for row in rows {
            outputs.push(row.into_domain()?);
        }
        Ok(outputs)
    }

    /// Mark an output as downloaded by its consumer.
    pub async fn mark_downloaded(
        &self,
        execution_id: Uuid,
        checksum: &Checksum,
    ) -> ServiceResult<()> {
        self.store
            .mark_output_downloaded(execution_id, checksum.as_str())
            .await?;
        Ok(())
    }

    /// Delete an output: best-effort removal of the backing file, then
    /// the record is marked deleted. A physical-storage blip is logged
    /// and the caller still gets a success so record cleanup proceeds.
    pub async fn delete_output(
        &self,
        execution_id: Uuid,
        checksum: &Checksum,
    ) -> ServiceResult<()> {
        let destination = self
            .base_path
            .join(execution_id.to_string())
            .join(checksum.as_str());
        match tokio::fs::remove_file(&destination).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::error!(
                    execution_id = %execution_id,
                    checksum = %checksum,
                    error = %err,
                    "Failed to delete output file, record cleanup proceeds"
                );
            }
        }
        self.store
            .mark_output_deleted(execution_id, checksum.as_str())
            .await?;
        Ok(())
    }
}

/// Collect every regular file under `root`, sorted by path.
///
/// The listing completes only once the whole tree under the top-level
/// directory has been traversed.
async fn collect_regular_files(root: &Path) -> ServiceResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
            // Symlinks and special files are not execution outputs.
        }
    }
    files.sort();
    Ok(files)
}

/// Streaming SHA-256 of one file, returning checksum and size.
async fn hash_file(path: &Path) -> ServiceResult<(Checksum, i64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Checksum::hasher();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut size: i64 = 0;
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        size += read as i64;
    }
    Ok((hasher.finalize(), size))
}
