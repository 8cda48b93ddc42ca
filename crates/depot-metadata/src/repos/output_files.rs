//! Content-addressed output file repository.

use crate::MetadataResult;
use crate::models::OutputFileRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for job execution output records.
#[async_trait]
pub trait OutputFileRepo: Send + Sync {
    /// Record an output. Recording the same `(execution, checksum)` twice
    /// is a no-op, matching the idempotent physical write.
    async fn record_output_file(&self, row: &OutputFileRow) -> MetadataResult<()>;

    /// Get one output record.
    async fn get_output_file(
        &self,
        execution_id: Uuid,
        checksum: &str,
    ) -> MetadataResult<Option<OutputFileRow>>;

    /// All outputs of an execution, ordered by checksum.
    async fn list_output_files(&self, execution_id: Uuid) -> MetadataResult<Vec<OutputFileRow>>;

    /// Mark an output as downloaded.
    async fn mark_output_downloaded(
        &self,
        execution_id: Uuid,
        checksum: &str,
    ) -> MetadataResult<()>;

    /// Mark an output as deleted. Record cleanup is independent of the
    /// physical file's fate.
    async fn mark_output_deleted(&self, execution_id: Uuid, checksum: &str) -> MetadataResult<()>;
}
