//! File reference repository.

use crate::MetadataResult;
use crate::models::FileReferenceRow;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Repository for file references and their owners.
#[async_trait]
pub trait FileReferenceRepo: Send + Sync {
    /// Insert or update a reference. Owners are managed separately.
    async fn upsert_reference(&self, row: &FileReferenceRow) -> MetadataResult<()>;

    /// Get a reference by its identity.
    async fn get_reference(
        &self,
        checksum: &str,
        storage_name: &str,
    ) -> MetadataResult<Option<FileReferenceRow>>;

    /// Find all references matching any of the given checksums, on any
    /// storage.
    async fn find_references_by_checksums(
        &self,
        checksums: &[String],
    ) -> MetadataResult<Vec<FileReferenceRow>>;

    /// Find references on one storage matching any of the given checksums.
    async fn find_references_by_storage_and_checksums(
        &self,
        storage_name: &str,
        checksums: &[String],
    ) -> MetadataResult<Vec<FileReferenceRow>>;

    /// Add owners to a reference. Adding an existing owner is a no-op.
    async fn add_reference_owners(
        &self,
        checksum: &str,
        storage_name: &str,
        owners: &[String],
    ) -> MetadataResult<()>;

    /// Remove one owner and return how many owners remain.
    async fn remove_reference_owner(
        &self,
        checksum: &str,
        storage_name: &str,
        owner: &str,
    ) -> MetadataResult<u64>;

    /// Owners of a reference.
    async fn get_reference_owners(
        &self,
        checksum: &str,
        storage_name: &str,
    ) -> MetadataResult<BTreeSet<String>>;

    /// Memoize the nearline confirmation flag.
    async fn set_nearline_confirmed(
        &self,
        checksum: &str,
        storage_name: &str,
        confirmed: bool,
    ) -> MetadataResult<()>;

    /// Delete a reference and its owners.
    async fn delete_reference(&self, checksum: &str, storage_name: &str) -> MetadataResult<()>;
}
