//! Storage backend trait definitions.

use crate::error::BackendResult;
use async_trait::async_trait;
use depot_core::{Checksum, StorageType};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// A request to physically store one file on a backend.
#[derive(Clone, Debug)]
pub struct StoreFileRequest {
    pub checksum: Checksum,
    /// Local path the backend reads the file content from.
    pub origin_path: PathBuf,
    pub file_name: String,
    /// Optional sub-directory on the storage destination.
    pub subdirectory: Option<String>,
}

/// Result of a successful store operation.
#[derive(Clone, Debug)]
pub struct StoredFile {
    /// Backend-specific path where the file now lives.
    pub storage_path: String,
    pub size_bytes: i64,
}

/// Availability of one file as reported by a nearline backend.
#[derive(Clone, Copy, Debug)]
pub struct NearlineAvailability {
    pub available: bool,
    /// When the directly accessible copy expires, if the backend knows.
    pub expiration: Option<OffsetDateTime>,
}

/// One pluggable storage backend, resolved by storage name.
///
/// Implementations must be safe to call concurrently; the dispatcher
/// issues operations for different files in parallel.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The tier this backend belongs to.
    fn storage_type(&self) -> StorageType;

    /// Store the file described by `request`, returning its new location.
    async fn store(&self, request: &StoreFileRequest) -> BackendResult<StoredFile>;

    /// Physically delete the file at `storage_path`. Deleting a file that
    /// is already gone is a success.
    async fn delete(&self, storage_path: &str) -> BackendResult<()>;

    /// Report whether the file is directly accessible right now.
    ///
    /// Online backends always answer yes. Nearline backends answer yes
    /// only while a restored copy sits in their staging area.
    async fn check_availability(
        &self,
        checksum: &Checksum,
        storage_path: &str,
    ) -> BackendResult<NearlineAvailability>;

    /// Copy the file at `storage_path` to `destination` on the local
    /// filesystem, triggering a recall from the archive tier if needed.
    /// Returns the number of bytes written.
    async fn restore(&self, storage_path: &str, destination: &Path) -> BackendResult<u64>;
}
