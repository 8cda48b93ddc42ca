//! Local filesystem online backend.

use crate::error::{BackendError, BackendResult};
use crate::traits::{NearlineAvailability, StorageBackend, StoreFileRequest, StoredFile};
use async_trait::async_trait;
use depot_core::{Checksum, StorageType};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;
use uuid::Uuid;

/// Online object store backed by a local directory (or mounted share).
///
/// Files are placed at `<subdirectory>/<checksum prefix>/<checksum>`;
/// writes go through a temp file and an atomic rename so a crashed store
/// never leaves a partial file at the final path.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Validate a storage path and join it under the root.
    ///
    /// Rejects absolute paths and any non-normal component, so a stored
    /// path can never escape the backend root.
    fn resolve(&self, storage_path: &str) -> BackendResult<PathBuf> {
        if storage_path.is_empty() || storage_path.starts_with('/') || storage_path.contains("..") {
            return Err(BackendError::InvalidPath(storage_path.to_string()));
        }
        for component in Path::new(storage_path).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => return Err(BackendError::InvalidPath(storage_path.to_string())),
            }
        }
        Ok(self.root.join(storage_path))
    }

    fn layout_path(request: &StoreFileRequest) -> String {
        let checksum = request.checksum.as_str();
        let shard = &checksum[..2];
        match &request.subdirectory {
            Some(sub) if !sub.is_empty() => format!("{sub}/{shard}/{checksum}"),
            _ => format!("{shard}/{checksum}"),
        }
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::Online
    }

    #[instrument(skip_all, fields(checksum = %request.checksum))]
    async fn store(&self, request: &StoreFileRequest) -> BackendResult<StoredFile> {
        let storage_path = Self::layout_path(request);
        let dest = self.resolve(&storage_path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let meta = fs::metadata(&request.origin_path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                BackendError::NotFound(request.origin_path.display().to_string())
            } else {
                BackendError::Io(err)
            }
        })?;

        if fs::try_exists(&dest).await? {
            // Content-addressed layout: same checksum means same bytes.
            return Ok(StoredFile {
                storage_path,
                size_bytes: meta.len() as i64,
            });
        }

        let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::copy(&request.origin_path, &tmp).await?;
        if let Err(err) = fs::rename(&tmp, &dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        Ok(StoredFile {
            storage_path,
            size_bytes: meta.len() as i64,
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, storage_path: &str) -> BackendResult<()> {
        let path = self.resolve(storage_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn check_availability(
        &self,
        _checksum: &Checksum,
        _storage_path: &str,
    ) -> BackendResult<NearlineAvailability> {
        // Online files are directly accessible, without expiration.
        Ok(NearlineAvailability {
            available: true,
            expiration: None,
        })
    }

    async fn restore(&self, storage_path: &str, destination: &Path) -> BackendResult<u64> {
        let source = self.resolve(storage_path)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::copy(&source, destination).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BackendError::NotFound(storage_path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
