//! Filesystem-backed nearline backend.

use crate::error::{BackendError, BackendResult};
use crate::traits::{NearlineAvailability, StorageBackend, StoreFileRequest, StoredFile};
use async_trait::async_trait;
use depot_core::{Checksum, StorageType};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use uuid::Uuid;

/// Nearline backend modelling a tiered archive mount.
///
/// Stored files land in the archive area (the deep tier). A file is
/// directly accessible only while a copy sits in the staging area, which
/// the archive system populates on recall; `check_availability` answers
/// from staging presence and `restore` recalls archive content into
/// staging before copying it out.
pub struct NearlineFilesystemBackend {
    archive_root: PathBuf,
    staging_root: PathBuf,
    staging_ttl: time::Duration,
}

impl NearlineFilesystemBackend {
    pub async fn new(
        archive_root: impl AsRef<Path>,
        staging_root: impl AsRef<Path>,
        staging_ttl: time::Duration,
    ) -> BackendResult<Self> {
        let archive_root = archive_root.as_ref().to_path_buf();
        let staging_root = staging_root.as_ref().to_path_buf();
        fs::create_dir_all(&archive_root).await?;
        fs::create_dir_all(&staging_root).await?;
        Ok(Self {
            archive_root,
            staging_root,
            staging_ttl,
        })
    }

    fn resolve(root: &Path, storage_path: &str) -> BackendResult<PathBuf> {
        if storage_path.is_empty() || storage_path.starts_with('/') || storage_path.contains("..") {
            return Err(BackendError::InvalidPath(storage_path.to_string()));
        }
        for component in Path::new(storage_path).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => return Err(BackendError::InvalidPath(storage_path.to_string())),
            }
        }
        Ok(root.join(storage_path))
    }

    fn staged_path(&self, checksum: &Checksum) -> PathBuf {
        self.staging_root.join(checksum.as_str())
    }

    /// Place a copy of an archived file into the staging area, as the
    /// archive system would after a recall completes.
    pub async fn stage(&self, checksum: &Checksum, storage_path: &str) -> BackendResult<()> {
        let source = Self::resolve(&self.archive_root, storage_path)?;
        let staged = self.staged_path(checksum);
        fs::copy(&source, &staged).await?;
        Ok(())
    }

    /// Drop the staged copy, pushing the file back to the deep tier.
    pub async fn unstage(&self, checksum: &Checksum) -> BackendResult<()> {
        match fs::remove_file(self.staged_path(checksum)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for NearlineFilesystemBackend {
    fn storage_type(&self) -> StorageType {
        StorageType::Nearline
    }

    async fn store(&self, request: &StoreFileRequest) -> BackendResult<StoredFile> {
        let checksum = request.checksum.as_str();
        let storage_path = match &request.subdirectory {
            Some(sub) if !sub.is_empty() => format!("{sub}/{checksum}"),
            _ => checksum.to_string(),
        };
        let dest = Self::resolve(&self.archive_root, &storage_path)?;
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

        if !fs::try_exists(&dest).await? {
            let tmp = self.archive_root.join(format!(".tmp-{}", Uuid::new_v4()));
            fs::copy(&request.origin_path, &tmp).await?;
            if let Err(err) = fs::rename(&tmp, &dest).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(err.into());
            }
        }

        Ok(StoredFile {
            storage_path,
            size_bytes: meta.len() as i64,
        })
    }

    async fn delete(&self, storage_path: &str) -> BackendResult<()> {
        let path = Self::resolve(&self.archive_root, storage_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn check_availability(
        &self,
        checksum: &Checksum,
        _storage_path: &str,
    ) -> BackendResult<NearlineAvailability> {
        if fs::try_exists(self.staged_path(checksum)).await? {
            Ok(NearlineAvailability {
                available: true,
                expiration: Some(OffsetDateTime::now_utc() + self.staging_ttl),
            })
        } else {
            Ok(NearlineAvailability {
                available: false,
                expiration: None,
            })
        }
    }

    async fn restore(&self, storage_path: &str, destination: &Path) -> BackendResult<u64> {
        let archived = Self::resolve(&self.archive_root, storage_path)?;
        if !fs::try_exists(&archived).await? {
            return Err(BackendError::NotFound(storage_path.to_string()));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(fs::copy(&archived, destination).await?)
    }
}
