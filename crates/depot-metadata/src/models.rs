//! Database models mapping to the metadata schema.

use depot_core::{
    Checksum, FileLocation, FileMetaInfo, FileReference, OutputFile, RequestStatus, RequestType,
    StorageLocation, StorageType,
};
use sqlx::FromRow;
use std::collections::BTreeSet;
use time::OffsetDateTime;
use uuid::Uuid;

/// File reference record, keyed by `(checksum, storage_name)`.
///
/// Owners live in the `file_reference_owners` child table.
#[derive(Debug, Clone, FromRow)]
pub struct FileReferenceRow {
    pub checksum: String,
    pub storage_name: String,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// NULL = tier never confirmed; 1 = known to require restoration.
    pub nearline_confirmed: Option<bool>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileReferenceRow {
    /// Convert to the domain type, attaching the given owner set.
    pub fn into_domain(self, owners: BTreeSet<String>) -> crate::MetadataResult<FileReference> {
        Ok(FileReference {
            checksum: Checksum::parse(&self.checksum)?,
            location: FileLocation {
                storage: self.storage_name,
                path: self.storage_path,
            },
            meta: FileMetaInfo {
                file_name: self.file_name,
                mime_type: self.mime_type,
                size_bytes: self.size_bytes,
            },
            owners,
            nearline_confirmed: self.nearline_confirmed,
        })
    }
}

/// Aggregated request record.
///
/// At most one non-terminal row exists per
/// `(checksum, storage_name, request_type)`, enforced by a partial unique
/// index. Owners are multiplexed in the `request_owners` child table.
#[derive(Debug, Clone, FromRow)]
pub struct RequestRow {
    pub request_id: Uuid,
    pub checksum: String,
    pub storage_name: String,
    pub request_type: String,
    pub status: String,
    /// Where the dispatcher fetches the file from, for storage requests.
    pub origin_url: Option<String>,
    /// Source storage name, for copy requests.
    pub source_storage: Option<String>,
    /// Deletion flag: drop the reference without physical deletion.
    pub reference_only: bool,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub error_cause: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl RequestRow {
    pub fn request_type(&self) -> crate::MetadataResult<RequestType> {
        Ok(RequestType::parse(&self.request_type)?)
    }

    pub fn status(&self) -> crate::MetadataResult<RequestStatus> {
        Ok(RequestStatus::parse(&self.status)?)
    }

    pub fn checksum(&self) -> crate::MetadataResult<Checksum> {
        Ok(Checksum::parse(&self.checksum)?)
    }
}

/// One `(owner, group)` pair multiplexed onto an aggregated request.
#[derive(Debug, Clone, FromRow)]
pub struct RequestOwnerRow {
    pub request_id: Uuid,
    pub owner: String,
    pub group_id: String,
}

/// A locally restored copy of a nearline file.
#[derive(Debug, Clone, FromRow)]
pub struct CacheFileRow {
    pub checksum: String,
    pub local_path: String,
    pub expiration_date: OffsetDateTime,
}

impl CacheFileRow {
    /// Shared expiry predicate used by both lazy and sweeping eviction.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration_date <= now
    }
}

/// Storage location configuration record.
#[derive(Debug, Clone, FromRow)]
pub struct StorageLocationRow {
    pub name: String,
    pub storage_type: String,
    pub priority: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl StorageLocationRow {
    pub fn into_domain(self) -> crate::MetadataResult<StorageLocation> {
        Ok(StorageLocation {
            name: self.name,
            storage_type: StorageType::parse(&self.storage_type)?,
            priority: self.priority,
        })
    }
}

/// Content-addressed output file record.
#[derive(Debug, Clone, FromRow)]
pub struct OutputFileRow {
    pub execution_id: Uuid,
    pub checksum: String,
    pub size_bytes: i64,
    pub url: String,
    pub created_at: OffsetDateTime,
    pub downloaded: bool,
    pub deleted: bool,
}

impl OutputFileRow {
    pub fn into_domain(self) -> crate::MetadataResult<OutputFile> {
        Ok(OutputFile {
            execution_id: self.execution_id,
            checksum: Checksum::parse(&self.checksum)?,
            size_bytes: self.size_bytes,
            url: self.url,
            created_at: self.created_at,
            downloaded: self.downloaded,
            deleted: self.deleted,
        })
    }
}

/// Lease lock row guarding one scheduled action.
#[derive(Debug, Clone, FromRow)]
pub struct SweepLockRow {
    pub name: String,
    pub holder: String,
    pub expires_at: OffsetDateTime,
}
