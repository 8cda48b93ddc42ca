//! File references: the durable record of every file the engine knows about.

use crate::Checksum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Physical location of a referenced file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    /// Name of the storage backend holding the file.
    pub storage: String,
    /// Backend-specific path of the file on that storage.
    pub path: String,
}

/// Descriptive metadata of a referenced file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaInfo {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// One file known to the system, identified by `(checksum, storage)`.
///
/// A reference with zero owners is eligible for physical deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub checksum: Checksum,
    pub location: FileLocation,
    pub meta: FileMetaInfo,
    /// Logical requesters sharing this physical file.
    pub owners: BTreeSet<String>,
    /// `Some(true)` means the file is known to currently sit in the deep
    /// archive tier and requires restoration before it can be served.
    /// `None` means the tier has never been confirmed.
    pub nearline_confirmed: Option<bool>,
}

impl FileReference {
    pub fn new(
        checksum: Checksum,
        location: FileLocation,
        meta: FileMetaInfo,
        owner: impl Into<String>,
    ) -> Self {
        let mut owners = BTreeSet::new();
        owners.insert(owner.into());
        Self {
            checksum,
            location,
            meta,
            owners,
            nearline_confirmed: None,
        }
    }
}
