//! Content-addressed output files produced by job execution.

use crate::Checksum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A file produced by a job execution, stored at a checksum-derived path.
///
/// Two outputs with the same checksum under the same execution are stored
/// once; the second write is a no-op that still returns a valid reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub execution_id: Uuid,
    pub checksum: Checksum,
    pub size_bytes: i64,
    /// Resolvable URL of the stored copy.
    pub url: String,
    pub created_at: OffsetDateTime,
    pub downloaded: bool,
    pub deleted: bool,
}
