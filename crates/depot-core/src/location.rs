//! Storage location tiers and configurations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved storage name for web-only references.
///
/// Files referenced on this pseudo-storage have no physical backing the
/// engine can serve; availability resolution always reports them as not
/// available.
pub const WEB_STORAGE: &str = "web";

/// Storage tier of a backend, in decreasing order of access speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Immediately accessible disk or object store.
    Online,
    /// Tiered archive requiring an explicit restore step.
    Nearline,
    /// Media requiring manual intervention.
    Offline,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Nearline => "nearline",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "online" => Ok(Self::Online),
            "nearline" => Ok(Self::Nearline),
            "offline" => Ok(Self::Offline),
            other => Err(crate::Error::InvalidStorageType(other.to_string())),
        }
    }

    /// Tier rank used for availability dedup: lower ranks win.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Online => 0,
            Self::Nearline => 1,
            Self::Offline => 2,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named storage backend configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub name: String,
    pub storage_type: StorageType,
    /// Priority within a storage type. Lower values win when the same
    /// checksum is referenced on several storages of the same tier.
    pub priority: i32,
}

impl StorageLocation {
    /// Sort key for availability dedup: tier first, then declared priority.
    pub fn priority_key(&self) -> (u8, i32) {
        (self.storage_type.rank(), self.priority)
    }
}
