//! Core domain types and shared logic for the depot file lifecycle engine.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content checksums and incremental hashing
//! - File references, locations and owners
//! - Aggregated request types and statuses
//! - Storage location tiers and priorities
//! - Content-addressed output files
//! - Configuration types

pub mod checksum;
pub mod config;
pub mod error;
pub mod file;
pub mod location;
pub mod output;
pub mod request;

pub use checksum::{Checksum, ChecksumHasher};
pub use error::{Error, Result};
pub use file::{FileLocation, FileMetaInfo, FileReference};
pub use location::{StorageLocation, StorageType, WEB_STORAGE};
pub use output::OutputFile;
pub use request::{Availability, AvailabilityStatus, RequestStatus, RequestType};

/// Default lease duration for scheduled sweep locks, in seconds.
pub const DEFAULT_LOCK_LEASE_SECS: u64 = 300;

/// Default page size for paged sweeps and dispatch passes.
pub const DEFAULT_PAGE_SIZE: u32 = 500;
