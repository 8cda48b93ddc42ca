//! Storage backend capability for depot.
//!
//! Backends are pluggable units exposing `store`, `delete`,
//! `check_availability` and `restore` per storage name, classified as
//! online, nearline or offline. The engine consumes them exclusively
//! through the [`StorageBackend`] trait and resolves them by name through
//! the [`BackendRegistry`]; an unconfigured name is an explicit error,
//! never a null.

pub mod error;
pub mod filesystem;
pub mod nearline;
pub mod registry;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use filesystem::FilesystemBackend;
pub use nearline::NearlineFilesystemBackend;
pub use registry::BackendRegistry;
pub use traits::{NearlineAvailability, StorageBackend, StoreFileRequest, StoredFile};
