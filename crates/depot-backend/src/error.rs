//! Backend error types.

use thiserror::Error;

/// Storage backend operation errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No backend is registered under the requested storage name.
    #[error("no storage backend configured under name: {0}")]
    NotConfigured(String),

    #[error("file not found on storage: {0}")]
    NotFound(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("operation not supported by this storage tier: {0}")]
    NotSupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
