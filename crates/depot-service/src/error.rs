//! Service error types.

use depot_backend::BackendError;
use depot_metadata::MetadataError;
use thiserror::Error;

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rejected before any persistence; the caller can resubmit a
    /// corrected batch.
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Core(#[from] depot_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
