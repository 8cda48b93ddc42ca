//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid storage type: {0}")]
    InvalidStorageType(String),

    #[error("invalid request type: {0}")]
    InvalidRequestType(String),

    #[error("invalid request status: {0}")]
    InvalidRequestStatus(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
