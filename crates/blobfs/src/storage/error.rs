//! Storage client error types.

use thiserror::Error;

/// Result type for storage client operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by a blob storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Container or object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Container or object already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Key or container name the backend cannot represent.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored properties could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error means the container or object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error means the container or object already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            StorageError::AlreadyExists(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}
