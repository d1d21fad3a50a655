//! Filesystem adapter error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

/// Result type for filesystem operations.
pub type FilesystemResult<T> = Result<T, FilesystemError>;

/// Which projection of the object properties was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Metadata,
    FileSize,
    MimeType,
    LastModified,
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataField::Metadata => "metadata",
            MetadataField::FileSize => "file size",
            MetadataField::MimeType => "mime type",
            MetadataField::LastModified => "last modified",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`BlobFilesystemAdapter`](crate::BlobFilesystemAdapter).
///
/// Every variant names the logical path(s) involved and keeps the storage
/// client failure as its source.
#[derive(Debug, Error)]
pub enum FilesystemError {
    #[error("unable to write file at {path}")]
    WriteFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unable to read file from {path}")]
    ReadFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unable to check existence of {path}")]
    ExistenceCheckFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unable to delete file at {path}")]
    DeleteFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unable to delete directory at {path}")]
    DeleteDirectoryFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unable to copy {source_path} to {destination}")]
    CopyFailed {
        source_path: String,
        destination: String,
        #[source]
        source: StorageError,
    },

    /// The source could not be removed after copying.
    ///
    /// `rollback` holds the failure of removing the copied destination, when
    /// that also failed and both paths may now exist.
    #[error("unable to move {source_path} to {destination}{}", rollback_note(.rollback))]
    MoveFailed {
        source_path: String,
        destination: String,
        #[source]
        source: StorageError,
        rollback: Option<StorageError>,
    },

    #[error("unable to retrieve {field} for {path}")]
    MetadataRetrievalFailed {
        path: String,
        field: MetadataField,
        #[source]
        source: Option<StorageError>,
    },

    #[error("unable to list contents of {path}")]
    ListingFailed {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("visibility is not supported by blob storage ({path})")]
    VisibilityUnsupported { path: String },
}

fn rollback_note(rollback: &Option<StorageError>) -> &'static str {
    if rollback.is_some() {
        " (rollback of destination also failed)"
    } else {
        ""
    }
}

impl FilesystemError {
    /// The storage client failure behind this error, if any.
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            FilesystemError::WriteFailed { source, .. }
            | FilesystemError::ReadFailed { source, .. }
            | FilesystemError::ExistenceCheckFailed { source, .. }
            | FilesystemError::DeleteFailed { source, .. }
            | FilesystemError::DeleteDirectoryFailed { source, .. }
            | FilesystemError::CopyFailed { source, .. }
            | FilesystemError::MoveFailed { source, .. }
            | FilesystemError::ListingFailed { source, .. } => Some(source),
            FilesystemError::MetadataRetrievalFailed { source, .. } => source.as_ref(),
            FilesystemError::VisibilityUnsupported { .. } => None,
        }
    }

    /// Whether the underlying cause is a missing object or container.
    pub fn is_not_found(&self) -> bool {
        self.storage_error().is_some_and(StorageError::is_not_found)
    }
}
