//! Normalized file and directory attributes.

use serde::{Deserialize, Serialize};

use crate::path::dirname;
use crate::storage::ObjectProperties;

/// Access visibility of a file.
///
/// Blob storage has no per-object visibility, so attributes built by the
/// adapter always carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Attributes of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Logical path (prefix removed).
    pub path: String,
    /// Size in bytes.
    pub file_size: u64,
    /// Last modified time (Unix timestamp, seconds).
    pub last_modified: i64,
    /// Content type (MIME).
    pub mime_type: Option<String>,
    pub visibility: Option<Visibility>,
}

impl FileAttributes {
    /// Attributes for `path` from the object's properties.
    pub fn from_properties(path: impl Into<String>, properties: &ObjectProperties) -> Self {
        Self {
            path: path.into(),
            file_size: properties.content_length,
            last_modified: properties.last_modified.timestamp(),
            mime_type: properties.content_type.clone(),
            visibility: None,
        }
    }

    /// Parent directory of the file ("" at the top level).
    pub fn dirname(&self) -> &str {
        dirname(&self.path)
    }
}

/// Attributes of an emulated directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAttributes {
    /// Logical path, without trailing separator.
    pub path: String,
}

impl DirectoryAttributes {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A listing entry: either a file or an emulated directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageAttributes {
    File(FileAttributes),
    #[serde(rename = "dir")]
    Directory(DirectoryAttributes),
}

impl StorageAttributes {
    /// Logical path of the entry.
    pub fn path(&self) -> &str {
        match self {
            StorageAttributes::File(file) => &file.path,
            StorageAttributes::Directory(dir) => &dir.path,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, StorageAttributes::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, StorageAttributes::Directory(_))
    }
}
