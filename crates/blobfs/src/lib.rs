//! Blob Storage Filesystem Library
//!
//! Exposes a container of a blob storage service as a hierarchical
//! filesystem: files are objects, directories are emulated from key prefixes.

pub mod adapter;
pub mod attributes;
pub mod config;
pub mod error;
pub mod mime;
pub mod path;
pub mod storage;

pub use adapter::BlobFilesystemAdapter;
pub use attributes::{DirectoryAttributes, FileAttributes, StorageAttributes, Visibility};
pub use config::{AdapterConfig, ConfigError, DEFAULT_LIST_PAGE_SIZE};
pub use error::{FilesystemError, FilesystemResult, MetadataField};
pub use mime::{GuessingMimeTypeDetector, MimeTypeDetector};
pub use path::PathPrefixer;
