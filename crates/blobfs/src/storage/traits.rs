//! Storage client trait definitions.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::StorageResult;

/// Lazily produced object content.
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Content handed to [`BlobStorageClient::put_object`].
pub enum ObjectBody {
    /// Fully buffered content.
    Bytes(Bytes),
    /// Content read lazily from a stream.
    Stream(ByteStream),
}

impl ObjectBody {
    /// Drain the body into a single buffer.
    pub async fn collect(self) -> StorageResult<Bytes> {
        match self {
            ObjectBody::Bytes(bytes) => Ok(bytes),
            ObjectBody::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ObjectBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(bytes: Bytes) -> Self {
        ObjectBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(bytes: Vec<u8>) -> Self {
        ObjectBody::Bytes(Bytes::from(bytes))
    }
}

/// Object headers and user metadata applied on upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Content type (MIME).
    pub content_type: Option<String>,
    /// Cache-Control header.
    pub cache_control: Option<String>,
    /// Content-Language header.
    pub content_language: Option<String>,
    /// Content-Encoding header.
    pub content_encoding: Option<String>,
    /// User-defined metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl UploadOptions {
    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the Cache-Control header.
    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    /// Add a user metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Layer these options over `defaults`.
    ///
    /// Fields set here win; metadata maps are merged key by key.
    pub fn merged_over(&self, defaults: &UploadOptions) -> UploadOptions {
        let mut metadata = defaults.metadata.clone();
        metadata.extend(self.metadata.clone());

        UploadOptions {
            content_type: self
                .content_type
                .clone()
                .or_else(|| defaults.content_type.clone()),
            cache_control: self
                .cache_control
                .clone()
                .or_else(|| defaults.cache_control.clone()),
            content_language: self
                .content_language
                .clone()
                .or_else(|| defaults.content_language.clone()),
            content_encoding: self
                .content_encoding
                .clone()
                .or_else(|| defaults.content_encoding.clone()),
            metadata,
        }
    }
}

/// Anonymous read access granted on a new container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicAccess {
    /// Private container.
    #[default]
    None,
    /// Anonymous read access to objects.
    Blob,
    /// Anonymous read access to objects and listings.
    Container,
}

/// Options applied when a container is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    #[serde(default)]
    pub public_access: PublicAccess,
}

/// Properties of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerProperties {
    /// Container name.
    pub name: String,
    /// Public access level.
    pub public_access: PublicAccess,
    /// Last modified time.
    pub last_modified: DateTime<Utc>,
}

/// Properties of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperties {
    /// Size in bytes.
    pub content_length: u64,
    /// Last modified time.
    pub last_modified: DateTime<Utc>,
    /// Content type (MIME).
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_language: Option<String>,
    pub content_encoding: Option<String>,
    /// User-defined metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Entity tag.
    pub etag: Option<String>,
}

impl ObjectProperties {
    /// Build the properties of an object freshly uploaded with `options`.
    pub fn from_upload(content_length: u64, options: &UploadOptions, now: DateTime<Utc>) -> Self {
        Self {
            content_length,
            last_modified: now,
            content_type: options.content_type.clone(),
            cache_control: options.cache_control.clone(),
            content_language: options.content_language.clone(),
            content_encoding: options.content_encoding.clone(),
            metadata: options.metadata.clone(),
            etag: Some(format!(
                "\"{:x}-{:x}\"",
                now.timestamp_nanos_opt().unwrap_or_default(),
                content_length
            )),
        }
    }
}

/// Result of a download: properties plus the content stream.
pub struct ObjectDownload {
    pub properties: ObjectProperties,
    pub stream: ByteStream,
}

impl fmt::Debug for ObjectDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDownload")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Parameters of a single listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Group keys sharing a prefix up to this delimiter into common prefixes.
    pub delimiter: Option<String>,
    /// Maximum number of objects and prefixes in one page.
    pub max_results: Option<usize>,
    /// Opaque token from the previous page.
    pub continuation: Option<String>,
}

impl ListRequest {
    /// List keys under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Set the delimiter.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    /// Set the page size.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Resume after a previous page.
    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation = token;
        self
    }
}

/// An object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    /// Full object key.
    pub name: String,
    pub properties: ObjectProperties,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Objects in key order.
    pub objects: Vec<ListedObject>,
    /// Common prefixes, each ending with the delimiter.
    pub prefixes: Vec<String>,
    /// Present when more pages remain.
    pub continuation: Option<String>,
}

/// Blob storage operations used by the filesystem adapter.
///
/// Implementations report a missing container or object as
/// [`StorageError::NotFound`](super::StorageError::NotFound) and a create
/// conflict as [`StorageError::AlreadyExists`](super::StorageError::AlreadyExists).
#[async_trait]
pub trait BlobStorageClient: Send + Sync {
    /// Get container properties.
    async fn get_container_properties(&self, container: &str) -> StorageResult<ContainerProperties>;

    /// Create a container.
    async fn create_container(
        &self,
        container: &str,
        options: &ContainerOptions,
    ) -> StorageResult<()>;

    /// Upload an object, replacing any object at the same key.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        options: &UploadOptions,
    ) -> StorageResult<ObjectProperties>;

    /// Download an object.
    async fn get_object(&self, container: &str, key: &str) -> StorageResult<ObjectDownload>;

    /// Get object properties without the content.
    async fn get_object_properties(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<ObjectProperties>;

    /// Delete an object.
    async fn delete_object(&self, container: &str, key: &str) -> StorageResult<()>;

    /// Server-side copy of an object.
    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> StorageResult<()>;

    /// Fetch one page of a listing.
    async fn list_objects(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> StorageResult<ListingPage>;
}
