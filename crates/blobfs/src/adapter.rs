//! Filesystem operations on top of a blob storage container.
//!
//! Directories do not exist in blob storage. They are emulated from key
//! prefixes: a delimited listing returns common prefixes, which become
//! directory entries, and creating a directory is a no-op.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use crate::attributes::{DirectoryAttributes, FileAttributes, StorageAttributes, Visibility};
use crate::config::AdapterConfig;
use crate::error::{FilesystemError, FilesystemResult, MetadataField};
use crate::mime::{GuessingMimeTypeDetector, MimeTypeDetector};
use crate::path::{PathPrefixer, SEPARATOR};
use crate::storage::{
    BlobStorageClient, ByteStream, ContainerOptions, ListRequest, ListingPage, ObjectBody,
    ObjectProperties, StorageError, StorageResult, UploadOptions,
};

const DELIMITER: &str = "/";

/// Maps filesystem verbs onto a blob storage container.
///
/// The adapter holds no mutable state and can be shared across tasks.
#[derive(Clone)]
pub struct BlobFilesystemAdapter {
    client: Arc<dyn BlobStorageClient>,
    mime_detector: Arc<dyn MimeTypeDetector>,
    container: String,
    prefixer: PathPrefixer,
    list_page_size: usize,
    upload_defaults: UploadOptions,
    container_options: ContainerOptions,
}

impl fmt::Debug for BlobFilesystemAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobFilesystemAdapter")
            .field("container", &self.container)
            .field("prefix", &self.prefixer.prefix())
            .field("list_page_size", &self.list_page_size)
            .finish_non_exhaustive()
    }
}

/// What a listing covers; identical for every page.
#[derive(Clone)]
struct ListingScope {
    request: ListRequest,
    location: String,
    logical_path: String,
    deep: bool,
}

/// Listing progress carried between page fetches.
struct ListingCursor {
    token: Option<String>,
    seen_directories: HashSet<String>,
}

impl BlobFilesystemAdapter {
    /// Create an adapter for `container`, storing keys under `prefix`.
    pub fn new(
        client: Arc<dyn BlobStorageClient>,
        container: impl Into<String>,
        prefix: impl AsRef<str>,
    ) -> Self {
        Self::from_config(client, &AdapterConfig::new(container).with_prefix(prefix.as_ref()))
    }

    /// Create an adapter from configuration.
    pub fn from_config(client: Arc<dyn BlobStorageClient>, config: &AdapterConfig) -> Self {
        Self {
            client,
            mime_detector: Arc::new(GuessingMimeTypeDetector),
            container: config.container.clone(),
            prefixer: PathPrefixer::new(&config.prefix),
            list_page_size: config.list_page_size.max(1),
            upload_defaults: config.upload.clone(),
            container_options: config.container_options.clone(),
        }
    }

    /// Replace the content type detector.
    pub fn with_mime_detector(mut self, detector: Arc<dyn MimeTypeDetector>) -> Self {
        self.mime_detector = detector;
        self
    }

    /// Set the maximum number of results requested per listing page.
    pub fn with_list_page_size(mut self, list_page_size: usize) -> Self {
        self.list_page_size = list_page_size.max(1);
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Normalized key prefix ("" or ending with a separator).
    pub fn prefix(&self) -> &str {
        self.prefixer.prefix()
    }

    pub fn list_page_size(&self) -> usize {
        self.list_page_size
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `contents` to `path`, replacing any existing file.
    pub async fn write(
        &self,
        path: &str,
        contents: impl Into<Bytes>,
        options: &UploadOptions,
    ) -> FilesystemResult<FileAttributes> {
        let contents = contents.into();
        let options = self.resolve_upload_options(path, options, || contents.clone());
        self.upload(path, ObjectBody::Bytes(contents), &options).await
    }

    /// Write a lazily read byte stream to `path`, replacing any existing file.
    ///
    /// Without an explicit content type the first chunk is sniffed. The
    /// stream is consumed by this call and dropped whether or not it succeeds.
    pub async fn write_stream<S>(
        &self,
        path: &str,
        contents: S,
        options: &UploadOptions,
    ) -> FilesystemResult<FileAttributes>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        let mut contents: ByteStream = contents.map_err(StorageError::Io).boxed();

        let merged = options.merged_over(&self.upload_defaults);
        if merged.content_type.is_some() {
            return self
                .upload(path, ObjectBody::Stream(contents), &merged)
                .await;
        }

        let first = contents.next().await;
        let (head, body): (Bytes, ByteStream) = match first {
            Some(Ok(chunk)) => (
                chunk.clone(),
                stream::once(async move { Ok(chunk) })
                    .chain(contents)
                    .boxed(),
            ),
            Some(Err(source)) => {
                return Err(FilesystemError::WriteFailed {
                    path: path.to_string(),
                    source,
                });
            }
            None => (Bytes::new(), stream::empty().boxed()),
        };

        let options = self.resolve_upload_options(path, options, || head);
        self.upload(path, ObjectBody::Stream(body), &options).await
    }

    /// Overwrite `path`; same as [`write`](Self::write).
    pub async fn update(
        &self,
        path: &str,
        contents: impl Into<Bytes>,
        options: &UploadOptions,
    ) -> FilesystemResult<FileAttributes> {
        self.write(path, contents, options).await
    }

    /// Overwrite `path` from a stream; same as [`write_stream`](Self::write_stream).
    pub async fn update_stream<S>(
        &self,
        path: &str,
        contents: S,
        options: &UploadOptions,
    ) -> FilesystemResult<FileAttributes>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        self.write_stream(path, contents, options).await
    }

    /// Merge per-call options over the configured defaults and fill in a
    /// sniffed content type when neither sets one.
    fn resolve_upload_options(
        &self,
        path: &str,
        options: &UploadOptions,
        sample: impl FnOnce() -> Bytes,
    ) -> UploadOptions {
        let mut merged = options.merged_over(&self.upload_defaults);
        if merged.content_type.is_none() {
            merged.content_type = Some(self.mime_detector.detect(path, &sample()));
        }
        merged
    }

    async fn upload(
        &self,
        path: &str,
        body: ObjectBody,
        options: &UploadOptions,
    ) -> FilesystemResult<FileAttributes> {
        let write_failed = |source| FilesystemError::WriteFailed {
            path: path.to_string(),
            source,
        };

        self.ensure_container().await.map_err(write_failed)?;

        let key = self.prefixer.prefix_path(path);
        let properties = self
            .client
            .put_object(&self.container, &key, body, options)
            .await
            .map_err(write_failed)?;

        debug!(
            "Uploaded {} ({} bytes, {})",
            key,
            properties.content_length,
            properties.content_type.as_deref().unwrap_or("no content type")
        );
        Ok(FileAttributes::from_properties(
            self.prefixer.strip_prefix(&key),
            &properties,
        ))
    }

    /// Create the container unless it exists. Losing a creation race is fine.
    async fn ensure_container(&self) -> StorageResult<()> {
        match self.client.get_container_properties(&self.container).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("Creating container {}", self.container);
                match self
                    .client
                    .create_container(&self.container, &self.container_options)
                    .await
                {
                    Err(e) if e.is_already_exists() => {
                        debug!("Container {} created concurrently", self.container);
                        Ok(())
                    }
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Read the whole file at `path`.
    pub async fn read(&self, path: &str) -> FilesystemResult<Bytes> {
        let stream = self.read_stream(path).await?;
        ObjectBody::Stream(stream)
            .collect()
            .await
            .map_err(|source| FilesystemError::ReadFailed {
                path: path.to_string(),
                source,
            })
    }

    /// Stream the file at `path` without buffering.
    ///
    /// Errors that occur while the stream is consumed are yielded by the stream.
    pub async fn read_stream(&self, path: &str) -> FilesystemResult<ByteStream> {
        let key = self.prefixer.prefix_path(path);
        let download = self
            .client
            .get_object(&self.container, &key)
            .await
            .map_err(|source| FilesystemError::ReadFailed {
                path: path.to_string(),
                source,
            })?;
        Ok(download.stream)
    }

    /// Whether a file exists at `path`.
    pub async fn file_exists(&self, path: &str) -> FilesystemResult<bool> {
        let key = self.prefixer.prefix_path(path);
        match self
            .client
            .get_object_properties(&self.container, &key)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(source) => Err(FilesystemError::ExistenceCheckFailed {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Same as [`file_exists`](Self::file_exists).
    pub async fn has(&self, path: &str) -> FilesystemResult<bool> {
        self.file_exists(path).await
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    /// Delete the file at `path`. Deleting a missing file succeeds.
    pub async fn delete(&self, path: &str) -> FilesystemResult<()> {
        let key = self.prefixer.prefix_path(path);
        match self.client.delete_object(&self.container, &key).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Delete of missing {} ignored", key);
                Ok(())
            }
            Err(source) => Err(FilesystemError::DeleteFailed {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Delete every file below the directory `path`.
    ///
    /// Best effort: the first failure stops the run and files already
    /// deleted stay deleted.
    pub async fn delete_directory(&self, path: &str) -> FilesystemResult<()> {
        let delete_failed = |source| FilesystemError::DeleteDirectoryFailed {
            path: path.to_string(),
            source,
        };

        let prefix = self.prefixer.prefix_directory_path(path);
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let request = ListRequest::new(prefix.clone()).with_continuation(token.take());
            let page = self
                .client
                .list_objects(&self.container, &request)
                .await
                .map_err(delete_failed)?;
            keys.extend(
                page.objects
                    .into_iter()
                    .map(|object| object.name)
                    .filter(|name| name.starts_with(&prefix)),
            );
            token = next_token(&request, page.continuation).map_err(delete_failed)?;
            if token.is_none() {
                break;
            }
        }

        for key in &keys {
            match self.client.delete_object(&self.container, key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!("{} vanished before delete", key),
                Err(source) => {
                    warn!("Deleting directory {} stopped at {}: {}", path, key, source);
                    return Err(delete_failed(source));
                }
            }
        }

        debug!("Deleted {} objects under {}", keys.len(), prefix);
        Ok(())
    }

    /// Directories are implied by key prefixes, so there is nothing to create.
    pub async fn create_directory(&self, path: &str) -> FilesystemResult<DirectoryAttributes> {
        Ok(DirectoryAttributes::new(path.trim_matches(SEPARATOR)))
    }

    // ========================================================================
    // Copy / move
    // ========================================================================

    /// Server-side copy of `source` to `destination`.
    pub async fn copy(&self, source: &str, destination: &str) -> FilesystemResult<()> {
        let source_key = self.prefixer.prefix_path(source);
        let destination_key = self.prefixer.prefix_path(destination);

        self.client
            .copy_object(
                &self.container,
                &source_key,
                &self.container,
                &destination_key,
            )
            .await
            .map_err(|e| FilesystemError::CopyFailed {
                source_path: source.to_string(),
                destination: destination.to_string(),
                source: e,
            })?;

        debug!("Copied {} to {}", source_key, destination_key);
        Ok(())
    }

    /// Move `source` to `destination` by copying and deleting the source.
    ///
    /// Not atomic. When the source cannot be deleted the copied destination
    /// is removed again; if that fails too, the error carries both failures.
    pub async fn move_file(&self, source: &str, destination: &str) -> FilesystemResult<()> {
        let source_key = self.prefixer.prefix_path(source);
        let destination_key = self.prefixer.prefix_path(destination);
        let move_failed = |e, rollback| FilesystemError::MoveFailed {
            source_path: source.to_string(),
            destination: destination.to_string(),
            source: e,
            rollback,
        };

        if source_key == destination_key {
            // Copy-then-delete onto itself would destroy the file.
            return self
                .client
                .get_object_properties(&self.container, &source_key)
                .await
                .map(|_| ())
                .map_err(|e| move_failed(e, None));
        }

        self.client
            .copy_object(
                &self.container,
                &source_key,
                &self.container,
                &destination_key,
            )
            .await
            .map_err(|e| move_failed(e, None))?;

        match self.client.delete_object(&self.container, &source_key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(delete_error) => {
                warn!(
                    "Failed to delete {} after copy, removing {}: {}",
                    source_key, destination_key, delete_error
                );
                let rollback = match self
                    .client
                    .delete_object(&self.container, &destination_key)
                    .await
                {
                    Ok(()) => None,
                    Err(e) if e.is_not_found() => None,
                    Err(e) => {
                        warn!("Rollback of {} failed: {}", destination_key, e);
                        Some(e)
                    }
                };
                return Err(move_failed(delete_error, rollback));
            }
        }

        debug!("Moved {} to {}", source_key, destination_key);
        Ok(())
    }

    /// Same as [`move_file`](Self::move_file).
    pub async fn rename(&self, source: &str, destination: &str) -> FilesystemResult<()> {
        self.move_file(source, destination).await
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    async fn fetch_properties(
        &self,
        path: &str,
        field: MetadataField,
    ) -> FilesystemResult<ObjectProperties> {
        let key = self.prefixer.prefix_path(path);
        self.client
            .get_object_properties(&self.container, &key)
            .await
            .map_err(|source| FilesystemError::MetadataRetrievalFailed {
                path: path.to_string(),
                field,
                source: Some(source),
            })
    }

    /// All attributes of the file at `path`.
    pub async fn metadata(&self, path: &str) -> FilesystemResult<FileAttributes> {
        let properties = self.fetch_properties(path, MetadataField::Metadata).await?;
        Ok(FileAttributes::from_properties(
            path.trim_start_matches(SEPARATOR),
            &properties,
        ))
    }

    /// Size in bytes of the file at `path`.
    pub async fn file_size(&self, path: &str) -> FilesystemResult<u64> {
        let properties = self.fetch_properties(path, MetadataField::FileSize).await?;
        Ok(properties.content_length)
    }

    /// Content type of the file at `path`.
    pub async fn mime_type(&self, path: &str) -> FilesystemResult<String> {
        let properties = self.fetch_properties(path, MetadataField::MimeType).await?;
        properties
            .content_type
            .ok_or_else(|| FilesystemError::MetadataRetrievalFailed {
                path: path.to_string(),
                field: MetadataField::MimeType,
                source: None,
            })
    }

    /// Last modified time of the file at `path` (Unix timestamp, seconds).
    pub async fn last_modified(&self, path: &str) -> FilesystemResult<i64> {
        let properties = self
            .fetch_properties(path, MetadataField::LastModified)
            .await?;
        Ok(properties.last_modified.timestamp())
    }

    /// Blob storage has no per-file visibility.
    pub async fn set_visibility(&self, path: &str, _visibility: Visibility) -> FilesystemResult<()> {
        Err(FilesystemError::VisibilityUnsupported {
            path: path.to_string(),
        })
    }

    /// Blob storage has no per-file visibility.
    pub async fn visibility(&self, path: &str) -> FilesystemResult<Visibility> {
        Err(FilesystemError::VisibilityUnsupported {
            path: path.to_string(),
        })
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Lazily list the contents of the directory `path`.
    ///
    /// Shallow listings return the direct files plus one entry per
    /// subdirectory; deep listings return every file below `path`. Pages are
    /// fetched on demand. A failed page fetch ends the stream with an error.
    pub fn list_contents(
        &self,
        path: &str,
        deep: bool,
    ) -> BoxStream<'_, FilesystemResult<StorageAttributes>> {
        let location = self.prefixer.prefix_directory_path(path);
        let logical_path = path.trim_matches(SEPARATOR).to_string();

        let mut base_request =
            ListRequest::new(location.clone()).with_max_results(self.list_page_size);
        if !deep {
            base_request = base_request.with_delimiter(DELIMITER);
        }

        let scope = ListingScope {
            request: base_request,
            location,
            logical_path,
            deep,
        };
        let start = ListingCursor {
            token: None,
            seen_directories: HashSet::new(),
        };

        stream::try_unfold(Some(start), move |cursor| {
            self.next_listing_page(scope.clone(), cursor)
        })
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, FilesystemError>)))
        .try_flatten()
        .boxed()
    }

    /// Fetch the page `cursor` points at. `None` means the listing is done.
    async fn next_listing_page(
        &self,
        scope: ListingScope,
        cursor: Option<ListingCursor>,
    ) -> FilesystemResult<Option<(Vec<StorageAttributes>, Option<ListingCursor>)>> {
        let Some(mut cursor) = cursor else {
            return Ok(None);
        };

        let request = scope.request.with_continuation(cursor.token.take());
        let listing_failed = |source| FilesystemError::ListingFailed {
            path: scope.logical_path.clone(),
            source,
        };
        let page = self
            .client
            .list_objects(&self.container, &request)
            .await
            .map_err(listing_failed)?;

        let continuation = page.continuation.clone();
        let entries = self.normalize_page(
            page,
            &scope.location,
            scope.deep,
            &mut cursor.seen_directories,
        );
        debug!(
            "Listed {} entries under {:?}",
            entries.len(),
            scope.location
        );

        let next = next_token(&request, continuation)
            .map_err(listing_failed)?
            .map(|token| ListingCursor {
                token: Some(token),
                seen_directories: cursor.seen_directories,
            });
        Ok(Some((entries, next)))
    }

    /// Collect a whole listing.
    pub async fn list_all(
        &self,
        path: &str,
        deep: bool,
    ) -> FilesystemResult<Vec<StorageAttributes>> {
        self.list_contents(path, deep).try_collect().await
    }

    /// Turn one listing page into attributes relative to the adapter prefix.
    fn normalize_page(
        &self,
        page: ListingPage,
        location: &str,
        deep: bool,
        seen_directories: &mut HashSet<String>,
    ) -> Vec<StorageAttributes> {
        let mut entries = Vec::with_capacity(page.objects.len() + page.prefixes.len());
        let mut push_directory = |entries: &mut Vec<StorageAttributes>, path: &str| {
            if !path.is_empty() && seen_directories.insert(path.to_string()) {
                entries.push(StorageAttributes::Directory(DirectoryAttributes::new(path)));
            }
        };

        for object in page.objects {
            if !object.name.starts_with(location) {
                warn!("Skipping {} outside listed prefix {:?}", object.name, location);
                continue;
            }
            if object.name == location {
                // Marker of the listed directory itself
                continue;
            }

            if !deep {
                let rest = &object.name[location.len()..];
                let nested = rest.find(SEPARATOR).filter(|&idx| idx + 1 < rest.len());
                if let Some(idx) = nested {
                    // Nested key in a shallow listing: report its first-level directory.
                    let directory = &object.name[..location.len() + idx + 1];
                    push_directory(&mut entries, self.prefixer.strip_directory_prefix(directory));
                    continue;
                }
            }

            if object.name.ends_with(SEPARATOR) {
                push_directory(
                    &mut entries,
                    self.prefixer.strip_directory_prefix(&object.name),
                );
                continue;
            }

            entries.push(StorageAttributes::File(FileAttributes::from_properties(
                self.prefixer.strip_prefix(&object.name),
                &object.properties,
            )));
        }

        if !deep {
            for prefix in page.prefixes {
                if !prefix.starts_with(location) || prefix == location {
                    warn!("Skipping prefix {} outside listed prefix {:?}", prefix, location);
                    continue;
                }
                push_directory(&mut entries, self.prefixer.strip_directory_prefix(&prefix));
            }
        }

        entries
    }
}

/// Token for the page after `request`, or `None` when the listing is done.
fn next_token(request: &ListRequest, token: Option<String>) -> StorageResult<Option<String>> {
    match token.filter(|t| !t.is_empty()) {
        Some(token) if request.continuation.as_deref() == Some(token.as_str()) => Err(
            StorageError::Backend(format!("continuation token {:?} did not advance", token)),
        ),
        other => Ok(other),
    }
}
