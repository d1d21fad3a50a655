//! Local filesystem blob storage implementation.
//!
//! Each container is a directory under the base path:
//!
//! ```text
//! <base>/<container>/container.json        container properties
//! <base>/<container>/objects/<key>         object content
//! <base>/<container>/properties/<key>.json object properties
//! <base>/<container>/uploads/               uploads in progress
//! ```
//!
//! Uploads are written under `uploads/` and renamed into place once complete,
//! so a failed upload leaves any previous object untouched.
//!
//! Keys map onto nested directories, so this store cannot hold both `a` and
//! `a/b`: one of them would have to be a file and a directory at once. Such
//! writes fail with [`StorageError::InvalidPath`].

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use walkdir::WalkDir;

use super::listing::paginate_entries;
use super::{
    BlobStorageClient, ContainerOptions, ContainerProperties, ListRequest, ListedObject,
    ListingPage,
    ObjectBody, ObjectDownload, ObjectProperties, StorageError, StorageResult, UploadOptions,
};

const CONTAINER_FILE: &str = "container.json";
const OBJECTS_DIR: &str = "objects";
const PROPERTIES_DIR: &str = "properties";
const UPLOADS_DIR: &str = "uploads";

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Blob storage backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStorage {
    /// Base directory for storage.
    base_path: PathBuf,
}

impl LocalBlobStorage {
    /// Create a new local storage instance.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Base directory holding the containers.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn container_dir(&self, container: &str) -> StorageResult<PathBuf> {
        if container.is_empty()
            || container.contains('/')
            || container.contains('\\')
            || container.starts_with('.')
        {
            return Err(StorageError::InvalidPath(format!(
                "invalid container name: {:?}",
                container
            )));
        }
        Ok(self.base_path.join(container))
    }

    fn object_path(&self, container: &str, key: &str) -> StorageResult<PathBuf> {
        Ok(self
            .container_dir(container)?
            .join(OBJECTS_DIR)
            .join(validate_key(key)?))
    }

    fn properties_path(&self, container: &str, key: &str) -> StorageResult<PathBuf> {
        Ok(self
            .container_dir(container)?
            .join(PROPERTIES_DIR)
            .join(format!("{}.json", validate_key(key)?)))
    }

    async fn ensure_container(&self, container: &str) -> StorageResult<PathBuf> {
        let dir = self.container_dir(container)?;
        if fs::try_exists(dir.join(CONTAINER_FILE)).await? {
            Ok(dir)
        } else {
            Err(StorageError::NotFound(container.to_string()))
        }
    }

    async fn load_properties(&self, container: &str, key: &str) -> StorageResult<ObjectProperties> {
        let object_path = self.object_path(container, key)?;
        let meta = fs::metadata(&object_path).await.map_err(|e| not_found_or_io(e, key))?;
        if meta.is_dir() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        match fs::read(self.properties_path(container, key)?).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            // Content placed without going through put_object
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectProperties {
                content_length: meta.len(),
                last_modified: meta
                    .modified()
                    .ok()
                    .and_then(system_time_to_chrono)
                    .unwrap_or_default(),
                content_type: None,
                cache_control: None,
                content_language: None,
                content_encoding: None,
                metadata: Default::default(),
                etag: None,
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn store_properties(
        &self,
        container: &str,
        key: &str,
        properties: &ObjectProperties,
    ) -> StorageResult<()> {
        let path = self.properties_path(container, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_vec_pretty(properties)?).await?;
        Ok(())
    }

    /// Make room for `key` in the objects directory of the container at `dir`.
    ///
    /// Creates the parent directories and clears an empty directory left
    /// behind at the object path by deleted keys.
    async fn prepare_target(&self, dir: &Path, key: &str) -> StorageResult<PathBuf> {
        let mut path = dir.join(OBJECTS_DIR);
        let segments: Vec<&str> = validate_key(key)?.split('/').collect();

        for (idx, segment) in segments.iter().enumerate() {
            path.push(segment);
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => return Err(StorageError::Io(e)),
            };
            let is_last = idx + 1 == segments.len();
            if !is_last && !meta.is_dir() {
                return Err(key_conflict(key));
            }
            if is_last && meta.is_dir() {
                let occupied = path.clone();
                let holds_objects = tokio::task::spawn_blocking(move || holds_files(&occupied))
                    .await
                    .map_err(|e| StorageError::Backend(format!("layout check failed: {}", e)))?;
                if holds_objects {
                    return Err(key_conflict(key));
                }
                fs::remove_dir_all(&path).await?;
            }
        }

        let target = dir.join(OBJECTS_DIR).join(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(target)
    }

    /// Fresh path under the container's upload directory.
    async fn staging_path(&self, dir: &Path) -> StorageResult<PathBuf> {
        let uploads = dir.join(UPLOADS_DIR);
        fs::create_dir_all(&uploads).await?;
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
        Ok(uploads.join(format!(".upload-{}-{}", nonce, seq)))
    }
}

/// Write `body` to a new file at `path`, returning the byte count.
async fn write_body(path: &Path, body: ObjectBody) -> StorageResult<u64> {
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;
    match body {
        ObjectBody::Bytes(bytes) => {
            file.write_all(&bytes).await?;
            written = bytes.len() as u64;
        }
        ObjectBody::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
        }
    }
    file.flush().await?;
    Ok(written)
}

/// Move a finished upload over `target`, removing it if that fails.
async fn commit_upload(temp_path: &Path, target: &Path) -> StorageResult<()> {
    if let Err(e) = fs::rename(temp_path, target).await {
        let _ = fs::remove_file(temp_path).await;
        return Err(StorageError::Io(e));
    }
    Ok(())
}

fn key_conflict(key: &str) -> StorageError {
    StorageError::InvalidPath(format!(
        "{} conflicts with an existing object or directory",
        key
    ))
}

/// Whether any regular file lives below `dir`.
fn holds_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .any(|entry| !entry.is_ok_and(|e| e.file_type().is_dir()))
}

/// Reject keys that would escape the objects directory or cannot be files.
fn validate_key(key: &str) -> StorageResult<&str> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|segment| segment.is_empty())
        || Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if invalid {
        return Err(StorageError::InvalidPath(key.to_string()));
    }
    Ok(key)
}

fn not_found_or_io(err: std::io::Error, name: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(err)
    }
}

/// Convert system time to chrono DateTime.
fn system_time_to_chrono(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()).unwrap_or_default())
}

/// Collect object keys under `objects_dir` starting with `prefix`, sorted.
fn collect_keys(objects_dir: &Path, prefix: &str) -> StorageResult<Vec<String>> {
    // Only walk the deepest directory the prefix pins down.
    let walk_root = match prefix.rfind('/') {
        Some(idx) => objects_dir.join(&prefix[..idx]),
        None => objects_dir.to_path_buf(),
    };
    if !walk_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in WalkDir::new(&walk_root).follow_links(false) {
        let entry = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(objects_dir) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

#[async_trait]
impl BlobStorageClient for LocalBlobStorage {
    async fn get_container_properties(&self, container: &str) -> StorageResult<ContainerProperties> {
        let path = self.container_dir(container)?.join(CONTAINER_FILE);
        let raw = fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, container))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn create_container(
        &self,
        container: &str,
        options: &ContainerOptions,
    ) -> StorageResult<()> {
        let dir = self.container_dir(container)?;
        fs::create_dir_all(dir.join(OBJECTS_DIR)).await?;
        fs::create_dir_all(dir.join(PROPERTIES_DIR)).await?;

        let properties = ContainerProperties {
            name: container.to_string(),
            public_access: options.public_access,
            last_modified: Utc::now(),
        };
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(CONTAINER_FILE))
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(container.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        file.write_all(&serde_json::to_vec_pretty(&properties)?)
            .await?;
        file.flush().await?;

        debug!("Created container {}", dir.display());
        Ok(())
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        options: &UploadOptions,
    ) -> StorageResult<ObjectProperties> {
        let dir = self.ensure_container(container).await?;
        let full_path = self.prepare_target(&dir, key).await?;

        let temp_path = self.staging_path(&dir).await?;
        let written = match write_body(&temp_path, body).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        commit_upload(&temp_path, &full_path).await?;

        let properties = ObjectProperties::from_upload(written, options, Utc::now());
        self.store_properties(container, key, &properties).await?;
        debug!("Wrote {} bytes to {}", written, full_path.display());
        Ok(properties)
    }

    async fn get_object(&self, container: &str, key: &str) -> StorageResult<ObjectDownload> {
        self.ensure_container(container).await?;
        let properties = self.load_properties(container, key).await?;
        let file = fs::File::open(self.object_path(container, key)?)
            .await
            .map_err(|e| not_found_or_io(e, key))?;

        Ok(ObjectDownload {
            properties,
            stream: ReaderStream::new(file).map_err(StorageError::Io).boxed(),
        })
    }

    async fn get_object_properties(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<ObjectProperties> {
        self.ensure_container(container).await?;
        self.load_properties(container, key).await
    }

    async fn delete_object(&self, container: &str, key: &str) -> StorageResult<()> {
        self.ensure_container(container).await?;
        let full_path = self.object_path(container, key)?;
        if fs::metadata(&full_path).await.is_ok_and(|m| m.is_dir()) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        fs::remove_file(&full_path)
            .await
            .map_err(|e| not_found_or_io(e, key))?;
        match fs::remove_file(self.properties_path(container, key)?).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }

        debug!("Deleted {}", full_path.display());
        Ok(())
    }

    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.ensure_container(source_container).await?;
        let dest_dir = self.ensure_container(dest_container).await?;
        let mut properties = self.load_properties(source_container, source_key).await?;

        let src_path = self.object_path(source_container, source_key)?;
        let dst_path = self.prepare_target(&dest_dir, dest_key).await?;

        let temp_path = self.staging_path(&dest_dir).await?;
        if let Err(e) = fs::copy(&src_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(not_found_or_io(e, source_key));
        }
        commit_upload(&temp_path, &dst_path).await?;

        properties.last_modified = Utc::now();
        self.store_properties(dest_container, dest_key, &properties)
            .await?;

        debug!("Copied {} to {}", src_path.display(), dst_path.display());
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> StorageResult<ListingPage> {
        let dir = self.ensure_container(container).await?;
        let objects_dir = dir.join(OBJECTS_DIR);
        let prefix = request.prefix.clone();
        let keys = tokio::task::spawn_blocking(move || collect_keys(&objects_dir, &prefix))
            .await
            .map_err(|e| StorageError::Backend(format!("listing task failed: {}", e)))??;

        // Page the bare keys first so only this page's sidecars are read.
        let page = paginate_entries(keys.into_iter().map(|key| (key, ())), request);
        let mut objects = Vec::with_capacity(page.objects.len());
        for (name, ()) in page.objects {
            match self.load_properties(container, &name).await {
                Ok(properties) => objects.push(ListedObject { name, properties }),
                Err(e) if e.is_not_found() => debug!("{} vanished while listing", name),
                Err(e) => return Err(e),
            }
        }

        Ok(ListingPage {
            objects,
            prefixes: page.prefixes,
            continuation: page.continuation,
        })
    }
}
