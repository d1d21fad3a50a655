//! In-process blob storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tracing::debug;

use super::listing::paginate;
use super::{
    BlobStorageClient, ContainerOptions, ContainerProperties, ListRequest, ListingPage,
    ObjectBody, ObjectDownload, ObjectProperties, StorageError, StorageResult, UploadOptions,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    properties: ObjectProperties,
}

#[derive(Debug)]
struct Container {
    properties: ContainerProperties,
    objects: BTreeMap<String, StoredObject>,
}

/// Blob storage held entirely in memory.
///
/// Behaves like a blob service for listing: keys are returned in order,
/// grouped by delimiter, and paged with continuation tokens.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    containers: RwLock<HashMap<String, Container>>,
}

impl MemoryBlobStorage {
    /// Create an empty store with no containers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects in `container`, or `None` when it does not exist.
    pub fn object_count(&self, container: &str) -> Option<usize> {
        self.containers
            .read()
            .ok()
            .and_then(|containers| containers.get(container).map(|c| c.objects.len()))
    }

    fn read_object(&self, container: &str, key: &str) -> StorageResult<StoredObject> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        let container = containers
            .get(container)
            .ok_or_else(|| StorageError::NotFound(container.to_string()))?;
        container
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl BlobStorageClient for MemoryBlobStorage {
    async fn get_container_properties(&self, container: &str) -> StorageResult<ContainerProperties> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        containers
            .get(container)
            .map(|c| c.properties.clone())
            .ok_or_else(|| StorageError::NotFound(container.to_string()))
    }

    async fn create_container(
        &self,
        container: &str,
        options: &ContainerOptions,
    ) -> StorageResult<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        if containers.contains_key(container) {
            return Err(StorageError::AlreadyExists(container.to_string()));
        }

        containers.insert(
            container.to_string(),
            Container {
                properties: ContainerProperties {
                    name: container.to_string(),
                    public_access: options.public_access,
                    last_modified: Utc::now(),
                },
                objects: BTreeMap::new(),
            },
        );
        debug!("Created container {}", container);
        Ok(())
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        options: &UploadOptions,
    ) -> StorageResult<ObjectProperties> {
        let data = body.collect().await?;
        let properties = ObjectProperties::from_upload(data.len() as u64, options, Utc::now());

        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        let target = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::NotFound(container.to_string()))?;

        debug!("Stored {} bytes at {}/{}", data.len(), container, key);
        target.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                properties: properties.clone(),
            },
        );
        Ok(properties)
    }

    async fn get_object(&self, container: &str, key: &str) -> StorageResult<ObjectDownload> {
        let object = self.read_object(container, key)?;
        Ok(ObjectDownload {
            properties: object.properties,
            stream: stream::once(async move { Ok(object.data) }).boxed(),
        })
    }

    async fn get_object_properties(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<ObjectProperties> {
        self.read_object(container, key).map(|o| o.properties)
    }

    async fn delete_object(&self, container: &str, key: &str) -> StorageResult<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        let target = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::NotFound(container.to_string()))?;
        target
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        let mut object = self.read_object(source_container, source_key)?;
        object.properties.last_modified = Utc::now();

        let mut containers = self
            .containers
            .write()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        let target = containers
            .get_mut(dest_container)
            .ok_or_else(|| StorageError::NotFound(dest_container.to_string()))?;
        target.objects.insert(dest_key.to_string(), object);
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> StorageResult<ListingPage> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        let source = containers
            .get(container)
            .ok_or_else(|| StorageError::NotFound(container.to_string()))?;

        let entries = source
            .objects
            .range(request.prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&request.prefix))
            .map(|(name, object)| (name.clone(), object.properties.clone()));
        Ok(paginate(entries, request))
    }
}
