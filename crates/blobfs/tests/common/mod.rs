//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use blobfs::BlobFilesystemAdapter;
use blobfs::storage::{
    BlobStorageClient, ContainerOptions, ContainerProperties, ListRequest, ListingPage,
    MemoryBlobStorage, ObjectBody, ObjectDownload, ObjectProperties, StorageError, StorageResult,
    UploadOptions,
};

pub const CONTAINER: &str = "container";

/// Storage client calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetContainer,
    CreateContainer,
    Put,
    Get,
    Properties,
    Delete,
    Copy,
    List,
}

/// Error kind an injected fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Backend,
    NotFound,
    AlreadyExists,
}

struct Fault {
    operation: Operation,
    key: Option<String>,
    kind: FaultKind,
    skip: usize,
}

/// In-memory storage that fails selected calls and records listing requests.
#[derive(Default)]
pub struct FaultyStorage {
    inner: MemoryBlobStorage,
    faults: Mutex<Vec<Fault>>,
    list_requests: Mutex<Vec<ListRequest>>,
    page_cap: Option<usize>,
    ignore_delimiter: bool,
}

impl FaultyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every listing page at `cap` entries, whatever the caller asks for.
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = Some(cap);
        self
    }

    /// Answer delimited listings as if no delimiter was given.
    pub fn ignoring_delimiter(mut self) -> Self {
        self.ignore_delimiter = true;
        self
    }

    pub fn inner(&self) -> &MemoryBlobStorage {
        &self.inner
    }

    /// Fail every `operation` on `key` (any key when `None`) with a backend error.
    pub fn fail(&self, operation: Operation, key: Option<&str>) {
        self.fail_after(operation, key, 0, FaultKind::Backend);
    }

    /// Let `skip` matching calls through, then fail the rest with `kind`.
    pub fn fail_after(&self, operation: Operation, key: Option<&str>, skip: usize, kind: FaultKind) {
        self.faults.lock().unwrap().push(Fault {
            operation,
            key: key.map(str::to_string),
            kind,
            skip,
        });
    }

    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.list_requests.lock().unwrap().clone()
    }

    /// Store an object directly, bypassing the adapter.
    pub async fn seed(&self, key: &str, contents: &str, options: &UploadOptions) {
        if self.inner.get_container_properties(CONTAINER).await.is_err() {
            self.inner
                .create_container(CONTAINER, &ContainerOptions::default())
                .await
                .unwrap();
        }
        self.inner
            .put_object(
                CONTAINER,
                key,
                ObjectBody::from(contents.as_bytes().to_vec()),
                options,
            )
            .await
            .unwrap();
    }

    fn check(&self, operation: Operation, key: &str) -> StorageResult<()> {
        let mut faults = self.faults.lock().unwrap();
        for fault in faults.iter_mut() {
            if fault.operation != operation || fault.key.as_deref().is_some_and(|k| k != key) {
                continue;
            }
            if fault.skip > 0 {
                fault.skip -= 1;
                continue;
            }
            return Err(match fault.kind {
                FaultKind::Backend => {
                    StorageError::Backend(format!("injected {:?} failure for {}", operation, key))
                }
                FaultKind::NotFound => StorageError::NotFound(key.to_string()),
                FaultKind::AlreadyExists => StorageError::AlreadyExists(key.to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStorageClient for FaultyStorage {
    async fn get_container_properties(&self, container: &str) -> StorageResult<ContainerProperties> {
        self.check(Operation::GetContainer, container)?;
        self.inner.get_container_properties(container).await
    }

    async fn create_container(
        &self,
        container: &str,
        options: &ContainerOptions,
    ) -> StorageResult<()> {
        self.check(Operation::CreateContainer, container)?;
        self.inner.create_container(container, options).await
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: ObjectBody,
        options: &UploadOptions,
    ) -> StorageResult<ObjectProperties> {
        self.check(Operation::Put, key)?;
        self.inner.put_object(container, key, body, options).await
    }

    async fn get_object(&self, container: &str, key: &str) -> StorageResult<ObjectDownload> {
        self.check(Operation::Get, key)?;
        self.inner.get_object(container, key).await
    }

    async fn get_object_properties(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<ObjectProperties> {
        self.check(Operation::Properties, key)?;
        self.inner.get_object_properties(container, key).await
    }

    async fn delete_object(&self, container: &str, key: &str) -> StorageResult<()> {
        self.check(Operation::Delete, key)?;
        self.inner.delete_object(container, key).await
    }

    async fn copy_object(
        &self,
        source_container: &str,
        source_key: &str,
        dest_container: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.check(Operation::Copy, source_key)?;
        self.inner
            .copy_object(source_container, source_key, dest_container, dest_key)
            .await
    }

    async fn list_objects(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> StorageResult<ListingPage> {
        self.list_requests.lock().unwrap().push(request.clone());
        self.check(Operation::List, &request.prefix)?;

        let mut request = request.clone();
        if let Some(cap) = self.page_cap {
            request.max_results = Some(request.max_results.map_or(cap, |n| n.min(cap)));
        }
        if self.ignore_delimiter {
            request.delimiter = None;
        }
        self.inner.list_objects(container, &request).await
    }
}

/// Adapter over a fresh [`FaultyStorage`].
pub fn test_adapter(prefix: &str) -> (BlobFilesystemAdapter, Arc<FaultyStorage>) {
    adapter_over(Arc::new(FaultyStorage::new()), prefix)
}

pub fn adapter_over(
    storage: Arc<FaultyStorage>,
    prefix: &str,
) -> (BlobFilesystemAdapter, Arc<FaultyStorage>) {
    let adapter = BlobFilesystemAdapter::new(storage.clone(), CONTAINER, prefix);
    (adapter, storage)
}
