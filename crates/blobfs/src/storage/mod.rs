//! Blob storage client abstraction.
//!
//! The filesystem adapter talks to blob storage only through the
//! [`BlobStorageClient`] trait. Two implementations are bundled:
//! - In-memory storage (tests, embedding)
//! - Local directory storage (CLI, development)
//!
//! Cloud services plug in by implementing the trait on top of their SDK client.

mod error;
mod listing;
mod local;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use local::LocalBlobStorage;
pub use memory::MemoryBlobStorage;
pub use traits::{
    BlobStorageClient, ByteStream, ContainerOptions, ContainerProperties, ListRequest,
    ListedObject, ListingPage, ObjectBody, ObjectDownload, ObjectProperties, PublicAccess,
    UploadOptions,
};
