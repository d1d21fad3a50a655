//! Adapter integration tests against a fault-injecting in-memory store.

mod common;

use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};

use blobfs::storage::{BlobStorageClient, LocalBlobStorage, UploadOptions};
use blobfs::{
    AdapterConfig, BlobFilesystemAdapter, FilesystemError, MetadataField, StorageAttributes,
};
use common::{CONTAINER, FaultKind, FaultyStorage, Operation, adapter_over, test_adapter};

fn paths(entries: &[StorageAttributes]) -> Vec<(&str, bool)> {
    entries.iter().map(|e| (e.path(), e.is_dir())).collect()
}

fn chunks(
    parts: &'static [&'static str],
) -> impl futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    stream::iter(
        parts
            .iter()
            .map(|part| Ok::<_, std::io::Error>(Bytes::from_static(part.as_bytes())))
            .collect::<Vec<_>>(),
    )
}

// ============================================================================
// Writing and reading
// ============================================================================

#[tokio::test]
async fn test_write_then_read() {
    let (adapter, storage) = test_adapter("");

    let attributes = adapter
        .write("notes/a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(attributes.path, "notes/a.txt");
    assert_eq!(attributes.file_size, 8);
    assert_eq!(attributes.mime_type.as_deref(), Some("text/plain"));

    assert_eq!(adapter.read("notes/a.txt").await.unwrap(), Bytes::from("contents"));
    assert_eq!(storage.inner().object_count(CONTAINER), Some(1));
}

#[tokio::test]
async fn test_write_stream_then_read() {
    let (adapter, _) = test_adapter("");

    let attributes = adapter
        .write_stream("data.json", chunks(&["{\"a\": ", "1}"]), &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(attributes.file_size, 8);
    assert_eq!(attributes.mime_type.as_deref(), Some("application/json"));

    assert_eq!(adapter.read("data.json").await.unwrap(), Bytes::from("{\"a\": 1}"));
}

#[tokio::test]
async fn test_write_stream_empty() {
    let (adapter, _) = test_adapter("");

    let attributes = adapter
        .write_stream("empty", chunks(&[]), &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(attributes.file_size, 0);
    assert!(adapter.read("empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_overwrites() {
    let (adapter, _) = test_adapter("");
    let options = UploadOptions::default();

    adapter.write("a.txt", "first", &options).await.unwrap();
    adapter.update("a.txt", "second", &options).await.unwrap();
    assert_eq!(adapter.read("a.txt").await.unwrap(), Bytes::from("second"));

    adapter
        .update_stream("a.txt", chunks(&["th", "ird"]), &options)
        .await
        .unwrap();
    assert_eq!(adapter.read("a.txt").await.unwrap(), Bytes::from("third"));
}

#[tokio::test]
async fn test_read_stream_yields_content() {
    let (adapter, _) = test_adapter("");
    adapter
        .write("a.bin", vec![1u8, 2, 3], &UploadOptions::default())
        .await
        .unwrap();

    let stream = adapter.read_stream("a.bin").await.unwrap();
    let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(parts.concat(), vec![1u8, 2, 3]);
}

#[tokio::test]
async fn test_write_applies_prefix() {
    let (adapter, storage) = test_adapter("/root_directory/");
    assert_eq!(adapter.prefix(), "root_directory/");

    adapter
        .write("/dir/a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();

    let stored = storage
        .inner()
        .get_object_properties(CONTAINER, "root_directory/dir/a.txt")
        .await;
    assert!(stored.is_ok());

    let entries = adapter.list_all("", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("dir", true)]);
}

#[tokio::test]
async fn test_content_type_resolution() {
    let storage = Arc::new(FaultyStorage::new());
    let config = AdapterConfig::new(CONTAINER).with_upload_defaults(
        UploadOptions::default()
            .with_cache_control("max-age=60")
            .with_content_type("application/x-default"),
    );
    let adapter = BlobFilesystemAdapter::from_config(storage.clone(), &config);

    let defaulted = adapter
        .write("a.txt", "text", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(defaulted.mime_type.as_deref(), Some("application/x-default"));

    let explicit = adapter
        .write(
            "b.txt",
            "text",
            &UploadOptions::default().with_content_type("text/csv"),
        )
        .await
        .unwrap();
    assert_eq!(explicit.mime_type.as_deref(), Some("text/csv"));

    let stored = storage
        .inner()
        .get_object_properties(CONTAINER, "b.txt")
        .await
        .unwrap();
    assert_eq!(stored.cache_control.as_deref(), Some("max-age=60"));
}

#[tokio::test]
async fn test_write_creates_missing_container() {
    let (adapter, storage) = test_adapter("");
    assert_eq!(storage.inner().object_count(CONTAINER), None);

    adapter
        .write("a.txt", "x", &UploadOptions::default())
        .await
        .unwrap();
    adapter
        .write("b.txt", "x", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(storage.inner().object_count(CONTAINER), Some(2));
}

#[tokio::test]
async fn test_container_creation_race_is_benign() {
    let (adapter, storage) = test_adapter("");
    storage.seed("existing", "x", &UploadOptions::default()).await;
    // Looks missing, but someone else creates it first.
    storage.fail_after(Operation::GetContainer, None, 0, FaultKind::NotFound);
    storage.fail_after(Operation::CreateContainer, None, 0, FaultKind::AlreadyExists);

    adapter
        .write("a.txt", "x", &UploadOptions::default())
        .await
        .unwrap();
    assert!(adapter.file_exists("a.txt").await.unwrap());
}

#[tokio::test]
async fn test_write_failures() {
    let (adapter, storage) = test_adapter("");
    storage.fail(Operation::Put, Some("a.txt"));

    let err = adapter
        .write("a.txt", "x", &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FilesystemError::WriteFailed { ref path, .. } if path == "a.txt"));
    assert!(err.storage_error().is_some());

    storage.fail(Operation::GetContainer, None);
    let err = adapter
        .write("b.txt", "x", &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FilesystemError::WriteFailed { .. }));
}

#[tokio::test]
async fn test_write_stream_read_error() {
    let (adapter, storage) = test_adapter("");
    let broken = stream::iter(vec![Err::<Bytes, _>(std::io::Error::other("disk gone"))]);

    let err = adapter
        .write_stream("a.txt", broken, &UploadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FilesystemError::WriteFailed { .. }));
    assert_eq!(storage.inner().object_count(CONTAINER), None);
}

#[tokio::test]
async fn test_read_missing_file() {
    let (adapter, _) = test_adapter("");
    adapter
        .write("present", "x", &UploadOptions::default())
        .await
        .unwrap();

    let err = adapter.read("missing").await.unwrap_err();
    assert!(matches!(err, FilesystemError::ReadFailed { .. }));
    assert!(err.is_not_found());

    assert!(adapter.read_stream("missing").await.is_err());
}

// ============================================================================
// Existence and deletion
// ============================================================================

#[tokio::test]
async fn test_exists_after_write_and_delete() {
    let (adapter, _) = test_adapter("prefix");
    assert!(!adapter.file_exists("a.txt").await.unwrap());

    adapter
        .write("a.txt", "x", &UploadOptions::default())
        .await
        .unwrap();
    assert!(adapter.file_exists("a.txt").await.unwrap());
    assert!(adapter.has("a.txt").await.unwrap());

    adapter.delete("a.txt").await.unwrap();
    assert!(!adapter.file_exists("a.txt").await.unwrap());
}

#[tokio::test]
async fn test_existence_check_failure() {
    let (adapter, storage) = test_adapter("");
    storage.fail(Operation::Properties, None);

    assert!(matches!(
        adapter.file_exists("a.txt").await,
        Err(FilesystemError::ExistenceCheckFailed { .. })
    ));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (adapter, _) = test_adapter("");
    adapter
        .write("a.txt", "x", &UploadOptions::default())
        .await
        .unwrap();

    adapter.delete("a.txt").await.unwrap();
    adapter.delete("a.txt").await.unwrap();
    adapter.delete("never-existed").await.unwrap();
}

#[tokio::test]
async fn test_delete_failure() {
    let (adapter, storage) = test_adapter("");
    storage.seed("a.txt", "x", &UploadOptions::default()).await;
    storage.fail(Operation::Delete, Some("a.txt"));

    assert!(matches!(
        adapter.delete("a.txt").await,
        Err(FilesystemError::DeleteFailed { .. })
    ));
}

#[tokio::test]
async fn test_delete_directory_follows_pages() {
    let storage = Arc::new(FaultyStorage::new().with_page_cap(1));
    let (adapter, storage) = adapter_over(storage, "");
    let options = UploadOptions::default();
    for key in ["x/a.txt", "x/b.txt", "x/y/c.txt", "xy/d.txt"] {
        storage.seed(key, "x", &options).await;
    }

    adapter.delete_directory("x").await.unwrap();

    assert_eq!(storage.list_requests().len(), 3);
    assert!(storage.list_requests().iter().all(|r| r.delimiter.is_none()));
    let remaining = adapter.list_all("", true).await.unwrap();
    assert_eq!(paths(&remaining), vec![("xy/d.txt", false)]);
}

#[tokio::test]
async fn test_delete_directory_stops_at_first_failure() {
    let (adapter, storage) = test_adapter("");
    let options = UploadOptions::default();
    for key in ["x/a.txt", "x/b.txt", "x/c.txt"] {
        storage.seed(key, "x", &options).await;
    }
    storage.fail(Operation::Delete, Some("x/b.txt"));

    let err = adapter.delete_directory("x/").await.unwrap_err();
    assert!(matches!(err, FilesystemError::DeleteDirectoryFailed { ref path, .. } if path == "x/"));

    assert!(!adapter.file_exists("x/a.txt").await.unwrap());
    assert!(adapter.file_exists("x/b.txt").await.unwrap());
    assert!(adapter.file_exists("x/c.txt").await.unwrap());
}

#[tokio::test]
async fn test_delete_directory_listing_failure() {
    let (adapter, storage) = test_adapter("");
    storage.seed("x/a.txt", "x", &UploadOptions::default()).await;
    storage.fail(Operation::List, None);

    assert!(matches!(
        adapter.delete_directory("x").await,
        Err(FilesystemError::DeleteDirectoryFailed { .. })
    ));
    assert!(adapter.file_exists("x/a.txt").await.unwrap());
}

#[tokio::test]
async fn test_create_directory_touches_nothing() {
    let (adapter, storage) = test_adapter("");

    let dir = adapter.create_directory("some/dir/").await.unwrap();
    assert_eq!(dir.path, "some/dir");
    assert_eq!(storage.inner().object_count(CONTAINER), None);
}

// ============================================================================
// Copy and move
// ============================================================================

#[tokio::test]
async fn test_copy() {
    let (adapter, _) = test_adapter("prefix");
    adapter
        .write("a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();

    adapter.copy("a.txt", "b/c.txt").await.unwrap();

    assert_eq!(adapter.read("a.txt").await.unwrap(), Bytes::from("contents"));
    assert_eq!(adapter.read("b/c.txt").await.unwrap(), Bytes::from("contents"));
}

#[tokio::test]
async fn test_copy_missing_source() {
    let (adapter, storage) = test_adapter("");
    storage.seed("other", "x", &UploadOptions::default()).await;

    let err = adapter.copy("missing", "b.txt").await.unwrap_err();
    assert!(matches!(
        err,
        FilesystemError::CopyFailed { ref source_path, ref destination, .. }
            if source_path == "missing" && destination == "b.txt"
    ));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_move() {
    let (adapter, _) = test_adapter("");
    adapter
        .write("a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();

    adapter.move_file("a.txt", "b.txt").await.unwrap();
    assert!(!adapter.file_exists("a.txt").await.unwrap());
    assert_eq!(adapter.read("b.txt").await.unwrap(), Bytes::from("contents"));

    adapter.rename("b.txt", "c.txt").await.unwrap();
    assert!(adapter.file_exists("c.txt").await.unwrap());
}

#[tokio::test]
async fn test_move_onto_itself_keeps_file() {
    let (adapter, _) = test_adapter("");
    adapter
        .write("a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();

    adapter.move_file("a.txt", "/a.txt").await.unwrap();
    assert_eq!(adapter.read("a.txt").await.unwrap(), Bytes::from("contents"));
}

#[tokio::test]
async fn test_move_rolls_back_when_source_delete_fails() {
    let (adapter, storage) = test_adapter("");
    adapter
        .write("a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();
    storage.fail(Operation::Delete, Some("a.txt"));

    let err = adapter.move_file("a.txt", "b.txt").await.unwrap_err();
    assert!(matches!(err, FilesystemError::MoveFailed { rollback: None, .. }));

    assert!(adapter.file_exists("a.txt").await.unwrap());
    assert!(!adapter.file_exists("b.txt").await.unwrap());
}

#[tokio::test]
async fn test_move_reports_failed_rollback() {
    let (adapter, storage) = test_adapter("");
    adapter
        .write("a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();
    storage.fail(Operation::Delete, Some("a.txt"));
    storage.fail(Operation::Delete, Some("b.txt"));

    let err = adapter.move_file("a.txt", "b.txt").await.unwrap_err();
    assert!(matches!(err, FilesystemError::MoveFailed { rollback: Some(_), .. }));
    assert!(err.to_string().contains("rollback"), "{}", err);

    // Both copies survive
    assert!(adapter.file_exists("a.txt").await.unwrap());
    assert!(adapter.file_exists("b.txt").await.unwrap());
}

#[tokio::test]
async fn test_move_copy_failure() {
    let (adapter, storage) = test_adapter("");
    storage.seed("a.txt", "x", &UploadOptions::default()).await;
    storage.fail(Operation::Copy, None);

    assert!(matches!(
        adapter.move_file("a.txt", "b.txt").await,
        Err(FilesystemError::MoveFailed { rollback: None, .. })
    ));
    assert!(adapter.file_exists("a.txt").await.unwrap());
}

// ============================================================================
// Metadata
// ============================================================================

#[tokio::test]
async fn test_metadata_of_existing_file() {
    let (adapter, _) = test_adapter("prefix");
    adapter
        .write("dir/a.txt", "contents", &UploadOptions::default())
        .await
        .unwrap();

    let metadata = adapter.metadata("dir/a.txt").await.unwrap();
    assert_eq!(metadata.path, "dir/a.txt");
    assert_eq!(metadata.dirname(), "dir");
    assert_eq!(metadata.file_size, 8);
    assert_eq!(metadata.visibility, None);

    assert_eq!(adapter.file_size("dir/a.txt").await.unwrap(), 8);
    assert_eq!(adapter.mime_type("dir/a.txt").await.unwrap(), "text/plain");

    let modified = adapter.last_modified("dir/a.txt").await.unwrap();
    assert!((chrono::Utc::now().timestamp() - modified).abs() < 60);
}

#[tokio::test]
async fn test_metadata_of_missing_file() {
    let (adapter, storage) = test_adapter("");
    storage.seed("present", "x", &UploadOptions::default()).await;

    for (result, expected) in [
        (adapter.metadata("missing").await.map(|_| ()), MetadataField::Metadata),
        (adapter.file_size("missing").await.map(|_| ()), MetadataField::FileSize),
        (adapter.mime_type("missing").await.map(|_| ()), MetadataField::MimeType),
        (
            adapter.last_modified("missing").await.map(|_| ()),
            MetadataField::LastModified,
        ),
    ] {
        let err = result.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            err,
            FilesystemError::MetadataRetrievalFailed { field, source: Some(_), .. } if field == expected
        ));
    }
}

#[tokio::test]
async fn test_mime_type_not_stored() {
    let (adapter, storage) = test_adapter("");
    storage.seed("raw", "x", &UploadOptions::default()).await;

    let err = adapter.mime_type("raw").await.unwrap_err();
    assert!(matches!(
        err,
        FilesystemError::MetadataRetrievalFailed { field: MetadataField::MimeType, source: None, .. }
    ));
}

// ============================================================================
// Listing
// ============================================================================

async fn seed_tree(storage: &FaultyStorage) {
    let options = UploadOptions::default();
    storage.seed("x/a.txt", "a", &options).await;
    storage.seed("x/y/b.txt", "b", &options).await;
}

#[tokio::test]
async fn test_shallow_listing() {
    let (adapter, storage) = test_adapter("");
    seed_tree(&storage).await;

    let entries = adapter.list_all("x", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/y", true)]);

    let requests = storage.list_requests();
    assert_eq!(requests[0].prefix, "x/");
    assert_eq!(requests[0].delimiter.as_deref(), Some("/"));
    assert_eq!(requests[0].max_results, Some(blobfs::DEFAULT_LIST_PAGE_SIZE));
}

#[tokio::test]
async fn test_deep_listing() {
    let (adapter, storage) = test_adapter("");
    seed_tree(&storage).await;

    let entries = adapter.list_all("x", true).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/y/b.txt", false)]);
    assert!(storage.list_requests()[0].delimiter.is_none());
}

#[tokio::test]
async fn test_listing_strips_prefix() {
    let (adapter, storage) = test_adapter("root");
    let options = UploadOptions::default();
    storage.seed("root/x/a.txt", "a", &options).await;
    storage.seed("root/x/y/b.txt", "b", &options).await;
    storage.seed("other/c.txt", "c", &options).await;

    let entries = adapter.list_all("/", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("x", true)]);

    let entries = adapter.list_all("x/", true).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/y/b.txt", false)]);
    match &entries[0] {
        StorageAttributes::File(file) => assert_eq!(file.file_size, 1),
        other => panic!("expected a file, got {:?}", other),
    }
}

#[tokio::test]
async fn test_listing_follows_continuation() {
    let (adapter, storage) = test_adapter("");
    seed_tree(&storage).await;
    let adapter = adapter.with_list_page_size(1);

    let entries = adapter.list_all("x", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/y", true)]);

    let requests = storage.list_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.max_results == Some(1)));
    assert_eq!(requests[0].continuation, None);
    assert!(requests[1].continuation.is_some());
}

#[tokio::test]
async fn test_listing_is_lazy() {
    let (adapter, storage) = test_adapter("");
    seed_tree(&storage).await;
    let adapter = adapter.with_list_page_size(1);

    let mut entries = adapter.list_contents("x", true);
    assert!(storage.list_requests().is_empty());

    let first = entries.next().await.unwrap().unwrap();
    assert_eq!(first.path(), "x/a.txt");
    assert_eq!(storage.list_requests().len(), 1);
}

#[tokio::test]
async fn test_listing_failure_ends_stream() {
    let (adapter, storage) = test_adapter("");
    seed_tree(&storage).await;
    let adapter = adapter.with_list_page_size(1);
    storage.fail_after(Operation::List, None, 1, FaultKind::Backend);

    let results: Vec<_> = adapter.list_contents("x", true).collect().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap().path(), "x/a.txt");
    assert!(matches!(
        results[1],
        Err(FilesystemError::ListingFailed { ref path, .. }) if path == "x"
    ));
    assert_eq!(storage.list_requests().len(), 2);
}

#[tokio::test]
async fn test_listing_directory_markers() {
    let (adapter, storage) = test_adapter("");
    let options = UploadOptions::default();
    storage.seed("x/", "", &options).await;
    storage.seed("x/empty/", "", &options).await;
    storage.seed("x/a.txt", "a", &options).await;

    let entries = adapter.list_all("x", true).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/empty", true)]);

    let entries = adapter.list_all("x", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/empty", true)]);
}

#[tokio::test]
async fn test_shallow_listing_without_delimiter_support() {
    let storage = Arc::new(FaultyStorage::new().ignoring_delimiter());
    let (adapter, storage) = adapter_over(storage, "");
    let options = UploadOptions::default();
    for key in ["x/a.txt", "x/y/b.txt", "x/y/c.txt", "x/y/z/d.txt"] {
        storage.seed(key, "x", &options).await;
    }

    // Directories are reported once even when their children span pages.
    let adapter = adapter.with_list_page_size(1);
    let entries = adapter.list_all("x", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("x/a.txt", false), ("x/y", true)]);
    assert_eq!(storage.list_requests().len(), 4);
}

#[tokio::test]
async fn test_listing_missing_container_fails() {
    let (adapter, _) = test_adapter("");

    let err = adapter.list_all("", false).await.unwrap_err();
    assert!(matches!(err, FilesystemError::ListingFailed { .. }));
    assert!(err.is_not_found());
}

// ============================================================================
// Local directory store
// ============================================================================

#[tokio::test]
async fn test_local_storage_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let client: Arc<dyn BlobStorageClient> = Arc::new(LocalBlobStorage::new(dir.path()));
    let adapter = BlobFilesystemAdapter::new(client, "files", "site");
    let options = UploadOptions::default();

    adapter.write("index.html", "<html></html>", &options).await.unwrap();
    adapter
        .write_stream("assets/app.css", chunks(&["body ", "{}"]), &options)
        .await
        .unwrap();
    assert!(dir.path().join("files/objects/site/index.html").exists());

    assert_eq!(adapter.mime_type("index.html").await.unwrap(), "text/html");
    assert_eq!(adapter.mime_type("assets/app.css").await.unwrap(), "text/css");

    let entries = adapter.list_all("", false).await.unwrap();
    assert_eq!(paths(&entries), vec![("index.html", false), ("assets", true)]);

    adapter.move_file("index.html", "assets/index.html").await.unwrap();
    assert!(!adapter.file_exists("index.html").await.unwrap());
    assert_eq!(
        adapter.read("assets/index.html").await.unwrap(),
        Bytes::from("<html></html>")
    );

    adapter.delete_directory("assets").await.unwrap();
    assert!(adapter.list_all("", true).await.unwrap().is_empty());
}
