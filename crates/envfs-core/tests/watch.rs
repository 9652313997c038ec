//! Watch roots and change streams, locally and through an agent.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use envfs_core::types::{
    ChangeType, CreationMode, EnvPath, PathChange, UnwatchOptions, WatchOptions, WatchedPath,
    WriteOptions,
};
use envfs_core::{ChangeStream, Config, FileSystemApi, LocalFileSystem, PosixFileSystemApi, loopback};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

async fn root_of(fs: &dyn PosixFileSystemApi, dir: &tempfile::TempDir) -> EnvPath {
    let raw = EnvPath::parse(dir.path().to_str().unwrap(), fs.descriptor()).unwrap();
    fs.canonicalize(&raw).await.unwrap()
}

/// Wait for an event on `path` of kind `kind`, skipping anything else.
async fn expect_change(changes: &mut ChangeStream, path: &EnvPath, kind: ChangeType) -> PathChange {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let change = changes.next().await.expect("change stream ended");
            if &change.path == path && change.change_type == kind {
                return change;
            }
        }
    })
    .await
    .expect("no matching change event")
}

async fn create_file(fs: &dyn PosixFileSystemApi, path: &EnvPath) {
    let options = WriteOptions::builder(path.clone())
        .creation_mode(CreationMode::AllowCreate)
        .build();
    let mut writer = fs.open_for_writing(options).await.unwrap();
    writer.write_all(b"event").await.unwrap();
    writer.close().await.unwrap();
}

async fn created_and_deleted_are_reported(fs: Arc<dyn PosixFileSystemApi>) {
    assert!(fs.supports_watching());
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(fs.as_ref(), &dir).await;

    let options = WatchOptions::builder()
        .path(WatchedPath::recursive(root.clone()))
        .build();
    assert!(fs.add_watch_roots(options.clone()).await.unwrap());
    // Registering the same root again is not "all new".
    assert!(!fs.add_watch_roots(options).await.unwrap());

    let mut changes = fs.watch_changes().unwrap();
    // Give a remote subscription time to reach the agent.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let file = root.join("fresh.txt").unwrap();
    create_file(fs.as_ref(), &file).await;
    expect_change(&mut changes, &file, ChangeType::Created).await;

    fs.delete(&file, false).await.unwrap();
    expect_change(&mut changes, &file, ChangeType::Deleted).await;

    assert!(fs.unwatch(UnwatchOptions::new(root.clone())).await.unwrap());
    assert!(!fs.unwatch(UnwatchOptions::new(root)).await.unwrap());
}

async fn change_type_filter_applies(fs: Arc<dyn PosixFileSystemApi>) {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(fs.as_ref(), &dir).await;

    let options = WatchOptions::builder()
        .path(WatchedPath::new(root.clone()))
        .change_types([ChangeType::Deleted])
        .build();
    assert!(fs.add_watch_roots(options).await.unwrap());
    let mut changes = fs.watch_changes().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let file = root.join("filtered.txt").unwrap();
    create_file(fs.as_ref(), &file).await;
    fs.delete(&file, false).await.unwrap();

    let change = expect_change(&mut changes, &file, ChangeType::Deleted).await;
    assert_eq!(change.change_type, ChangeType::Deleted);
    // Nothing but deletions gets through.
    let rest = tokio::time::timeout(Duration::from_millis(300), changes.next()).await;
    if let Ok(Some(extra)) = rest {
        assert_eq!(extra.change_type, ChangeType::Deleted);
    }
}

async fn non_recursive_root_skips_nested_changes(fs: Arc<dyn PosixFileSystemApi>) {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(fs.as_ref(), &dir).await;
    let nested = root.join("nested").unwrap();
    fs.create_directory(&nested, None).await.unwrap();

    let options = WatchOptions::builder()
        .path(WatchedPath::new(root.clone()))
        .build();
    assert!(fs.add_watch_roots(options).await.unwrap());
    let mut changes = fs.watch_changes().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let inner = nested.join("inner.txt").unwrap();
    create_file(fs.as_ref(), &inner).await;
    let marker = root.join("marker.txt").unwrap();
    create_file(fs.as_ref(), &marker).await;

    // Anything from inside `nested` would arrive before the marker.
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let change = changes.next().await.expect("change stream ended");
            assert!(
                change.path == nested || !change.path.starts_with(&nested),
                "nested change leaked: {change:?}"
            );
            if change.path == marker && change.change_type == ChangeType::Created {
                break;
            }
        }
    })
    .await
    .expect("no event for the marker file");
}

async fn local() -> Arc<dyn PosixFileSystemApi> {
    Arc::new(LocalFileSystem::new())
}

async fn remote() -> Arc<dyn PosixFileSystemApi> {
    let config = Config::default();
    Arc::new(
        loopback(Arc::new(LocalFileSystem::new()), &config)
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_local_created_and_deleted() {
    created_and_deleted_are_reported(local().await).await;
}

#[tokio::test]
async fn test_remote_created_and_deleted() {
    created_and_deleted_are_reported(remote().await).await;
}

#[tokio::test]
async fn test_local_change_type_filter() {
    change_type_filter_applies(local().await).await;
}

#[tokio::test]
async fn test_remote_change_type_filter() {
    change_type_filter_applies(remote().await).await;
}

#[tokio::test]
async fn test_local_non_recursive_root() {
    non_recursive_root_skips_nested_changes(local().await).await;
}

#[tokio::test]
async fn test_remote_non_recursive_root() {
    non_recursive_root_skips_nested_changes(remote().await).await;
}

#[tokio::test]
async fn test_every_subscriber_sees_every_event() {
    let fs = local().await;
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(fs.as_ref(), &dir).await;
    fs.add_watch_roots(
        WatchOptions::builder()
            .path(WatchedPath::new(root.clone()))
            .build(),
    )
    .await
    .unwrap();

    let mut first = fs.watch_changes().unwrap();
    let mut second = fs.watch_changes().unwrap();
    let file = root.join("shared.txt").unwrap();
    create_file(fs.as_ref(), &file).await;

    expect_change(&mut first, &file, ChangeType::Created).await;
    expect_change(&mut second, &file, ChangeType::Created).await;
}
