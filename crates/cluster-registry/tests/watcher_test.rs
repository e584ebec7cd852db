// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Config watcher tests against a real filesystem.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use cluster_registry::cluster_config::ClusterConfigSource;
use cluster_registry::reconcile::ReconciliationService;
use cluster_registry::store::Store;
use cluster_registry::watcher::{ConfigWatcher, ConfigWatcherConfig, WatcherHandle};

const WAIT: Duration = Duration::from_secs(10);

struct Fixture {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
    store: Arc<dyn Store>,
    source: Arc<ClusterConfigSource>,
    handle: WatcherHandle,
}

async fn start() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = common::config_path(&dir);
    let definition = common::definition("c1", "https://api.c1.example.com/");
    common::write_config(&path, &[definition]);

    let store = common::sqlite_store().await;
    let source = Arc::new(ClusterConfigSource::load(&path).unwrap());
    let reconciler = ReconciliationService::new(
        common::coordinator(store.clone(), Duration::from_secs(30)),
        source.clone(),
    );
    reconciler.sync_current().await.unwrap();

    let config = ConfigWatcherConfig::default();
    let handle = ConfigWatcher::start(source.clone(), reconciler, config).unwrap();

    Fixture {
        _dir: dir,
        path,
        store,
        source,
        handle,
    }
}

async fn wait_for_reloads(reloads: &mut watch::Receiver<u64>, count: u64) {
    tokio::time::timeout(WAIT, reloads.wait_for(|n| *n >= count))
        .await
        .expect("Timed out waiting for config reload")
        .expect("Watcher stopped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_valid_update_is_reloaded_and_synced() {
    let fixture = start().await;
    let mut reloads = fixture.handle.reloads();

    common::write_config(
        &fixture.path,
        &[
            common::definition("c1", "https://api.c1.example.com/"),
            common::definition("c2", "https://api.c2.example.com/"),
        ],
    );
    wait_for_reloads(&mut reloads, 1).await;

    assert_eq!(fixture.source.snapshot().len(), 2);
    let c2 = fixture
        .store
        .repository()
        .load_cluster_by_url("https://api.c2.example.com/")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c2.token_provider_id, c2.id.to_string());

    fixture.handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_update_keeps_previous_snapshot() {
    let fixture = start().await;
    let mut reloads = fixture.handle.reloads();
    let before = fixture.source.snapshot();

    let mut broken = common::definition("c1", "https://api.c1.example.com/");
    broken["auth-client-secret"] = serde_json::json!("");
    common::write_config(&fixture.path, &[broken]);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*reloads.borrow(), 0);
    assert!(Arc::ptr_eq(&before, &fixture.source.snapshot()));
    let stored = fixture
        .store
        .repository()
        .load_cluster_by_url("https://api.c1.example.com/")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.auth_client_secret, "c1-secret");

    // The watcher is still alive and picks up the fix.
    common::write_config(
        &fixture.path,
        &[common::definition("c1-fixed", "https://api.c1.example.com/")],
    );
    wait_for_reloads(&mut reloads, 1).await;
    assert_eq!(
        fixture
            .source
            .snapshot()
            .get("https://api.c1.example.com/")
            .unwrap()
            .name,
        "c1-fixed"
    );

    fixture.handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_file_is_picked_up_when_recreated() {
    let fixture = start().await;
    let mut reloads = fixture.handle.reloads();

    std::fs::remove_file(&fixture.path).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fixture.source.snapshot().len(), 1);

    common::write_config(
        &fixture.path,
        &[common::definition("c3", "https://api.c3.example.com/")],
    );
    wait_for_reloads(&mut reloads, 1).await;

    let snapshot = fixture.source.snapshot();
    assert!(snapshot.get("https://api.c3.example.com/").is_some());
    assert!(
        fixture
            .store
            .repository()
            .load_cluster_by_url("https://api.c3.example.com/")
            .await
            .unwrap()
            .is_some()
    );

    fixture.handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrelated_files_are_ignored() {
    let fixture = start().await;
    let reloads = fixture.handle.reloads();

    std::fs::write(fixture.path.with_file_name("notes.txt"), "hello").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(*reloads.borrow(), 0);
    fixture.handle.stop().await;
}
