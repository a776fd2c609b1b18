//! End-to-end tests of the host runtime: network transitions drive the
//! manager, the worker syncs over RPC, and image sync follows the pulled
//! products.

use possync_engine::{MemoryStore, MockRemote, SyncConfig};
use possync_host::images::{ImageSyncController, MockImageFetcher};
use possync_host::{HostConfig, NetworkMonitor, RunState, ScriptedProbe, SyncManager};
use possync_protocol::{PullPage, SyncEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn config() -> SyncConfig {
    SyncConfig::new("memory://")
        .with_device("terminal-1", "branch-1")
        .with_tables(["products", "clients"])
}

#[tokio::test]
async fn reconnect_pushes_offline_writes() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_local("clients", json!({"id": "c1", "name": "Walk-in"}).as_object().cloned().unwrap())
        .unwrap();
    let remote = Arc::new(MockRemote::new());
    let host = HostConfig::default().with_sync_interval(Duration::from_secs(3600));
    let manager = Arc::new(SyncManager::new(config(), host.clone(), store.clone(), remote.clone()));
    let monitor = NetworkMonitor::from_config(ScriptedProbe::new([false, true]), &host);

    let network = monitor.subscribe();
    let (stop, shutdown) = watch::channel(false);
    let mut status = manager.subscribe();
    let scheduler = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_scheduler(network, false, shutdown).await })
    };

    monitor.poll_once().await;
    assert!(!monitor.is_online());
    monitor.poll_once().await;
    assert!(monitor.is_online());

    loop {
        if status.recv().await.unwrap() == SyncEvent::Done {
            break;
        }
    }
    stop.send(true).unwrap();
    assert_eq!(scheduler.await.unwrap(), 1);

    assert!(store.unsynced_ids("clients").is_empty());
    assert_eq!(remote.pushed_batches("clients").len(), 1);
    assert!(matches!(manager.state(), RunState::Completed { .. }));
}

#[tokio::test]
async fn pulled_products_feed_image_sync() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MockRemote::new());
    remote.queue_page(
        "products",
        PullPage::new(
            vec![
                json!({"id": 1, "name": "Espresso", "price": "2.5", "image_url": "https://cdn.example.com/espresso.png"}),
                json!({"id": 2, "name": "Latte", "price": 3, "image_url": "https://cdn.example.com/latte.png?v=2"}),
            ],
            false,
        )
        .with_cursor("2024-05-01T10:00:00Z", Some("2".into())),
    );
    let manager = SyncManager::new(config(), HostConfig::default(), store.clone(), remote);
    let summary = manager.run_once().await.unwrap();
    assert_eq!(summary.table("products").unwrap().pulled, 2);

    let dir = tempfile::tempdir().unwrap();
    let fetcher = MockImageFetcher::new();
    fetcher.serve("https://cdn.example.com/espresso.png", b"E".to_vec());
    fetcher.serve("https://cdn.example.com/latte.png?v=2", b"L".to_vec());
    let images = ImageSyncController::new(store.clone(), fetcher, dir.path());

    let report = images.sync().await.unwrap();
    assert_eq!(report.downloaded, 2);
    assert_eq!(store.row("products", "2").unwrap().row["image_local"], "2_latte.png");
    assert!(dir.path().join("1_espresso.png").exists());

    // Recording the filename does not queue the product for push.
    assert!(store.unsynced_ids("products").is_empty());

    // A later pull keeps the local filename.
    let next = manager.run_once().await.unwrap();
    assert!(next.is_clean());
    assert_eq!(store.row("products", "1").unwrap().row["image_local"], "1_espresso.png");
}

#[tokio::test]
async fn row_and_image_sync_run_side_by_side() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(SyncManager::new(
        config(),
        HostConfig::default(),
        store.clone(),
        Arc::new(MockRemote::new()),
    ));
    let dir = tempfile::tempdir().unwrap();
    let images = ImageSyncController::new(store.clone(), MockImageFetcher::new(), dir.path());

    let rows = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_once().await })
    };
    let report = images.sync().await.unwrap();
    assert_eq!(report.total, 0);
    assert!(rows.await.unwrap().is_ok());
}
