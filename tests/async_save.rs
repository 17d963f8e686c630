//! Background saves: coalescing, flush, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use options_store::options::StorePolicy;
use options_store::persistence::{ConfigStore, SaveQueue};
use options_store::{LockedFileStore, OptionsStore, Shutdown, StoreConfig};

mod common;

#[tokio::test]
async fn test_burst_of_requests_coalesces() {
    let (_dir, path) = common::settings_file();
    let store = Arc::new(common::store());
    let shutdown = Shutdown::new();
    let (queue, worker) = SaveQueue::spawn(Arc::clone(&store), &shutdown);

    // The worker cannot run before the first await on this runtime.
    for steps in 21..=25 {
        store.set("steps", steps).unwrap();
        queue.request(path.clone());
    }
    assert_eq!(queue.pending(), 1);

    queue.flush().await;
    assert_eq!(queue.pending(), 0);
    assert_eq!(common::read_json(&path), json!({ "steps": 25 }));

    shutdown.trigger();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_distinct_paths_are_saved_separately() {
    let (dir, path) = common::settings_file();
    let backup = dir.path().join("backup.json");
    let store = Arc::new(common::store());
    let shutdown = Shutdown::new();
    let (queue, worker) = SaveQueue::spawn(Arc::clone(&store), &shutdown);

    store.set("sampler", "DDIM").unwrap();
    queue.request(path.clone());
    queue.request(backup.clone());
    assert_eq!(queue.pending(), 2);
    queue.flush().await;

    assert_eq!(common::read_json(&path), json!({ "sampler": "DDIM" }));
    assert_eq!(common::read_json(&backup), json!({ "sampler": "DDIM" }));

    shutdown.trigger();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_waits_for_every_earlier_request() {
    let (_dir, path) = common::settings_file();
    let shutdown = Shutdown::new();
    let (store, worker) = ConfigStore::with_store(Arc::new(common::store()), path.clone(), &shutdown);

    for steps in 30..40 {
        store.set_and_save("steps", steps).unwrap();
        tokio::task::yield_now().await;
    }
    store.flush().await;
    assert_eq!(common::read_json(&path), json!({ "steps": 39 }));

    shutdown.trigger();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_unchanged_set_does_not_schedule_a_save() {
    let (_dir, path) = common::settings_file();
    let shutdown = Shutdown::new();
    let (store, worker) = ConfigStore::with_store(Arc::new(common::store()), path.clone(), &shutdown);

    assert!(!store.set_and_save("steps", 20).unwrap());
    store.flush().await;
    assert!(!path.exists());

    shutdown.trigger();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_pending_saves() {
    let (_dir, path) = common::settings_file();
    let store = Arc::new(common::store());
    let shutdown = Shutdown::new();
    let (queue, worker) = SaveQueue::spawn(Arc::clone(&store), &shutdown);

    store.set("steps", 77).unwrap();
    queue.request(path.clone());
    shutdown.trigger();
    worker.await.unwrap();

    assert!(queue.is_closed());
    assert_eq!(common::read_json(&path), json!({ "steps": 77 }));

    // After close, requests are saved before returning.
    store.set("steps", 78).unwrap();
    queue.request(path.clone());
    assert_eq!(common::read_json(&path), json!({ "steps": 78 }));
    queue.flush().await;
}

#[tokio::test]
async fn test_open_loads_and_bootstraps_the_settings_file() {
    let (dir, _) = common::settings_file();
    let config = StoreConfig {
        settings_path: dir.path().join("settings").join("config.json"),
        ..StoreConfig::default()
    };
    let shutdown = Shutdown::new();
    let (store, report, worker) = ConfigStore::open(&config, common::schema(), &shutdown);

    assert!(report.created);
    assert_eq!(store.path(), config.settings_path.as_path());
    assert_eq!(common::read_json(store.path()), json!({}));

    let consumer = store.clone();
    consumer.set_and_save("show_progress", false).unwrap();
    store.flush().await;
    assert_eq!(common::read_json(store.path()), json!({ "show_progress": false }));
    assert!(!store.get_bool("show_progress").unwrap());

    shutdown.trigger();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_flush_during_shutdown_waits_for_final_drain() {
    let (dir, first) = common::settings_file();
    let second = dir.path().join("second.json");
    let files = LockedFileStore::default().with_write_delay(Duration::from_millis(200));
    let store = Arc::new(OptionsStore::new(common::schema(), files, StorePolicy::default()));
    store.set("steps", 64).unwrap();
    let shutdown = Shutdown::new();
    let (queue, worker) = SaveQueue::spawn(Arc::clone(&store), &shutdown);

    queue.request(first.clone());
    shutdown.trigger();
    // Let the worker take `first` before `second` is queued.
    tokio::task::yield_now().await;
    queue.request(second.clone());

    while !queue.is_closed() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.flush().await;
    assert_eq!(common::read_json(&second), json!({ "steps": 64 }));

    worker.await.unwrap();
    assert_eq!(common::read_json(&first), json!({ "steps": 64 }));
}
