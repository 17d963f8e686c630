//! Failure injection: slow writers, broken lock primitives, bad files.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use options_store::options::StorePolicy;
use options_store::storage::{Document, UnsupportedLocker};
use options_store::{LockedFileStore, OptionsStore, ReadOutcome, SettingValue};

mod common;

fn document(steps: i64) -> Document {
    let mut doc = Document::new();
    doc.insert("steps".to_string(), json!(steps));
    doc.insert("padding".to_string(), json!("x".repeat(4096)));
    doc
}

#[test]
fn test_reader_never_sees_a_partial_in_place_write() {
    let (_dir, path) = common::settings_file();
    assert!(LockedFileStore::default().write(&document(0), &path, false));

    // Truncate, pause, then write: without the lock a reader would see an
    // empty or half-written file during the pause.
    let writer_store = LockedFileStore::default().with_write_delay(Duration::from_millis(20));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let path = path.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for steps in 1..=10 {
                assert!(writer_store.write(&document(steps), &path, false));
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let reader_store = LockedFileStore::default();
    let mut reads = 0;
    while !done.load(Ordering::SeqCst) {
        match reader_store.read(&path) {
            ReadOutcome::Document(doc) => assert!(doc["steps"].is_i64()),
            other => panic!("reader observed {:?}", other),
        }
        reads += 1;
        thread::sleep(Duration::from_millis(2));
    }
    writer.join().unwrap();

    assert!(reads > 0);
    assert!(reader_store.is_locking_available());
    match reader_store.read(&path) {
        ReadOutcome::Document(doc) => assert_eq!(doc["steps"], json!(10)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_concurrent_stores_saving_and_loading() {
    let (_dir, path) = common::settings_file();
    assert!(LockedFileStore::default().write(&Document::new(), &path, true));
    let saves = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..2)
        .map(|n| {
            let path = path.clone();
            let saves = Arc::clone(&saves);
            thread::spawn(move || {
                let files = LockedFileStore::default().with_write_delay(Duration::from_millis(5));
                let store = OptionsStore::new(common::schema(), files, StorePolicy::default());
                for i in 0..10 {
                    store.set("steps", 21 + n * 10 + i).unwrap();
                    assert!(store.save(&path));
                    saves.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    let reader = common::store();
    while saves.load(Ordering::SeqCst) < 20 {
        let report = reader.load(&path);
        assert!(!report.failed);
        assert!(report.rejected.is_empty());
        thread::sleep(Duration::from_millis(2));
    }
    for writer in writers {
        writer.join().unwrap();
    }

    assert!(!reader.load(&path).failed);
    let value = reader.get_int("steps").unwrap();
    assert!(value == 30 || value == 40, "final value {}", value);
}

#[test]
fn test_broken_lock_primitive_degrades_to_unlocked_io() {
    let (_dir, path) = common::settings_file();
    let files = LockedFileStore::with_locker(Arc::new(UnsupportedLocker), Duration::from_secs(1));
    assert!(files.is_locking_available());

    assert!(files.write(&document(5), &path, true));
    assert!(!files.is_locking_available());

    match files.read(&path) {
        ReadOutcome::Document(doc) => assert_eq!(doc["steps"], json!(5)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(files.write(&document(6), &path, false));
    assert!(!files.is_locking_available());
    assert_eq!(files.read_document(&path)["steps"], json!(6));
}

#[test]
fn test_store_keeps_working_without_locks() {
    let (_dir, path) = common::settings_file();
    let files = LockedFileStore::with_locker(Arc::new(UnsupportedLocker), Duration::from_secs(1));
    let store = OptionsStore::new(common::schema(), files, StorePolicy::default());

    store.set("sampler", "DDIM").unwrap();
    assert!(store.save(&path));
    assert!(!store.is_locking_available());

    let fresh = common::store();
    fresh.load(&path);
    assert_eq!(fresh.get("sampler").unwrap(), SettingValue::from("DDIM"));
}

#[test]
fn test_unparsable_file_keeps_state_and_is_not_overwritten() {
    let (_dir, path) = common::settings_file();
    std::fs::write(&path, "{\"steps\": 30,").unwrap();

    let store = common::store();
    store.set("sampler", "DDIM").unwrap();
    let report = store.load(&path);

    assert!(report.failed);
    assert!(!report.created);
    assert_eq!(store.get_string("sampler").unwrap(), "DDIM");
    assert_eq!(store.get_int("steps").unwrap(), 20);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"steps\": 30,");
}

#[test]
fn test_non_object_document_is_invalid() {
    let (_dir, path) = common::settings_file();
    common::write_json(&path, &json!(["steps", 30]));

    let store = common::store();
    assert!(store.load(&path).failed);
    assert!(matches!(store.files().read(&path), ReadOutcome::Invalid(_)));
}

#[test]
fn test_write_failure_is_reported_not_raised() {
    let (dir, _) = common::settings_file();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let path = blocker.join("config.json");

    let store = common::store();
    store.set("steps", 50).unwrap();
    assert!(!store.save(&path));
    assert!(!LockedFileStore::default().write(&document(1), &path, false));
    assert_eq!(store.get_int("steps").unwrap(), 50);
}

#[test]
fn test_failed_callback_rolls_back_before_save() {
    let (_dir, path) = common::settings_file();
    let store = common::store();
    store
        .onchange("sampler", |v| match v.as_str() {
            Some("broken") => Err("sampler not installed".into()),
            _ => Ok(()),
        }, false)
        .unwrap();

    assert!(store.set("sampler", "DDIM").unwrap());
    assert!(!store.set("sampler", "broken").unwrap());
    assert_eq!(store.get_string("sampler").unwrap(), "DDIM");

    store.save(&path);
    assert_eq!(common::read_json(&path), json!({ "sampler": "DDIM" }));
}

#[test]
fn test_save_during_failing_callback_keeps_committed_value() {
    let (_dir, path) = common::settings_file();
    let store = Arc::new(common::store());
    let entered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&entered);
    store
        .onchange(
            "sampler",
            move |_| {
                flag.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(200));
                Err("sampler failed to load".into())
            },
            false,
        )
        .unwrap();

    let setter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.set("sampler", "broken").unwrap())
    };
    while !entered.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(store.save(&path));
    assert!(!setter.join().unwrap());

    assert_eq!(store.get_string("sampler").unwrap(), "Euler");
    assert_eq!(common::read_json(&path), json!({}));
}
