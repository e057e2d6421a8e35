//! Integration tests for the session file store.
//!
//! These tests verify cross-component behavior that unit tests don't cover:
//! restarts through the index, pool pressure and concurrent sessions.

use std::fs;
use std::sync::Arc;
use std::thread;

use pagevault::common::config::INDEX_FILE_NAME;
use pagevault::{PageId, SessionFileStore, SessionId, StoreConfig};
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config_in(dir: &tempfile::TempDir) -> StoreConfig {
    StoreConfig::new("it", dir.path()).with_max_size_per_session(4096)
}

/// Pages written before an orderly shutdown are readable after reopening.
#[test]
fn test_index_survives_restart() {
    init_logging();
    let dir = tempdir().unwrap();
    let alice = SessionId::new("alice");
    let bob = SessionId::new("bob");

    {
        let store = SessionFileStore::open(config_in(&dir)).unwrap();
        store.put(&alice, PageId::new(1), b"alice-1").unwrap();
        store.put(&alice, PageId::new(2), b"alice-2").unwrap();
        store.put(&bob, PageId::new(1), b"bob-1").unwrap();
        store.destroy();
    }

    let index_path = config_in(&dir).store_folder().join(INDEX_FILE_NAME);
    assert!(index_path.exists());

    let store = SessionFileStore::open(config_in(&dir)).unwrap();
    assert!(!index_path.exists(), "index is consumed on open");
    assert_eq!(store.session_ids(), vec![alice.clone(), bob.clone()]);
    assert_eq!(store.get(&alice, PageId::new(1)).unwrap(), b"alice-1");
    assert_eq!(store.get(&alice, PageId::new(2)).unwrap(), b"alice-2");
    assert_eq!(store.get(&bob, PageId::new(1)).unwrap(), b"bob-1");
}

/// Appends after a restart continue from the restored write position.
#[test]
fn test_restored_session_keeps_allocating() {
    let dir = tempdir().unwrap();
    let s = SessionId::new("s");

    {
        let store = SessionFileStore::open(config_in(&dir)).unwrap();
        store.put(&s, PageId::new(1), &[1u8; 100]).unwrap();
    }

    let store = SessionFileStore::open(config_in(&dir)).unwrap();
    store.put(&s, PageId::new(2), &[2u8; 100]).unwrap();

    assert_eq!(store.get(&s, PageId::new(1)).unwrap(), vec![1u8; 100]);
    assert_eq!(store.get(&s, PageId::new(2)).unwrap(), vec![2u8; 100]);
    assert_eq!(store.session_size(&s), Some(200));
}

/// A damaged index is discarded and the store starts empty.
#[test]
fn test_corrupt_index_starts_empty() {
    init_logging();
    let dir = tempdir().unwrap();
    let folder = config_in(&dir).store_folder();
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join(INDEX_FILE_NAME), b"definitely not an index").unwrap();

    let store = SessionFileStore::open(config_in(&dir)).unwrap();

    assert!(store.session_ids().is_empty());
    assert!(!folder.join(INDEX_FILE_NAME).exists());
}

/// Windows recorded for a different per-session budget are not trusted.
#[test]
fn test_index_from_other_budget_is_ignored() {
    let dir = tempdir().unwrap();
    let s = SessionId::new("s");

    {
        let store = SessionFileStore::open(config_in(&dir)).unwrap();
        store.put(&s, PageId::new(1), b"hello").unwrap();
    }

    let store = SessionFileStore::open(config_in(&dir).with_max_size_per_session(8192)).unwrap();
    assert!(store.get(&s, PageId::new(1)).is_none());
}

/// Without an orderly shutdown nothing is recovered.
#[test]
fn test_missing_index_recovers_nothing() {
    let dir = tempdir().unwrap();
    let s = SessionId::new("s");

    {
        let store = SessionFileStore::open(config_in(&dir)).unwrap();
        store.put(&s, PageId::new(1), b"hello").unwrap();
    }
    // Simulate a crash: the index written on shutdown is lost.
    fs::remove_file(config_in(&dir).store_folder().join(INDEX_FILE_NAME)).unwrap();

    let store = SessionFileStore::open(config_in(&dir)).unwrap();
    assert!(store.get(&s, PageId::new(1)).is_none());
}

/// Only the newest pages that fit in the budget survive repeated wrapping.
#[test]
fn test_ring_buffer_keeps_newest_pages() {
    let dir = tempdir().unwrap();
    let store =
        SessionFileStore::open(StoreConfig::new("ring", dir.path()).with_max_size_per_session(1000))
            .unwrap();
    let s = SessionId::new("s");

    for i in 0u32..30 {
        store.put(&s, PageId::new(i), &[i as u8; 100]).unwrap();
    }

    for i in 0u32..20 {
        assert!(store.get(&s, PageId::new(i)).is_none(), "page {} should be evicted", i);
    }
    for i in 20u32..30 {
        assert_eq!(store.get(&s, PageId::new(i)).unwrap(), vec![i as u8; 100]);
    }
    assert_eq!(store.session_size(&s), Some(1000));
    assert_eq!(store.window_evictions(), 20);
}

/// More sessions than pooled handles still all read back correctly.
#[test]
fn test_many_sessions_small_pool() {
    let dir = tempdir().unwrap();
    let store =
        SessionFileStore::open(config_in(&dir).with_file_pool_capacity(2)).unwrap();

    for i in 0..10 {
        let s = SessionId::new(format!("session-{}", i));
        store.put(&s, PageId::new(1), format!("data-{}", i).as_bytes()).unwrap();
    }
    for i in 0..10 {
        let s = SessionId::new(format!("session-{}", i));
        assert_eq!(
            store.get(&s, PageId::new(1)).unwrap(),
            format!("data-{}", i).into_bytes()
        );
    }

    let stats = store.pool_stats().snapshot();
    assert!(stats.evictions > 0);
    assert!(stats.opens >= 10);
}

/// Sessions written from different threads never see each other's bytes.
#[test]
fn test_concurrent_sessions() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        SessionFileStore::open(config_in(&dir).with_file_pool_capacity(4)).unwrap(),
    );

    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let s = SessionId::new(format!("t{}", t));
                for round in 0..50u8 {
                    let page = PageId::new(u32::from(round % 5));
                    store.put(&s, page, &[t, round, t ^ round]).unwrap();
                    assert_eq!(store.get(&s, page).unwrap(), vec![t, round, t ^ round]);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.session_ids().len(), 8);
}

/// Unbinding deletes the session directory and the session stays gone.
#[test]
fn test_unbind_deletes_directory() {
    let dir = tempdir().unwrap();
    let store = SessionFileStore::open(config_in(&dir)).unwrap();
    let s = SessionId::new("expiring");

    store.put(&s, PageId::new(1), b"bye").unwrap();
    let folder = store.session_folder(&s);
    assert!(folder.is_dir());

    store.unbind(&s);
    assert!(!folder.exists());

    store.put(&s, PageId::new(1), b"again").unwrap();
    assert!(store.get(&s, PageId::new(1)).is_none());
    assert!(!folder.exists());
}
