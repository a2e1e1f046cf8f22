use std::path::Path;
use std::sync::{Arc, Once};

use penumbra::primitives::idgen::IdType;
use penumbra::primitives::pager::PageCache;
use penumbra::storage::format::{NodeRecord, NodeRecordFormat, Record, RecordLoad};
use penumbra::storage::{id_file_path, RecordStore, StoreOptions, StoreState};
use penumbra::PenumbraError;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("penumbra=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn open(path: &Path, options: &StoreOptions) -> RecordStore<NodeRecordFormat> {
    let cache = Arc::new(PageCache::new(options.page_size));
    RecordStore::open(&cache, path, IdType::Node, NodeRecordFormat, options, true).unwrap()
}

fn write_node(store: &RecordStore<NodeRecordFormat>, id: u64, in_use: bool) {
    let mut node = NodeRecord::new(id);
    node.in_use = in_use;
    node.next_rel = Some(id * 2);
    if in_use {
        node.set_created();
    }
    store.update_record(&node).unwrap();
}

/// Writes nodes `0..count`, deletes `holes`, flushes and drops the store
/// without closing it, leaving the id file marked unclean.
fn crash_with(path: &Path, options: &StoreOptions, count: u64, holes: &[u64]) {
    let store = open(path, options);
    for id in 0..count {
        assert_eq!(store.next_id().unwrap(), id);
        write_node(&store, id, true);
    }
    for &id in holes {
        write_node(&store, id, false);
    }
    store.flush().unwrap();
}

#[test]
fn high_id_scan_ignores_zeroed_tail_pages() {
    init_tracing();
    let dir = tempdir().unwrap();
    let options = StoreOptions::default().page_size(1024);
    let store = open(&dir.path().join("nodes"), &options);
    assert_eq!(store.scan_for_high_id().unwrap(), 0);

    for id in 0..10 {
        write_node(&store, store.next_id().unwrap(), true);
        assert_eq!(store.high_id().unwrap(), id + 1);
    }
    // Touch a slot several pages further on, then clear it again.
    let far = store.records_per_page() * 4 + 3;
    write_node(&store, far, true);
    write_node(&store, far, false);

    assert_eq!(store.high_id().unwrap(), far + 1);
    assert_eq!(store.scan_for_high_id().unwrap(), 10);
}

#[test]
fn unclean_shutdown_opens_not_ok_until_made_ok() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nodes");
    let options = StoreOptions::default().page_size(1024);
    crash_with(&path, &options, 10, &[]);

    let store = open(&path, &options);
    assert_eq!(store.state(), StoreState::OpenNotOk);
    assert!(matches!(store.verify_store_ok(), Err(PenumbraError::UnderlyingStorage(_))));
    assert!(matches!(store.next_id(), Err(PenumbraError::IllegalState(_))));
    // Recovery may free ids before the store is ok; that is a no-op.
    store.free_id(3).unwrap();
    // Reads keep working, and the high id comes from a scan.
    assert!(store.get_record(9, RecordLoad::Normal).unwrap().in_use);
    assert_eq!(store.high_id().unwrap(), 10);

    store.make_store_ok().unwrap();
    assert_eq!(store.state(), StoreState::OpenOk);
    store.verify_store_ok().unwrap();
    assert_eq!(store.next_id().unwrap(), 10);
    store.make_store_ok().unwrap();
    store.close().unwrap();

    let reopened = open(&path, &options);
    assert_eq!(reopened.state(), StoreState::OpenOk);
    assert_eq!(reopened.next_id().unwrap(), 11);
}

#[test]
fn slow_rebuild_recovers_holes_fast_rebuild_does_not() {
    init_tracing();
    let dir = tempdir().unwrap();
    let holes = [2, 5, 7];

    let slow_path = dir.path().join("slow");
    let slow_options = StoreOptions::default().page_size(1024).rebuild_idgen_fast(false);
    crash_with(&slow_path, &slow_options, 12, &holes);
    let slow = open(&slow_path, &slow_options);
    slow.make_store_ok().unwrap();
    assert_eq!(slow.number_of_ids_in_use().unwrap(), 9);
    let reused: Vec<u64> = (0..4).map(|_| slow.next_id().unwrap()).collect();
    assert_eq!(reused, vec![2, 5, 7, 12]);

    let fast_path = dir.path().join("fast");
    let fast_options = StoreOptions::default().page_size(1024).rebuild_idgen_fast(true);
    crash_with(&fast_path, &fast_options, 12, &holes);
    let fast = open(&fast_path, &fast_options);
    fast.make_store_ok().unwrap();
    assert_eq!(fast.next_id().unwrap(), 12);
}

#[test]
fn missing_id_file_is_rebuilt_from_a_scan() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nodes");
    let options = StoreOptions::default().page_size(1024);
    {
        let store = open(&path, &options);
        for id in 0..6 {
            write_node(&store, id, true);
        }
        store.close().unwrap();
    }
    std::fs::remove_file(id_file_path(&path)).unwrap();

    let store = open(&path, &options);
    assert_eq!(store.state(), StoreState::OpenOk);
    assert_eq!(store.high_id().unwrap(), 6);
}

#[test]
fn truncated_id_file_opens_not_ok() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nodes");
    let options = StoreOptions::default().page_size(1024);
    {
        let store = open(&path, &options);
        write_node(&store, store.next_id().unwrap(), true);
        store.close().unwrap();
    }
    std::fs::write(id_file_path(&path), [0u8, 1, 2]).unwrap();

    let store = open(&path, &options);
    assert_eq!(store.state(), StoreState::OpenNotOk);
    store.make_store_ok().unwrap();
    assert_eq!(store.next_id().unwrap(), 1);
}
