use std::path::Path;
use std::sync::Arc;

use penumbra::primitives::idgen::IdType;
use penumbra::primitives::pager::PageCache;
use penumbra::storage::format::{
    NodeRecord, NodeRecordFormat, Record, RecordLoad, RelationshipGroupFormat, RelationshipRecord,
    RelationshipRecordFormat,
};
use penumbra::storage::{RecordStore, StoreOptions, StoreState};
use penumbra::PenumbraError;
use tempfile::tempdir;

fn options() -> StoreOptions {
    StoreOptions::default().page_size(1024)
}

fn node_store(dir: &Path) -> RecordStore<NodeRecordFormat> {
    let options = options();
    let cache = Arc::new(PageCache::new(options.page_size));
    RecordStore::open(&cache, dir.join("nodes"), IdType::Node, NodeRecordFormat, &options, true).unwrap()
}

fn create_node(store: &RecordStore<NodeRecordFormat>, next_prop: Option<u64>) -> NodeRecord {
    let mut node = NodeRecord::new(store.next_id().unwrap());
    node.next_prop = next_prop;
    node.set_created();
    store.update_record(&node).unwrap();
    node
}

#[test]
fn missing_store_without_create_is_not_found() {
    let dir = tempdir().unwrap();
    let options = options();
    let cache = Arc::new(PageCache::new(options.page_size));
    let err = RecordStore::open(
        &cache,
        dir.path().join("nodes"),
        IdType::Node,
        NodeRecordFormat,
        &options,
        false,
    )
    .err()
    .unwrap();
    assert!(matches!(err, PenumbraError::StoreNotFound(_)));
}

#[test]
fn load_modes_treat_unused_records_differently() {
    let dir = tempdir().unwrap();
    let store = node_store(dir.path());
    assert_eq!(store.state(), StoreState::OpenOk);
    for i in 0..4 {
        create_node(&store, Some(100 + i));
    }
    let mut deleted = store.get_record(1, RecordLoad::Normal).unwrap();
    deleted.in_use = false;
    store.update_record(&deleted).unwrap();

    assert!(matches!(
        store.get_record(1, RecordLoad::Normal),
        Err(PenumbraError::InvalidRecord(_))
    ));

    let checked = store.get_record(1, RecordLoad::Check).unwrap();
    assert!(!checked.in_use);
    assert_eq!(checked.next_prop, None);

    // Deleting only clears the in-use byte, the rest is still there.
    let forced = store.get_record(1, RecordLoad::Force).unwrap();
    assert!(!forced.in_use);
    assert_eq!(forced.next_prop, Some(101));

    // Beyond the high id but inside the first page.
    let beyond = store.get_record(40, RecordLoad::Force).unwrap();
    assert!(!beyond.in_use);
    assert!(matches!(
        store.get_record(40, RecordLoad::Normal),
        Err(PenumbraError::InvalidRecord(_))
    ));

    // Past the end of the file.
    let past_eof = store.get_record(100_000, RecordLoad::Check).unwrap();
    assert!(!past_eof.in_use);
    assert_eq!(past_eof.id, 100_000);
}

#[test]
fn freed_ids_are_handed_out_again() {
    let dir = tempdir().unwrap();
    let store = node_store(dir.path());
    for _ in 0..5 {
        create_node(&store, None);
    }
    assert_eq!(store.high_id().unwrap(), 5);
    for id in [3, 1] {
        let mut node = store.get_record(id, RecordLoad::Normal).unwrap();
        node.in_use = false;
        store.update_record(&node).unwrap();
    }
    assert_eq!(store.number_of_ids_in_use().unwrap(), 3);
    assert_eq!(store.next_id().unwrap(), 1);
    assert_eq!(store.next_id().unwrap(), 3);
    assert_eq!(store.next_id().unwrap(), 5);
    assert_eq!(store.highest_possible_id_in_use().unwrap(), Some(5));
}

#[test]
fn relationship_references_keep_their_high_bits() {
    let dir = tempdir().unwrap();
    let options = options();
    let cache = Arc::new(PageCache::new(options.page_size));
    let store = RecordStore::open(
        &cache,
        dir.path().join("relationships"),
        IdType::Relationship,
        RelationshipRecordFormat,
        &options,
        true,
    )
    .unwrap();
    let mut rel = RelationshipRecord {
        id: store.next_id().unwrap(),
        in_use: true,
        first_node: (1 << 34) + 7,
        second_node: (1 << 33) + 9,
        rel_type: 0xBEEF,
        first_prev: Some(3),
        first_next: Some((1 << 32) + 1),
        second_prev: Some(12),
        second_next: None,
        next_prop: Some((1 << 35) - 2),
        first_in_first_chain: true,
        first_in_second_chain: false,
        ..RelationshipRecord::default()
    };
    rel.set_created();
    store.update_record(&rel).unwrap();

    let read = store.get_record(rel.id, RecordLoad::Normal).unwrap();
    rel.created = false;
    assert_eq!(read, rel);
    assert_eq!(store.record_size(), 34);
    store.close().unwrap();
}

#[test]
fn scanning_visits_only_records_in_use() {
    let dir = tempdir().unwrap();
    let store = node_store(dir.path());
    for i in 0..200 {
        create_node(&store, Some(i));
    }
    for id in (0..200).step_by(3) {
        let mut node = store.get_record(id, RecordLoad::Normal).unwrap();
        node.in_use = false;
        store.update_record(&node).unwrap();
    }
    let mut seen = Vec::new();
    store
        .scan_all_records(|node| {
            seen.push(node.id);
            Ok(())
        })
        .unwrap();
    assert_eq!(seen.len(), 133);
    assert!(seen.iter().all(|id| id % 3 != 0));
    assert!(store.records_per_page() < 200);
}

#[test]
fn group_store_keeps_threshold_in_its_header() {
    let dir = tempdir().unwrap();
    let options = options();
    let cache = Arc::new(PageCache::new(options.page_size));
    let path = dir.path().join("groups");
    let store = RecordStore::open(
        &cache,
        &path,
        IdType::RelationshipGroup,
        RelationshipGroupFormat::new(77),
        &options,
        true,
    )
    .unwrap();
    assert_eq!(store.number_of_reserved_low_ids(), 1);
    assert_eq!(store.next_id().unwrap(), 1);
    store.close().unwrap();

    let reopened = RecordStore::open(
        &cache,
        &path,
        IdType::RelationshipGroup,
        RelationshipGroupFormat::new(5),
        &options,
        false,
    )
    .unwrap();
    assert_eq!(reopened.store_header_int(), Some(77));
    assert!(matches!(
        reopened.update_record(&reopened.new_record(0)),
        Err(PenumbraError::Invalid(_))
    ));
}
