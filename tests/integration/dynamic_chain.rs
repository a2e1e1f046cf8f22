use std::path::Path;
use std::sync::Arc;

use penumbra::primitives::idgen::IdType;
use penumbra::primitives::pager::PageCache;
use penumbra::storage::dynamic::{concat_data, read_full_byte_array};
use penumbra::storage::format::{DynamicRecord, Record};
use penumbra::storage::values::{dynamic_array, ArrayValue, PropertyType};
use penumbra::storage::{DynamicStore, StoreOptions};
use penumbra::PenumbraError;
use proptest::prelude::*;
use tempfile::tempdir;

fn open_with(cache: &Arc<PageCache>, path: &Path, data_size: usize, create: bool) -> DynamicStore {
    let options = StoreOptions::default().page_size(cache.page_size());
    DynamicStore::open(cache, path, IdType::StringBlock, "string", data_size, &options, create).unwrap()
}

fn open(dir: &Path) -> DynamicStore {
    let cache = Arc::new(PageCache::new(1024));
    open_with(&cache, &dir.join("strings"), 60, true)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn payload_of_130_bytes_splits_into_three_blocks() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    assert_eq!(store.block_data_size(), 60);

    let bytes = payload(130);
    let written = store.store_bytes(&bytes, Vec::new()).unwrap();
    let lengths: Vec<usize> = written.iter().map(|r| r.length).collect();
    let starts: Vec<bool> = written.iter().map(|r| r.start_record).collect();
    assert_eq!(lengths, vec![60, 60, 10]);
    assert_eq!(starts, vec![true, false, false]);
    assert_eq!(written[0].next_block, Some(written[1].id));
    assert_eq!(written[1].next_block, Some(written[2].id));
    assert_eq!(written[2].next_block, None);

    let read = store.get_records(written[0].id, true).unwrap();
    assert_eq!(read.len(), 3);
    assert_eq!(store.get_bytes(written[0].id).unwrap(), bytes);
}

#[test]
fn block_size_survives_reopen_with_other_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strings");
    let cache = Arc::new(PageCache::new(1024));
    let start = {
        let store = open_with(&cache, &path, 60, true);
        let records = store.store_bytes(&payload(200), Vec::new()).unwrap();
        store.store().close().unwrap();
        records[0].id
    };
    let store = open_with(&cache, &path, 120, false);
    assert_eq!(store.block_data_size(), 60);
    assert_eq!(store.store().store_header_int(), Some(68));
    assert_eq!(store.get_bytes(start).unwrap(), payload(200));
}

#[test]
fn light_chain_becomes_heavy_on_demand() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let written = store.store_bytes(&payload(150), Vec::new()).unwrap();

    let mut light = store.get_records(written[0].id, false).unwrap();
    assert!(light.iter().all(|r| r.light && r.data.is_empty()));
    assert_eq!(light.iter().map(|r| r.length).sum::<usize>(), 150);
    assert!(matches!(
        read_full_byte_array(&light, PropertyType::String),
        Err(PenumbraError::IllegalState(_))
    ));

    store.ensure_heavy_all(&mut light).unwrap();
    let mut target = Vec::with_capacity(4);
    assert_eq!(concat_data(&light, &mut target), 150);
    assert_eq!(target, payload(150));
}

#[test]
fn rewriting_reuses_blocks_and_frees_the_rest() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let long = store.store_bytes(&payload(300), Vec::new()).unwrap();
    let long_ids: Vec<u64> = long.iter().map(|r| r.id).collect();
    assert_eq!(long_ids.len(), 5);

    let short = store.store_bytes(b"short again", long).unwrap();
    assert_eq!(short.len(), 1);
    assert_eq!(short[0].id, long_ids[0]);
    for id in &long_ids[1..] {
        assert!(!store.store().is_in_use(*id).unwrap());
    }
    // The freed ids come back before the store grows.
    let grown = store.store_bytes(&payload(130), short).unwrap();
    let grown_ids: Vec<u64> = grown.iter().map(|r| r.id).collect();
    assert_eq!(grown_ids[0], long_ids[0]);
    assert!(grown_ids[1..].iter().all(|id| long_ids.contains(id)));
}

#[test]
fn broken_chains_are_invalid_records() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());

    // A non-terminal block that is not full.
    let first = store.store().next_id().unwrap();
    let second = store.store().next_id().unwrap();
    let mut head = DynamicRecord::new(first);
    head.in_use = true;
    head.set_data(vec![7; 10]);
    head.next_block = Some(second);
    head.set_created();
    let mut tail = DynamicRecord::new(second);
    tail.in_use = true;
    tail.start_record = false;
    tail.set_data(vec![8; 5]);
    tail.set_created();
    store.write_records(&[head, tail]).unwrap();
    assert!(matches!(
        store.get_records(first, true),
        Err(PenumbraError::InvalidRecord(_))
    ));

    // A chain whose middle block was released.
    let chain = store.store_bytes(&payload(170), Vec::new()).unwrap();
    store.delete_chain(&chain[1..2]).unwrap();
    assert!(matches!(
        store.get_records(chain[0].id, false),
        Err(PenumbraError::InvalidRecord(_))
    ));
}

#[test]
fn deleted_chains_give_their_ids_back() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let chain = store.store_bytes(&payload(240), Vec::new()).unwrap();
    let high = store.store().high_id().unwrap();
    store.delete_chain(&chain).unwrap();
    let again = store.store_bytes(&payload(240), Vec::new()).unwrap();
    assert_eq!(store.store().high_id().unwrap(), high);
    let mut ids: Vec<u64> = again.iter().map(|r| r.id).collect();
    let mut before: Vec<u64> = chain.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    before.sort_unstable();
    assert_eq!(ids, before);
}

#[test]
fn array_header_is_split_from_the_body() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let array = ArrayValue::String((0..20).map(|i| format!("element number {i}")).collect());
    let bytes = dynamic_array::encode(&array).unwrap();
    let chain = store.store_bytes(&bytes, Vec::new()).unwrap();
    let records = store.get_records(chain[0].id, true).unwrap();
    let (header, body) = read_full_byte_array(&records, PropertyType::Array).unwrap();
    assert_eq!(header.len() + body.len(), bytes.len());
    assert_eq!(dynamic_array::decode(&header, &body).unwrap(), array);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chains_hold_exactly_the_blocks_they_need(len in 0usize..700) {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let bytes = payload(len);
        let written = store.store_bytes(&bytes, Vec::new()).unwrap();
        let read = store.get_records(written[0].id, true).unwrap();
        let expected = len.div_ceil(60).max(1);
        prop_assert_eq!(read.len(), expected);
        let (last, rest) = read.split_last().unwrap();
        prop_assert!(rest.iter().all(|r| r.length == 60 && r.next_block.is_some()));
        prop_assert_eq!(last.next_block, None);
        prop_assert!(last.length <= 60);
        prop_assert!(read[0].start_record);
        prop_assert!(read[1..].iter().all(|r| !r.start_record));
        let mut joined = Vec::new();
        concat_data(&read, &mut joined);
        prop_assert_eq!(joined, bytes);
    }
}
