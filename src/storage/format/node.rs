//! The 15-byte node record.

use super::{
    impl_record, join_reference, split_reference, DynamicRecord, RecordFormat, RecordLoad,
    IN_USE_BIT, MAX_ID_35,
};
use crate::primitives::pager::PageCursor;

/// Bytes per node record.
pub const NODE_RECORD_SIZE: usize = 15;

/// Node with its relationship/property chain heads and packed labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeRecord {
    /// Record id.
    pub id: u64,
    /// Whether the node is in use.
    pub in_use: bool,
    /// Whether the node was created by the current change set.
    pub created: bool,
    /// Dense nodes point `next_rel` at a relationship group.
    pub dense: bool,
    /// First relationship, or first group for dense nodes.
    pub next_rel: Option<u64>,
    /// First property record.
    pub next_prop: Option<u64>,
    /// 40-bit label field, see [`crate::storage::labels`].
    pub label_field: u64,
    /// Dynamic label blocks loaded or produced for this node.
    pub dynamic_label_records: Vec<DynamicRecord>,
}

impl NodeRecord {
    /// An in-use node without relationships, properties or labels.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            ..Self::default()
        }
    }
}

impl_record!(NodeRecord);

/// Fixed 15-byte node layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeRecordFormat;

impl RecordFormat for NodeRecordFormat {
    type Record = NodeRecord;

    fn name(&self) -> &'static str {
        "node"
    }

    fn record_size(&self, _header: Option<i32>) -> usize {
        NODE_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        MAX_ID_35
    }

    fn is_in_use(&self, cursor: &mut PageCursor) -> bool {
        cursor.get_u8() & IN_USE_BIT != 0
    }

    fn read(&self, id: u64, cursor: &mut PageCursor, mode: RecordLoad, _size: usize) -> NodeRecord {
        let mut record = NodeRecord {
            id,
            ..NodeRecord::default()
        };
        let header = cursor.get_u8();
        record.in_use = header & IN_USE_BIT != 0;
        if !mode.should_load(record.in_use) {
            return record;
        }
        let rel_high = ((header & 0x0E) as u64) << 31;
        let prop_high = ((header & 0xF0) as u64) << 28;
        record.next_rel = join_reference(cursor.get_u32(), rel_high);
        record.next_prop = join_reference(cursor.get_u32(), prop_high);
        let labels_low = cursor.get_u32() as u64;
        let labels_high = cursor.get_u8() as u64;
        record.label_field = labels_low | (labels_high << 32);
        record.dense = cursor.get_u8() & 0x1 != 0;
        record
    }

    fn write(&self, record: &NodeRecord, cursor: &mut PageCursor, _size: usize) {
        if !record.in_use {
            cursor.put_u8(0);
            return;
        }
        let (rel_low, rel_high) = split_reference(record.next_rel);
        let (prop_low, prop_high) = split_reference(record.next_prop);
        let header = IN_USE_BIT as u64
            | ((rel_high & 0x7_0000_0000) >> 31)
            | ((prop_high & 0xF_0000_0000) >> 28);
        cursor.put_u8(header as u8);
        cursor.put_u32(rel_low);
        cursor.put_u32(prop_low);
        cursor.put_u32(record.label_field as u32);
        cursor.put_u8((record.label_field >> 32) as u8);
        cursor.put_u8(record.dense as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{PageCache, PageLock};
    use crate::types::PageId;
    use tempfile::tempdir;

    #[test]
    fn high_bits_of_references_survive() {
        let dir = tempdir().unwrap();
        let cache = PageCache::new(NODE_RECORD_SIZE * 4);
        let file = cache
            .map(dir.path().join("nodes"), NODE_RECORD_SIZE * 4, true)
            .unwrap();
        let mut node = NodeRecord::new(2);
        node.next_rel = Some(0x7_0000_0001);
        node.next_prop = Some(0xF_0000_0002);
        node.label_field = 0x80_0000_0005;
        node.dense = true;
        {
            let mut w = file.io(PageId(0), PageLock::SharedWrite);
            assert!(w.next().unwrap());
            w.set_offset(2 * NODE_RECORD_SIZE);
            NodeRecordFormat.write(&node, &mut w, NODE_RECORD_SIZE);
        }
        let mut r = file.io(PageId(0), PageLock::SharedRead);
        assert!(r.next().unwrap());
        r.set_offset(2 * NODE_RECORD_SIZE);
        let out = NodeRecordFormat.read(2, &mut r, RecordLoad::Normal, NODE_RECORD_SIZE);
        assert_eq!(out, node);
    }
}
