//! Relationship group records of dense nodes.

use super::{
    impl_record, join_reference, split_reference, RecordFormat, RecordLoad, IN_USE_BIT, MAX_ID_35,
};
use crate::primitives::pager::PageCursor;

/// Bytes per relationship group record.
pub const GROUP_RECORD_SIZE: usize = 25;

/// Default number of relationships after which a node becomes dense.
pub const DEFAULT_DENSE_NODE_THRESHOLD: i32 = 50;

/// Per-type relationship chain heads of a dense node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationshipGroupRecord {
    /// Record id.
    pub id: u64,
    /// Whether the group is in use.
    pub in_use: bool,
    /// Whether the group was created by the current change set.
    pub created: bool,
    /// Relationship type of this group.
    pub rel_type: u32,
    /// Next group of the same node.
    pub next: Option<u64>,
    /// First outgoing relationship.
    pub first_out: Option<u64>,
    /// First incoming relationship.
    pub first_in: Option<u64>,
    /// First self-loop.
    pub first_loop: Option<u64>,
    /// Node owning this group.
    pub owning_node: u64,
}

impl_record!(RelationshipGroupRecord);

/// Fixed 25-byte group layout; record 0 holds the dense node threshold.
#[derive(Clone, Copy, Debug)]
pub struct RelationshipGroupFormat {
    dense_node_threshold: i32,
}

impl RelationshipGroupFormat {
    /// Format writing `dense_node_threshold` into new stores.
    pub fn new(dense_node_threshold: i32) -> Self {
        Self {
            dense_node_threshold,
        }
    }
}

impl Default for RelationshipGroupFormat {
    fn default() -> Self {
        Self::new(DEFAULT_DENSE_NODE_THRESHOLD)
    }
}

impl RecordFormat for RelationshipGroupFormat {
    type Record = RelationshipGroupRecord;

    fn name(&self) -> &'static str {
        "relationship group"
    }

    fn store_header(&self) -> Option<i32> {
        Some(self.dense_node_threshold)
    }

    fn record_size(&self, _header: Option<i32>) -> usize {
        GROUP_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        MAX_ID_35
    }

    fn is_in_use(&self, cursor: &mut PageCursor) -> bool {
        cursor.get_u8() & IN_USE_BIT != 0
    }

    fn read(
        &self,
        id: u64,
        cursor: &mut PageCursor,
        mode: RecordLoad,
        _size: usize,
    ) -> RelationshipGroupRecord {
        let mut record = RelationshipGroupRecord {
            id,
            ..RelationshipGroupRecord::default()
        };
        let header = cursor.get_u8();
        record.in_use = header & IN_USE_BIT != 0;
        if !mode.should_load(record.in_use) {
            return record;
        }
        let high = cursor.get_u8();
        record.rel_type = cursor.get_u16() as u32;
        let next_high = ((header & 0x0E) as u64) << 31;
        let out_high = ((header & 0x70) as u64) << 28;
        let in_high = ((high & 0x0E) as u64) << 31;
        let loop_high = ((high & 0x70) as u64) << 28;
        record.next = join_reference(cursor.get_u32(), next_high);
        record.first_out = join_reference(cursor.get_u32(), out_high);
        record.first_in = join_reference(cursor.get_u32(), in_high);
        record.first_loop = join_reference(cursor.get_u32(), loop_high);
        let owner_low = cursor.get_u32() as u64;
        let owner_high = cursor.get_u8() as u64;
        record.owning_node = owner_low | (owner_high << 32);
        record
    }

    fn write(&self, record: &RelationshipGroupRecord, cursor: &mut PageCursor, _size: usize) {
        if !record.in_use {
            cursor.put_u8(0);
            return;
        }
        let (next_low, next_high) = split_reference(record.next);
        let (out_low, out_high) = split_reference(record.first_out);
        let (in_low, in_high) = split_reference(record.first_in);
        let (loop_low, loop_high) = split_reference(record.first_loop);
        let header = IN_USE_BIT as u64
            | ((next_high & 0x7_0000_0000) >> 31)
            | ((out_high & 0x7_0000_0000) >> 28);
        let high = ((in_high & 0x7_0000_0000) >> 31) | ((loop_high & 0x7_0000_0000) >> 28);
        cursor.put_u8(header as u8);
        cursor.put_u8(high as u8);
        cursor.put_u16(record.rel_type as u16);
        cursor.put_u32(next_low);
        cursor.put_u32(out_low);
        cursor.put_u32(in_low);
        cursor.put_u32(loop_low);
        cursor.put_u32(record.owning_node as u32);
        cursor.put_u8((record.owning_node >> 32) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{PageCache, PageLock};
    use crate::types::PageId;
    use tempfile::tempdir;

    #[test]
    fn group_roundtrip_with_high_bits() {
        let dir = tempdir().unwrap();
        let cache = PageCache::new(GROUP_RECORD_SIZE * 2);
        let file = cache
            .map(dir.path().join("groups"), GROUP_RECORD_SIZE * 2, true)
            .unwrap();
        let group = RelationshipGroupRecord {
            id: 1,
            in_use: true,
            created: false,
            rel_type: 7,
            next: Some(0x3_0000_0001),
            first_out: Some(0x5_0000_0002),
            first_in: None,
            first_loop: Some(0x7_0000_0003),
            owning_node: 0x1_2345_6789,
        };
        {
            let mut w = file.io(PageId(0), PageLock::SharedWrite);
            assert!(w.next().unwrap());
            w.set_offset(GROUP_RECORD_SIZE);
            RelationshipGroupFormat::default().write(&group, &mut w, GROUP_RECORD_SIZE);
        }
        let mut r = file.io(PageId(0), PageLock::SharedRead);
        assert!(r.next().unwrap());
        r.set_offset(GROUP_RECORD_SIZE);
        let out = RelationshipGroupFormat::default().read(1, &mut r, RecordLoad::Normal, 25);
        assert_eq!(out, group);
    }
}
