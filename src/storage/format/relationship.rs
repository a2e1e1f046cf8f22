//! The 34-byte relationship record.

use super::{
    impl_record, join_reference, split_reference, RecordFormat, RecordLoad, IN_USE_BIT, MAX_ID_35,
};
use crate::primitives::pager::PageCursor;

/// Bytes per relationship record.
pub const RELATIONSHIP_RECORD_SIZE: usize = 34;

const FIRST_IN_FIRST_CHAIN: u8 = 0x1;
const FIRST_IN_SECOND_CHAIN: u8 = 0x2;

/// Relationship between two nodes, threaded into both nodes' chains.
///
/// When the relationship heads a node's chain, the matching `*_prev` field
/// holds that chain's degree instead of a pointer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Record id.
    pub id: u64,
    /// Whether the relationship is in use.
    pub in_use: bool,
    /// Whether the relationship was created by the current change set.
    pub created: bool,
    /// Start node.
    pub first_node: u64,
    /// End node.
    pub second_node: u64,
    /// Relationship type token id (16 bits).
    pub rel_type: u32,
    /// Previous relationship in the start node's chain.
    pub first_prev: Option<u64>,
    /// Next relationship in the start node's chain.
    pub first_next: Option<u64>,
    /// Previous relationship in the end node's chain.
    pub second_prev: Option<u64>,
    /// Next relationship in the end node's chain.
    pub second_next: Option<u64>,
    /// First property record.
    pub next_prop: Option<u64>,
    /// Heads the start node's chain.
    pub first_in_first_chain: bool,
    /// Heads the end node's chain.
    pub first_in_second_chain: bool,
}

impl_record!(RelationshipRecord);

/// Fixed 34-byte relationship layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct RelationshipRecordFormat;

fn high3(high: u64, shift: u32) -> u64 {
    (high & 0x7_0000_0000) >> shift
}

impl RecordFormat for RelationshipRecordFormat {
    type Record = RelationshipRecord;

    fn name(&self) -> &'static str {
        "relationship"
    }

    fn record_size(&self, _header: Option<i32>) -> usize {
        RELATIONSHIP_RECORD_SIZE
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
    ) -> RelationshipRecord {
        let mut record = RelationshipRecord {
            id,
            ..RelationshipRecord::default()
        };
        let header = cursor.get_u8();
        record.in_use = header & IN_USE_BIT != 0;
        if !mode.should_load(record.in_use) {
            return record;
        }
        let first_node_high = ((header & 0x0E) as u64) << 31;
        let next_prop_high = ((header & 0xF0) as u64) << 28;
        let first_node = cursor.get_u32() as u64;
        let second_node = cursor.get_u32() as u64;
        let type_int = cursor.get_u32() as u64;
        let second_node_high = (type_int & 0x7000_0000) << 4;
        let first_prev_high = (type_int & 0x0E00_0000) << 7;
        let first_next_high = (type_int & 0x01C0_0000) << 10;
        let second_prev_high = (type_int & 0x0038_0000) << 13;
        let second_next_high = (type_int & 0x0007_0000) << 16;
        record.first_node = first_node | first_node_high;
        record.second_node = second_node | second_node_high;
        record.rel_type = (type_int & 0xFFFF) as u32;
        record.first_prev = join_reference(cursor.get_u32(), first_prev_high);
        record.first_next = join_reference(cursor.get_u32(), first_next_high);
        record.second_prev = join_reference(cursor.get_u32(), second_prev_high);
        record.second_next = join_reference(cursor.get_u32(), second_next_high);
        record.next_prop = join_reference(cursor.get_u32(), next_prop_high);
        let extra = cursor.get_u8();
        record.first_in_first_chain = extra & FIRST_IN_FIRST_CHAIN != 0;
        record.first_in_second_chain = extra & FIRST_IN_SECOND_CHAIN != 0;
        record
    }

    fn write(&self, record: &RelationshipRecord, cursor: &mut PageCursor, _size: usize) {
        if !record.in_use {
            cursor.put_u8(0);
            return;
        }
        let (first_prev_low, first_prev_high) = split_reference(record.first_prev);
        let (first_next_low, first_next_high) = split_reference(record.first_next);
        let (second_prev_low, second_prev_high) = split_reference(record.second_prev);
        let (second_next_low, second_next_high) = split_reference(record.second_next);
        let (next_prop_low, next_prop_high) = split_reference(record.next_prop);

        let header = IN_USE_BIT as u64
            | high3(record.first_node, 31)
            | ((next_prop_high & 0xF_0000_0000) >> 28);
        let type_int = (record.rel_type as u64 & 0xFFFF)
            | high3(record.second_node, 4)
            | high3(first_prev_high, 7)
            | high3(first_next_high, 10)
            | high3(second_prev_high, 13)
            | high3(second_next_high, 16);
        let mut extra = 0u8;
        if record.first_in_first_chain {
            extra |= FIRST_IN_FIRST_CHAIN;
        }
        if record.first_in_second_chain {
            extra |= FIRST_IN_SECOND_CHAIN;
        }
        cursor.put_u8(header as u8);
        cursor.put_u32(record.first_node as u32);
        cursor.put_u32(record.second_node as u32);
        cursor.put_u32(type_int as u32);
        cursor.put_u32(first_prev_low);
        cursor.put_u32(first_next_low);
        cursor.put_u32(second_prev_low);
        cursor.put_u32(second_next_low);
        cursor.put_u32(next_prop_low);
        cursor.put_u8(extra);
    }
}
