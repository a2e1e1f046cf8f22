//! Blocks of the dynamic stores.

use super::{impl_record, join_reference, split_reference, RecordFormat, RecordLoad, MAX_ID_36};
use crate::primitives::pager::PageCursor;
use crate::storage::values::PropertyType;

/// Size of the per-block header: flags, length and next pointer.
pub const BLOCK_HEADER_SIZE: usize = 8;

const IN_USE_MASK: u32 = 0x1000_0000;
const LINKED_MASK: u32 = 0x8000_0000;
const LENGTH_MASK: u32 = 0x00FF_FFFF;
const NEXT_HIGH_MASK: u32 = 0x0F00_0000;
const RESERVED_NEXT: u32 = 0xFFFF_FFFF;

/// One link of a chain holding a variable-length value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicRecord {
    /// Record id.
    pub id: u64,
    /// Whether the block is in use.
    pub in_use: bool,
    /// Whether the block was allocated by the current change set.
    pub created: bool,
    /// Whether this block heads its chain.
    pub start_record: bool,
    /// Number of payload bytes held by this block.
    pub length: usize,
    /// Next block of the chain.
    pub next_block: Option<u64>,
    /// Payload; empty while the record is light.
    pub data: Vec<u8>,
    /// Header-only load; `data` has not been read yet.
    pub light: bool,
    /// Kind of value the chain belongs to, once attached to a property.
    pub kind: Option<PropertyType>,
}

impl DynamicRecord {
    /// An unused start block with the given id.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            start_record: true,
            ..Self::default()
        }
    }

    /// Replaces the payload and its length.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.length = data.len();
        self.data = data;
        self.light = false;
    }
}

impl_record!(DynamicRecord);

/// Layout of dynamic block stores. The block size lives in the store header.
#[derive(Clone, Copy, Debug)]
pub struct DynamicRecordFormat {
    name: &'static str,
    default_block_size: usize,
}

impl DynamicRecordFormat {
    /// Format whose new stores get blocks of `data_size` payload bytes.
    pub fn new(name: &'static str, data_size: usize) -> Self {
        Self {
            name,
            default_block_size: data_size + BLOCK_HEADER_SIZE,
        }
    }

    /// Reads only the header of the block at the cursor.
    pub fn read_header(
        &self,
        id: u64,
        cursor: &mut PageCursor,
        mode: RecordLoad,
        record_size: usize,
    ) -> DynamicRecord {
        self.decode(id, cursor, mode, record_size, false)
    }

    fn decode(
        &self,
        id: u64,
        cursor: &mut PageCursor,
        mode: RecordLoad,
        record_size: usize,
        with_data: bool,
    ) -> DynamicRecord {
        let mut record = DynamicRecord::new(id);
        let first = cursor.get_u32();
        let in_use = first & IN_USE_MASK != 0;
        record.in_use = in_use;
        if !mode.should_load(in_use) {
            return record;
        }
        let data_size = record_size.saturating_sub(BLOCK_HEADER_SIZE);
        let length = (first & LENGTH_MASK) as usize;
        let next_high = ((first & NEXT_HIGH_MASK) as u64) << 8;
        let next = join_reference(cursor.get_u32(), next_high);
        if (next.is_some() && length < data_size) || length > data_size {
            cursor.set_cursor_error(format!(
                "{} record {id} declares {length} bytes with next {next:?} in blocks of {data_size} bytes",
                self.name
            ));
            return record;
        }
        record.start_record = first & LINKED_MASK == 0;
        record.length = length;
        record.next_block = next;
        if with_data {
            let mut data = vec![0u8; length];
            cursor.get_bytes(&mut data);
            record.data = data;
        } else {
            record.light = true;
        }
        record
    }
}

impl RecordFormat for DynamicRecordFormat {
    type Record = DynamicRecord;

    fn name(&self) -> &'static str {
        self.name
    }

    fn store_header(&self) -> Option<i32> {
        Some(self.default_block_size as i32)
    }

    fn record_size(&self, header: Option<i32>) -> usize {
        header
            .filter(|size| *size > BLOCK_HEADER_SIZE as i32)
            .map(|size| size as usize)
            .unwrap_or(self.default_block_size)
    }

    fn record_header_size(&self) -> usize {
        BLOCK_HEADER_SIZE
    }

    fn max_id(&self) -> u64 {
        MAX_ID_36
    }

    fn is_in_use(&self, cursor: &mut PageCursor) -> bool {
        cursor.get_u32() & IN_USE_MASK != 0
    }

    fn read(
        &self,
        id: u64,
        cursor: &mut PageCursor,
        mode: RecordLoad,
        record_size: usize,
    ) -> DynamicRecord {
        self.decode(id, cursor, mode, record_size, true)
    }

    fn write(&self, record: &DynamicRecord, cursor: &mut PageCursor, _record_size: usize) {
        if !record.in_use {
            cursor.put_u8(0);
            return;
        }
        let (next_low, next_high) = split_reference(record.next_block);
        let mut first = record.length as u32 & LENGTH_MASK;
        first |= ((next_high >> 8) as u32) & NEXT_HIGH_MASK;
        first |= IN_USE_MASK;
        if !record.start_record {
            first |= LINKED_MASK;
        }
        cursor.put_u32(first);
        cursor.put_u32(next_low);
        cursor.put_bytes(&record.data[..record.length.min(record.data.len())]);
    }

    fn next_record_reference(&self, record: &DynamicRecord) -> Option<u64> {
        record.next_block
    }

    /// A block that was handed out but never written carries a zero length and
    /// an all-ones next pointer while its in-use bit is clear.
    fn is_record_reserved(&self, cursor: &mut PageCursor) -> bool {
        let first = cursor.get_u32();
        let next = cursor.get_u32();
        first & IN_USE_MASK == 0 && first & LENGTH_MASK == 0 && next == RESERVED_NEXT
    }
}
