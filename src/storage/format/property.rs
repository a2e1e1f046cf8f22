//! Property records and the blocks packed into them.

use smallvec::SmallVec;

use super::{impl_record, join_reference, split_reference, DynamicRecord, RecordFormat, RecordLoad};
use super::MAX_ID_36;
use crate::primitives::pager::PageCursor;
use crate::storage::values::property_type::{
    calculate_number_of_blocks_used, key_of, type_id_of, PropertyType, BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING,
    PAYLOAD_SIZE_LONGS,
};

/// Modifier byte plus the low halves of the prev/next pointers.
pub const PROPERTY_HEADER_SIZE: usize = 9;

/// Bytes per property record.
pub const PROPERTY_RECORD_SIZE: usize = PROPERTY_HEADER_SIZE + PAYLOAD_SIZE_LONGS * 8;

/// One encoded property: one to four 8-byte words plus any dynamic value blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyBlock {
    /// Encoded words; the first one carries key, type and header bits.
    pub value_blocks: SmallVec<[u64; 4]>,
    /// Dynamic records of a string/array value, when loaded or produced.
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    /// Block wrapping already encoded words.
    pub fn from_words(words: &[u64]) -> Self {
        Self {
            value_blocks: SmallVec::from_slice(words),
            value_records: Vec::new(),
        }
    }

    /// Property key token id.
    pub fn key_index_id(&self) -> u32 {
        self.value_blocks.first().map(|w| key_of(*w)).unwrap_or(0)
    }

    /// Type of the stored value.
    pub fn property_type(&self) -> Option<PropertyType> {
        self.value_blocks
            .first()
            .and_then(|w| PropertyType::from_block(*w))
    }

    /// Number of 8-byte words this block occupies.
    pub fn size_in_words(&self) -> usize {
        self.value_blocks.len()
    }

    /// First block id of the dynamic chain for string/array values.
    pub fn single_value_long(&self) -> u64 {
        self.value_blocks.first().map(|w| w >> 28).unwrap_or(0)
    }

    /// String/array blocks whose dynamic records have not been loaded yet.
    pub fn is_light(&self) -> bool {
        matches!(
            self.property_type(),
            Some(PropertyType::String | PropertyType::Array)
        ) && self.value_records.is_empty()
    }
}

/// A record of up to four 8-byte property words, linked into an entity's property chain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyRecord {
    /// Record id.
    pub id: u64,
    /// Whether the record is in use (holds at least one block).
    pub in_use: bool,
    /// Whether the record was created by the current change set.
    pub created: bool,
    /// Previous record of the chain.
    pub prev_prop: Option<u64>,
    /// Next record of the chain.
    pub next_prop: Option<u64>,
    /// Property blocks in storage order.
    pub blocks: Vec<PropertyBlock>,
    /// Dynamic records released by updates, to be written as unused.
    pub deleted_records: Vec<DynamicRecord>,
}

impl PropertyRecord {
    /// An empty in-use record.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            ..Self::default()
        }
    }

    /// Words used by all blocks.
    pub fn used_words(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size_in_words).sum()
    }

    /// Whether a block of `words` words fits once the block for `key`, if
    /// any, is replaced by it.
    pub fn has_room_replacing(&self, key: u32, words: usize) -> bool {
        let replaced = self.block(key).map_or(0, PropertyBlock::size_in_words);
        self.used_words() - replaced + words <= PAYLOAD_SIZE_LONGS
    }

    /// Block for property key `key`.
    pub fn block(&self, key: u32) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|b| b.key_index_id() == key)
    }

    /// Removes and returns the block for `key`.
    pub fn remove_block(&mut self, key: u32) -> Option<PropertyBlock> {
        let idx = self.blocks.iter().position(|b| b.key_index_id() == key)?;
        Some(self.blocks.remove(idx))
    }
}

impl_record!(PropertyRecord);

/// Fixed 41-byte property layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropertyRecordFormat;

impl RecordFormat for PropertyRecordFormat {
    type Record = PropertyRecord;

    fn name(&self) -> &'static str {
        "property"
    }

    fn record_size(&self, _header: Option<i32>) -> usize {
        PROPERTY_RECORD_SIZE
    }

    fn record_header_size(&self) -> usize {
        PROPERTY_HEADER_SIZE
    }

    fn max_id(&self) -> u64 {
        MAX_ID_36
    }

    fn is_in_use(&self, cursor: &mut PageCursor) -> bool {
        let start = cursor.offset();
        cursor.set_offset(start + PROPERTY_HEADER_SIZE);
        for i in 0..PAYLOAD_SIZE_LONGS {
            let word = cursor.get_u64();
            if i == 0 && word == 0 {
                return false;
            }
            if PropertyType::from_block(word).is_some() {
                return true;
            }
        }
        false
    }

    fn read(
        &self,
        id: u64,
        cursor: &mut PageCursor,
        mode: RecordLoad,
        _size: usize,
    ) -> PropertyRecord {
        let mut record = PropertyRecord {
            id,
            ..PropertyRecord::default()
        };
        let modifiers = cursor.get_u8();
        let prev_high = ((modifiers & 0xF0) as u64) << 28;
        let next_high = ((modifiers & 0x0F) as u64) << 32;
        let prev = join_reference(cursor.get_u32(), prev_high);
        let next = join_reference(cursor.get_u32(), next_high);
        let mut blocks = Vec::new();
        let mut used = 0usize;
        while used < PAYLOAD_SIZE_LONGS {
            let first = cursor.get_u64();
            if type_id_of(first) == 0 {
                break;
            }
            let count = calculate_number_of_blocks_used(first);
            if count == BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING {
                cursor.set_cursor_error(format!(
                    "property record {id} has a block with bad type or encoding {first:#x}"
                ));
                break;
            }
            let count = count as usize;
            if used + count > PAYLOAD_SIZE_LONGS {
                cursor.set_cursor_error(format!(
                    "property record {id} block needs {count} words but only {} remain",
                    PAYLOAD_SIZE_LONGS - used
                ));
                break;
            }
            let mut block = PropertyBlock::default();
            block.value_blocks.push(first);
            for _ in 1..count {
                block.value_blocks.push(cursor.get_u64());
            }
            used += count;
            blocks.push(block);
        }
        record.in_use = !blocks.is_empty();
        if mode.should_load(record.in_use) {
            record.prev_prop = prev;
            record.next_prop = next;
            record.blocks = blocks;
        }
        record
    }

    fn write(&self, record: &PropertyRecord, cursor: &mut PageCursor, _size: usize) {
        if !record.in_use {
            let start = cursor.offset();
            cursor.set_offset(start + PROPERTY_HEADER_SIZE);
            cursor.put_u64(0);
            return;
        }
        let (prev_low, prev_high) = split_reference(record.prev_prop);
        let (next_low, next_high) = split_reference(record.next_prop);
        let modifiers = ((prev_high & 0xF_0000_0000) >> 28) | ((next_high & 0xF_0000_0000) >> 32);
        cursor.put_u8(modifiers as u8);
        cursor.put_u32(prev_low);
        cursor.put_u32(next_low);
        let mut longs = 0usize;
        for block in &record.blocks {
            for word in &block.value_blocks {
                cursor.put_u64(*word);
                longs += 1;
            }
        }
        if longs < PAYLOAD_SIZE_LONGS {
            cursor.put_u64(0);
        }
    }

    fn next_record_reference(&self, record: &PropertyRecord) -> Option<u64> {
        record.next_prop
    }
}
