//! Meta data records: an in-use byte and a long.

use super::{impl_record, RecordFormat, RecordLoad, IN_USE_BIT};
use crate::primitives::pager::PageCursor;

/// Bytes per meta data record.
pub const META_RECORD_SIZE: usize = 9;

/// A single positional long of the meta data store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaDataRecord {
    /// Position of the field.
    pub id: u64,
    /// Whether the field has been written.
    pub in_use: bool,
    /// Whether the field was created by the current change set.
    pub created: bool,
    /// Field value.
    pub value: i64,
}

impl_record!(MetaDataRecord);

/// In-use byte followed by a long.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetaDataRecordFormat;

impl RecordFormat for MetaDataRecordFormat {
    type Record = MetaDataRecord;

    fn name(&self) -> &'static str {
        "meta data"
    }

    fn record_size(&self, _header: Option<i32>) -> usize {
        META_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        u16::MAX as u64
    }

    fn is_in_use(&self, cursor: &mut PageCursor) -> bool {
        cursor.get_u8() & IN_USE_BIT != 0
    }

    fn read(&self, id: u64, cursor: &mut PageCursor, mode: RecordLoad, _size: usize) -> MetaDataRecord {
        let in_use = cursor.get_u8() & IN_USE_BIT != 0;
        let value = cursor.get_i64();
        MetaDataRecord {
            id,
            in_use,
            created: false,
            value: if mode.should_load(in_use) { value } else { 0 },
        }
    }

    fn write(&self, record: &MetaDataRecord, cursor: &mut PageCursor, _size: usize) {
        cursor.put_u8(if record.in_use { IN_USE_BIT } else { 0 });
        cursor.put_i64(record.value);
    }
}
