#![forbid(unsafe_code)]
//! Fixed-size record layouts and the traits the generic store drives them through.
//!
//! Every format decodes into a fresh record value inside the caller's retry
//! loop; inconsistencies found while decoding are parked on the cursor with
//! [`PageCursor::set_cursor_error`] and judged once the loop has settled.

use std::fmt;

use crate::primitives::pager::PageCursor;

pub mod dynamic;
pub mod group;
pub mod meta;
pub mod node;
pub mod property;
pub mod relationship;
pub mod token;

pub use dynamic::{DynamicRecord, DynamicRecordFormat};
pub use group::{RelationshipGroupFormat, RelationshipGroupRecord};
pub use meta::{MetaDataRecord, MetaDataRecordFormat};
pub use node::{NodeRecord, NodeRecordFormat};
pub use property::{PropertyBlock, PropertyRecord, PropertyRecordFormat};
pub use relationship::{RelationshipRecord, RelationshipRecordFormat};
pub use token::{TokenKind, TokenRecord, TokenRecordFormat};

/// Bit marking a record as in use in formats with a leading flag byte.
pub const IN_USE_BIT: u8 = 0x1;

/// Low half of a null reference as stored in 32-bit reference fields.
pub const NULL_LOW: u32 = 0xFFFF_FFFF;

/// Largest id addressable by 35-bit references.
pub const MAX_ID_35: u64 = (1 << 35) - 1;

/// Largest id addressable by 36-bit references.
pub const MAX_ID_36: u64 = (1 << 36) - 1;

/// How strictly a record load treats unused and inconsistent records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordLoad {
    /// Loads in-use records; a record not in use is an error.
    Normal,
    /// Loads in-use records; a record not in use comes back cleared.
    Check,
    /// Loads whatever bytes are present, in use or not.
    Force,
    /// Like [`RecordLoad::Check`], but bounds and decode errors also yield a
    /// cleared record instead of failing. Used by full-store scans.
    LenientCheck,
}

impl RecordLoad {
    /// Whether the payload should be decoded for a record with this in-use flag.
    pub fn should_load(self, in_use: bool) -> bool {
        in_use || self == RecordLoad::Force
    }

    pub(crate) fn checks_bounds(self) -> bool {
        self != RecordLoad::LenientCheck
    }

    pub(crate) fn fails_on_decode_error(self) -> bool {
        matches!(self, RecordLoad::Normal | RecordLoad::Check)
    }
}

/// Common accessors over every record kind.
pub trait Record: Clone + fmt::Debug + Default + Send + Sync + 'static {
    /// Record id.
    fn id(&self) -> u64;
    /// Sets the record id.
    fn set_id(&mut self, id: u64);
    /// Whether the record is in use.
    fn in_use(&self) -> bool;
    /// Sets the in-use flag.
    fn set_in_use(&mut self, in_use: bool);
    /// Whether this record was created by the current change set.
    fn is_created(&self) -> bool;
    /// Marks the record as newly created.
    fn set_created(&mut self);

    /// Resets everything but the id to the unused state.
    fn clear(&mut self) {
        let id = self.id();
        *self = Self::default();
        self.set_id(id);
    }

    /// Id of an additional slot the record spills into, if any.
    fn secondary_unit_id(&self) -> Option<u64> {
        None
    }

    /// Whether the record currently needs its secondary slot.
    fn requires_secondary_unit(&self) -> bool {
        false
    }
}

/// Implements [`Record`] for structs with `id`, `in_use` and `created` fields.
macro_rules! impl_record {
    ($ty:ty) => {
        impl $crate::storage::format::Record for $ty {
            fn id(&self) -> u64 {
                self.id
            }
            fn set_id(&mut self, id: u64) {
                self.id = id;
            }
            fn in_use(&self) -> bool {
                self.in_use
            }
            fn set_in_use(&mut self, in_use: bool) {
                self.in_use = in_use;
            }
            fn is_created(&self) -> bool {
                self.created
            }
            fn set_created(&mut self) {
                self.created = true;
            }
        }
    };
}
pub(crate) use impl_record;

/// Byte layout of one record kind.
pub trait RecordFormat: Send + Sync + 'static {
    /// Record type produced by this format.
    type Record: Record;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Header int written into reserved record 0 when a store is created.
    /// `None` means the store has no header and reserves no ids.
    fn store_header(&self) -> Option<i32> {
        None
    }

    /// Record size given the header read from the store file.
    fn record_size(&self, header: Option<i32>) -> usize;

    /// Bytes of each record taken by the format's own header.
    fn record_header_size(&self) -> usize {
        0
    }

    /// Largest id this format can address.
    fn max_id(&self) -> u64;

    /// Reads the in-use flag at the cursor's offset.
    fn is_in_use(&self, cursor: &mut PageCursor) -> bool;

    /// Decodes the record at the cursor's offset.
    fn read(
        &self,
        id: u64,
        cursor: &mut PageCursor,
        mode: RecordLoad,
        record_size: usize,
    ) -> Self::Record;

    /// Encodes `record` at the cursor's offset.
    fn write(&self, record: &Self::Record, cursor: &mut PageCursor, record_size: usize);

    /// Next record in a chain starting at `record`, if the format chains.
    fn next_record_reference(&self, _record: &Self::Record) -> Option<u64> {
        None
    }

    /// Whether the slot at the cursor carries a reservation marker.
    fn is_record_reserved(&self, _cursor: &mut PageCursor) -> bool {
        false
    }
}

/// Splits a reference into its low 32 bits and the remaining high bits.
#[inline]
pub(crate) fn split_reference(reference: Option<u64>) -> (u32, u64) {
    match reference {
        Some(r) => (r as u32, r & !0xFFFF_FFFF),
        None => (NULL_LOW, 0),
    }
}

/// Joins a stored low half and high bits back into a reference.
#[inline]
pub(crate) fn join_reference(low: u32, high: u64) -> Option<u64> {
    if high == 0 && low == NULL_LOW {
        None
    } else {
        Some(low as u64 | high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_split_and_join() {
        assert_eq!(split_reference(None), (NULL_LOW, 0));
        assert_eq!(join_reference(NULL_LOW, 0), None);
        let r = 0xA_1234_5678u64;
        let (low, high) = split_reference(Some(r));
        assert_eq!(join_reference(low, high), Some(r));
        assert_eq!(join_reference(NULL_LOW, 1 << 32), Some(0x1_FFFF_FFFF));
    }

    #[test]
    fn load_modes() {
        assert!(RecordLoad::Force.should_load(false));
        assert!(!RecordLoad::Check.should_load(false));
        assert!(RecordLoad::Normal.should_load(true));
        assert!(!RecordLoad::LenientCheck.checks_bounds());
        assert!(!RecordLoad::Force.fails_on_decode_error());
    }
}
