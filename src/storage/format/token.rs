//! Label, relationship type and property key token records.

use super::{impl_record, DynamicRecord, RecordFormat, RecordLoad, IN_USE_BIT};
use crate::primitives::pager::PageCursor;

/// Kinds of named tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TokenKind {
    /// Node labels.
    Label,
    /// Relationship types.
    RelationshipType,
    /// Property keys.
    PropertyKey,
}

impl TokenKind {
    /// Largest token id the rest of the record layouts can reference.
    pub fn max_id(self) -> u64 {
        match self {
            TokenKind::Label => (1 << 31) - 1,
            TokenKind::RelationshipType => (1 << 16) - 1,
            TokenKind::PropertyKey => (1 << 24) - 1,
        }
    }

    fn record_size(self) -> usize {
        match self {
            TokenKind::PropertyKey => 9,
            TokenKind::Label | TokenKind::RelationshipType => 5,
        }
    }
}

/// A token: in-use flag, name pointer and, for property keys, a usage count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenRecord {
    /// Record id, which is the token id.
    pub id: u64,
    /// Whether the token is in use.
    pub in_use: bool,
    /// Whether the token was created by the current change set.
    pub created: bool,
    /// First block of the name in the name store.
    pub name_id: u32,
    /// Number of properties using this key (property keys only).
    pub property_count: u32,
    /// Name blocks, when loaded or produced.
    pub name_records: Vec<DynamicRecord>,
}

impl_record!(TokenRecord);

/// Layout of the three token stores.
#[derive(Clone, Copy, Debug)]
pub struct TokenRecordFormat {
    kind: TokenKind,
}

impl TokenRecordFormat {
    /// Format for tokens of `kind`.
    pub fn new(kind: TokenKind) -> Self {
        Self { kind }
    }

    /// Kind of token stored.
    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

impl RecordFormat for TokenRecordFormat {
    type Record = TokenRecord;

    fn name(&self) -> &'static str {
        match self.kind {
            TokenKind::Label => "label token",
            TokenKind::RelationshipType => "relationship type token",
            TokenKind::PropertyKey => "property key token",
        }
    }

    fn record_size(&self, _header: Option<i32>) -> usize {
        self.kind.record_size()
    }

    fn max_id(&self) -> u64 {
        self.kind.max_id()
    }

    fn is_in_use(&self, cursor: &mut PageCursor) -> bool {
        cursor.get_u8() & IN_USE_BIT != 0
    }

    fn read(&self, id: u64, cursor: &mut PageCursor, mode: RecordLoad, _size: usize) -> TokenRecord {
        let mut record = TokenRecord {
            id,
            ..TokenRecord::default()
        };
        record.in_use = cursor.get_u8() & IN_USE_BIT != 0;
        if !mode.should_load(record.in_use) {
            return record;
        }
        if self.kind == TokenKind::PropertyKey {
            record.property_count = cursor.get_u32();
        }
        record.name_id = cursor.get_u32();
        record
    }

    fn write(&self, record: &TokenRecord, cursor: &mut PageCursor, _size: usize) {
        if !record.in_use {
            cursor.put_u8(0);
            return;
        }
        cursor.put_u8(IN_USE_BIT);
        if self.kind == TokenKind::PropertyKey {
            cursor.put_u32(record.property_count);
        }
        cursor.put_u32(record.name_id);
    }
}
