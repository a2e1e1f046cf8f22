#![forbid(unsafe_code)]
//! Property records and the values they carry.
//!
//! A value is packed into the record's words when one of the inline codecs
//! accepts it. Strings and arrays that do not fit spill into the string or
//! array block store and leave a pointer block behind.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use super::dynamic::{read_full_byte_array, DynamicStore};
use super::format::{DynamicRecord, PropertyBlock, PropertyRecord, PropertyRecordFormat, RecordLoad};
use super::options::{FormatCapabilities, StoreOptions};
use super::store::RecordStore;
use super::values::property_type::{decode_primitive, encode_primitive, single_block_long_value};
use super::values::{dynamic_array, geometry, short_array, short_string, temporal};
use super::values::{ArrayValue, PropertyType, Value};
use crate::primitives::idgen::IdType;
use crate::primitives::pager::PageCache;
use crate::types::{PenumbraError, Result};

enum Encoded<'v> {
    Inline(PropertyBlock),
    Spill(PropertyType, Cow<'v, [u8]>),
}

/// Property record store with its string and array block stores.
pub struct PropertyStore {
    store: RecordStore<PropertyRecordFormat>,
    strings: Arc<DynamicStore>,
    arrays: Arc<DynamicStore>,
    capabilities: FormatCapabilities,
    guard_for_cycles: bool,
}

impl PropertyStore {
    /// Opens the property store at `path` on top of already opened block stores.
    pub fn open(
        cache: &Arc<PageCache>,
        path: impl AsRef<Path>,
        strings: Arc<DynamicStore>,
        arrays: Arc<DynamicStore>,
        options: &StoreOptions,
        create: bool,
    ) -> Result<Self> {
        let store = RecordStore::open(cache, path, IdType::Property, PropertyRecordFormat, options, create)?;
        Ok(Self {
            store,
            strings,
            arrays,
            capabilities: options.format,
            guard_for_cycles: options.guard_chains_for_cycles,
        })
    }

    /// Underlying record store.
    pub fn store(&self) -> &RecordStore<PropertyRecordFormat> {
        &self.store
    }

    /// Block store holding long strings.
    pub fn string_store(&self) -> &Arc<DynamicStore> {
        &self.strings
    }

    /// Block store holding large arrays.
    pub fn array_store(&self) -> &Arc<DynamicStore> {
        &self.arrays
    }

    /// Loads property record `id`.
    pub fn get_record(&self, id: u64, mode: RecordLoad) -> Result<PropertyRecord> {
        self.store.get_record(id, mode)
    }

    /// Loads the property chain starting at `first_id`.
    pub fn get_property_chain(&self, first_id: u64) -> Result<Vec<PropertyRecord>> {
        self.store.get_records(first_id, RecordLoad::Normal, self.guard_for_cycles)
    }

    /// Writes the dynamic records of every block, releases `deleted_records`
    /// and writes the record itself.
    pub fn update_record(&self, record: &PropertyRecord) -> Result<()> {
        for block in &record.blocks {
            let Some(target) = self.dynamic_store_for(block.property_type()) else {
                continue;
            };
            if record.in_use {
                for value_record in block.value_records.iter().filter(|r| !r.light) {
                    target.store().update_record(value_record)?;
                }
            } else {
                target.delete_chain(&self.value_records_of(block)?)?;
            }
        }
        for deleted in &record.deleted_records {
            let target = self
                .dynamic_store_for(deleted.kind)
                .ok_or(PenumbraError::Invalid("deleted value record has no value kind"))?;
            let mut unused = deleted.clone();
            unused.in_use = false;
            target.store().update_record(&unused)?;
        }
        self.store.update_record(record)
    }

    fn dynamic_store_for(&self, kind: Option<PropertyType>) -> Option<&DynamicStore> {
        match kind? {
            PropertyType::String => Some(self.strings.as_ref()),
            PropertyType::Array => Some(self.arrays.as_ref()),
            _ => None,
        }
    }

    fn value_records_of(&self, block: &PropertyBlock) -> Result<Vec<DynamicRecord>> {
        if !block.value_records.is_empty() {
            return Ok(block.value_records.clone());
        }
        match self.dynamic_store_for(block.property_type()) {
            Some(target) => target.get_records(block.single_value_long(), false),
            None => Ok(Vec::new()),
        }
    }

    /// Encodes `value` under property key `key`, taking dynamic record ids
    /// from `reuse` first when the value spills.
    pub fn encode_value<I>(&self, key: u32, value: &Value, reuse: &mut I) -> Result<PropertyBlock>
    where
        I: Iterator<Item = DynamicRecord>,
    {
        match self.encode_inline(key, value)? {
            Encoded::Inline(block) => Ok(block),
            Encoded::Spill(kind, bytes) => self.spill(key, kind, &bytes, reuse),
        }
    }

    /// Encodes `value` without touching a block store. Values that need one
    /// come back as the bytes to spill.
    fn encode_inline<'v>(&self, key: u32, value: &'v Value) -> Result<Encoded<'v>> {
        if let Some(words) = encode_primitive(key, value) {
            return Ok(Encoded::Inline(PropertyBlock::from_words(&words)));
        }
        match value {
            Value::Char(_) => Err(PenumbraError::Invalid("char outside the basic multilingual plane")),
            Value::String(s) => Ok(match short_string::encode(key, s) {
                Some(words) => Encoded::Inline(PropertyBlock::from_words(&words)),
                None => Encoded::Spill(PropertyType::String, Cow::Borrowed(s.as_bytes())),
            }),
            Value::Array(array) => {
                self.check_array_capability(array)?;
                if let Some(words) = short_array::encode(key, array) {
                    return Ok(Encoded::Inline(PropertyBlock::from_words(&words)));
                }
                let bytes = dynamic_array::encode(array)?;
                Ok(Encoded::Spill(PropertyType::Array, Cow::Owned(bytes)))
            }
            Value::Point(point) => {
                if !self.capabilities.points {
                    return Err(PenumbraError::UnsupportedFormatCapability("points"));
                }
                geometry::encode_point(key, point)
                    .map(|words| Encoded::Inline(PropertyBlock::from_words(&words)))
                    .ok_or(PenumbraError::Invalid("point dimension or reference system cannot be stored"))
            }
            Value::Temporal(t) => {
                if !self.capabilities.temporal {
                    return Err(PenumbraError::UnsupportedFormatCapability("temporal"));
                }
                Ok(Encoded::Inline(PropertyBlock::from_words(&temporal::encode(key, t))))
            }
            _ => Err(PenumbraError::Invalid("value has no encoding")),
        }
    }

    fn check_array_capability(&self, array: &ArrayValue) -> Result<()> {
        match array {
            ArrayValue::Point(_) if !self.capabilities.points => {
                Err(PenumbraError::UnsupportedFormatCapability("point arrays"))
            }
            ArrayValue::Temporal(_) if !self.capabilities.temporal => {
                Err(PenumbraError::UnsupportedFormatCapability("temporal arrays"))
            }
            _ => Ok(()),
        }
    }

    fn spill<I>(&self, key: u32, kind: PropertyType, bytes: &[u8], reuse: &mut I) -> Result<PropertyBlock>
    where
        I: Iterator<Item = DynamicRecord>,
    {
        let target = match kind {
            PropertyType::String => &self.strings,
            _ => &self.arrays,
        };
        let mut records = target.allocate_from_bytes(bytes, reuse)?;
        for record in &mut records {
            record.kind = Some(kind);
        }
        let first = records
            .first()
            .map(|r| r.id)
            .ok_or(PenumbraError::IllegalState("allocation produced no records"))?;
        trace!(key, kind = ?kind, first, blocks = records.len(), "property.spill");
        let mut block = PropertyBlock::from_words(&[single_block_long_value(key, kind, first)]);
        block.value_records = records;
        Ok(block)
    }

    /// Sets `key` to `value` in `record`, replacing any previous value.
    ///
    /// Dynamic records of the previous value are reused for a value of the
    /// same kind; the rest end up in `deleted_records`.
    pub fn set_property(&self, record: &mut PropertyRecord, key: u32, value: &Value) -> Result<()> {
        // Nothing is allocated or removed until the new block is known to fit.
        let encoded = self.encode_inline(key, value)?;
        let words = match &encoded {
            Encoded::Inline(block) => block.size_in_words(),
            Encoded::Spill(..) => 1,
        };
        if !record.has_room_replacing(key, words) {
            return Err(PenumbraError::Invalid("property record has no room for the value"));
        }
        let (previous_kind, mut previous) = match record.block(key) {
            Some(old) => (old.property_type(), self.value_records_of(old)?),
            None => (None, Vec::new()),
        };
        let block = match encoded {
            Encoded::Inline(block) => block,
            Encoded::Spill(kind, bytes) => {
                let mut reuse = if previous_kind == Some(kind) {
                    std::mem::take(&mut previous).into_iter()
                } else {
                    Vec::new().into_iter()
                };
                let block = self.spill(key, kind, &bytes, &mut reuse)?;
                previous.extend(reuse);
                block
            }
        };
        record.remove_block(key);
        for mut leftover in previous {
            leftover.kind = previous_kind;
            record.deleted_records.push(leftover);
        }
        record.blocks.push(block);
        record.in_use = true;
        Ok(())
    }

    /// Removes `key` from `record`; its dynamic records move to `deleted_records`.
    pub fn remove_property(&self, record: &mut PropertyRecord, key: u32) -> Result<Option<PropertyBlock>> {
        let Some(block) = record.remove_block(key) else {
            return Ok(None);
        };
        let kind = block.property_type();
        for mut value_record in self.value_records_of(&block)? {
            value_record.kind = kind;
            record.deleted_records.push(value_record);
        }
        record.in_use = !record.blocks.is_empty();
        Ok(Some(block))
    }

    /// Loads the dynamic records of every light block in `record`.
    pub fn ensure_heavy(&self, record: &mut PropertyRecord) -> Result<()> {
        for block in &mut record.blocks {
            self.ensure_block_heavy(block)?;
        }
        Ok(())
    }

    /// Loads the dynamic records of `block` if it points into a block store.
    pub fn ensure_block_heavy(&self, block: &mut PropertyBlock) -> Result<()> {
        let kind = block.property_type();
        let Some(target) = self.dynamic_store_for(kind) else {
            return Ok(());
        };
        if block.value_records.is_empty() {
            block.value_records = target.get_records(block.single_value_long(), true)?;
        } else {
            target.ensure_heavy_all(&mut block.value_records)?;
        }
        for record in &mut block.value_records {
            record.kind = kind;
        }
        Ok(())
    }

    /// Decodes the value of `block`, loading dynamic records when needed.
    pub fn decode_value(&self, block: &PropertyBlock) -> Result<Value> {
        let words = block.value_blocks.as_slice();
        let corrupt = |what: &str| {
            PenumbraError::InvalidRecord(format!(
                "property key {} has a corrupt {what} value",
                block.key_index_id()
            ))
        };
        let kind = block
            .property_type()
            .ok_or_else(|| corrupt("untyped"))?;
        match kind {
            PropertyType::ShortString => short_string::decode(words)
                .map(Value::String)
                .ok_or_else(|| corrupt("short string")),
            PropertyType::ShortArray => short_array::decode(words)
                .map(Value::Array)
                .ok_or_else(|| corrupt("short array")),
            PropertyType::Geometry => geometry::decode_point(words)
                .map(Value::Point)
                .ok_or_else(|| corrupt("point")),
            PropertyType::Temporal => temporal::decode(words)
                .map(Value::Temporal)
                .ok_or_else(|| corrupt("temporal")),
            PropertyType::String | PropertyType::Array => {
                let mut heavy = block.clone();
                self.ensure_block_heavy(&mut heavy)?;
                let (header, body) = read_full_byte_array(&heavy.value_records, kind)?;
                if kind == PropertyType::String {
                    String::from_utf8(body)
                        .map(Value::String)
                        .map_err(|_| corrupt("utf-8 string"))
                } else {
                    dynamic_array::decode(&header, &body).map(Value::Array)
                }
            }
            _ => decode_primitive(words).ok_or_else(|| corrupt("primitive")),
        }
    }

    /// Value stored under `key` in `record`, if any.
    pub fn get_property(&self, record: &PropertyRecord, key: u32) -> Result<Option<Value>> {
        record.block(key).map(|b| self.decode_value(b)).transpose()
    }
}
