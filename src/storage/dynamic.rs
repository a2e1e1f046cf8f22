#![forbid(unsafe_code)]
//! Stores whose values span a chain of fixed-size blocks.
//!
//! Strings, large arrays, overflowing label sets and token names are cut into
//! blocks of `block_data_size` bytes. Every block but the last is full; the
//! first is flagged as the start of its chain.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{trace, warn};

use super::format::{DynamicRecord, DynamicRecordFormat, Record, RecordFormat, RecordLoad};
use super::options::StoreOptions;
use super::store::RecordStore;
use super::values::{dynamic_array, PropertyType};
use crate::primitives::idgen::IdType;
use crate::primitives::pager::PageCache;
use crate::types::{PenumbraError, Result};

/// A record store of chained dynamic blocks.
pub struct DynamicStore {
    store: RecordStore<DynamicRecordFormat>,
    guard_for_cycles: bool,
}

impl DynamicStore {
    /// Opens the block store at `path`. New stores get blocks carrying
    /// `data_size` payload bytes; existing stores keep the size in their header.
    pub fn open(
        cache: &Arc<PageCache>,
        path: impl AsRef<Path>,
        id_type: IdType,
        name: &'static str,
        data_size: usize,
        options: &StoreOptions,
        create: bool,
    ) -> Result<Self> {
        let format = DynamicRecordFormat::new(name, data_size);
        let store = RecordStore::open(cache, path, id_type, format, options, create)?;
        Ok(Self {
            store,
            guard_for_cycles: options.guard_chains_for_cycles,
        })
    }

    /// Underlying record store.
    pub fn store(&self) -> &RecordStore<DynamicRecordFormat> {
        &self.store
    }

    /// Payload bytes per block.
    pub fn block_data_size(&self) -> usize {
        self.store.record_data_size()
    }

    /// Cuts `src` into blocks, taking ids from `reuse` before allocating new ones.
    ///
    /// Records are returned in chain order and are not written. Candidates
    /// left in `reuse` are untouched; see [`DynamicStore::release_leftovers`].
    /// An empty `src` still yields one empty start block.
    pub fn allocate_from_bytes<I>(&self, src: &[u8], reuse: &mut I) -> Result<Vec<DynamicRecord>>
    where
        I: Iterator<Item = DynamicRecord>,
    {
        let block_size = self.block_data_size();
        if block_size == 0 {
            return Err(PenumbraError::Invalid("dynamic store has no room for payload"));
        }
        let mut records: Vec<DynamicRecord> = Vec::with_capacity(src.len() / block_size + 1);
        let mut chunks = src.chunks(block_size);
        let mut chunk = chunks.next().unwrap_or(&[]);
        let mut reused = 0usize;
        loop {
            let mut record = match reuse.next() {
                Some(mut candidate) => {
                    if !candidate.in_use() {
                        candidate.set_created();
                    }
                    reused += 1;
                    candidate
                }
                None => {
                    let mut fresh = DynamicRecord::new(self.store.next_id()?);
                    fresh.set_created();
                    fresh
                }
            };
            record.in_use = true;
            record.start_record = records.is_empty();
            record.next_block = None;
            record.set_data(chunk.to_vec());
            if let Some(prev) = records.last_mut() {
                prev.next_block = Some(record.id);
            }
            records.push(record);
            match chunks.next() {
                Some(next) => chunk = next,
                None => break,
            }
        }
        trace!(
            store = self.store.format().name(),
            bytes = src.len(),
            records = records.len(),
            reused,
            "dynamic.allocate"
        );
        Ok(records)
    }

    /// Writes every record of a chain.
    pub fn write_records(&self, records: &[DynamicRecord]) -> Result<()> {
        for record in records {
            self.store.update_record(record)?;
        }
        Ok(())
    }

    /// Writes `rest` as unused, freeing their ids.
    pub fn release_leftovers<I>(&self, rest: I) -> Result<usize>
    where
        I: IntoIterator<Item = DynamicRecord>,
    {
        let mut released = 0;
        for mut record in rest {
            if !record.in_use {
                continue;
            }
            record.in_use = false;
            self.store.update_record(&record)?;
            released += 1;
        }
        Ok(released)
    }

    /// Allocates, writes and returns the chain for `src`, reusing the blocks of
    /// `previous` and releasing the ones no longer needed.
    pub fn store_bytes(&self, src: &[u8], previous: Vec<DynamicRecord>) -> Result<Vec<DynamicRecord>> {
        let mut reuse = previous.into_iter();
        let records = self.allocate_from_bytes(src, &mut reuse)?;
        self.write_records(&records)?;
        self.release_leftovers(reuse)?;
        Ok(records)
    }

    /// Marks every block of a chain unused.
    pub fn delete_chain(&self, records: &[DynamicRecord]) -> Result<()> {
        self.release_leftovers(records.iter().cloned()).map(|_| ())
    }

    /// Follows the chain from `start_id`. Light loads read headers only.
    ///
    /// A block that is not in use or whose length does not match its
    /// position in the chain fails with [`PenumbraError::InvalidRecord`].
    pub fn get_records(&self, start_id: u64, include_data: bool) -> Result<Vec<DynamicRecord>> {
        let format = *self.store.format();
        let record_size = self.store.record_size();
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut next = Some(start_id);
        while let Some(id) = next {
            if self.guard_for_cycles && !seen.insert(id) {
                warn!(store = format.name(), start_id, id, "dynamic.chain.cycle");
                return Err(PenumbraError::CycleDetected(format!(
                    "cycle detected in {} chain starting at id {start_id}, and finding id {id} twice in the chain",
                    format.name()
                )));
            }
            let record = self.store.read_record_by(id, RecordLoad::Normal, |cursor| {
                if include_data {
                    format.read(id, cursor, RecordLoad::Normal, record_size)
                } else {
                    format.read_header(id, cursor, RecordLoad::Normal, record_size)
                }
            })?;
            next = record.next_block;
            records.push(record);
        }
        Ok(records)
    }

    /// Loads the payload of a light record. No-op for heavy or empty records.
    pub fn ensure_heavy(&self, record: &mut DynamicRecord) -> Result<()> {
        if !record.light {
            return Ok(());
        }
        if record.length == 0 {
            record.light = false;
            return Ok(());
        }
        let heavy = self.store.get_record(record.id, RecordLoad::Normal)?;
        record.length = heavy.length;
        record.data = heavy.data;
        record.light = false;
        Ok(())
    }

    /// Loads the payload of every light record in `records`.
    pub fn ensure_heavy_all(&self, records: &mut [DynamicRecord]) -> Result<()> {
        records.iter_mut().try_for_each(|r| self.ensure_heavy(r))
    }

    /// Reads the whole chain from `start_id` and concatenates its payload.
    pub fn get_bytes(&self, start_id: u64) -> Result<Vec<u8>> {
        let records = self.get_records(start_id, true)?;
        let mut bytes = Vec::new();
        concat_data(&records, &mut bytes);
        Ok(bytes)
    }
}

/// Appends the payload of `records` in order to `target`, replacing its
/// contents. Returns the number of bytes written.
pub fn concat_data(records: &[DynamicRecord], target: &mut Vec<u8>) -> usize {
    let total = records.iter().map(|r| r.data.len()).sum();
    target.clear();
    target.reserve(total);
    for record in records {
        target.extend_from_slice(&record.data);
    }
    total
}

/// Splits the payload of heavy `records` into a type header and the rest.
///
/// Arrays carry a self-describing header that must fit in the first block;
/// strings have none.
pub fn read_full_byte_array(records: &[DynamicRecord], kind: PropertyType) -> Result<(Vec<u8>, Vec<u8>)> {
    let header_len = match kind {
        PropertyType::Array => {
            let first = records
                .first()
                .and_then(|r| r.data.first())
                .copied()
                .ok_or_else(|| PenumbraError::InvalidRecord("array chain has no data".into()))?;
            dynamic_array::header_size(first).ok_or_else(|| {
                PenumbraError::InvalidRecord(format!("array chain has unknown type byte {first}"))
            })?
        }
        _ => 0,
    };
    let mut header = Vec::with_capacity(header_len);
    let mut body = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if record.light {
            return Err(PenumbraError::IllegalState("dynamic record payload not loaded"));
        }
        if i == 0 {
            if record.data.len() < header_len {
                return Err(PenumbraError::InvalidRecord(format!(
                    "first block {} holds {} bytes, fewer than its {header_len} byte header",
                    record.id,
                    record.data.len()
                )));
            }
            header.extend_from_slice(&record.data[..header_len]);
            body.extend_from_slice(&record.data[header_len..]);
        } else {
            body.extend_from_slice(&record.data);
        }
    }
    Ok((header, body))
}
