#![forbid(unsafe_code)]
//! The 40-bit label field of a node record.
//!
//! Bits 36..39 count inline labels, packed LSB-first into the low 36 bits at
//! `36 / count` bits each. When the labels do not fit, bit 39 is set and the
//! low 36 bits point at a chain in the label block store holding the long
//! array `[node id, labels...]`.

use tracing::trace;

use super::dynamic::{concat_data, DynamicStore};
use super::format::{DynamicRecord, NodeRecord};
use super::values::{dynamic_array, ArrayValue};
use crate::types::{PenumbraError, Result};

const LABEL_BITS: u32 = 36;
const LABEL_MASK: u64 = (1 << LABEL_BITS) - 1;
const COUNT_SHIFT: u32 = 36;
const COUNT_MASK: u64 = 0x7;
const DYNAMIC_BIT: u64 = 1 << 39;
const MAX_INLINE_LABELS: usize = 7;

/// Whether `field` points into the label block store.
pub fn is_dynamic(field: u64) -> bool {
    field & DYNAMIC_BIT != 0
}

/// First block of the dynamic label chain referenced by `field`.
pub fn first_dynamic_record(field: u64) -> u64 {
    field & LABEL_MASK
}

/// Packs sorted `labels` inline, or `None` if they do not fit.
pub fn inline_field(labels: &[u32]) -> Option<u64> {
    if labels.len() > MAX_INLINE_LABELS {
        return None;
    }
    if labels.is_empty() {
        return Some(0);
    }
    let bits = LABEL_BITS / labels.len() as u32;
    let mut field = (labels.len() as u64) << COUNT_SHIFT;
    for (i, &label) in labels.iter().enumerate() {
        if bits < 32 && label as u64 >= 1 << bits {
            return None;
        }
        field |= (label as u64) << (i as u32 * bits);
    }
    Some(field)
}

/// Unpacks an inline field. `None` for a dynamic field.
pub fn parse_inline(field: u64) -> Option<Vec<u32>> {
    if is_dynamic(field) {
        return None;
    }
    let count = ((field >> COUNT_SHIFT) & COUNT_MASK) as u32;
    if count == 0 {
        return Some(Vec::new());
    }
    let bits = LABEL_BITS / count;
    let mask = (1u64 << bits) - 1;
    Some(
        (0..count)
            .map(|i| ((field >> (i * bits)) & mask) as u32)
            .collect(),
    )
}

fn decode_dynamic(node_id: u64, records: &[DynamicRecord]) -> Result<Vec<u32>> {
    let mut bytes = Vec::new();
    concat_data(records, &mut bytes);
    let ArrayValue::Long(longs) = dynamic_array::decode_bytes(&bytes)? else {
        return Err(PenumbraError::InvalidRecord(format!(
            "dynamic labels of node {node_id} are not a long array"
        )));
    };
    match longs.split_first() {
        Some((&owner, labels)) if owner as u64 == node_id => {
            Ok(labels.iter().map(|&l| l as u32).collect())
        }
        Some((&owner, _)) => Err(PenumbraError::InvalidRecord(format!(
            "dynamic labels of node {node_id} belong to node {owner}"
        ))),
        None => Err(PenumbraError::InvalidRecord(format!(
            "dynamic labels of node {node_id} are empty"
        ))),
    }
}

fn loaded_chain(node: &NodeRecord) -> Option<&[DynamicRecord]> {
    let records = node.dynamic_label_records.as_slice();
    let first = records.first()?;
    let usable = first.id == first_dynamic_record(node.label_field)
        && records.iter().all(|r| r.in_use && !r.light);
    usable.then_some(records)
}

/// Labels of `node`, reading the label store when the field is dynamic.
pub fn parse_labels(node: &NodeRecord, label_store: &DynamicStore) -> Result<Vec<u32>> {
    if let Some(labels) = parse_inline(node.label_field) {
        return Ok(labels);
    }
    if let Some(records) = loaded_chain(node) {
        return decode_dynamic(node.id, records);
    }
    let records = label_store.get_records(first_dynamic_record(node.label_field), true)?;
    decode_dynamic(node.id, &records)
}

fn current_chain(node: &NodeRecord, label_store: &DynamicStore) -> Result<Vec<DynamicRecord>> {
    if !is_dynamic(node.label_field) {
        return Ok(Vec::new());
    }
    if let Some(records) = loaded_chain(node) {
        return Ok(records.to_vec());
    }
    label_store.get_records(first_dynamic_record(node.label_field), false)
}

/// Replaces the labels of `node`.
///
/// Labels are sorted and deduplicated. The blocks of a previous dynamic
/// chain are reused first; the ones left over are put in
/// `dynamic_label_records` as unused, next to the new chain, for the caller
/// to write.
pub fn put_labels(node: &mut NodeRecord, labels: &[u32], label_store: &DynamicStore) -> Result<()> {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let previous = current_chain(node, label_store)?;
    if let Some(field) = inline_field(&sorted) {
        node.label_field = field;
        node.dynamic_label_records = previous
            .into_iter()
            .map(|mut r| {
                r.in_use = false;
                r
            })
            .collect();
        return Ok(());
    }
    let mut longs = Vec::with_capacity(sorted.len() + 1);
    longs.push(node.id as i64);
    longs.extend(sorted.iter().map(|&l| l as i64));
    let bytes = dynamic_array::encode(&ArrayValue::Long(longs))?;
    let mut reuse = previous.into_iter();
    let mut records = label_store.allocate_from_bytes(&bytes, &mut reuse)?;
    let first = records
        .first()
        .map(|r| r.id)
        .ok_or(PenumbraError::IllegalState("allocation produced no records"))?;
    records.extend(reuse.map(|mut r| {
        r.in_use = false;
        r
    }));
    trace!(node = node.id, labels = sorted.len(), first, "labels.dynamic");
    node.label_field = DYNAMIC_BIT | (first & LABEL_MASK);
    node.dynamic_label_records = records;
    Ok(())
}

/// Adds `label` to `node`. Returns false if it was already present.
pub fn add_label(node: &mut NodeRecord, label: u32, label_store: &DynamicStore) -> Result<bool> {
    let mut labels = parse_labels(node, label_store)?;
    if labels.contains(&label) {
        return Ok(false);
    }
    labels.push(label);
    put_labels(node, &labels, label_store)?;
    Ok(true)
}

/// Removes `label` from `node`. Returns false if it was not present.
pub fn remove_label(node: &mut NodeRecord, label: u32, label_store: &DynamicStore) -> Result<bool> {
    let mut labels = parse_labels(node, label_store)?;
    let Some(pos) = labels.iter().position(|&l| l == label) else {
        return Ok(false);
    };
    labels.remove(pos);
    put_labels(node, &labels, label_store)?;
    Ok(true)
}
