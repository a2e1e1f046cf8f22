//! Points inside a property record.
//!
//! First word: key (24), type (4), geometry type (4), dimension (2), CRS
//! table (2), CRS code (20) and a precision bit; one word per coordinate
//! follows, holding the double's bit pattern.

use smallvec::SmallVec;

use super::property_type::{key_and_type, PropertyType, Words, BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING};
use super::{Crs, PointValue};

/// Geometry type id of a point.
pub const GEOMETRY_POINT: u8 = 1;

/// Most coordinates a stored point can carry.
pub const MAX_DIMENSION: usize = 3;

const GEOMETRY_TYPE_MASK: u64 = 0xF000_0000;
const DIMENSION_MASK: u64 = 0x3_0000_0000;
const CRS_TABLE_MASK: u64 = 0xC_0000_0000;
const CRS_CODE_MASK: u64 = 0xFF_FFF0_0000_0000;
const PRECISION_BIT: u64 = 1 << 56;
const MAX_CRS_CODE: u32 = (1 << 20) - 1;

/// Whether `point` can be stored inline.
pub fn is_encodable(point: &PointValue) -> bool {
    (1..=MAX_DIMENSION).contains(&point.coordinates.len())
        && point.crs.table < 4
        && point.crs.code <= MAX_CRS_CODE
}

/// Encodes a point, or `None` if its dimension or CRS cannot be represented.
pub fn encode_point(key: u32, point: &PointValue) -> Option<Words> {
    if !is_encodable(point) {
        return None;
    }
    let header = key_and_type(key, PropertyType::Geometry)
        | ((GEOMETRY_POINT as u64) << 28)
        | ((point.coordinates.len() as u64) << 32)
        | ((point.crs.table as u64) << 34)
        | ((point.crs.code as u64) << 36)
        | PRECISION_BIT;
    let mut words: Words = SmallVec::with_capacity(1 + point.coordinates.len());
    words.push(header);
    words.extend(point.coordinates.iter().map(|c| c.to_bits()));
    Some(words)
}

/// Decodes a point. `None` for an unknown geometry type or truncated words.
pub fn decode_point(words: &[u64]) -> Option<PointValue> {
    let first = *words.first()?;
    if ((first & GEOMETRY_TYPE_MASK) >> 28) as u8 != GEOMETRY_POINT {
        return None;
    }
    let dimension = ((first & DIMENSION_MASK) >> 32) as usize;
    let crs = Crs {
        table: ((first & CRS_TABLE_MASK) >> 34) as u8,
        code: ((first & CRS_CODE_MASK) >> 36) as u32,
    };
    let coordinates = words
        .get(1..=dimension)?
        .iter()
        .map(|&bits| f64::from_bits(bits))
        .collect();
    Some(PointValue { crs, coordinates })
}

/// Words used by the geometry whose first word is `first`.
pub fn calculate_number_of_blocks_used(first: u64) -> i32 {
    let geometry_type = ((first & GEOMETRY_TYPE_MASK) >> 28) as u8;
    let dimension = ((first & DIMENSION_MASK) >> 32) as i32;
    if geometry_type != GEOMETRY_POINT || dimension == 0 {
        return BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING;
    }
    1 + dimension
}
