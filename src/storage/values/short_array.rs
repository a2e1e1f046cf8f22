//! Bit-packed primitive arrays inside a property record.
//!
//! First word: key (24 bits), type (4), element type (4), length (6) and
//! bits per element (6, where 0 stands for 64); elements follow from bit 44,
//! each in the same width.

use smallvec::smallvec;

use super::property_type::{
    key_and_type, PropertyType, Words, BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING, PAYLOAD_SIZE,
    PAYLOAD_SIZE_LONGS,
};
use super::ArrayValue;
use crate::primitives::bytes::bits::{required_bits, WordReader, WordWriter};

const HEADER_BITS: usize = 44;
const MAX_LENGTH: usize = 63;

/// Element kinds of primitive arrays, shared with the dynamic array header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ElementType {
    /// Booleans, one bit each.
    Bool = 1,
    /// Bytes, always eight bits.
    Byte = 2,
    /// 16-bit integers.
    Short = 3,
    /// 16-bit characters.
    Char = 4,
    /// 32-bit integers.
    Int = 5,
    /// 64-bit integers.
    Long = 6,
    /// Floats, packed by their bit pattern.
    Float = 7,
    /// Doubles, packed by their bit pattern.
    Double = 8,
}

impl ElementType {
    /// Element type for a stored id.
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => ElementType::Bool,
            2 => ElementType::Byte,
            3 => ElementType::Short,
            4 => ElementType::Char,
            5 => ElementType::Int,
            6 => ElementType::Long,
            7 => ElementType::Float,
            8 => ElementType::Double,
            _ => return None,
        })
    }

    /// Stored id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Full width of one element.
    pub fn max_bits(self) -> u32 {
        match self {
            ElementType::Bool => 1,
            ElementType::Byte => 8,
            ElementType::Short | ElementType::Char => 16,
            ElementType::Int | ElementType::Float => 32,
            ElementType::Long | ElementType::Double => 64,
        }
    }
}

/// Element type and raw element bits of a primitive array, `None` for
/// string, point and temporal arrays or chars outside the BMP.
pub(crate) fn raw_elements(array: &ArrayValue) -> Option<(ElementType, Vec<u64>)> {
    Some(match array {
        ArrayValue::Bool(v) => (ElementType::Bool, v.iter().map(|&b| b as u64).collect()),
        ArrayValue::Byte(v) => (ElementType::Byte, v.iter().map(|&b| b as u8 as u64).collect()),
        ArrayValue::Short(v) => (ElementType::Short, v.iter().map(|&s| s as u16 as u64).collect()),
        ArrayValue::Char(v) => (
            ElementType::Char,
            v.iter()
                .map(|&c| u16::try_from(c as u32).ok().map(u64::from))
                .collect::<Option<Vec<u64>>>()?,
        ),
        ArrayValue::Int(v) => (ElementType::Int, v.iter().map(|&i| i as u32 as u64).collect()),
        ArrayValue::Long(v) => (ElementType::Long, v.iter().map(|&l| l as u64).collect()),
        ArrayValue::Float(v) => (ElementType::Float, v.iter().map(|f| f.to_bits() as u64).collect()),
        ArrayValue::Double(v) => (ElementType::Double, v.iter().map(|d| d.to_bits()).collect()),
        _ => return None,
    })
}

/// Rebuilds an array from raw element bits.
pub(crate) fn from_raw_elements(ty: ElementType, raw: impl Iterator<Item = u64>) -> ArrayValue {
    match ty {
        ElementType::Bool => ArrayValue::Bool(raw.map(|v| v & 1 == 1).collect()),
        ElementType::Byte => ArrayValue::Byte(raw.map(|v| v as u8 as i8).collect()),
        ElementType::Short => ArrayValue::Short(raw.map(|v| v as u16 as i16).collect()),
        ElementType::Char => ArrayValue::Char(
            raw.map(|v| char::from_u32(v as u16 as u32).unwrap_or('\u{FFFD}'))
                .collect(),
        ),
        ElementType::Int => ArrayValue::Int(raw.map(|v| v as u32 as i32).collect()),
        ElementType::Long => ArrayValue::Long(raw.map(|v| v as i64).collect()),
        ElementType::Float => ArrayValue::Float(raw.map(|v| f32::from_bits(v as u32)).collect()),
        ElementType::Double => ArrayValue::Double(raw.map(f64::from_bits).collect()),
    }
}

/// Smallest width holding every element. Negative integers need the full
/// width; bytes always use eight bits.
pub(crate) fn required_bits_for(ty: ElementType, raw: &[u64]) -> u32 {
    match ty {
        ElementType::Bool => 1,
        ElementType::Byte => 8,
        _ => {
            let full = ty.max_bits();
            raw.iter()
                .map(|&v| {
                    let sign = 1u64 << (full - 1);
                    if v & sign != 0 {
                        full
                    } else {
                        required_bits(v).max(1)
                    }
                })
                .max()
                .unwrap_or(1)
        }
    }
}

fn blocks_for(length: usize, bits: u32) -> usize {
    ((HEADER_BITS + length * bits as usize - 1) >> 6) + 1
}

/// Packs a primitive array, or `None` when it does not fit a record.
pub fn encode(key: u32, array: &ArrayValue) -> Option<Words> {
    let (ty, raw) = raw_elements(array)?;
    if raw.len() > MAX_LENGTH {
        return None;
    }
    let bits = required_bits_for(ty, &raw);
    if bits as usize * raw.len() > PAYLOAD_SIZE * 8 - HEADER_BITS {
        return None;
    }
    let blocks = blocks_for(raw.len(), bits);
    if blocks > PAYLOAD_SIZE_LONGS {
        return None;
    }
    let mut words: Words = smallvec![0; blocks];
    words[0] = key_and_type(key, PropertyType::ShortArray)
        | ((ty.id() as u64) << 28)
        | ((raw.len() as u64) << 32)
        | (((bits & 0x3F) as u64) << 38);
    let mut writer = WordWriter::at(&mut words, HEADER_BITS);
    for v in raw {
        if !writer.put(v, bits) {
            return None;
        }
    }
    Some(words)
}

fn header_fields(first: u64) -> (Option<ElementType>, usize, u32) {
    let ty = ElementType::from_id(((first >> 28) & 0xF) as u8);
    let length = ((first >> 32) & 0x3F) as usize;
    let bits = match ((first >> 38) & 0x3F) as u32 {
        0 => 64,
        b => b,
    };
    (ty, length, bits)
}

/// Unpacks a short array. `None` for an unknown element type or truncated words.
pub fn decode(words: &[u64]) -> Option<ArrayValue> {
    let (ty, length, bits) = header_fields(*words.first()?);
    let ty = ty?;
    let mut reader = WordReader::at(words, HEADER_BITS);
    let raw = (0..length)
        .map(|_| reader.get(bits))
        .collect::<Option<Vec<u64>>>()?;
    Some(from_raw_elements(ty, raw.into_iter()))
}

/// Words used by the short array whose first word is `first`.
pub fn calculate_number_of_blocks_used(first: u64) -> i32 {
    match header_fields(first) {
        (Some(_), length, bits) => blocks_for(length, bits) as i32,
        (None, ..) => BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING,
    }
}
