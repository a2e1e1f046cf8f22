//! Property type tags and the inline primitive encodings.
//!
//! The first word of every property block starts with the 24-bit key id
//! followed by the 4-bit type id; everything above bit 28 belongs to the
//! type's own encoding.

use smallvec::{smallvec, SmallVec};

use super::{geometry, short_array, short_string, temporal, Value};
use crate::primitives::bytes::bits::required_bits;

/// Words of payload in one property record.
pub const PAYLOAD_SIZE_LONGS: usize = 4;

/// Bytes of payload in one property record.
pub const PAYLOAD_SIZE: usize = PAYLOAD_SIZE_LONGS * 8;

/// Block count reported for a first word whose type or encoding is unknown.
pub const BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING: i32 = -1;

/// Bits of the key id at the bottom of the first word.
pub const KEY_BITS: u32 = 24;

const KEY_MASK: u64 = 0xFF_FFFF;
const TYPE_MASK: u64 = 0xF00_0000;
const LONG_INLINE_BIT: u64 = 1 << 28;
const LONG_INLINE_MAX_BITS: u32 = 35;

/// Encoded words of one property block.
pub type Words = SmallVec<[u64; PAYLOAD_SIZE_LONGS]>;

/// Type tag stored in bits 24..28 of a block's first word.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    /// Inline boolean.
    Bool = 1,
    /// Inline byte.
    Byte = 2,
    /// Inline short.
    Short = 3,
    /// Inline char.
    Char = 4,
    /// Inline int.
    Int = 5,
    /// Long, inline when small and non-negative.
    Long = 6,
    /// Inline float.
    Float = 7,
    /// Double in a second word.
    Double = 8,
    /// Pointer to a dynamic string chain.
    String = 9,
    /// Pointer to a dynamic array chain.
    Array = 10,
    /// Bit-packed string.
    ShortString = 11,
    /// Bit-packed array.
    ShortArray = 12,
    /// Point.
    Geometry = 13,
    /// Date, time or duration.
    Temporal = 14,
}

impl PropertyType {
    /// Type for a 4-bit id.
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => PropertyType::Bool,
            2 => PropertyType::Byte,
            3 => PropertyType::Short,
            4 => PropertyType::Char,
            5 => PropertyType::Int,
            6 => PropertyType::Long,
            7 => PropertyType::Float,
            8 => PropertyType::Double,
            9 => PropertyType::String,
            10 => PropertyType::Array,
            11 => PropertyType::ShortString,
            12 => PropertyType::ShortArray,
            13 => PropertyType::Geometry,
            14 => PropertyType::Temporal,
            _ => return None,
        })
    }

    /// Type of the block whose first word is `first`.
    pub fn from_block(first: u64) -> Option<Self> {
        Self::from_id(type_id_of(first))
    }

    /// The 4-bit id.
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Property key id of a first word.
#[inline]
pub fn key_of(first: u64) -> u32 {
    (first & KEY_MASK) as u32
}

/// Raw type id of a first word; zero marks the end of a record's blocks.
#[inline]
pub fn type_id_of(first: u64) -> u8 {
    ((first & TYPE_MASK) >> KEY_BITS) as u8
}

/// Key and type bits of a first word.
#[inline]
pub fn key_and_type(key: u32, ty: PropertyType) -> u64 {
    (key as u64 & KEY_MASK) | ((ty.id() as u64) << KEY_BITS)
}

/// A one-word block carrying `value` above the key and type.
#[inline]
pub fn single_block_long_value(key: u32, ty: PropertyType, value: u64) -> u64 {
    key_and_type(key, ty) | (value << 28)
}

/// Number of words the block starting with `first` occupies, or
/// [`BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING`] when the header is not recognised.
pub fn calculate_number_of_blocks_used(first: u64) -> i32 {
    let Some(ty) = PropertyType::from_block(first) else {
        return BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING;
    };
    match ty {
        PropertyType::Long => {
            if first & LONG_INLINE_BIT != 0 {
                1
            } else {
                2
            }
        }
        PropertyType::Double => 2,
        PropertyType::ShortString => short_string::calculate_number_of_blocks_used(first),
        PropertyType::ShortArray => short_array::calculate_number_of_blocks_used(first),
        PropertyType::Geometry => geometry::calculate_number_of_blocks_used(first),
        PropertyType::Temporal => temporal::calculate_number_of_blocks_used(first),
        _ => 1,
    }
}

/// Encodes the fixed-width primitives. `None` for every other value.
pub fn encode_primitive(key: u32, value: &Value) -> Option<Words> {
    let words: Words = match *value {
        Value::Bool(v) => smallvec![single_block_long_value(key, PropertyType::Bool, v as u64)],
        Value::Byte(v) => smallvec![single_block_long_value(key, PropertyType::Byte, v as u8 as u64)],
        Value::Short(v) => {
            smallvec![single_block_long_value(key, PropertyType::Short, v as u16 as u64)]
        }
        Value::Char(c) => {
            let unit = u16::try_from(c as u32).ok()?;
            smallvec![single_block_long_value(key, PropertyType::Char, unit as u64)]
        }
        Value::Int(v) => smallvec![single_block_long_value(key, PropertyType::Int, v as u32 as u64)],
        Value::Float(v) => {
            smallvec![single_block_long_value(key, PropertyType::Float, v.to_bits() as u64)]
        }
        Value::Long(v) => {
            let header = key_and_type(key, PropertyType::Long);
            if v >= 0 && required_bits(v as u64) <= LONG_INLINE_MAX_BITS {
                smallvec![header | LONG_INLINE_BIT | ((v as u64) << 29)]
            } else {
                smallvec![header, v as u64]
            }
        }
        Value::Double(v) => smallvec![key_and_type(key, PropertyType::Double), v.to_bits()],
        _ => return None,
    };
    Some(words)
}

/// Decodes a primitive block. `None` if the words are not a well-formed primitive.
pub fn decode_primitive(words: &[u64]) -> Option<Value> {
    let first = *words.first()?;
    let payload = first >> 28;
    Some(match PropertyType::from_block(first)? {
        PropertyType::Bool => Value::Bool(payload & 1 == 1),
        PropertyType::Byte => Value::Byte(payload as u8 as i8),
        PropertyType::Short => Value::Short(payload as u16 as i16),
        PropertyType::Char => Value::Char(char::from_u32(payload as u16 as u32).unwrap_or('\u{FFFD}')),
        PropertyType::Int => Value::Int(payload as u32 as i32),
        PropertyType::Float => Value::Float(f32::from_bits(payload as u32)),
        PropertyType::Long => {
            if first & LONG_INLINE_BIT != 0 {
                Value::Long((first >> 29) as i64)
            } else {
                Value::Long(*words.get(1)? as i64)
            }
        }
        PropertyType::Double => Value::Double(f64::from_bits(*words.get(1)?)),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn header_fields() {
        let word = single_block_long_value(0xABCDEF, PropertyType::Int, 7);
        assert_eq!(key_of(word), 0xABCDEF);
        assert_eq!(type_id_of(word), 5);
        assert_eq!(PropertyType::from_block(word), Some(PropertyType::Int));
        assert_eq!(PropertyType::from_id(0), None);
        assert_eq!(PropertyType::from_id(15), None);
        assert_eq!(calculate_number_of_blocks_used(0), BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING);
    }

    #[test]
    fn small_longs_stay_inline() {
        let small = encode_primitive(1, &Value::Long(100)).unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(calculate_number_of_blocks_used(small[0]), 1);

        let big = encode_primitive(1, &Value::Long(1 << 40)).unwrap();
        assert_eq!(big.len(), 2);
        assert_eq!(calculate_number_of_blocks_used(big[0]), 2);

        let negative = encode_primitive(1, &Value::Long(-1)).unwrap();
        assert_eq!(negative.len(), 2);
        assert_eq!(decode_primitive(&negative), Some(Value::Long(-1)));
    }

    #[test]
    fn chars_outside_bmp_are_not_primitives() {
        assert!(encode_primitive(1, &Value::Char('\u{1F600}')).is_none());
        assert!(encode_primitive(1, &Value::String("x".into())).is_none());
    }

    fn primitive() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i8>().prop_map(Value::Byte),
            any::<i16>().prop_map(Value::Short),
            any::<i32>().prop_map(Value::Int),
            any::<i64>().prop_map(Value::Long),
            any::<u32>().prop_map(|b| Value::Float(f32::from_bits(b & 0x7F7F_FFFF))),
            any::<f64>().prop_filter("nan", |d| !d.is_nan()).prop_map(Value::Double),
            proptest::char::range('\0', '\u{D7FF}').prop_map(Value::Char),
        ]
    }

    proptest! {
        #[test]
        fn primitives_roundtrip(key in 0u32..(1 << 24), value in primitive()) {
            let words = encode_primitive(key, &value).unwrap();
            prop_assert_eq!(calculate_number_of_blocks_used(words[0]), words.len() as i32);
            prop_assert_eq!(key_of(words[0]), key);
            prop_assert_eq!(decode_primitive(&words), Some(value));
        }
    }
}
