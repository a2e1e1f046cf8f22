//! Dates, times and durations inside a property record.
//!
//! The temporal kind sits in bits 28..32 of the first word. Dates and local
//! times are inlined above an inline flag at bit 32 when they fit; the other
//! kinds take a fixed number of words.

use smallvec::smallvec;

use super::property_type::{key_and_type, PropertyType, Words, BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING};
use super::{TemporalValue, TimeZone};
use crate::primitives::bytes::bits::required_bits;

const INLINE_FLAG: u64 = 1 << 32;
const INLINE_MAX_BITS: u32 = 64 - 33;
const ZONE_ID_FLAG: u64 = 1 << 32;

/// Flag marking a named zone in the zone slot of date-time arrays. Offsets
/// are stored as plain seconds, so negative slots are always offsets.
pub const ARRAY_ZONE_ID_FLAG: i64 = 1 << 62;

/// Kinds of temporal values, as stored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TemporalType {
    /// Date.
    Date = 1,
    /// Local time.
    LocalTime = 2,
    /// Local date-time.
    LocalDateTime = 3,
    /// Time with offset.
    Time = 4,
    /// Zoned date-time.
    DateTime = 5,
    /// Duration.
    Duration = 6,
}

impl TemporalType {
    /// Kind for a stored id.
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => TemporalType::Date,
            2 => TemporalType::LocalTime,
            3 => TemporalType::LocalDateTime,
            4 => TemporalType::Time,
            5 => TemporalType::DateTime,
            6 => TemporalType::Duration,
            _ => return None,
        })
    }

    /// Kind of `value`.
    pub fn of(value: &TemporalValue) -> Self {
        match value {
            TemporalValue::Date { .. } => TemporalType::Date,
            TemporalValue::LocalTime { .. } => TemporalType::LocalTime,
            TemporalValue::LocalDateTime { .. } => TemporalType::LocalDateTime,
            TemporalValue::Time { .. } => TemporalType::Time,
            TemporalValue::DateTime { .. } => TemporalType::DateTime,
            TemporalValue::Duration { .. } => TemporalType::Duration,
        }
    }

    /// Stored id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Longs per value in the dynamic array layout.
    pub fn longs_per_element(self) -> usize {
        match self {
            TemporalType::Date | TemporalType::LocalTime => 1,
            TemporalType::LocalDateTime | TemporalType::Time => 2,
            TemporalType::DateTime => 3,
            TemporalType::Duration => 4,
        }
    }

    /// Flattens `value` into longs; `None` if it is of another kind.
    pub fn to_longs(self, value: &TemporalValue) -> Option<Vec<i64>> {
        if TemporalType::of(value) != self {
            return None;
        }
        Some(match *value {
            TemporalValue::Date { epoch_day } => vec![epoch_day],
            TemporalValue::LocalTime { nano_of_day } => vec![nano_of_day],
            TemporalValue::LocalDateTime { epoch_second, nano } => vec![epoch_second, nano as i64],
            TemporalValue::Time {
                nano_of_day_utc,
                offset_seconds,
            } => vec![nano_of_day_utc, offset_seconds as i64],
            TemporalValue::DateTime {
                epoch_second,
                nano,
                zone,
            } => {
                let zone = match zone {
                    TimeZone::Offset(seconds) => seconds as i64,
                    TimeZone::Named(id) => id as i64 | ARRAY_ZONE_ID_FLAG,
                };
                vec![epoch_second, nano as i64, zone]
            }
            TemporalValue::Duration {
                months,
                days,
                seconds,
                nanos,
            } => vec![months, days, seconds, nanos as i64],
        })
    }

    /// Rebuilds one value from `longs_per_element` longs.
    pub fn from_longs(self, longs: &[i64]) -> Option<TemporalValue> {
        let l = |i: usize| longs.get(i).copied();
        Some(match self {
            TemporalType::Date => TemporalValue::Date { epoch_day: l(0)? },
            TemporalType::LocalTime => TemporalValue::LocalTime { nano_of_day: l(0)? },
            TemporalType::LocalDateTime => TemporalValue::LocalDateTime {
                epoch_second: l(0)?,
                nano: l(1)? as i32,
            },
            TemporalType::Time => TemporalValue::Time {
                nano_of_day_utc: l(0)?,
                offset_seconds: l(1)? as i32,
            },
            TemporalType::DateTime => {
                let zone = l(2)?;
                TemporalValue::DateTime {
                    epoch_second: l(0)?,
                    nano: l(1)? as i32,
                    zone: if zone >= 0 && zone & ARRAY_ZONE_ID_FLAG != 0 {
                        TimeZone::Named((zone & !ARRAY_ZONE_ID_FLAG) as u16)
                    } else {
                        TimeZone::Offset(zone as i32)
                    },
                }
            }
            TemporalType::Duration => TemporalValue::Duration {
                months: l(0)?,
                days: l(1)?,
                seconds: l(2)?,
                nanos: l(3)? as i32,
            },
        })
    }
}

fn fits_inline(value: i64) -> bool {
    value >= 0 && required_bits(value as u64) <= INLINE_MAX_BITS
}

/// Encodes a temporal value into one to four words.
pub fn encode(key: u32, value: &TemporalValue) -> Words {
    let ty = TemporalType::of(value);
    let header = key_and_type(key, PropertyType::Temporal) | ((ty.id() as u64) << 28);
    match *value {
        TemporalValue::Date { epoch_day: v } | TemporalValue::LocalTime { nano_of_day: v } => {
            if fits_inline(v) {
                smallvec![header | INLINE_FLAG | ((v as u64) << 33)]
            } else {
                smallvec![header, v as u64]
            }
        }
        TemporalValue::LocalDateTime { epoch_second, nano } => {
            smallvec![header | ((nano as u32 as u64) << 32), epoch_second as u64]
        }
        TemporalValue::Time {
            nano_of_day_utc,
            offset_seconds,
        } => smallvec![header | ((offset_seconds as u32 as u64) << 32), nano_of_day_utc as u64],
        TemporalValue::DateTime {
            epoch_second,
            nano,
            zone,
        } => {
            let nano_bits = (nano as u32 as u64) << 33;
            match zone {
                TimeZone::Offset(seconds) => {
                    smallvec![header | nano_bits, epoch_second as u64, seconds as i64 as u64]
                }
                TimeZone::Named(id) => {
                    smallvec![header | ZONE_ID_FLAG | nano_bits, epoch_second as u64, id as u64]
                }
            }
        }
        TemporalValue::Duration {
            months,
            days,
            seconds,
            nanos,
        } => smallvec![
            header | ((nanos as u32 as u64) << 32),
            months as u64,
            days as u64,
            seconds as u64
        ],
    }
}

/// Decodes a temporal value. `None` for an unknown kind or truncated words.
pub fn decode(words: &[u64]) -> Option<TemporalValue> {
    let first = *words.first()?;
    let word = |i: usize| words.get(i).copied();
    Some(match TemporalType::from_id(((first >> 28) & 0xF) as u8)? {
        TemporalType::Date => TemporalValue::Date {
            epoch_day: inline_or_next(first, word(1))?,
        },
        TemporalType::LocalTime => TemporalValue::LocalTime {
            nano_of_day: inline_or_next(first, word(1))?,
        },
        TemporalType::LocalDateTime => TemporalValue::LocalDateTime {
            epoch_second: word(1)? as i64,
            nano: (first >> 32) as u32 as i32,
        },
        TemporalType::Time => TemporalValue::Time {
            nano_of_day_utc: word(1)? as i64,
            offset_seconds: (first >> 32) as u32 as i32,
        },
        TemporalType::DateTime => {
            let zone_word = word(2)?;
            TemporalValue::DateTime {
                epoch_second: word(1)? as i64,
                nano: (first >> 33) as u32 as i32,
                zone: if first & ZONE_ID_FLAG != 0 {
                    TimeZone::Named(zone_word as u16)
                } else {
                    TimeZone::Offset(zone_word as i64 as i32)
                },
            }
        }
        TemporalType::Duration => TemporalValue::Duration {
            months: word(1)? as i64,
            days: word(2)? as i64,
            seconds: word(3)? as i64,
            nanos: (first >> 32) as u32 as i32,
        },
    })
}

fn inline_or_next(first: u64, next: Option<u64>) -> Option<i64> {
    if first & INLINE_FLAG != 0 {
        Some((first >> 33) as i64)
    } else {
        next.map(|w| w as i64)
    }
}

/// Words used by the temporal value whose first word is `first`.
pub fn calculate_number_of_blocks_used(first: u64) -> i32 {
    match TemporalType::from_id(((first >> 28) & 0xF) as u8) {
        Some(TemporalType::Date | TemporalType::LocalTime) => {
            if first & INLINE_FLAG != 0 {
                1
            } else {
                2
            }
        }
        Some(TemporalType::LocalDateTime | TemporalType::Time) => 2,
        Some(TemporalType::DateTime) => 3,
        Some(TemporalType::Duration) => 4,
        None => BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dates_inline_when_small() {
        let today = TemporalValue::Date { epoch_day: 19_000 };
        assert_eq!(encode(1, &today).len(), 1);
        let ancient = TemporalValue::Date { epoch_day: -800_000 };
        let words = encode(1, &ancient);
        assert_eq!(words.len(), 2);
        assert_eq!(decode(&words), Some(ancient));
    }

    #[test]
    fn zoned_date_times_keep_their_zone() {
        for zone in [TimeZone::Offset(-3600), TimeZone::Named(402)] {
            let value = TemporalValue::DateTime {
                epoch_second: 1_700_000_000,
                nano: 999_999_999,
                zone,
            };
            let words = encode(3, &value);
            assert_eq!(words.len(), 3);
            assert_eq!(decode(&words), Some(value));
        }
    }

    #[test]
    fn unknown_kind_is_reported() {
        let first = key_and_type(1, PropertyType::Temporal) | (7 << 28);
        assert_eq!(calculate_number_of_blocks_used(first), BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING);
        assert_eq!(decode(&[first]), None);
    }

    fn temporal() -> impl Strategy<Value = TemporalValue> {
        let nano = 0i32..1_000_000_000;
        prop_oneof![
            any::<i64>().prop_map(|epoch_day| TemporalValue::Date { epoch_day }),
            (0i64..86_400_000_000_000).prop_map(|nano_of_day| TemporalValue::LocalTime { nano_of_day }),
            (any::<i64>(), nano.clone())
                .prop_map(|(epoch_second, nano)| TemporalValue::LocalDateTime { epoch_second, nano }),
            (0i64..86_400_000_000_000, -64_800i32..64_800).prop_map(|(nano_of_day_utc, offset_seconds)| {
                TemporalValue::Time { nano_of_day_utc, offset_seconds }
            }),
            (any::<i64>(), nano.clone(), -64_800i32..64_800).prop_map(|(epoch_second, nano, offset)| {
                TemporalValue::DateTime { epoch_second, nano, zone: TimeZone::Offset(offset) }
            }),
            (any::<i64>(), any::<i64>(), any::<i64>(), nano).prop_map(|(months, days, seconds, nanos)| {
                TemporalValue::Duration { months, days, seconds, nanos }
            }),
        ]
    }

    proptest! {
        #[test]
        fn temporals_roundtrip(value in temporal()) {
            let words = encode(77, &value);
            prop_assert_eq!(calculate_number_of_blocks_used(words[0]), words.len() as i32);
            prop_assert_eq!(decode(&words), Some(value));
        }

        #[test]
        fn array_longs_roundtrip(value in temporal()) {
            let ty = TemporalType::of(&value);
            let longs = ty.to_longs(&value).unwrap();
            prop_assert_eq!(longs.len(), ty.longs_per_element());
            prop_assert_eq!(ty.from_longs(&longs), Some(value));
        }
    }
}
