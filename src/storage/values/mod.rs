#![forbid(unsafe_code)]
//! Typed property values and the codecs that pack them into property blocks
//! or dynamic record payloads.
//!
//! Every inline codec keeps the number of 8-byte words derivable from the
//! first word alone; see [`property_type::calculate_number_of_blocks_used`].

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod dynamic_array;
pub mod geometry;
pub mod property_type;
pub mod short_array;
pub mod short_string;
pub mod temporal;

pub use property_type::PropertyType;

/// A property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed byte.
    Byte(i8),
    /// 16-bit integer.
    Short(i16),
    /// Character of the Basic Multilingual Plane.
    Char(char),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// Text.
    String(String),
    /// Homogeneous array.
    Array(ArrayValue),
    /// Spatial point.
    Point(PointValue),
    /// Date, time or duration.
    Temporal(TemporalValue),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// A homogeneous array value.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayValue {
    /// Booleans.
    Bool(Vec<bool>),
    /// Signed bytes.
    Byte(Vec<i8>),
    /// 16-bit integers.
    Short(Vec<i16>),
    /// BMP characters.
    Char(Vec<char>),
    /// 32-bit integers.
    Int(Vec<i32>),
    /// 64-bit integers.
    Long(Vec<i64>),
    /// Single precision floats.
    Float(Vec<f32>),
    /// Double precision floats.
    Double(Vec<f64>),
    /// Strings.
    String(Vec<String>),
    /// Points sharing one reference system and dimension.
    Point(Vec<PointValue>),
    /// Temporal values of one kind.
    Temporal(Vec<TemporalValue>),
}

impl ArrayValue {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::Byte(v) => v.len(),
            ArrayValue::Short(v) => v.len(),
            ArrayValue::Char(v) => v.len(),
            ArrayValue::Int(v) => v.len(),
            ArrayValue::Long(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
            ArrayValue::Double(v) => v.len(),
            ArrayValue::String(v) => v.len(),
            ArrayValue::Point(v) => v.len(),
            ArrayValue::Temporal(v) => v.len(),
        }
    }

    /// Returns true for an empty array.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coordinate reference system of a point: a table id and a code within it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Crs {
    /// Table the code belongs to (1 = EPSG, 2 = SR-ORG).
    pub table: u8,
    /// Code within the table, at most 20 bits.
    pub code: u32,
}

impl Crs {
    /// Geographic WGS 84.
    pub const WGS84: Crs = Crs { table: 1, code: 4326 };
    /// Geographic WGS 84 with height.
    pub const WGS84_3D: Crs = Crs { table: 1, code: 4979 };
    /// Two dimensional cartesian.
    pub const CARTESIAN: Crs = Crs { table: 2, code: 7203 };
    /// Three dimensional cartesian.
    pub const CARTESIAN_3D: Crs = Crs { table: 2, code: 9157 };
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table {
            1 => write!(f, "EPSG:{}", self.code),
            2 => write!(f, "SR-ORG:{}", self.code),
            t => write!(f, "{t}:{}", self.code),
        }
    }
}

/// A point with one to three coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PointValue {
    /// Reference system.
    pub crs: Crs,
    /// Coordinates in axis order.
    pub coordinates: Vec<f64>,
}

impl PointValue {
    /// Point in `crs` at `coordinates`.
    pub fn new(crs: Crs, coordinates: impl Into<Vec<f64>>) -> Self {
        Self {
            crs,
            coordinates: coordinates.into(),
        }
    }
}

/// Time zone of a zoned date-time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeZone {
    /// Fixed offset from UTC in seconds.
    Offset(i32),
    /// Named region, numbered by the caller's zone table.
    Named(u16),
}

/// Dates, times and durations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TemporalValue {
    /// Days since 1970-01-01.
    Date {
        /// Epoch day.
        epoch_day: i64,
    },
    /// Time of day without zone.
    LocalTime {
        /// Nanoseconds since midnight.
        nano_of_day: i64,
    },
    /// Date and time without zone.
    LocalDateTime {
        /// Seconds since the epoch.
        epoch_second: i64,
        /// Nanosecond of the second.
        nano: i32,
    },
    /// Time of day with an offset.
    Time {
        /// Nanoseconds since midnight, normalised to UTC.
        nano_of_day_utc: i64,
        /// Offset in seconds.
        offset_seconds: i32,
    },
    /// Date and time in a zone.
    DateTime {
        /// Seconds since the epoch, UTC.
        epoch_second: i64,
        /// Nanosecond of the second.
        nano: i32,
        /// Zone.
        zone: TimeZone,
    },
    /// Calendar-aware amount of time.
    Duration {
        /// Months.
        months: i64,
        /// Days.
        days: i64,
        /// Seconds.
        seconds: i64,
        /// Nanoseconds, below one second.
        nanos: i32,
    },
}
