//! Self-describing byte layouts for arrays too large to inline.
//!
//! The leading byte names the layout: a primitive element type id for number
//! arrays, the string, geometry or temporal property type id otherwise. The
//! fixed-size header that follows is split off the first dynamic record by
//! [`header_size`] before the body is decoded.

use bytes::BufMut;

use super::geometry::{GEOMETRY_POINT, MAX_DIMENSION};
use super::property_type::PropertyType;
use super::short_array::{from_raw_elements, raw_elements, required_bits_for, ElementType};
use super::temporal::TemporalType;
use super::{ArrayValue, Crs, PointValue};
use crate::primitives::bytes::bits::{ByteReader, ByteWriter};
use crate::primitives::bytes::buf::Reader;
use crate::types::{PenumbraError, Result};

/// Header of a number array: element type, bits used in the last byte, bits per element.
pub const NUMBER_HEADER_SIZE: usize = 3;
/// Header of a string array: type byte and element count.
pub const STRING_HEADER_SIZE: usize = 5;
/// Header of a point array: type, geometry type, dimension, CRS table and code.
pub const GEOMETRY_HEADER_SIZE: usize = 6;
/// Header of a temporal array: type byte and temporal kind.
pub const TEMPORAL_HEADER_SIZE: usize = 2;

/// Header length implied by the first byte of a dynamic array.
pub fn header_size(type_byte: u8) -> Option<usize> {
    if ElementType::from_id(type_byte).is_some() {
        return Some(NUMBER_HEADER_SIZE);
    }
    match PropertyType::from_id(type_byte)? {
        PropertyType::String => Some(STRING_HEADER_SIZE),
        PropertyType::Geometry => Some(GEOMETRY_HEADER_SIZE),
        PropertyType::Temporal => Some(TEMPORAL_HEADER_SIZE),
        _ => None,
    }
}

fn encode_numbers(ty: ElementType, raw: &[u64], out: &mut Vec<u8>) {
    let bits = match ty {
        ElementType::Float | ElementType::Double => ty.max_bits(),
        _ => required_bits_for(ty, raw),
    };
    let mut writer = ByteWriter::with_capacity(bits as usize * raw.len());
    for &v in raw {
        writer.put(v, bits);
    }
    out.put_u8(ty.id());
    out.put_u8(writer.bits_used_in_last_byte());
    out.put_u8(bits as u8);
    out.put_slice(&writer.into_bytes());
}

fn decode_numbers(header: &[u8], body: &[u8]) -> Result<ArrayValue> {
    let [type_id, bits_used_in_last_byte, bits] = *header else {
        return Err(corrupt("number array header is truncated"));
    };
    let ty = ElementType::from_id(type_id).ok_or_else(|| corrupt("unknown number array element type"))?;
    if bits == 0 {
        return Ok(from_raw_elements(ty, std::iter::empty()));
    }
    if bits as u32 > ty.max_bits() || bits_used_in_last_byte == 0 || bits_used_in_last_byte > 8 {
        return Err(corrupt("number array header is inconsistent"));
    }
    let total_bits = (body.len() * 8).saturating_sub(8 - bits_used_in_last_byte as usize);
    let length = total_bits / bits as usize;
    let mut reader = ByteReader::new(body);
    let raw = (0..length)
        .map(|_| reader.get(bits as u32))
        .collect::<Option<Vec<u64>>>()
        .ok_or_else(|| corrupt("number array body is truncated"))?;
    Ok(from_raw_elements(ty, raw.into_iter()))
}

fn corrupt(what: &str) -> PenumbraError {
    PenumbraError::InvalidRecord(format!("dynamic array: {what}"))
}

fn point_header(points: &[PointValue]) -> Result<(Crs, usize)> {
    let Some(first) = points.first() else {
        return Ok((Crs::WGS84, 2));
    };
    let dimension = first.coordinates.len();
    if dimension == 0 || dimension > MAX_DIMENSION || first.crs.code > u16::MAX as u32 {
        return Err(PenumbraError::Invalid("point array has an unsupported dimension or CRS"));
    }
    if points
        .iter()
        .any(|p| p.crs != first.crs || p.coordinates.len() != dimension)
    {
        return Err(PenumbraError::Invalid("points of an array must share CRS and dimension"));
    }
    Ok((first.crs, dimension))
}

/// Serialises an array into the bytes stored in a dynamic chain.
pub fn encode(array: &ArrayValue) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match array {
        ArrayValue::String(strings) => {
            out.put_u8(PropertyType::String.id());
            out.put_i32(strings.len() as i32);
            for s in strings {
                out.put_i32(s.len() as i32);
                out.put_slice(s.as_bytes());
            }
        }
        ArrayValue::Point(points) => {
            let (crs, dimension) = point_header(points)?;
            out.put_u8(PropertyType::Geometry.id());
            out.put_u8(GEOMETRY_POINT);
            out.put_u8(dimension as u8);
            out.put_u8(crs.table);
            out.put_u16(crs.code as u16);
            let raw: Vec<u64> = points
                .iter()
                .flat_map(|p| p.coordinates.iter().map(|c| c.to_bits()))
                .collect();
            encode_numbers(ElementType::Double, &raw, &mut out);
        }
        ArrayValue::Temporal(values) => {
            let ty = values.first().map_or(TemporalType::Date, TemporalType::of);
            out.put_u8(PropertyType::Temporal.id());
            out.put_u8(ty.id());
            let mut raw = Vec::with_capacity(values.len() * ty.longs_per_element());
            for value in values {
                let longs = ty
                    .to_longs(value)
                    .ok_or(PenumbraError::Invalid("temporal array mixes kinds"))?;
                raw.extend(longs.into_iter().map(|l| l as u64));
            }
            encode_numbers(ElementType::Long, &raw, &mut out);
        }
        primitive => {
            let (ty, raw) = raw_elements(primitive)
                .ok_or(PenumbraError::Invalid("char outside the basic multilingual plane"))?;
            encode_numbers(ty, &raw, &mut out);
        }
    }
    Ok(out)
}

/// Decodes an array from its split header and body.
pub fn decode(header: &[u8], body: &[u8]) -> Result<ArrayValue> {
    let type_byte = *header.first().ok_or_else(|| corrupt("empty header"))?;
    if header_size(type_byte) != Some(header.len()) {
        return Err(corrupt("header length does not match its type"));
    }
    if ElementType::from_id(type_byte).is_some() {
        return decode_numbers(header, body);
    }
    match PropertyType::from_id(type_byte) {
        Some(PropertyType::String) => decode_strings(header, body),
        Some(PropertyType::Geometry) => decode_points(header, body),
        Some(PropertyType::Temporal) => decode_temporals(header, body),
        _ => Err(corrupt("unknown array type")),
    }
}

/// Decodes an array from the concatenated bytes of its chain.
pub fn decode_bytes(bytes: &[u8]) -> Result<ArrayValue> {
    let type_byte = *bytes.first().ok_or_else(|| corrupt("empty array"))?;
    let size = header_size(type_byte).ok_or_else(|| corrupt("unknown array type"))?;
    if bytes.len() < size {
        return Err(corrupt("header is truncated"));
    }
    decode(&bytes[..size], &bytes[size..])
}

fn decode_strings(header: &[u8], body: &[u8]) -> Result<ArrayValue> {
    let count = Reader::new(&header[1..])
        .i32()
        .ok_or_else(|| corrupt("string count is truncated"))?;
    let count = usize::try_from(count).map_err(|_| corrupt("negative string count"))?;
    let mut reader = Reader::new(body);
    let mut strings = Vec::with_capacity(count.min(body.len() / 4 + 1));
    for _ in 0..count {
        let len = reader
            .i32()
            .and_then(|l| usize::try_from(l).ok())
            .ok_or_else(|| corrupt("string length is invalid"))?;
        let bytes = reader.take(len).ok_or_else(|| corrupt("string is truncated"))?;
        strings.push(String::from_utf8_lossy(bytes).into_owned());
    }
    Ok(ArrayValue::String(strings))
}

fn split_numbers(body: &[u8]) -> Result<ArrayValue> {
    if body.len() < NUMBER_HEADER_SIZE {
        return Err(corrupt("nested number array is truncated"));
    }
    decode_numbers(&body[..NUMBER_HEADER_SIZE], &body[NUMBER_HEADER_SIZE..])
}

fn decode_points(header: &[u8], body: &[u8]) -> Result<ArrayValue> {
    if header[1] != GEOMETRY_POINT {
        return Err(corrupt("unknown geometry type"));
    }
    let dimension = header[2] as usize;
    if dimension == 0 || dimension > MAX_DIMENSION {
        return Err(corrupt("point dimension out of range"));
    }
    let crs = Crs {
        table: header[3],
        code: u16::from_be_bytes([header[4], header[5]]) as u32,
    };
    let ArrayValue::Double(coords) = split_numbers(body)? else {
        return Err(corrupt("point coordinates are not doubles"));
    };
    if coords.len() % dimension != 0 {
        return Err(corrupt("coordinate count does not match dimension"));
    }
    Ok(ArrayValue::Point(
        coords
            .chunks_exact(dimension)
            .map(|c| PointValue::new(crs, c.to_vec()))
            .collect(),
    ))
}

fn decode_temporals(header: &[u8], body: &[u8]) -> Result<ArrayValue> {
    let ty = TemporalType::from_id(header[1]).ok_or_else(|| corrupt("unknown temporal kind"))?;
    let ArrayValue::Long(longs) = split_numbers(body)? else {
        return Err(corrupt("temporal payload is not longs"));
    };
    let per = ty.longs_per_element();
    if longs.len() % per != 0 {
        return Err(corrupt("temporal payload length does not match its kind"));
    }
    longs
        .chunks_exact(per)
        .map(|chunk| ty.from_longs(chunk).ok_or_else(|| corrupt("temporal value is truncated")))
        .collect::<Result<Vec<_>>>()
        .map(ArrayValue::Temporal)
}
