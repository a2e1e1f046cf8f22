//! Bit-packed strings of up to 63 characters inside a property record.
//!
//! First word: key (24 bits), type (4), encoding id (5) and length (6); the
//! characters follow from bit 39 onwards, each in the width of the chosen
//! table. Strings no table covers fall back to Latin-1 or UTF-8 bytes.

use smallvec::smallvec;

use super::property_type::{
    key_and_type, PropertyType, Words, BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING, PAYLOAD_SIZE,
};
use crate::primitives::bytes::bits::{WordReader, WordWriter};

const HEADER_BITS: usize = 39;
const MAX_LENGTH: usize = 63;
const ENCODING_UTF8: u8 = 0;
const ENCODING_LATIN1: u8 = 10;
const ENCODING_MASK: u64 = 0x1_F000_0000;
const LENGTH_MASK: u64 = 0x7E_0000_0000;

const PUNCTUATION: [char; 26] = [
    ' ', '_', '.', '-', ':', '/', ' ', '.', '-', '+', ',', '\'', '@', '|', ';', '*', '?', '&', '%',
    '#', '(', ')', '$', '<', '>', '=',
];

/// Character tables, in the order they are tried.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    /// Digits and a little punctuation, 4 bits.
    Numerical,
    /// Digits and date separators, 4 bits.
    Date,
    /// Upper case letters, 5 bits.
    Upper,
    /// Lower case letters, 5 bits.
    Lower,
    /// Lower case letters and e-mail punctuation, 5 bits.
    Email,
    /// Lower case letters, digits and URI punctuation, 6 bits.
    Uri,
    /// Letters and digits, 6 bits.
    AlphaNum,
    /// Letters and symbols, 6 bits.
    AlphaSym,
    /// Letters, digits and Latin-1 accented letters, 7 bits.
    European,
    /// Lower case hex digits, 4 bits.
    LowerHex,
    /// Upper case hex digits, 4 bits.
    UpperHex,
}

const TABLES: [Encoding; 11] = [
    Encoding::Numerical,
    Encoding::Date,
    Encoding::Upper,
    Encoding::Lower,
    Encoding::Email,
    Encoding::Uri,
    Encoding::AlphaNum,
    Encoding::AlphaSym,
    Encoding::European,
    Encoding::LowerHex,
    Encoding::UpperHex,
];

const ALL: u16 = (1 << TABLES.len()) - 1;
const N: u16 = 1 << 0;
const D: u16 = 1 << 1;
const UP: u16 = 1 << 2;
const LO: u16 = 1 << 3;
const EM: u16 = 1 << 4;
const URI: u16 = 1 << 5;
const AN: u16 = 1 << 6;
const AS: u16 = 1 << 7;
const EU: u16 = 1 << 8;
const LH: u16 = 1 << 9;
const UH: u16 = 1 << 10;
const LARGE: u16 = AN | AS | URI | EU;

impl Encoding {
    /// Id stored in the 5-bit encoding field.
    pub fn id(self) -> u8 {
        match self {
            Encoding::Numerical => 1,
            Encoding::Date => 2,
            Encoding::Upper => 3,
            Encoding::Lower => 4,
            Encoding::Email => 5,
            Encoding::Uri => 6,
            Encoding::AlphaNum => 7,
            Encoding::AlphaSym => 8,
            Encoding::European => 9,
            Encoding::LowerHex => 11,
            Encoding::UpperHex => 12,
        }
    }

    /// Table for an encoding id, `None` for the byte encodings and unknown ids.
    pub fn from_id(id: u8) -> Option<Self> {
        TABLES.iter().copied().find(|t| t.id() == id)
    }

    /// Bits per character.
    pub fn step(self) -> u32 {
        match self {
            Encoding::Numerical | Encoding::Date | Encoding::LowerHex | Encoding::UpperHex => 4,
            Encoding::Upper | Encoding::Lower | Encoding::Email => 5,
            Encoding::Uri | Encoding::AlphaNum | Encoding::AlphaSym => 6,
            Encoding::European => 7,
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Longest string this table fits in a record's payload.
    pub fn max_length(self) -> usize {
        (PAYLOAD_SIZE * 8 - 24 - 4 - 4 - 6) / self.step() as usize
    }

    /// Code of an intermediate character in this table.
    fn encode_char(self, b: u8) -> Option<u8> {
        let code: i32 = match self {
            Encoding::Numerical => match b {
                b'0'..=b'9' => (b - b'0') as i32,
                0 => 0xA,
                2 => 0xB,
                3 => 0xC,
                6 => 0xD,
                7 => 0xE,
                8 => 0xF,
                _ => return None,
            },
            Encoding::Date => match b {
                b'0'..=b'9' => (b - b'0') as i32,
                0 => 0xA,
                3 => 0xB,
                4 => 0xC,
                5 => 0xD,
                6 => 0xE,
                7 => 0xF,
                _ => return None,
            },
            Encoding::Upper => {
                common_translate(b, |p| Some(if p == 0 { 0x40 } else { p as i32 + 0x5A }))? - 0x40
            }
            Encoding::Lower => {
                common_translate(b, |p| Some(if p == 0 { 0x60 } else { p as i32 + 0x7A }))? - 0x60
            }
            Encoding::Email => {
                common_translate(b, |p| match p {
                    7 => Some(0x60),
                    1 => Some(0x7B),
                    2 => Some(0x7C),
                    3 => Some(0x7D),
                    6 => Some(0x7E),
                    9 => Some(0x7F),
                    _ => None,
                })? - 0x60
            }
            Encoding::Uri => match b {
                0 => 0,
                0x61..=0x7A => b as i32 - 0x60,
                0x30..=0x39 => b as i32 - 0x10,
                0x01..=0x16 => b as i32 + 0x29,
                _ => return None,
            },
            Encoding::AlphaNum => match b {
                0 => 0,
                1 => 0x20,
                0x02..=0x1F | 0x80..=0xFF => return None,
                _ => european_translate(b)? - 0x40,
            },
            Encoding::AlphaSym => match b {
                0x0 => 0,
                0x1..=0x5 => b as i32 + 0x1A,
                0x6..=0xA => b as i32 + 0x35,
                0xB => 0x20,
                0x0C..=0x1F | 0x80..=0xFF => return None,
                _ => b as i32 - 0x40,
            },
            Encoding::European => european_translate(b)?,
            Encoding::LowerHex => match b {
                b'0'..=b'9' => (b - b'0') as i32,
                b'a'..=b'f' => (b - b'a' + 10) as i32,
                _ => return None,
            },
            Encoding::UpperHex => match b {
                b'0'..=b'9' => (b - b'0') as i32,
                b'A'..=b'F' => (b - b'A' + 10) as i32,
                _ => return None,
            },
        };
        (0..(1 << self.step())).contains(&code).then_some(code as u8)
    }

    fn decode_char(self, code: u8) -> char {
        let punct = |i: i32| PUNCTUATION.get(i as usize).copied().unwrap_or('\u{FFFD}');
        let offset = |base: u8, delta: i32| char::from((base as i32 + delta) as u8);
        let c = code as i32;
        match self {
            Encoding::Numerical => {
                if c < 10 {
                    offset(b'0', c)
                } else {
                    punct(c - 10 + 6)
                }
            }
            Encoding::Date => match c {
                0..=9 => offset(b'0', c),
                0xA => ' ',
                0xB => '-',
                0xC => ':',
                0xD => '/',
                0xE => '+',
                _ => ',',
            },
            Encoding::Upper => match c {
                0 => ' ',
                1..=0x1A => offset(b'A', c - 1),
                _ => punct(c - 0x1A),
            },
            Encoding::Lower => match c {
                0 => ' ',
                1..=0x1A => offset(b'a', c - 1),
                _ => punct(c - 0x1A),
            },
            Encoding::Email => match c {
                0 => ',',
                1..=0x1A => offset(b'a', c - 1),
                0x1E => '+',
                0x1F => '@',
                _ => punct(c - 0x1A),
            },
            Encoding::Uri => match c {
                0 => ' ',
                1..=0x1A => offset(b'a', c - 1),
                0x1B..=0x29 => offset(b'0', c - 0x20),
                0x2A..=0x2E => punct(c - 0x29),
                _ => punct(c - 0x2F + 9),
            },
            Encoding::AlphaNum => european_decode(code + 0x40),
            Encoding::AlphaSym => match c {
                0 => ' ',
                1..=0x1A => offset(b'A', c - 1),
                0x1B..=0x1F => punct(c - 0x1B + 1),
                0x20 => ';',
                0x21..=0x3A => offset(b'a', c - 0x21),
                _ => punct(c - 0x3B + 9),
            },
            Encoding::European => european_decode(code),
            Encoding::LowerHex => {
                if c < 10 {
                    offset(b'0', c)
                } else {
                    offset(b'a', c - 10)
                }
            }
            Encoding::UpperHex => {
                if c < 10 {
                    offset(b'0', c)
                } else {
                    offset(b'A', c - 10)
                }
            }
        }
    }
}

/// Shared translation of the letter based tables; `punct` maps punctuation codes.
fn common_translate(b: u8, punct: impl Fn(u8) -> Option<i32>) -> Option<i32> {
    match b {
        0x80..=0xFF => Some(b as i32 - 0xC0),
        0x00..=0x1F => punct(b),
        b'0'..=b'4' => Some(0x5B + (b - b'0') as i32),
        b'5'..=b'9' => Some(0x7B + (b - b'5') as i32),
        _ => Some(b as i32),
    }
}

fn european_translate(b: u8) -> Option<i32> {
    common_translate(b, |p| match p {
        0 => Some(0x40),
        1 => Some(0x60),
        2 => Some(0x17),
        3 => Some(0x37),
        _ => None,
    })
}

fn european_decode(code: u8) -> char {
    match code {
        0x17 => '.',
        0x37 => '-',
        0..=0x3F => char::from(code + 0xC0),
        0x40 => ' ',
        0x60 => '_',
        0x5B..=0x5F => char::from(b'0' + code - 0x5B),
        0x7B..=0x7F => char::from(b'5' + code - 0x7B),
        _ => char::from(code),
    }
}

/// Intermediate byte of `c` and the tables able to carry it.
fn classify(c: char) -> Option<(u8, u16)> {
    const URI_ONLY: u16 = URI;
    let (b, removed): (u8, u16) = match c {
        ' ' => (0, EM | LH | UH),
        '_' => (1, N | D | LH | UH),
        '.' => (2, D | AN | LH | UH),
        '-' => (3, AN | LH | UH),
        ':' => (4, AN | N | EU | EM | LH | UH),
        '/' => (5, AN | N | EU | EM | LH | UH),
        '+' => (6, UP | LO | AN | EU | LH | UH),
        ',' => (7, UP | LO | AN | EU | LH | UH),
        '\'' => (8, D | UP | LO | EM | AN | EU | LH | UH),
        '@' => (9, N | D | UP | LO | AN | EU | LH | UH),
        '|' => (0xA, ALL & !AS),
        ';' => (0xB, ALL & !URI_ONLY),
        '*' => (0xC, ALL & !URI_ONLY),
        '?' => (0xD, ALL & !URI_ONLY),
        '&' => (0xE, ALL & !URI_ONLY),
        '%' => (0xF, ALL & !URI_ONLY),
        '#' => (0x10, ALL & !URI_ONLY),
        '(' => (0x11, ALL & !URI_ONLY),
        ')' => (0x12, ALL & !URI_ONLY),
        '$' => (0x13, ALL & !URI_ONLY),
        '<' => (0x14, ALL & !URI_ONLY),
        '>' => (0x15, ALL & !URI_ONLY),
        '=' => (0x16, ALL & !URI_ONLY),
        'A'..='F' => (c as u8, N | D | LO | EM | URI | LH),
        'G'..='Z' => (c as u8, N | D | LO | EM | URI | LH | UH),
        'a'..='f' => (c as u8, N | D | UP | UH),
        'g'..='z' => (c as u8, N | D | UP | UH | LH),
        '0'..='9' => (c as u8, UP | LO | EM | AS),
        '\u{C0}'..='\u{FF}' if c != '\u{D7}' && c != '\u{F7}' => (c as u8, ALL & !EU),
        _ => return None,
    };
    Some((b, ALL & !removed))
}

fn blocks_for_char_bits(char_bits: usize) -> usize {
    ((HEADER_BITS + char_bits - 1) >> 6) + 1
}

fn header(key: u32, encoding: u8, length: usize) -> u64 {
    key_and_type(key, PropertyType::ShortString)
        | ((encoding as u64) << 28)
        | ((length as u64) << 33)
}

/// Packs `s` into property block words, or `None` when it does not fit.
pub fn encode(key: u32, s: &str) -> Option<Words> {
    let length = s.encode_utf16().count();
    if length > Encoding::Numerical.max_length() || length > MAX_LENGTH {
        return None;
    }
    if let Some(words) = encode_with_tables(key, s, length) {
        return Some(words);
    }
    if length <= PAYLOAD_SIZE - 5 {
        return encode_latin1(key, s, length).or_else(|| encode_utf8(key, s));
    }
    None
}

fn encode_with_tables(key: u32, s: &str, length: usize) -> Option<Words> {
    if length == 0 {
        return None;
    }
    let mut candidates = ALL;
    if length > Encoding::AlphaNum.max_length() {
        candidates &= !LARGE;
    }
    let mut data = Vec::with_capacity(length);
    for c in s.chars() {
        let (b, allowed) = classify(c)?;
        candidates &= allowed;
        if candidates == 0 {
            return None;
        }
        data.push(b);
    }
    TABLES
        .iter()
        .filter(|t| candidates & t.bit() != 0)
        .find_map(|&table| encode_table(key, table, &data))
}

fn encode_table(key: u32, table: Encoding, data: &[u8]) -> Option<Words> {
    if data.len() > table.max_length() {
        return None;
    }
    let step = table.step();
    let mut words: Words = smallvec![0; blocks_for_char_bits(data.len() * step as usize)];
    words[0] = header(key, table.id(), data.len());
    let mut writer = WordWriter::at(&mut words, HEADER_BITS);
    for &b in data {
        if !writer.put(table.encode_char(b)? as u64, step) {
            return None;
        }
    }
    Some(words)
}

fn encode_latin1(key: u32, s: &str, length: usize) -> Option<Words> {
    let mut words: Words = smallvec![0; blocks_for_char_bits(length * 8)];
    words[0] = header(key, ENCODING_LATIN1, length);
    let mut writer = WordWriter::at(&mut words, HEADER_BITS);
    for c in s.chars() {
        let b = u8::try_from(c as u32).ok()?;
        writer.put(b as u64, 8);
    }
    Some(words)
}

fn encode_utf8(key: u32, s: &str) -> Option<Words> {
    let bytes = s.as_bytes();
    if bytes.len() > PAYLOAD_SIZE - 3 - 2 {
        return None;
    }
    let mut words: Words = smallvec![0; blocks_for_char_bits(bytes.len() * 8)];
    words[0] = header(key, ENCODING_UTF8, bytes.len());
    let mut writer = WordWriter::at(&mut words, HEADER_BITS);
    for &b in bytes {
        writer.put(b as u64, 8);
    }
    Some(words)
}

/// Unpacks a short string. `None` for an unknown encoding or truncated words.
pub fn decode(words: &[u64]) -> Option<String> {
    let first = *words.first()?;
    if first & 0xFFFF_FF0F_FFFF_FFFF == 0 {
        return Some(String::new());
    }
    let encoding = ((first & ENCODING_MASK) >> 28) as u8;
    let length = ((first & LENGTH_MASK) >> 33) as usize;
    let mut reader = WordReader::at(words, HEADER_BITS);
    match encoding {
        ENCODING_UTF8 => {
            let bytes = (0..length)
                .map(|_| reader.get(8).map(|b| b as u8))
                .collect::<Option<Vec<u8>>>()?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        ENCODING_LATIN1 => (0..length)
            .map(|_| reader.get(8).map(|b| char::from(b as u8)))
            .collect(),
        id => {
            let table = Encoding::from_id(id)?;
            (0..length)
                .map(|_| reader.get(table.step()).map(|code| table.decode_char(code as u8)))
                .collect()
        }
    }
}

/// Words used by the short string whose first word is `first`.
pub fn calculate_number_of_blocks_used(first: u64) -> i32 {
    let encoding = ((first & ENCODING_MASK) >> 28) as u8;
    let length = ((first & LENGTH_MASK) >> 33) as usize;
    if encoding == ENCODING_UTF8 || encoding == ENCODING_LATIN1 {
        return blocks_for_char_bits(length * 8) as i32;
    }
    match Encoding::from_id(encoding) {
        Some(table) => blocks_for_char_bits(length * table.step() as usize) as i32,
        None => BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING,
    }
}

/// Encoding id stored in a short string's first word.
pub fn encoding_id(first: u64) -> u8 {
    ((first & ENCODING_MASK) >> 28) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(s: &str) -> Option<(u8, usize)> {
        let words = encode(7, s)?;
        assert_eq!(decode(&words).as_deref(), Some(s), "decoding {s:?}");
        assert_eq!(calculate_number_of_blocks_used(words[0]), words.len() as i32);
        Some((encoding_id(words[0]), words.len()))
    }

    #[test]
    fn picks_the_first_fitting_table() {
        assert_eq!(roundtrip("hello_world"), Some((Encoding::Lower.id(), 2)));
        assert_eq!(roundtrip("2023-01-31"), Some((Encoding::Numerical.id(), 2)));
        assert_eq!(roundtrip("12:30"), Some((Encoding::Date.id(), 1)));
        assert_eq!(roundtrip("HELLO WORLD"), Some((Encoding::Upper.id(), 2)));
        assert_eq!(roundtrip("someone@example.com").map(|r| r.0), Some(Encoding::Email.id()));
        assert_eq!(roundtrip("http://x.org/a?b=c").map(|r| r.0), Some(Encoding::Uri.id()));
        assert_eq!(roundtrip("Hello World 42").map(|r| r.0), Some(Encoding::AlphaNum.id()));
        assert_eq!(roundtrip("Hello|World").map(|r| r.0), Some(Encoding::AlphaSym.id()));
        assert_eq!(roundtrip("Crème brûlée").map(|r| r.0), Some(Encoding::European.id()));
        assert_eq!(roundtrip("deadbeef").map(|r| r.0), Some(Encoding::Lower.id()));
    }

    #[test]
    fn hex_tables_take_over_past_the_six_bit_limit() {
        let lower: String = "0123456789abcdef".repeat(3).chars().take(40).collect();
        assert_eq!(roundtrip(&lower), Some((Encoding::LowerHex.id(), 4)));
        let upper = lower.to_uppercase();
        assert_eq!(roundtrip(&upper), Some((Encoding::UpperHex.id(), 4)));
        assert_eq!(roundtrip(&lower[..20]).map(|r| r.0), Some(Encoding::Uri.id()));
    }

    #[test]
    fn byte_fallbacks() {
        assert_eq!(roundtrip("{x}").map(|r| r.0), Some(ENCODING_LATIN1));
        assert_eq!(roundtrip("日本").map(|r| r.0), Some(ENCODING_UTF8));
        assert_eq!(roundtrip("").map(|r| r.0), Some(ENCODING_LATIN1));
    }

    #[test]
    fn too_long_strings_are_rejected() {
        assert!(encode(1, &"1".repeat(54)).is_some());
        assert!(encode(1, &"1".repeat(55)).is_none());
        assert!(encode(1, &"{".repeat(28)).is_none());
        assert!(encode(1, &"a".repeat(40)).is_some());
        assert!(encode(1, &"aB".repeat(20)).is_none());
    }

    #[test]
    fn unknown_encoding_is_reported() {
        let first = header(1, 13, 3);
        assert_eq!(calculate_number_of_blocks_used(first), BLOCKS_USED_FOR_BAD_TYPE_OR_ENCODING);
        assert_eq!(decode(&[first]), None);
    }

    proptest! {
        #[test]
        fn any_accepted_string_roundtrips(s in "[ -~À-ÿ日]{0,40}") {
            if let Some(words) = encode(3, &s) {
                prop_assert!(words.len() <= 4);
                prop_assert_eq!(calculate_number_of_blocks_used(words[0]), words.len() as i32);
                prop_assert_eq!(decode(&words), Some(s));
            }
        }

        #[test]
        fn table_strings_always_fit(s in "[a-z_ ]{1,43}") {
            let words = encode(3, &s).unwrap();
            prop_assert_eq!(decode(&words), Some(s));
        }
    }
}
