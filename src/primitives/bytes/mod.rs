#![forbid(unsafe_code)]
//! Bit packing and buffer utilities shared by the value codecs.

pub mod bits {
    //! LSB-first bit packing, either over 64-bit words or over a byte stream.
    //!
    //! Bit `k` of a word stream lives in word `k / 64` at position `k % 64`;
    //! values wider than the space left in a word straddle into the next one.

    const WORD_BITS: usize = 64;

    /// Returns a mask with the lowest `bits` bits set.
    #[inline]
    pub fn mask(bits: u32) -> u64 {
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    /// Number of bits needed to represent `value` (zero needs zero bits).
    #[inline]
    pub fn required_bits(value: u64) -> u32 {
        64 - value.leading_zeros()
    }

    /// Writes values into a slice of words starting at an arbitrary bit.
    pub struct WordWriter<'a> {
        words: &'a mut [u64],
        pos: usize,
    }

    impl<'a> WordWriter<'a> {
        /// Creates a writer positioned at `bit_offset`.
        pub fn at(words: &'a mut [u64], bit_offset: usize) -> Self {
            Self {
                words,
                pos: bit_offset,
            }
        }

        /// Current bit position.
        pub fn position(&self) -> usize {
            self.pos
        }

        /// Appends the low `bits` bits of `value`. Returns false if the words are exhausted.
        pub fn put(&mut self, value: u64, bits: u32) -> bool {
            let bits = bits as usize;
            if bits == 0 {
                return true;
            }
            if self.pos + bits > self.words.len() * WORD_BITS {
                return false;
            }
            let value = value & mask(bits as u32);
            let word = self.pos / WORD_BITS;
            let shift = self.pos % WORD_BITS;
            self.words[word] |= value << shift;
            let room = WORD_BITS - shift;
            if bits > room {
                self.words[word + 1] |= value >> room;
            }
            self.pos += bits;
            true
        }
    }

    /// Reads values back from words written by [`WordWriter`].
    pub struct WordReader<'a> {
        words: &'a [u64],
        pos: usize,
    }

    impl<'a> WordReader<'a> {
        /// Creates a reader positioned at `bit_offset`.
        pub fn at(words: &'a [u64], bit_offset: usize) -> Self {
            Self {
                words,
                pos: bit_offset,
            }
        }

        /// Reads the next `bits` bits, or `None` when the words run out.
        pub fn get(&mut self, bits: u32) -> Option<u64> {
            let bits = bits as usize;
            if bits == 0 {
                return Some(0);
            }
            if self.pos + bits > self.words.len() * WORD_BITS {
                return None;
            }
            let word = self.pos / WORD_BITS;
            let shift = self.pos % WORD_BITS;
            let mut value = self.words[word] >> shift;
            let room = WORD_BITS - shift;
            if bits > room {
                value |= self.words[word + 1] << room;
            }
            self.pos += bits;
            Some(value & mask(bits as u32))
        }
    }

    /// LSB-first bit writer producing a byte stream.
    #[derive(Default)]
    pub struct ByteWriter {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl ByteWriter {
        /// Creates a writer with room for `bits` bits.
        pub fn with_capacity(bits: usize) -> Self {
            Self {
                bytes: Vec::with_capacity(bits.div_ceil(8)),
                pos: 0,
            }
        }

        /// Appends the low `bits` bits of `value`.
        pub fn put(&mut self, value: u64, bits: u32) {
            let value = value & mask(bits);
            for i in 0..bits as usize {
                let bit_pos = self.pos + i;
                if bit_pos / 8 == self.bytes.len() {
                    self.bytes.push(0);
                }
                if (value >> i) & 1 == 1 {
                    self.bytes[bit_pos / 8] |= 1 << (bit_pos % 8);
                }
            }
            self.pos += bits as usize;
        }

        /// Number of bits used in the final byte, 8 when the stream ends on a byte boundary.
        pub fn bits_used_in_last_byte(&self) -> u8 {
            match self.pos % 8 {
                0 => 8,
                n => n as u8,
            }
        }

        /// Consumes the writer and returns the packed bytes.
        pub fn into_bytes(self) -> Vec<u8> {
            self.bytes
        }
    }

    /// LSB-first bit reader over a byte slice.
    pub struct ByteReader<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl<'a> ByteReader<'a> {
        /// Creates a reader at the start of `bytes`.
        pub fn new(bytes: &'a [u8]) -> Self {
            Self { bytes, pos: 0 }
        }

        /// Reads the next `bits` bits, or `None` past the end of the stream.
        pub fn get(&mut self, bits: u32) -> Option<u64> {
            if self.pos + bits as usize > self.bytes.len() * 8 {
                return None;
            }
            let mut value = 0u64;
            for i in 0..bits as usize {
                let bit_pos = self.pos + i;
                let bit = (self.bytes[bit_pos / 8] >> (bit_pos % 8)) & 1;
                value |= (bit as u64) << i;
            }
            self.pos += bits as usize;
            Some(value)
        }
    }
}

pub mod buf {
    //! Checked big-endian reader for encoded buffers.

    use core::convert::TryInto;

    /// Sequential reader that reports underflow instead of panicking.
    pub struct Reader<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Reader<'a> {
        /// Creates a reader over `buf`.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes.
        pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
            let end = self.off.checked_add(n)?;
            let slice = self.buf.get(self.off..end)?;
            self.off = end;
            Some(slice)
        }

        /// Reads a single byte.
        pub fn u8(&mut self) -> Option<u8> {
            self.take(1).map(|b| b[0])
        }

        /// Reads a big-endian `i32`.
        pub fn i32(&mut self) -> Option<i32> {
            self.take(4)
                .and_then(|b| b.try_into().ok())
                .map(i32::from_be_bytes)
        }

        /// Remaining unread bytes.
        pub fn remaining(&self) -> usize {
            self.buf.len() - self.off
        }

        /// The unread tail of the buffer.
        pub fn rest(&self) -> &'a [u8] {
            &self.buf[self.off..]
        }
    }
}
