//! Bit-addressable byte buffers.
//!
//! Element values are not always a whole number of bytes long (a 4-bit number followed by a
//! 12-bit one, for example), so every serialized value is stored in a [`BitStream`]. Bits are
//! stored most significant first, which is the order they appear on the wire.

use rhexdump as rh;

/// A sequence of bits backed by a byte vector.
///
/// Bits past `len` in the last byte are always zero, which makes the derived equality sound.
#[derive(Clone, Default, Eq, PartialEq, Hash, Debug)]
pub struct BitStream {
    /// Backing storage.
    data: Vec<u8>,
    /// Length of the stream in bits.
    len: u64,
}

impl BitStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream from whole bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            len: data.len() as u64 * 8,
        }
    }

    /// Creates a stream containing the `bits` lowest bits of `value`, most significant first.
    pub fn from_bits(value: u64, bits: u32) -> Self {
        let mut bs = Self::new();
        bs.push_bits(value, bits);
        bs
    }

    /// Length in bits.
    #[inline]
    pub fn len_bits(&self) -> u64 {
        self.len
    }

    /// Length in bytes, rounded up.
    #[inline]
    pub fn len_bytes(&self) -> u64 {
        (self.len + 7) / 8
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bit at position `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    #[inline]
    pub fn bit(&self, idx: u64) -> bool {
        assert!(idx < self.len, "bit index {} out of bounds ({})", idx, self.len);
        self.data[(idx / 8) as usize] & (0x80 >> (idx % 8)) != 0
    }

    /// Sets the bit at position `idx`.
    #[inline]
    pub fn set_bit(&mut self, idx: u64, value: bool) {
        assert!(idx < self.len, "bit index {} out of bounds ({})", idx, self.len);
        let mask = 0x80 >> (idx % 8);
        let byte = &mut self.data[(idx / 8) as usize];
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    /// Inverts the bit at position `idx`.
    #[inline]
    pub fn flip_bit(&mut self, idx: u64) {
        let b = self.bit(idx);
        self.set_bit(idx, !b);
    }

    /// Appends a single bit.
    pub fn push_bit(&mut self, value: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        self.len += 1;
        self.set_bit(self.len - 1, value);
    }

    /// Appends the `bits` lowest bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u64, bits: u32) {
        if self.len % 8 == 0 && bits % 8 == 0 {
            let bytes = value.to_be_bytes();
            self.push_bytes(&bytes[8 - (bits / 8) as usize..]);
            return;
        }
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    /// Appends whole bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if self.len % 8 == 0 {
            self.data.extend_from_slice(bytes);
            self.len += bytes.len() as u64 * 8;
        } else {
            for b in bytes {
                self.push_bits(*b as u64, 8);
            }
        }
    }

    /// Appends another stream.
    pub fn extend(&mut self, other: &BitStream) {
        if self.len % 8 == 0 {
            self.data.extend_from_slice(&other.data);
            self.len += other.len;
        } else {
            for i in 0..other.len {
                self.push_bit(other.bit(i));
            }
        }
    }

    /// Shortens the stream to `bits` bits. Has no effect if the stream is already shorter.
    pub fn truncate(&mut self, bits: u64) {
        if bits >= self.len {
            return;
        }
        self.len = bits;
        self.data.truncate(self.len_bytes() as usize);
        if bits % 8 != 0 {
            if let Some(last) = self.data.last_mut() {
                *last &= 0xffu8 << (8 - bits % 8);
            }
        }
    }

    /// Reads `bits` bits starting at `offset` as an unsigned integer, most significant first.
    pub fn read_bits(&self, offset: u64, bits: u32) -> u64 {
        (0..bits as u64).fold(0, |acc, i| (acc << 1) | self.bit(offset + i) as u64)
    }

    /// Returns the underlying bytes. The last byte is zero-padded if the stream is not
    /// byte-aligned.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for BitStream {
    fn from(data: Vec<u8>) -> Self {
        let len = data.len() as u64 * 8;
        Self { data, len }
    }
}

impl From<&[u8]> for BitStream {
    fn from(data: &[u8]) -> Self {
        Self::from_bytes(data)
    }
}

impl std::fmt::Display for BitStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.len % 8 != 0 {
            writeln!(f, "[{} bits]", self.len)?;
        }
        write!(f, "{}", rh::hexdump(&self.data))
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitstream_unaligned_push() {
        let mut bs = BitStream::new();
        bs.push_bits(0b101, 3);
        bs.push_bits(0xff, 8);
        bs.push_bit(false);
        assert_eq!(bs.len_bits(), 12);
        assert_eq!(bs.len_bytes(), 2);
        assert_eq!(bs.as_bytes(), &[0b1011_1111, 0b1110_0000]);
        assert_eq!(bs.read_bits(3, 8), 0xff);
        assert_eq!(bs.read_bits(0, 3), 0b101);
    }

    #[test]
    fn bitstream_flip_and_truncate() {
        let mut bs = BitStream::from_bytes(b"\x00\xff");
        bs.flip_bit(0);
        bs.flip_bit(15);
        assert_eq!(bs.as_bytes(), &[0x80, 0xfe]);
        bs.truncate(12);
        assert_eq!(bs.len_bits(), 12);
        assert_eq!(bs.as_bytes(), &[0x80, 0xf0]);
        // Padding bits are cleared, so equality only depends on the visible bits.
        let mut other = BitStream::from_bits(0x80, 8);
        other.push_bits(0xf, 4);
        assert_eq!(bs, other);
    }

    #[test]
    fn bitstream_extend() {
        let mut a = BitStream::from_bits(0b1, 1);
        a.extend(&BitStream::from_bytes(b"\xaa"));
        assert_eq!(a.len_bits(), 9);
        assert_eq!(a.as_bytes(), &[0b1101_0101, 0b0000_0000]);
        let mut b = BitStream::from_bytes(b"AB");
        b.extend(&BitStream::from_bytes(b"C"));
        assert_eq!(b.as_bytes(), b"ABC");
    }
}
