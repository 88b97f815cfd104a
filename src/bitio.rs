// LSB-first bit packing (DEFLATE convention), plus the backward reader
// used by Zstandard entropy streams.
//
// The writer accumulates into a 64-bit buffer and spills whole bytes; the
// reader refills a 64-bit buffer from a byte slice and zero-pads past the
// end, so peeks near the end of input are always defined.  Consuming a
// padded bit is a truncation error.

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// BitWriter
// ---------------------------------------------------------------------------

/// Packs values least-significant bit first.
#[derive(Debug, Default)]
pub struct BitWriter {
    out: Vec<u8>,
    bit_buf: u64,
    bit_count: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            out: Vec::with_capacity(bytes),
            bit_buf: 0,
            bit_count: 0,
        }
    }

    /// Write the low `n` bits of `value` (`n <= 32`).
    #[inline]
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        if n == 0 {
            return;
        }
        let masked = u64::from(value) & ((1u64 << n) - 1);
        self.bit_buf |= masked << self.bit_count;
        self.bit_count += n;
        while self.bit_count >= 8 {
            self.out.push(self.bit_buf as u8);
            self.bit_buf >>= 8;
            self.bit_count -= 8;
        }
    }

    /// Whether the next bit starts a fresh byte.
    pub fn is_aligned(&self) -> bool {
        self.bit_count == 0
    }

    /// Pad with zero bits up to the next byte boundary.
    pub fn align(&mut self) {
        if self.bit_count > 0 {
            self.out.push(self.bit_buf as u8);
            self.bit_buf = 0;
            self.bit_count = 0;
        }
    }

    /// Append whole bytes; the writer must be aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(self.is_aligned());
        self.out.extend_from_slice(bytes);
    }

    /// Bits written so far.
    pub fn bit_len(&self) -> u64 {
        self.out.len() as u64 * 8 + u64::from(self.bit_count)
    }

    /// Align and return the packed bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.out
    }
}

// ---------------------------------------------------------------------------
// BitReader
// ---------------------------------------------------------------------------

/// Reads values least-significant bit first from a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_buf: u64,
    bit_count: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_buf: 0,
            bit_count: 0,
        }
    }

    #[inline]
    fn refill(&mut self) {
        while self.bit_count <= 56 {
            match self.data.get(self.byte_pos) {
                Some(&b) => {
                    self.bit_buf |= u64::from(b) << self.bit_count;
                    self.byte_pos += 1;
                    self.bit_count += 8;
                }
                None => break,
            }
        }
    }

    /// Next `n` bits without consuming them (`n <= 32`); zero past the end.
    #[inline]
    pub fn peek(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32);
        if self.bit_count < n {
            self.refill();
        }
        (self.bit_buf & ((1u64 << n) - 1)) as u32
    }

    /// Drop `n` bits that were previously peeked.
    #[inline]
    pub fn consume(&mut self, n: u32) -> Result<()> {
        if n > self.bit_count {
            self.refill();
            if n > self.bit_count {
                return Err(self.truncated(n));
            }
        }
        self.bit_buf >>= n;
        self.bit_count -= n;
        Ok(())
    }

    /// Read `n` bits (`n <= 32`).
    #[inline]
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        let v = self.peek(n);
        self.consume(n)?;
        Ok(v)
    }

    /// Read one bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<u32> {
        self.read_bits(1)
    }

    /// Skip to the next byte boundary.
    pub fn align(&mut self) {
        let drop = self.bit_count % 8;
        self.bit_buf >>= drop;
        self.bit_count -= drop;
    }

    /// Whether the reader sits on a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.bit_count % 8 == 0
    }

    /// Absolute position in bits from the start of the slice.
    pub fn bit_position(&self) -> u64 {
        self.byte_pos as u64 * 8 - u64::from(self.bit_count)
    }

    /// Byte offset of the next unread byte; the reader must be aligned.
    pub fn byte_position(&self) -> usize {
        debug_assert!(self.is_aligned());
        self.byte_pos - (self.bit_count / 8) as usize
    }

    /// Take `n` raw bytes after aligning.
    pub fn read_aligned_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.align();
        let start = self.byte_position();
        let data = self.data;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| Error::truncated(n, data.len().saturating_sub(start)))?;
        self.byte_pos = end;
        self.bit_buf = 0;
        self.bit_count = 0;
        Ok(&data[start..end])
    }

    /// Bytes not yet pulled into the bit buffer plus whole buffered bytes.
    pub fn remaining_bytes(&self) -> usize {
        self.data.len() - self.byte_pos + (self.bit_count / 8) as usize
    }

    fn truncated(&self, wanted_bits: u32) -> Error {
        let available = self.bit_count as usize / 8;
        Error::truncated(
            (wanted_bits as usize).div_ceil(8).max(available + 1),
            available,
        )
    }
}

// ---------------------------------------------------------------------------
// ReverseBitReader
// ---------------------------------------------------------------------------

/// Reads a Zstandard backward bitstream.
///
/// The stream is written forward and read from its end: the last byte
/// holds a 1-bit marker above the final bits, and each read takes the
/// highest unread bits.  Reading past the start yields zeros and leaves
/// the reader overflowed; callers decide whether that is an error.
#[derive(Debug, Clone)]
pub struct ReverseBitReader<'a> {
    data: &'a [u8],
    /// Unread bits below this position (negative once overflowed).
    bits_left: isize,
}

impl<'a> ReverseBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let Some(&last) = data.last() else {
            return Err(Error::corrupt("empty backward bitstream"));
        };
        if last == 0 {
            return Err(Error::corrupt("backward bitstream has no end marker"));
        }
        let marker = 8 - last.leading_zeros() as isize;
        Ok(Self {
            data,
            bits_left: (data.len() as isize - 1) * 8 + marker - 1,
        })
    }

    /// Read `n <= 64` bits.
    pub fn read_bits(&mut self, n: u32) -> u64 {
        if n == 0 {
            return 0;
        }
        let start = self.bits_left - n as isize;
        self.bits_left = start;
        let mut value = 0u64;
        let mut got = 0u32;
        let mut pos = start;
        while got < n {
            if pos < 0 {
                let zeros = ((-pos) as u32).min(n - got);
                got += zeros;
                pos += zeros as isize;
                continue;
            }
            let byte = self.data[(pos / 8) as usize];
            let offset = (pos % 8) as u32;
            let take = (8 - offset).min(n - got);
            let bits = (u64::from(byte) >> offset) & ((1u64 << take) - 1);
            value |= bits << got;
            got += take;
            pos += take as isize;
        }
        value
    }

    /// Unread bits; negative after reading past the start.
    pub fn bits_left(&self) -> isize {
        self.bits_left
    }

    pub fn is_empty(&self) -> bool {
        self.bits_left == 0
    }

    pub fn is_overflowed(&self) -> bool {
        self.bits_left < 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_agree() {
        let mut w = BitWriter::new();
        w.write_bits(0b1, 1);
        w.write_bits(0b01, 2);
        w.write_bits(0x1234, 16);
        w.write_bits(0x7FFF_FFFF, 31);
        let bits = w.bit_len();
        let bytes = w.finish();
        assert_eq!(bytes.len() as u64, bits.div_ceil(8));

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(1).unwrap(), 1);
        assert_eq!(r.read_bits(2).unwrap(), 1);
        assert_eq!(r.read_bits(16).unwrap(), 0x1234);
        assert_eq!(r.read_bits(31).unwrap(), 0x7FFF_FFFF);
    }

    #[test]
    fn lsb_first_layout() {
        // BFINAL=1, BTYPE=01 -> 0b011 in the low bits of the first byte.
        let mut w = BitWriter::new();
        w.write_bits(1, 1);
        w.write_bits(1, 2);
        assert_eq!(w.finish(), vec![0b0000_0011]);
    }

    #[test]
    fn aligned_bytes_after_bits() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.align();
        w.write_bytes(&[0xAA, 0xBB]);
        let bytes = w.finish();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_aligned_bytes(2).unwrap(), &[0xAA, 0xBB]);
        assert_eq!(r.remaining_bytes(), 0);
    }

    #[test]
    fn reading_past_end_is_truncation() {
        let mut r = BitReader::new(&[0xFF]);
        assert_eq!(r.read_bits(8).unwrap(), 0xFF);
        assert!(r.read_bits(1).unwrap_err().is_truncation());
        let mut r = BitReader::new(&[0x01]);
        assert!(r.read_aligned_bytes(2).unwrap_err().is_truncation());
    }

    #[test]
    fn reverse_reader_reads_from_the_end() {
        // Bits written forward: 101 then 0011, marker 1 -> byte 0b1_0011_101.
        let data = [0b1001_1101];
        let mut r = ReverseBitReader::new(&data).unwrap();
        assert_eq!(r.bits_left(), 7);
        assert_eq!(r.read_bits(4), 0b0011);
        assert_eq!(r.read_bits(3), 0b101);
        assert!(r.is_empty());
        assert_eq!(r.read_bits(2), 0);
        assert!(r.is_overflowed());
    }

    #[test]
    fn reverse_reader_spans_bytes() {
        let data = [0xCD, 0xAB, 0x01];
        let mut r = ReverseBitReader::new(&data).unwrap();
        assert_eq!(r.bits_left(), 16);
        assert_eq!(r.read_bits(12), 0xABC);
        assert_eq!(r.read_bits(4), 0xD);
    }

    #[test]
    fn reverse_reader_needs_marker() {
        assert!(ReverseBitReader::new(&[]).is_err());
        assert!(ReverseBitReader::new(&[0x12, 0x00]).is_err());
    }
}
