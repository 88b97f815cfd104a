// Blocks and the packer/unpacker seam.
//
// A `Block` is the unit of parallel work: the token stream one engine
// produced for one slice of input, plus its metadata.  Packers serialise a
// block in a codec's on-wire layout; unpackers walk a framed stream and
// hand back one payload at a time without reading past its declared
// length.  Formats whose blocks end on a symbol (DEFLATE, zlib) have no
// unpacker; the inflater finds their boundaries.

use crate::error::{Error, Result};
use crate::lz77::Token;

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Per-block bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockMeta {
    /// Position of the block in the stream.
    pub index: usize,
    /// Uncompressed bytes covered by the block.
    pub raw_len: usize,
    /// Bytes the packer emitted (0 until packed).
    pub packed_len: usize,
    /// Whether this is the last block of the stream.
    pub is_final: bool,
}

/// Tokens for one slice of input plus metadata.  Immutable once packed.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub meta: BlockMeta,
    pub tokens: Vec<Token>,
}

impl Block {
    pub fn new(index: usize, raw_len: usize) -> Self {
        Self {
            meta: BlockMeta {
                index,
                raw_len,
                ..BlockMeta::default()
            },
            tokens: Vec::new(),
        }
    }

    /// Number of match tokens.
    pub fn match_count(&self) -> usize {
        self.tokens
            .iter()
            .filter(|t| matches!(t, Token::Match { .. }))
            .count()
    }
}

/// Serialises one block's tokens in a codec's layout.
///
/// `raw` is the block's uncompressed input; packers use it for stored
/// fallbacks when the coded form would not be smaller.
pub trait BlockPacker {
    fn pack(&mut self, block: &Block, raw: &[u8], out: &mut Vec<u8>);
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// How a payload's bytes are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Bytes are the uncompressed data.
    Stored,
    /// Bytes are in the codec's compressed block format.
    Compressed,
    /// A self-contained unit (GZIP member, Zstandard frame).
    Unit,
}

/// One block handed out by an unpacker.  Borrows the framed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPayload<'a> {
    pub index: usize,
    pub kind: PayloadKind,
    pub data: &'a [u8],
    /// Uncompressed length when the framing declares it.
    pub raw_len: Option<usize>,
    /// Checksum the framing stores for this block, if any.
    pub checksum: Option<u32>,
}

/// Walks a framed stream one block at a time.
pub trait BlockUnpacker<'a> {
    /// The next payload, or `None` at the end of the stream.
    ///
    /// On success the cursor sits at the start of the following block.
    fn next_block(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Option<BlockPayload<'a>>>;

    /// Drain every remaining payload.
    fn collect_blocks(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Vec<BlockPayload<'a>>> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block(cursor)? {
            blocks.push(block);
        }
        Ok(blocks)
    }
}

// ---------------------------------------------------------------------------
// ByteCursor
// ---------------------------------------------------------------------------

/// Bounds-checked little/big-endian reader over a borrowed slice.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Unread bytes.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// The whole underlying slice.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Take the next `n` bytes.
    #[inline]
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::truncated(n, self.remaining()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::truncated(n, self.remaining()));
        }
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Jump to an absolute position inside the slice.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::truncated(pos, self.data.len()));
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    /// Three-byte little-endian integer (Zstandard block headers).
    pub fn read_u24_le(&mut self) -> Result<u32> {
        let [a, b, c] = self.array()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    /// Little-endian integer of `n <= 8` bytes.
    pub fn read_uint_le(&mut self, n: usize) -> Result<u64> {
        debug_assert!(n <= 8);
        let bytes = self.take(n)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    pub fn peek_u32_le(&self) -> Result<u32> {
        let b = self.peek(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Bytes up to (not including) the next zero byte; the zero is consumed.
    pub fn read_cstr(&mut self) -> Result<&'a [u8]> {
        let rest = self.rest();
        match rest.iter().position(|&b| b == 0) {
            Some(n) => {
                self.pos += n + 1;
                Ok(&rest[..n])
            }
            None => Err(Error::truncated(rest.len() + 1, rest.len())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_reads_in_order() {
        let data = [
            0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x01, 0x00, 0xAA, 0xBB, 0xCC,
        ];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_u8().unwrap(), 1);
        assert_eq!(c.read_u16_le().unwrap(), 0x1234);
        assert_eq!(c.read_u32_le().unwrap(), 0x1234_5678);
        assert_eq!(c.read_u32_be().unwrap(), 0x0000_0100);
        assert_eq!(c.read_u24_le().unwrap(), 0x00CC_BBAA);
        assert!(c.is_empty());
    }

    #[test]
    fn take_past_end_reports_needed_and_available() {
        let mut c = ByteCursor::new(&[1, 2, 3]);
        c.skip(1).unwrap();
        match c.take(5) {
            Err(Error::TruncatedInput { needed, available }) => {
                assert_eq!(needed, 5);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        // A failed take leaves the cursor where it was.
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn cstr_and_uint() {
        let mut c = ByteCursor::new(b"name\0\x01\x02\x03");
        assert_eq!(c.read_cstr().unwrap(), b"name");
        assert_eq!(c.read_uint_le(3).unwrap(), 0x0003_0201);
        let mut c = ByteCursor::new(b"unterminated");
        assert!(c.read_cstr().unwrap_err().is_truncation());
    }

    #[test]
    fn block_counts_matches() {
        let mut b = Block::new(3, 10);
        b.tokens = vec![
            Token::Literal(1),
            Token::Match {
                offset: 1,
                length: 9,
            },
        ];
        assert_eq!(b.match_count(), 1);
        assert_eq!(b.meta.index, 3);
        assert!(!b.meta.is_final);
    }
}
