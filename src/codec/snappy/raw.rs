// Snappy raw block format.
//
//   varint(uncompressed length) | element*
//
// Element tags (low two bits):
//   00  literal, (len - 1) in the upper six bits or in 1-4 trailing bytes
//   01  copy, len 4..=11, 11-bit offset
//   10  copy, len 1..=64, u16 LE offset
//   11  copy, len 1..=64, u32 LE offset

use crate::block::{Block, BlockPacker};
use crate::error::{Error, Result};
use crate::lz77::{MatchFinder, MatchParams, Token, copy_within_overlapping};
use crate::varint;

const TAG_LITERAL: u8 = 0b00;
const TAG_COPY1: u8 = 0b01;
const TAG_COPY2: u8 = 0b10;
const TAG_COPY4: u8 = 0b11;

/// Packs a token stream into a raw Snappy block, length prefix included.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyPacker;

impl BlockPacker for SnappyPacker {
    fn pack(&mut self, block: &Block, raw: &[u8], out: &mut Vec<u8>) {
        varint::write_u64(out, raw.len() as u64);
        let mut pos = 0usize;
        let mut lit_start = 0usize;
        for token in &block.tokens {
            match *token {
                Token::Literal(_) => pos += 1,
                Token::Match { offset, length } => {
                    write_literal(out, &raw[lit_start..pos]);
                    write_copy(out, offset as usize, length as usize);
                    pos += length as usize;
                    lit_start = pos;
                }
            }
        }
        write_literal(out, &raw[lit_start..pos]);
    }
}

fn write_literal(out: &mut Vec<u8>, literal: &[u8]) {
    if literal.is_empty() {
        return;
    }
    let n = literal.len() - 1;
    if n < 60 {
        out.push(TAG_LITERAL | ((n as u8) << 2));
    } else {
        let bytes = (usize::BITS - n.leading_zeros()).div_ceil(8) as usize;
        out.push(TAG_LITERAL | (((59 + bytes) as u8) << 2));
        out.extend_from_slice(&n.to_le_bytes()[..bytes]);
    }
    out.extend_from_slice(literal);
}

/// Emit a copy, splitting lengths over 64 so every piece is at least 4.
fn write_copy(out: &mut Vec<u8>, offset: usize, mut len: usize) {
    while len >= 68 {
        write_copy_piece(out, offset, 64);
        len -= 64;
    }
    if len > 64 {
        write_copy_piece(out, offset, 60);
        len -= 60;
    }
    write_copy_piece(out, offset, len);
}

fn write_copy_piece(out: &mut Vec<u8>, offset: usize, len: usize) {
    if (4..12).contains(&len) && offset < 2048 {
        out.push(TAG_COPY1 | (((len - 4) as u8) << 2) | (((offset >> 8) as u8) << 5));
        out.push(offset as u8);
    } else if offset < 1 << 16 {
        out.push(TAG_COPY2 | (((len - 1) as u8) << 2));
        out.extend_from_slice(&(offset as u16).to_le_bytes());
    } else {
        out.push(TAG_COPY4 | (((len - 1) as u8) << 2));
        out.extend_from_slice(&(offset as u32).to_le_bytes());
    }
}

/// Compress `data` into one raw Snappy block.
pub fn compress_raw(data: &[u8], level: u32) -> Vec<u8> {
    let mut finder = MatchFinder::new(MatchParams::snappy(64 * 1024, level));
    let mut block = Block::new(0, data.len());
    finder.tokenize(data, &mut block.tokens);
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    SnappyPacker.pack(&block, data, &mut out);
    out
}

/// Declared uncompressed length of a raw block.
pub fn decompressed_len(src: &[u8]) -> Result<usize> {
    varint::read_u32(src).map(|(len, _)| len as usize)
}

fn take<'a>(src: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let bytes = src
        .get(*pos..*pos + n)
        .ok_or_else(|| Error::corrupt("snappy element overruns the block"))?;
    *pos += n;
    Ok(bytes)
}

/// Decode one raw block that may expand to at most `limit` bytes.
pub fn decompress_raw(src: &[u8], limit: usize) -> Result<Vec<u8>> {
    let (len, header) = varint::read_u32(src)?;
    let len = len as usize;
    if len > limit {
        return Err(Error::corrupt(format!(
            "snappy block declares {len} bytes, limit is {limit}"
        )));
    }
    let mut out = Vec::with_capacity(len);
    let mut pos = header;
    while pos < src.len() {
        let tag = src[pos];
        pos += 1;
        let (offset, copy_len) = match tag & 0b11 {
            TAG_LITERAL => {
                let mut n = usize::from(tag >> 2);
                if n >= 60 {
                    let extra = n - 59;
                    n = take(src, &mut pos, extra)?
                        .iter()
                        .rev()
                        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
                }
                let n = n + 1;
                if out.len() + n > len {
                    return Err(Error::corrupt("snappy literal exceeds the declared length"));
                }
                out.extend_from_slice(take(src, &mut pos, n)?);
                continue;
            }
            TAG_COPY1 => {
                let low = take(src, &mut pos, 1)?[0];
                let offset = (usize::from(tag >> 5) << 8) | usize::from(low);
                (offset, 4 + usize::from((tag >> 2) & 0b111))
            }
            TAG_COPY2 => {
                let b = take(src, &mut pos, 2)?;
                (usize::from(u16::from_le_bytes([b[0], b[1]])), 1 + usize::from(tag >> 2))
            }
            _ => {
                let b = take(src, &mut pos, 4)?;
                (
                    u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize,
                    1 + usize::from(tag >> 2),
                )
            }
        };
        if offset == 0 || offset > out.len() {
            return Err(Error::corrupt(format!(
                "snappy copy offset {offset} exceeds {} produced bytes",
                out.len()
            )));
        }
        if out.len() + copy_len > len {
            return Err(Error::corrupt("snappy copy exceeds the declared length"));
        }
        copy_within_overlapping(&mut out, offset, copy_len);
    }

    if out.len() != len {
        return Err(Error::corrupt(format!(
            "snappy block declares {len} bytes, decoded {}",
            out.len()
        )));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_is_one_zero_byte() {
        assert_eq!(compress_raw(b"", 6), [0x00]);
        assert!(decompress_raw(&[0x00], 0).unwrap().is_empty());
    }

    #[test]
    fn literal_encodings() {
        let mut out = Vec::new();
        write_literal(&mut out, &[7; 60]);
        assert_eq!(out[0], 59 << 2);
        out.clear();
        write_literal(&mut out, &[7; 61]);
        assert_eq!(&out[..2], &[60 << 2, 60]);
        out.clear();
        write_literal(&mut out, &[7; 300]);
        assert_eq!(&out[..3], &[61 << 2, 0x2B, 0x01]);
    }

    #[test]
    fn copy_splitting() {
        let mut out = Vec::new();
        write_copy(&mut out, 10, 67);
        // 60 + 7: both pieces at least 4 long.
        assert_eq!(out, [TAG_COPY2 | (59 << 2), 10, 0, TAG_COPY1 | (3 << 2), 10]);
    }

    #[test]
    fn known_stream() {
        // Literal "a", then a 9-byte copy at offset 1.
        let block = [0x0A, 0x00, b'a', 0x15, 0x01];
        assert_eq!(decompress_raw(&block, 64).unwrap(), b"aaaaaaaaaa");
    }

    #[test]
    fn round_trip_and_limits() {
        let data: Vec<u8> = b"snappy snappy snappy, quick quick quick"
            .iter()
            .cycle()
            .take(5000)
            .copied()
            .collect();
        let packed = compress_raw(&data, 6);
        assert!(packed.len() < data.len() / 4);
        assert_eq!(decompressed_len(&packed).unwrap(), data.len());
        assert_eq!(decompress_raw(&packed, data.len()).unwrap(), data);
        assert!(decompress_raw(&packed, data.len() - 1).is_err());
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(decompress_raw(&[0x05, 0x00, b'a'], 64).is_err());
        // Copy before any output.
        assert!(decompress_raw(&[0x04, 0x01, 0x01], 64).is_err());
    }
}
