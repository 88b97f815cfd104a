// LZ4 block format.
//
// A block is a run of sequences:
//
//   token | [lit len 255s..] | literals | offset(u16 LE) | [match len 255s..]
//
// The high nibble of the token is the literal count, the low nibble the
// match length minus 4; a nibble of 15 continues in 255-escaped bytes.
// The last sequence carries literals only.

use crate::block::{Block, BlockPacker};
use crate::error::{Error, Result};
use crate::lz77::{Token, copy_within_overlapping};

/// Shortest match the format can express.
pub const MIN_MATCH: usize = 4;

/// Packs a token stream into LZ4 sequences.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Packer;

impl BlockPacker for Lz4Packer {
    fn pack(&mut self, block: &Block, raw: &[u8], out: &mut Vec<u8>) {
        let mut pos = 0usize;
        let mut lit_start = 0usize;
        for token in &block.tokens {
            match *token {
                Token::Literal(_) => pos += 1,
                Token::Match { offset, length } => {
                    write_sequence(out, &raw[lit_start..pos], Some((offset as u16, length as usize)));
                    pos += length as usize;
                    lit_start = pos;
                }
            }
        }
        write_sequence(out, &raw[lit_start..pos], None);
    }
}

fn write_sequence(out: &mut Vec<u8>, literals: &[u8], matched: Option<(u16, usize)>) {
    let lit_len = literals.len();
    let match_extra = matched.map_or(0, |(_, len)| len - MIN_MATCH);
    let token = ((lit_len.min(15) as u8) << 4) | match_extra.min(15) as u8;
    out.push(token);
    if lit_len >= 15 {
        write_length(out, lit_len - 15);
    }
    out.extend_from_slice(literals);
    if let Some((offset, _)) = matched {
        out.extend_from_slice(&offset.to_le_bytes());
        if match_extra >= 15 {
            write_length(out, match_extra - 15);
        }
    }
}

fn write_length(out: &mut Vec<u8>, mut n: usize) {
    while n >= 255 {
        out.push(255);
        n -= 255;
    }
    out.push(n as u8);
}

fn read_length(src: &[u8], pos: &mut usize) -> Result<usize> {
    let mut n = 0usize;
    loop {
        let b = *src
            .get(*pos)
            .ok_or_else(|| Error::corrupt("lz4 length runs past the block"))?;
        *pos += 1;
        n = n
            .checked_add(usize::from(b))
            .ok_or_else(|| Error::corrupt("lz4 length overflows"))?;
        if b != 255 {
            return Ok(n);
        }
    }
}

/// Decode one block, appending to `out`.
///
/// Bytes already in `out` act as history for offsets (dependent blocks).
/// The block may produce at most `limit` bytes.
pub fn decode_block(src: &[u8], out: &mut Vec<u8>, limit: usize) -> Result<()> {
    let start = out.len();
    let mut pos = 0usize;
    let produced = |out: &Vec<u8>| out.len() - start;
    loop {
        let token = *src
            .get(pos)
            .ok_or_else(|| Error::corrupt("lz4 block ends before a sequence token"))?;
        pos += 1;

        let mut lit_len = usize::from(token >> 4);
        if lit_len == 15 {
            lit_len += read_length(src, &mut pos)?;
        }
        let literals = pos
            .checked_add(lit_len)
            .and_then(|end| src.get(pos..end))
            .ok_or_else(|| Error::corrupt("lz4 literal run overruns the block"))?;
        if produced(out) + lit_len > limit {
            return Err(Error::corrupt(format!("lz4 block exceeds {limit} bytes")));
        }
        out.extend_from_slice(literals);
        pos += lit_len;
        if pos == src.len() {
            return Ok(());
        }

        let offset = src
            .get(pos..pos + 2)
            .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])))
            .ok_or_else(|| Error::corrupt("lz4 offset overruns the block"))?;
        pos += 2;
        if offset == 0 || offset > out.len() {
            return Err(Error::corrupt(format!(
                "lz4 offset {offset} exceeds {} bytes of history",
                out.len()
            )));
        }
        let mut match_len = usize::from(token & 0x0F) + MIN_MATCH;
        if token & 0x0F == 15 {
            match_len += read_length(src, &mut pos)?;
        }
        if produced(out) + match_len > limit {
            return Err(Error::corrupt(format!("lz4 block exceeds {limit} bytes")));
        }
        copy_within_overlapping(out, offset, match_len);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
