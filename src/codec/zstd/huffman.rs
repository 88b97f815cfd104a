// Zstandard literal Huffman tables (RFC 8878 section 4.2).
//
// The tree is transmitted as weights; the last symbol's weight is implied
// by completing the code to a power of two.  Codes are read from a
// backward bitstream with a `max_bits`-wide state that is shifted left by
// each decoded code length.

use crate::bitio::ReverseBitReader;
use crate::error::{Error, Result};

use super::fse::FseTable;

/// Longest literal code.
pub const MAX_CODE_BITS: u8 = 11;

/// Accuracy log limit for FSE-compressed weights.
const WEIGHT_FSE_MAX_LOG: u8 = 6;

/// Literal decoding table, indexed by a `max_bits` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    max_bits: u8,
    symbols: Vec<u8>,
    num_bits: Vec<u8>,
}

impl HuffmanTable {
    /// Parse a tree description.  Returns the table and bytes consumed.
    pub fn read(data: &[u8]) -> Result<(Self, usize)> {
        let Some(&header) = data.first() else {
            return Err(Error::corrupt("missing huffman tree description"));
        };
        let (weights, used) = if header < 128 {
            let size = usize::from(header);
            let body = data
                .get(1..1 + size)
                .ok_or_else(|| Error::corrupt("huffman weights overrun the literals section"))?;
            (fse_weights(body)?, 1 + size)
        } else {
            let count = usize::from(header) - 127;
            let size = count.div_ceil(2);
            let body = data
                .get(1..1 + size)
                .ok_or_else(|| Error::corrupt("huffman weights overrun the literals section"))?;
            let weights = (0..count)
                .map(|i| if i % 2 == 0 { body[i / 2] >> 4 } else { body[i / 2] & 0x0F })
                .collect();
            (weights, 1 + size)
        };
        Ok((Self::from_weights(&weights)?, used))
    }

    /// Build from explicit weights (the last symbol's weight is implied).
    pub fn from_weights(weights: &[u8]) -> Result<Self> {
        if weights.is_empty() || weights.len() > 255 {
            return Err(Error::corrupt(format!("{} huffman weights", weights.len())));
        }
        let mut sum = 0u32;
        for &w in weights {
            if w > MAX_CODE_BITS {
                return Err(Error::corrupt(format!("huffman weight {w} exceeds {MAX_CODE_BITS}")));
            }
            if w > 0 {
                sum += 1 << (w - 1);
            }
        }
        if sum == 0 {
            return Err(Error::corrupt("huffman weights are all zero"));
        }
        let max_bits = 32 - sum.leading_zeros();
        let left = (1u32 << max_bits) - sum;
        if !left.is_power_of_two() || max_bits > u32::from(MAX_CODE_BITS) {
            return Err(Error::corrupt("huffman weights do not complete a prefix code"));
        }
        let last_weight = left.trailing_zeros() as u8 + 1;

        let mut lengths: Vec<u8> = weights
            .iter()
            .map(|&w| if w > 0 { max_bits as u8 + 1 - w } else { 0 })
            .collect();
        lengths.push(max_bits as u8 + 1 - last_weight);
        Self::from_lengths(&lengths, max_bits as u8)
    }

    fn from_lengths(lengths: &[u8], max_bits: u8) -> Result<Self> {
        let size = 1usize << max_bits;
        let mut rank_count = [0usize; MAX_CODE_BITS as usize + 2];
        for &len in lengths {
            rank_count[usize::from(len)] += 1;
        }

        // Longest codes take the lowest states.
        let mut rank_start = [0usize; MAX_CODE_BITS as usize + 2];
        let mut next = 0usize;
        for len in (1..=usize::from(max_bits)).rev() {
            rank_start[len] = next;
            next += rank_count[len] << (usize::from(max_bits) - len);
        }
        if next != size {
            return Err(Error::corrupt("huffman code does not fill its table"));
        }

        let mut symbols = vec![0u8; size];
        let mut num_bits = vec![0u8; size];
        for (sym, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let span = 1usize << (max_bits - len);
            let start = rank_start[usize::from(len)];
            symbols[start..start + span].fill(sym as u8);
            num_bits[start..start + span].fill(len);
            rank_start[usize::from(len)] += span;
        }
        Ok(Self {
            max_bits,
            symbols,
            num_bits,
        })
    }

    pub fn max_bits(&self) -> u8 {
        self.max_bits
    }

    /// Decode one stream to exactly `count` bytes, appending to `out`.
    pub fn decode_stream(&self, stream: &[u8], count: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut bits = ReverseBitReader::new(stream)?;
        let mask = (1usize << self.max_bits) - 1;
        let mut state = bits.read_bits(u32::from(self.max_bits)) as usize;
        for _ in 0..count {
            let len = self.num_bits[state];
            out.push(self.symbols[state]);
            let rest = bits.read_bits(u32::from(len)) as usize;
            state = ((state << len) | rest) & mask;
        }
        // The final state still holds max_bits bits that were read ahead.
        if bits.bits_left() != -isize::from(self.max_bits) {
            return Err(Error::corrupt("huffman stream length does not match its symbols"));
        }
        Ok(())
    }
}

/// Weights stored as an FSE-compressed stream with two interleaved states.
fn fse_weights(body: &[u8]) -> Result<Vec<u8>> {
    let (table, used) = FseTable::read(body, 255, WEIGHT_FSE_MAX_LOG)?;
    let mut bits = ReverseBitReader::new(&body[used..])?;
    let mut s1 = table.init_state(&mut bits);
    let mut s2 = table.init_state(&mut bits);
    let mut weights = Vec::with_capacity(64);
    loop {
        weights.push(table.symbol(s1));
        s1 = table.update(s1, &mut bits);
        if bits.is_overflowed() {
            weights.push(table.symbol(s2));
            break;
        }
        weights.push(table.symbol(s2));
        s2 = table.update(s2, &mut bits);
        if bits.is_overflowed() {
            weights.push(table.symbol(s1));
            break;
        }
        if weights.len() > 255 {
            return Err(Error::corrupt("too many huffman weights"));
        }
    }
    Ok(weights)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
