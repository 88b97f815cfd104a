// Huffman encoder and decoder tables.
//
// The encoder stores each canonical code bit-reversed so it can be written
// LSB-first in one call.  The decoder resolves codes up to FAST_BITS long
// with a single table lookup and falls back to a canonical bit-by-bit walk
// for longer codes.

use crate::bitio::{BitReader, BitWriter};
use crate::error::{Error, Result};

use super::build::{build_lengths, canonical_codes};

/// Bits resolved by the direct lookup table.
const FAST_BITS: u8 = 9;

/// Longest code the decoder accepts.
const MAX_CODE_BITS: usize = 15;

#[inline]
fn reverse(code: u16, len: u8) -> u16 {
    code.reverse_bits() >> (16 - u32::from(len))
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Symbol -> (reversed code, length) table.
#[derive(Debug, Clone)]
pub struct HuffmanEncoder {
    codes: Vec<u16>,
    lengths: Vec<u8>,
}

impl HuffmanEncoder {
    /// Build from explicit code lengths.
    pub fn from_lengths(lengths: &[u8]) -> Self {
        let codes = canonical_codes(lengths)
            .into_iter()
            .zip(lengths)
            .map(|(c, &l)| if l == 0 { 0 } else { reverse(c, l) })
            .collect();
        Self {
            codes,
            lengths: lengths.to_vec(),
        }
    }

    /// Build an optimal length-limited code for `freqs`.
    pub fn from_frequencies(freqs: &[u32], max_bits: u8) -> Self {
        Self::from_lengths(&build_lengths(freqs, max_bits))
    }

    pub fn lengths(&self) -> &[u8] {
        &self.lengths
    }

    /// Write the code for `symbol`.  The symbol must have a nonzero length.
    #[inline]
    pub fn write(&self, w: &mut BitWriter, symbol: usize) {
        debug_assert!(self.lengths[symbol] > 0, "symbol {symbol} has no code");
        w.write_bits(u32::from(self.codes[symbol]), u32::from(self.lengths[symbol]));
    }

    /// Total bits to code `freqs` with this table.
    pub fn cost(&self, freqs: &[u32]) -> u64 {
        freqs
            .iter()
            .zip(&self.lengths)
            .map(|(&f, &l)| u64::from(f) * u64::from(l))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Table-driven canonical decoder.
///
/// Incomplete codes are accepted (DEFLATE permits them, e.g. a distance
/// tree with one code); a bit pattern that matches no code is a corrupt
/// stream.  Over-subscribed length sets are rejected at construction.
#[derive(Debug, Clone)]
pub struct HuffmanDecoder {
    /// `(symbol << 4) | length` for codes up to FAST_BITS; 0 = fall back.
    fast: Vec<u16>,
    /// Number of codes per length.
    counts: [u16; MAX_CODE_BITS + 1],
    /// Symbols ordered by (length, symbol).
    symbols: Vec<u16>,
}

impl HuffmanDecoder {
    pub fn from_lengths(lengths: &[u8]) -> Result<Self> {
        let mut counts = [0u16; MAX_CODE_BITS + 1];
        for &l in lengths {
            let l = usize::from(l);
            if l > MAX_CODE_BITS {
                return Err(Error::corrupt(format!("code length {l} exceeds {MAX_CODE_BITS}")));
            }
            counts[l] += 1;
        }
        counts[0] = 0;

        // Over-subscription check.
        let mut left: i32 = 1;
        for &c in &counts[1..] {
            left <<= 1;
            left -= i32::from(c);
            if left < 0 {
                return Err(Error::corrupt("over-subscribed huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_CODE_BITS + 2];
        for len in 1..=MAX_CODE_BITS {
            offsets[len + 1] = offsets[len] + counts[len];
        }
        let mut symbols = vec![0u16; usize::from(offsets[MAX_CODE_BITS + 1])];
        for (sym, &l) in lengths.iter().enumerate() {
            if l > 0 {
                let slot = &mut offsets[usize::from(l)];
                symbols[usize::from(*slot)] = sym as u16;
                *slot += 1;
            }
        }

        let mut fast = vec![0u16; 1 << FAST_BITS];
        let codes = canonical_codes(lengths);
        for (sym, (&code, &l)) in codes.iter().zip(lengths).enumerate() {
            if l == 0 || l > FAST_BITS {
                continue;
            }
            let entry = ((sym as u16) << 4) | u16::from(l);
            let mut idx = usize::from(reverse(code, l));
            while idx < fast.len() {
                fast[idx] = entry;
                idx += 1 << l;
            }
        }

        Ok(Self {
            fast,
            counts,
            symbols,
        })
    }

    /// Decode one symbol.
    #[inline]
    pub fn decode(&self, r: &mut BitReader<'_>) -> Result<u16> {
        let entry = self.fast[r.peek(u32::from(FAST_BITS)) as usize];
        if entry != 0 {
            r.consume(u32::from(entry & 0xF))?;
            return Ok(entry >> 4);
        }
        self.decode_slow(r)
    }

    /// Canonical walk: extend the code one bit at a time.
    fn decode_slow(&self, r: &mut BitReader<'_>) -> Result<u16> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_CODE_BITS {
            code |= r.read_bit()? as i32;
            let count = i32::from(self.counts[len]);
            if code - count < first {
                return Ok(self.symbols[(index + (code - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(Error::corrupt("invalid huffman code"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(lengths: &[u8], message: &[usize]) {
        let enc = HuffmanEncoder::from_lengths(lengths);
        let mut w = BitWriter::new();
        for &s in message {
            enc.write(&mut w, s);
        }
        let bytes = w.finish();
        let dec = HuffmanDecoder::from_lengths(lengths).unwrap();
        let mut r = BitReader::new(&bytes);
        for &s in message {
            assert_eq!(dec.decode(&mut r).unwrap(), s as u16);
        }
    }

    #[test]
    fn short_codes() {
        roundtrip(&[3, 3, 3, 3, 3, 2, 4, 4], &[0, 5, 7, 6, 1, 2, 3, 4, 5, 5]);
    }

    #[test]
    fn long_codes_use_slow_path() {
        let mut freqs = vec![1u32, 1];
        while freqs.len() < 20 {
            let n = freqs.len();
            freqs.push(freqs[n - 1] + freqs[n - 2]);
        }
        let enc = HuffmanEncoder::from_frequencies(&freqs, 15);
        assert!(enc.lengths().iter().any(|&l| l > FAST_BITS));
        let message: Vec<usize> = (0..20).chain((0..20).rev()).collect();
        roundtrip(enc.lengths(), &message);
    }

    #[test]
    fn fixed_literal_lengths() {
        let mut lengths = vec![8u8; 144];
        lengths.extend(std::iter::repeat_n(9, 112));
        lengths.extend(std::iter::repeat_n(7, 24));
        lengths.extend(std::iter::repeat_n(8, 8));
        roundtrip(&lengths, &[0, 143, 144, 255, 256, 279, 280, 287]);
    }

    #[test]
    fn single_code_is_incomplete_but_valid() {
        // One distance code of length 1: bit 0 decodes, bit 1 is invalid.
        let dec = HuffmanDecoder::from_lengths(&[0, 1]).unwrap();
        let mut r = BitReader::new(&[0b0000_0000]);
        assert_eq!(dec.decode(&mut r).unwrap(), 1);
        let mut r = BitReader::new(&[0b1111_1111, 0xFF]);
        assert!(matches!(dec.decode(&mut r), Err(Error::CorruptStream(_))));
    }

    #[test]
    fn oversubscribed_rejected() {
        assert!(HuffmanDecoder::from_lengths(&[1, 1, 1]).is_err());
    }

    #[test]
    fn cost_matches_written_bits() {
        let freqs = [5u32, 9, 12, 13, 16, 45];
        let enc = HuffmanEncoder::from_frequencies(&freqs, 15);
        let mut w = BitWriter::new();
        for (s, &f) in freqs.iter().enumerate() {
            for _ in 0..f {
                enc.write(&mut w, s);
            }
        }
        assert_eq!(w.bit_len(), enc.cost(&freqs));
    }
}
