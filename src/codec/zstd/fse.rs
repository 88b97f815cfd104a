// Finite State Entropy decoding tables (RFC 8878 section 4.1).
//
// A table is built from a normalized distribution whose counts sum to
// 2^accuracy_log; a count of -1 marks a "less than one" symbol that gets a
// single state at the top of the table.  Decoding a symbol reads no bits;
// moving to the next state reads `num_bits` bits.

use crate::bitio::{BitReader, ReverseBitReader};
use crate::error::{Error, Result};

/// One decoding state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FseEntry {
    pub symbol: u8,
    pub num_bits: u8,
    pub base: u16,
}

/// Decoding table for one distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FseTable {
    accuracy_log: u8,
    entries: Vec<FseEntry>,
}

impl FseTable {
    /// Build from normalized counts.
    pub fn from_distribution(counts: &[i16], accuracy_log: u8) -> Result<Self> {
        let size = 1usize << accuracy_log;
        if counts.len() > 256 {
            return Err(Error::corrupt("fse distribution has more than 256 symbols"));
        }
        let total: i64 = counts.iter().map(|&c| if c == -1 { 1 } else { i64::from(c) }).sum();
        if total != size as i64 || counts.iter().any(|&c| c < -1) {
            return Err(Error::corrupt(format!(
                "fse distribution sums to {total}, expected {size}"
            )));
        }

        let mut entries = vec![FseEntry::default(); size];
        let mut next_state = vec![0u32; counts.len()];
        let mut high = size;
        for (sym, &count) in counts.iter().enumerate() {
            if count == -1 {
                high -= 1;
                entries[high].symbol = sym as u8;
                next_state[sym] = 1;
            }
        }

        let step = (size >> 1) + (size >> 3) + 3;
        let mask = size - 1;
        let mut pos = 0usize;
        for (sym, &count) in counts.iter().enumerate() {
            if count <= 0 {
                continue;
            }
            next_state[sym] = count as u32;
            for _ in 0..count {
                entries[pos].symbol = sym as u8;
                loop {
                    pos = (pos + step) & mask;
                    if pos < high {
                        break;
                    }
                }
            }
        }
        if pos != 0 {
            return Err(Error::corrupt("fse symbol spread did not cover the table"));
        }

        for entry in &mut entries {
            let sym = usize::from(entry.symbol);
            let state = next_state[sym];
            next_state[sym] += 1;
            let num_bits = accuracy_log as u32 - (31 - state.leading_zeros());
            entry.num_bits = num_bits as u8;
            entry.base = ((state << num_bits) as usize - size) as u16;
        }
        Ok(Self {
            accuracy_log,
            entries,
        })
    }

    /// Single-symbol table (RLE mode).
    pub fn rle(symbol: u8) -> Self {
        Self {
            accuracy_log: 0,
            entries: vec![FseEntry {
                symbol,
                num_bits: 0,
                base: 0,
            }],
        }
    }

    /// Read a compressed distribution from the front of `data`.  Returns
    /// the table and the bytes consumed.
    pub fn read(data: &[u8], max_symbol: usize, max_log: u8) -> Result<(Self, usize)> {
        let (counts, accuracy_log, used) = read_distribution(data, max_symbol, max_log)?;
        Ok((Self::from_distribution(&counts, accuracy_log)?, used))
    }

    pub fn accuracy_log(&self) -> u8 {
        self.accuracy_log
    }

    /// Initial state: `accuracy_log` bits.
    pub fn init_state(&self, bits: &mut ReverseBitReader<'_>) -> usize {
        bits.read_bits(u32::from(self.accuracy_log)) as usize
    }

    #[inline]
    pub fn symbol(&self, state: usize) -> u8 {
        self.entries[state].symbol
    }

    /// Next state after emitting the symbol of `state`.
    #[inline]
    pub fn update(&self, state: usize, bits: &mut ReverseBitReader<'_>) -> usize {
        let entry = self.entries[state];
        usize::from(entry.base) + bits.read_bits(u32::from(entry.num_bits)) as usize
    }
}

/// Decode a normalized distribution header (forward bitstream).
pub fn read_distribution(data: &[u8], max_symbol: usize, max_log: u8) -> Result<(Vec<i16>, u8, usize)> {
    let mut r = BitReader::new(data);
    let accuracy_log = r.read_bits(4)? as u8 + 5;
    if accuracy_log > max_log {
        return Err(Error::corrupt(format!(
            "fse accuracy log {accuracy_log} exceeds {max_log}"
        )));
    }

    let mut remaining = 1i32 << accuracy_log;
    let mut counts: Vec<i16> = Vec::with_capacity(max_symbol + 1);
    while remaining > 0 {
        if counts.len() > max_symbol {
            return Err(Error::corrupt("fse distribution has too many symbols"));
        }
        let bits = 32 - ((remaining + 1) as u32).leading_zeros();
        let lower_mask = (1u32 << (bits - 1)) - 1;
        let threshold = (1u32 << bits) - 1 - (remaining as u32 + 1);
        let raw = r.peek(bits);
        let value = if raw & lower_mask < threshold {
            r.consume(bits - 1)?;
            raw & lower_mask
        } else {
            r.consume(bits)?;
            if raw > lower_mask { raw - threshold } else { raw }
        };

        let count = value as i32 - 1;
        remaining -= count.abs();
        if remaining < 0 {
            return Err(Error::corrupt("fse distribution overflows the table"));
        }
        counts.push(count as i16);
        if count == 0 {
            loop {
                let repeat = r.read_bits(2)?;
                counts.extend(std::iter::repeat_n(0, repeat as usize));
                if repeat != 3 {
                    break;
                }
            }
        }
    }
    if counts.len() > max_symbol + 1 {
        return Err(Error::corrupt("fse distribution has too many symbols"));
    }
    r.align();
    Ok((counts, accuracy_log, r.byte_position()))
}

// ---------------------------------------------------------------------------
// Predefined distributions (RFC 8878 section 3.1.1.3.2.2)
// ---------------------------------------------------------------------------

pub const LITERAL_LENGTH_DEFAULT_LOG: u8 = 6;
pub const MATCH_LENGTH_DEFAULT_LOG: u8 = 6;
pub const OFFSET_DEFAULT_LOG: u8 = 5;

pub const LITERAL_LENGTH_DEFAULT: [i16; 36] = [
    4, 3, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 3, 2, 1, 1, 1, 1, 1,
    -1, -1, -1, -1,
];

pub const MATCH_LENGTH_DEFAULT: [i16; 53] = [
    1, 4, 3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1, -1, -1,
];

pub const OFFSET_DEFAULT: [i16; 29] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1,
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_tables_build() {
        let ll = FseTable::from_distribution(&LITERAL_LENGTH_DEFAULT, LITERAL_LENGTH_DEFAULT_LOG).unwrap();
        let ml = FseTable::from_distribution(&MATCH_LENGTH_DEFAULT, MATCH_LENGTH_DEFAULT_LOG).unwrap();
        let of = FseTable::from_distribution(&OFFSET_DEFAULT, OFFSET_DEFAULT_LOG).unwrap();
        assert_eq!(ll.entries.len(), 64);
        assert_eq!(ml.entries.len(), 64);
        assert_eq!(of.entries.len(), 32);
        // Less-than-one symbols take the top states.
        assert_eq!(ll.symbol(63), 32);
        assert_eq!(of.symbol(31), 24);
        // First literal-length states per the RFC table.
        assert_eq!((ll.symbol(0), ll.entries[0].num_bits, ll.entries[0].base), (0, 4, 0));
        assert_eq!((ll.symbol(1), ll.entries[1].num_bits, ll.entries[1].base), (0, 4, 16));
        assert_eq!((ll.symbol(2), ll.entries[2].num_bits, ll.entries[2].base), (1, 5, 32));
    }

    #[test]
    fn every_state_reaches_a_valid_state() {
        let of = FseTable::from_distribution(&OFFSET_DEFAULT, OFFSET_DEFAULT_LOG).unwrap();
        for entry in &of.entries {
            let max_next = usize::from(entry.base) + (1 << entry.num_bits) - 1;
            assert!(max_next < of.entries.len());
        }
    }

    #[test]
    fn bad_distributions_rejected() {
        assert!(FseTable::from_distribution(&[3, 3], 2).is_err());
        assert!(FseTable::from_distribution(&[2, 2], 2).is_ok());
    }

    #[test]
    fn read_simple_distribution() {
        // Accuracy log 5 (field 0), then counts for symbols 0 and 1.
        // remaining 32: value 17 is below the threshold 30, so 5 bits.
        // remaining 16: value 17 is written as 17 + 14 in 5 bits.
        let mut w = crate::bitio::BitWriter::new();
        w.write_bits(0, 4);
        w.write_bits(17, 5);
        w.write_bits(31, 5);
        let data = w.finish();
        let (counts, log, used) = read_distribution(&data, 255, 9).unwrap();
        assert_eq!(log, 5);
        assert_eq!(counts, [16, 16]);
        assert_eq!(used, data.len());
    }

    #[test]
    fn accuracy_log_limit() {
        let mut w = crate::bitio::BitWriter::new();
        w.write_bits(5, 4);
        assert!(read_distribution(&w.finish(), 35, 9).is_err());
    }
}
