// Zstandard sequences section (RFC 8878 section 3.1.1.3.2) and sequence
// execution.
//
// Each sequence is (literal length, match length, offset value).  Codes
// come from three interleaved FSE states; extra bits follow each code.
// Offset values 1-3 select a repeat offset, shifted by one when the
// literal length is zero.

use crate::bitio::ReverseBitReader;
use crate::error::{Error, Result};
use crate::lz77::copy_within_overlapping;

use super::fse::{self, FseTable};
use super::literals::MAX_BLOCK_SIZE;

const LITERAL_LENGTH_MAX_SYMBOL: usize = 35;
const MATCH_LENGTH_MAX_SYMBOL: usize = 52;
const OFFSET_MAX_SYMBOL: usize = 31;

const LITERAL_LENGTH_MAX_LOG: u8 = 9;
const MATCH_LENGTH_MAX_LOG: u8 = 9;
const OFFSET_MAX_LOG: u8 = 8;

/// Repeat offsets at the start of every frame.
pub const INITIAL_REPEAT_OFFSETS: [u32; 3] = [1, 4, 8];

/// (baseline, extra bits) for literal length codes 16..=35.
const LITERAL_LENGTH_EXTRA: [(u32, u8); 20] = [
    (16, 1),
    (18, 1),
    (20, 1),
    (22, 1),
    (24, 2),
    (28, 2),
    (32, 3),
    (40, 3),
    (48, 4),
    (64, 6),
    (128, 7),
    (256, 8),
    (512, 9),
    (1024, 10),
    (2048, 11),
    (4096, 12),
    (8192, 13),
    (16384, 14),
    (32768, 15),
    (65536, 16),
];

/// (baseline, extra bits) for match length codes 32..=52.
const MATCH_LENGTH_EXTRA: [(u32, u8); 21] = [
    (35, 1),
    (37, 1),
    (39, 1),
    (41, 1),
    (43, 2),
    (47, 2),
    (51, 3),
    (59, 3),
    (67, 4),
    (83, 4),
    (99, 5),
    (131, 7),
    (259, 8),
    (515, 9),
    (1027, 10),
    (2051, 11),
    (4099, 12),
    (8195, 13),
    (16387, 14),
    (32771, 15),
    (65539, 16),
];

fn literal_length_code(code: u8) -> (u32, u8) {
    match code {
        0..=15 => (u32::from(code), 0),
        _ => LITERAL_LENGTH_EXTRA[usize::from(code) - 16],
    }
}

fn match_length_code(code: u8) -> (u32, u8) {
    match code {
        0..=31 => (u32::from(code) + 3, 0),
        _ => MATCH_LENGTH_EXTRA[usize::from(code) - 32],
    }
}

/// One decoded sequence; `offset_value` is not yet resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    pub literal_len: u32,
    pub match_len: u32,
    pub offset_value: u32,
}

/// Tables kept across the blocks of a frame for repeat mode.
#[derive(Debug, Clone, Default)]
pub struct SequenceTables {
    literal_lengths: Option<FseTable>,
    offsets: Option<FseTable>,
    match_lengths: Option<FseTable>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    LiteralLength,
    Offset,
    MatchLength,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Self::LiteralLength => "literal length",
            Self::Offset => "offset",
            Self::MatchLength => "match length",
        }
    }

    fn limits(self) -> (usize, u8) {
        match self {
            Self::LiteralLength => (LITERAL_LENGTH_MAX_SYMBOL, LITERAL_LENGTH_MAX_LOG),
            Self::Offset => (OFFSET_MAX_SYMBOL, OFFSET_MAX_LOG),
            Self::MatchLength => (MATCH_LENGTH_MAX_SYMBOL, MATCH_LENGTH_MAX_LOG),
        }
    }

    fn predefined(self) -> Result<FseTable> {
        match self {
            Self::LiteralLength => {
                FseTable::from_distribution(&fse::LITERAL_LENGTH_DEFAULT, fse::LITERAL_LENGTH_DEFAULT_LOG)
            }
            Self::Offset => FseTable::from_distribution(&fse::OFFSET_DEFAULT, fse::OFFSET_DEFAULT_LOG),
            Self::MatchLength => {
                FseTable::from_distribution(&fse::MATCH_LENGTH_DEFAULT, fse::MATCH_LENGTH_DEFAULT_LOG)
            }
        }
    }
}

impl SequenceTables {
    fn slot(&mut self, field: Field) -> &mut Option<FseTable> {
        match field {
            Field::LiteralLength => &mut self.literal_lengths,
            Field::Offset => &mut self.offsets,
            Field::MatchLength => &mut self.match_lengths,
        }
    }

    /// Resolve one compression mode, reading any table description from
    /// the front of `data`.  Returns the bytes consumed.
    fn load(&mut self, field: Field, mode: u8, data: &[u8]) -> Result<usize> {
        let (max_symbol, max_log) = field.limits();
        let (table, used) = match mode {
            0 => (field.predefined()?, 0),
            1 => {
                let &symbol = data
                    .first()
                    .ok_or_else(|| Error::corrupt("rle sequence mode overruns the block"))?;
                if usize::from(symbol) > max_symbol {
                    return Err(Error::corrupt(format!("{} code {symbol} out of range", field.name())));
                }
                (FseTable::rle(symbol), 1)
            }
            2 => FseTable::read(data, max_symbol, max_log)?,
            _ => {
                if self.slot(field).is_none() {
                    return Err(Error::corrupt(format!(
                        "repeat {} table with no previous table",
                        field.name()
                    )));
                }
                return Ok(0);
            }
        };
        *self.slot(field) = Some(table);
        Ok(used)
    }
}

/// Decode the sequences section (the rest of the block after the literals).
pub fn read_sequences(data: &[u8], tables: &mut SequenceTables) -> Result<Vec<Sequence>> {
    let byte = |i: usize| -> Result<usize> {
        data.get(i)
            .map(|&b| usize::from(b))
            .ok_or_else(|| Error::corrupt("sequences header overruns the block"))
    };
    let b0 = byte(0)?;
    let (count, mut pos) = match b0 {
        0 => {
            if data.len() != 1 {
                return Err(Error::corrupt("bytes after an empty sequences section"));
            }
            return Ok(Vec::new());
        }
        1..=127 => (b0, 1),
        128..=254 => (((b0 - 128) << 8) + byte(1)?, 2),
        _ => (byte(1)? + (byte(2)? << 8) + 0x7F00, 3),
    };

    let modes = byte(pos)? as u8;
    pos += 1;
    if modes & 0b11 != 0 {
        return Err(Error::corrupt("reserved bits set in sequence compression modes"));
    }
    for (field, shift) in [
        (Field::LiteralLength, 6),
        (Field::Offset, 4),
        (Field::MatchLength, 2),
    ] {
        pos += tables.load(field, (modes >> shift) & 0b11, &data[pos..])?;
    }

    let (Some(ll_table), Some(of_table), Some(ml_table)) =
        (&tables.literal_lengths, &tables.offsets, &tables.match_lengths)
    else {
        return Err(Error::corrupt("sequence tables missing"));
    };

    let mut bits = ReverseBitReader::new(&data[pos..])?;
    let mut ll_state = ll_table.init_state(&mut bits);
    let mut of_state = of_table.init_state(&mut bits);
    let mut ml_state = ml_table.init_state(&mut bits);

    let mut sequences = Vec::with_capacity(count);
    for i in 0..count {
        let of_code = of_table.symbol(of_state);
        let ll_code = ll_table.symbol(ll_state);
        let ml_code = ml_table.symbol(ml_state);
        if usize::from(of_code) > OFFSET_MAX_SYMBOL
            || usize::from(ll_code) > LITERAL_LENGTH_MAX_SYMBOL
            || usize::from(ml_code) > MATCH_LENGTH_MAX_SYMBOL
        {
            return Err(Error::corrupt("sequence code out of range"));
        }

        let offset_value = (1u64 << of_code) + bits.read_bits(u32::from(of_code));
        let (ml_base, ml_bits) = match_length_code(ml_code);
        let match_len = ml_base + bits.read_bits(u32::from(ml_bits)) as u32;
        let (ll_base, ll_bits) = literal_length_code(ll_code);
        let literal_len = ll_base + bits.read_bits(u32::from(ll_bits)) as u32;

        sequences.push(Sequence {
            literal_len,
            match_len,
            offset_value: u32::try_from(offset_value)
                .map_err(|_| Error::corrupt("sequence offset out of range"))?,
        });

        if i + 1 < count {
            ll_state = ll_table.update(ll_state, &mut bits);
            ml_state = ml_table.update(ml_state, &mut bits);
            of_state = of_table.update(of_state, &mut bits);
        }
        if bits.is_overflowed() {
            return Err(Error::corrupt("sequence bitstream ended early"));
        }
    }
    if !bits.is_empty() {
        return Err(Error::corrupt(format!(
            "{} bits left after the last sequence",
            bits.bits_left()
        )));
    }
    Ok(sequences)
}

/// Apply sequences to `out`, whose existing content is history visible to
/// matches.  `window` bounds match offsets.
pub fn execute_sequences(
    sequences: &[Sequence],
    literals: &[u8],
    reps: &mut [u32; 3],
    window: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let start = out.len();
    let mut lit = 0usize;
    for seq in sequences {
        let ll = seq.literal_len as usize;
        let end = lit + ll;
        let bytes = literals
            .get(lit..end)
            .ok_or_else(|| Error::corrupt("sequence literal length exceeds the literals"))?;
        out.extend_from_slice(bytes);
        lit = end;

        let offset = resolve_offset(seq.offset_value, ll == 0, reps) as usize;
        if offset == 0 || offset > out.len() || offset > window {
            return Err(Error::corrupt(format!(
                "match offset {offset} reaches before the window ({} bytes available)",
                out.len().min(window)
            )));
        }
        let ml = seq.match_len as usize;
        if out.len() - start + ml > MAX_BLOCK_SIZE {
            return Err(Error::corrupt("block output exceeds 128 KiB"));
        }
        copy_within_overlapping(out, offset, ml);
    }
    out.extend_from_slice(&literals[lit..]);
    if out.len() - start > MAX_BLOCK_SIZE {
        return Err(Error::corrupt("block output exceeds 128 KiB"));
    }
    Ok(())
}

fn resolve_offset(value: u32, no_literals: bool, reps: &mut [u32; 3]) -> u32 {
    if value > 3 {
        let offset = value - 3;
        *reps = [offset, reps[0], reps[1]];
        return offset;
    }
    let idx = value as usize - 1 + usize::from(no_literals);
    if idx == 0 {
        return reps[0];
    }
    let offset = if idx == 3 {
        reps[0].wrapping_sub(1)
    } else {
        reps[idx]
    };
    if idx > 1 {
        reps[2] = reps[1];
    }
    reps[1] = reps[0];
    reps[0] = offset;
    offset
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
