// DEFLATE decoder.
//
// `inflate_block` decodes one block (stored, fixed or dynamic) and appends
// its output; every distance is checked against the bytes already in the
// output buffer, which holds the history window.  Two drivers sit on top:
//   - `inflate`: a whole stream in memory, up to and including BFINAL
//   - `InflateStream`: one block per call, keeping the last 32 KiB as
//     history and a sub-byte bit offset between calls; a truncated block
//     rolls the history back so the call can be retried

use crate::bitio::BitReader;
use crate::codec::Decoded;
use crate::error::{Error, Result};
use crate::huffman::HuffmanDecoder;
use crate::lz77::copy_within_overlapping;

use super::tables::{
    self, BTYPE_DYNAMIC, BTYPE_FIXED, BTYPE_STORED, CODE_LENGTH_ORDER, CODE_LENGTH_SYMBOLS,
    DIST_BASE, DIST_EXTRA, END_OF_BLOCK, LEN_BASE, LEN_EXTRA,
};

/// History a streaming decoder keeps between blocks.
pub const WINDOW_SIZE: usize = 32 * 1024;

/// Decode one block from `r`, appending to `out`.  Returns BFINAL.
pub fn inflate_block(r: &mut BitReader<'_>, out: &mut Vec<u8>) -> Result<bool> {
    let last = r.read_bits(1)? == 1;
    match r.read_bits(2)? {
        BTYPE_STORED => {
            r.align();
            let header = r.read_aligned_bytes(4)?;
            let len = u16::from_le_bytes([header[0], header[1]]);
            let nlen = u16::from_le_bytes([header[2], header[3]]);
            if len != !nlen {
                return Err(Error::corrupt(format!(
                    "stored block length {len:#06x} does not match complement {nlen:#06x}"
                )));
            }
            out.extend_from_slice(r.read_aligned_bytes(usize::from(len))?);
        }
        BTYPE_FIXED => {
            let fixed = tables::fixed_codes();
            decode_symbols(r, out, &fixed.litlen_dec, &fixed.dist_dec)?;
        }
        BTYPE_DYNAMIC => {
            let (litlen, dist) = read_dynamic_header(r)?;
            decode_symbols(r, out, &litlen, &dist)?;
        }
        other => return Err(Error::UnsupportedBlockType(other as u8)),
    }
    Ok(last)
}

fn read_dynamic_header(r: &mut BitReader<'_>) -> Result<(HuffmanDecoder, HuffmanDecoder)> {
    let hlit = r.read_bits(5)? as usize + 257;
    let hdist = r.read_bits(5)? as usize + 1;
    let hclen = r.read_bits(4)? as usize + 4;
    if hlit > 286 || hdist > 30 {
        return Err(Error::corrupt(format!(
            "dynamic header declares {hlit} literal/length and {hdist} distance codes"
        )));
    }

    let mut cl_lengths = [0u8; CODE_LENGTH_SYMBOLS];
    for &sym in &CODE_LENGTH_ORDER[..hclen] {
        cl_lengths[sym] = r.read_bits(3)? as u8;
    }
    let cl = HuffmanDecoder::from_lengths(&cl_lengths)?;

    let total = hlit + hdist;
    let mut lengths = Vec::with_capacity(total);
    while lengths.len() < total {
        let sym = cl.decode(r)?;
        let (value, repeat) = match sym {
            0..=15 => (sym as u8, 1),
            16 => {
                let Some(&prev) = lengths.last() else {
                    return Err(Error::corrupt("length repeat with no previous length"));
                };
                (prev, 3 + r.read_bits(2)? as usize)
            }
            17 => (0, 3 + r.read_bits(3)? as usize),
            18 => (0, 11 + r.read_bits(7)? as usize),
            _ => return Err(Error::corrupt(format!("invalid code-length symbol {sym}"))),
        };
        if lengths.len() + repeat > total {
            return Err(Error::corrupt("code-length repeat overruns the header"));
        }
        lengths.extend(std::iter::repeat_n(value, repeat));
    }
    if lengths[END_OF_BLOCK] == 0 {
        return Err(Error::corrupt("dynamic block has no end-of-block code"));
    }
    let litlen = HuffmanDecoder::from_lengths(&lengths[..hlit])?;
    let dist = HuffmanDecoder::from_lengths(&lengths[hlit..])?;
    Ok((litlen, dist))
}

fn decode_symbols(
    r: &mut BitReader<'_>,
    out: &mut Vec<u8>,
    litlen: &HuffmanDecoder,
    dist: &HuffmanDecoder,
) -> Result<()> {
    loop {
        let sym = usize::from(litlen.decode(r)?);
        if sym < END_OF_BLOCK {
            out.push(sym as u8);
            continue;
        }
        if sym == END_OF_BLOCK {
            return Ok(());
        }
        let li = sym - 257;
        if li >= LEN_BASE.len() {
            return Err(Error::corrupt(format!("invalid length symbol {sym}")));
        }
        let length = usize::from(LEN_BASE[li]) + r.read_bits(u32::from(LEN_EXTRA[li]))? as usize;

        let di = usize::from(dist.decode(r)?);
        if di >= DIST_BASE.len() {
            return Err(Error::corrupt(format!("invalid distance symbol {di}")));
        }
        let distance = usize::from(DIST_BASE[di]) + r.read_bits(u32::from(DIST_EXTRA[di]))? as usize;
        if distance > out.len() {
            return Err(Error::corrupt(format!(
                "distance {distance} exceeds {} bytes of history",
                out.len()
            )));
        }
        copy_within_overlapping(out, distance, length);
    }
}

/// Inflate a complete stream.  Returns the output and the number of input
/// bytes consumed (the final block is padded to a byte boundary).
pub fn inflate(data: &[u8]) -> Result<(Vec<u8>, usize)> {
    inflate_with(data, |_| Ok(()))
}

/// [`inflate`], calling `before_block` with the output so far ahead of
/// every DEFLATE block.  An error from the callback stops decoding.
pub fn inflate_with<F>(data: &[u8], mut before_block: F) -> Result<(Vec<u8>, usize)>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut r = BitReader::new(data);
    let mut out = Vec::with_capacity(data.len() * 3);
    loop {
        before_block(&out)?;
        if inflate_block(&mut r, &mut out)? {
            break;
        }
    }
    r.align();
    Ok((out, r.byte_position()))
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Block-at-a-time inflater with retained history.
#[derive(Debug, Default, Clone)]
pub struct InflateStream {
    history: Vec<u8>,
    /// Bits of the first input byte already consumed by the previous block.
    bit_skip: u32,
    finished: bool,
}

impl InflateStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the final block has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode the next block from `input`.
    ///
    /// `input` starts at the byte holding the next unread bit.  On error
    /// the stream state is unchanged.
    pub fn step(&mut self, input: &[u8]) -> Result<Decoded> {
        if self.finished {
            return Ok(Decoded::default());
        }
        let mut r = BitReader::new(input);
        let base = self.history.len();
        let result = r
            .read_bits(self.bit_skip)
            .and_then(|_| inflate_block(&mut r, &mut self.history));
        let last = match result {
            Ok(last) => last,
            Err(e) => {
                self.history.truncate(base);
                return Err(e);
            }
        };

        let bits = r.bit_position();
        let consumed = if last {
            self.finished = true;
            self.bit_skip = 0;
            bits.div_ceil(8) as usize
        } else {
            self.bit_skip = (bits % 8) as u32;
            (bits / 8) as usize
        };

        let output = self.history[base..].to_vec();
        if self.history.len() > WINDOW_SIZE {
            let excess = self.history.len() - WINDOW_SIZE;
            self.history.drain(..excess);
        }
        Ok(Decoded { consumed, output })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_block() {
        let data = [0x01, 0x03, 0x00, 0xFC, 0xFF, b'a', b'b', b'c'];
        let (out, used) = inflate(&data).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(used, data.len());
    }

    #[test]
    fn fixed_block_from_zlib() {
        // zlib.compress(b"hello") without header and trailer.
        let data = [0xCB, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00];
        assert_eq!(inflate(&data).unwrap().0, b"hello");
    }

    #[test]
    fn stored_length_complement_checked() {
        let data = [0x01, 0x03, 0x00, 0xFC, 0xFE, b'a', b'b', b'c'];
        assert!(matches!(inflate(&data), Err(Error::CorruptStream(_))));
    }

    #[test]
    fn callback_runs_before_each_block() {
        // Two stored blocks, "ab" then final "c".
        let data = [0x00, 0x02, 0x00, 0xFD, 0xFF, b'a', b'b', 0x01, 0x01, 0x00, 0xFE, 0xFF, b'c'];
        let mut seen = Vec::new();
        let (out, used) = inflate_with(&data, |produced| {
            seen.push(produced.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(used, data.len());
        assert_eq!(seen, [0, 2]);

        let err = inflate_with(&data, |produced| {
            if produced.is_empty() {
                Ok(())
            } else {
                Err(Error::Cancelled)
            }
        })
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn reserved_block_type() {
        assert!(matches!(inflate(&[0x07]), Err(Error::UnsupportedBlockType(3))));
    }

    #[test]
    fn distance_beyond_history() {
        // Fixed block: length 3 (symbol 257 = 0000001), distance code 0 (00000).
        let mut w = crate::bitio::BitWriter::new();
        w.write_bits(1, 1);
        w.write_bits(1, 2);
        let fixed = tables::fixed_codes();
        fixed.litlen_enc.write(&mut w, 257);
        fixed.dist_enc.write(&mut w, 0);
        fixed.litlen_enc.write(&mut w, 256);
        let data = w.finish();
        assert!(matches!(inflate(&data), Err(Error::CorruptStream(_))));
    }

    #[test]
    fn truncated_stream() {
        let data = [0xCB, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00];
        for cut in 0..data.len() - 1 {
            assert!(inflate(&data[..cut]).is_err(), "prefix {cut} decoded");
        }
    }

    #[test]
    fn stream_rolls_back_on_truncation() {
        // Two stored blocks: non-final "ab", final "cd".
        let data = [
            0x00, 0x02, 0x00, 0xFD, 0xFF, b'a', b'b', 0x01, 0x02, 0x00, 0xFD, 0xFF, b'c', b'd',
        ];
        let mut s = InflateStream::new();
        assert!(s.step(&data[..6]).unwrap_err().is_truncation());
        let first = s.step(&data).unwrap();
        assert_eq!(first.output, b"ab");
        assert_eq!(first.consumed, 7);
        let second = s.step(&data[7..]).unwrap();
        assert_eq!(second.output, b"cd");
        assert!(s.is_finished());
    }
}
