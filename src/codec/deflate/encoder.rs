// DEFLATE block packer.
//
// One scheduler block becomes a run of non-final DEFLATE blocks:
//   - tokens are cut into sub-blocks of at most MAX_TOKENS_PER_BLOCK
//   - each sub-block is written as stored, fixed or dynamic, whichever
//     costs the fewest bits
//   - the run ends byte-aligned (an empty stored block when needed), so
//     runs can be concatenated in any order of completion
//
// The stream terminator (a final empty stored block) belongs to the
// framing, not to any block.

use log::trace;

use crate::bitio::BitWriter;
use crate::block::{Block, BlockPacker};
use crate::huffman::{self, HuffmanEncoder};
use crate::lz77::Token;

use super::tables::{
    self, BTYPE_DYNAMIC, BTYPE_FIXED, BTYPE_STORED, CODE_LENGTH_ORDER, CODE_LENGTH_SYMBOLS,
    DIST_SYMBOLS, END_OF_BLOCK, LITLEN_SYMBOLS, MAX_STORED_LEN, distance_code, length_code,
};

/// Tokens per DEFLATE block.
pub const MAX_TOKENS_PER_BLOCK: usize = 16_384;

/// Which block type a sub-block was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockChoice {
    Stored,
    Fixed,
    Dynamic,
}

/// Symbol statistics for one sub-block.
struct Histogram {
    litlen: [u32; LITLEN_SYMBOLS],
    dist: [u32; DIST_SYMBOLS],
    /// Extra bits carried by length and distance codes.
    extra_bits: u64,
}

impl Histogram {
    fn of(tokens: &[Token]) -> Self {
        let mut h = Histogram {
            litlen: [0; LITLEN_SYMBOLS],
            dist: [0; DIST_SYMBOLS],
            extra_bits: 0,
        };
        for t in tokens {
            match *t {
                Token::Literal(b) => h.litlen[usize::from(b)] += 1,
                Token::Match { offset, length } => {
                    let (li, lbits, _) = length_code(length as usize);
                    let (di, dbits, _) = distance_code(offset as usize);
                    h.litlen[257 + li] += 1;
                    h.dist[di] += 1;
                    h.extra_bits += u64::from(lbits + dbits);
                }
            }
        }
        h.litlen[END_OF_BLOCK] = 1;
        h
    }
}

/// A dynamic header ready to write.
struct DynamicHeader {
    litlen: HuffmanEncoder,
    dist: HuffmanEncoder,
    hlit: usize,
    hdist: usize,
    /// RLE-coded lengths: (code-length symbol, extra value).
    rle: Vec<(u8, u8)>,
    cl: HuffmanEncoder,
    hclen: usize,
}

impl DynamicHeader {
    fn build(h: &Histogram) -> Self {
        let mut litlen_freq = h.litlen;
        let mut dist_freq = h.dist;
        ensure_two_symbols(&mut litlen_freq);
        ensure_two_symbols(&mut dist_freq);

        let litlen = HuffmanEncoder::from_frequencies(&litlen_freq, huffman::DEFLATE_MAX_BITS);
        let dist = HuffmanEncoder::from_frequencies(&dist_freq, huffman::DEFLATE_MAX_BITS);

        let hlit = last_used(litlen.lengths()).max(257);
        let hdist = last_used(dist.lengths()).max(1);

        let mut all = Vec::with_capacity(hlit + hdist);
        all.extend_from_slice(&litlen.lengths()[..hlit]);
        all.extend_from_slice(&dist.lengths()[..hdist]);
        let rle = rle_lengths(&all);

        let mut cl_freq = [0u32; CODE_LENGTH_SYMBOLS];
        for &(sym, _) in &rle {
            cl_freq[usize::from(sym)] += 1;
        }
        ensure_two_symbols(&mut cl_freq);
        let cl = HuffmanEncoder::from_frequencies(&cl_freq, huffman::CODE_LENGTH_MAX_BITS);
        let hclen = CODE_LENGTH_ORDER
            .iter()
            .rposition(|&s| cl.lengths()[s] != 0)
            .map_or(4, |p| (p + 1).max(4));

        Self {
            litlen,
            dist,
            hlit,
            hdist,
            rle,
            cl,
            hclen,
        }
    }

    fn header_bits(&self) -> u64 {
        let mut bits = 5 + 5 + 4 + 3 * self.hclen as u64;
        for &(sym, _) in &self.rle {
            bits += u64::from(self.cl.lengths()[usize::from(sym)]) + rle_extra_bits(sym) as u64;
        }
        bits
    }

    fn write(&self, w: &mut BitWriter) {
        w.write_bits((self.hlit - 257) as u32, 5);
        w.write_bits((self.hdist - 1) as u32, 5);
        w.write_bits((self.hclen - 4) as u32, 4);
        for &sym in &CODE_LENGTH_ORDER[..self.hclen] {
            w.write_bits(u32::from(self.cl.lengths()[sym]), 3);
        }
        for &(sym, extra) in &self.rle {
            self.cl.write(w, usize::from(sym));
            let n = rle_extra_bits(sym);
            if n > 0 {
                w.write_bits(u32::from(extra), n);
            }
        }
    }
}

/// Give a histogram at least two used symbols so its code is complete.
fn ensure_two_symbols(freqs: &mut [u32]) {
    let mut used = freqs.iter().filter(|&&f| f > 0).count();
    let mut sym = 0;
    while used < 2 && sym < freqs.len() {
        if freqs[sym] == 0 {
            freqs[sym] = 1;
            used += 1;
        }
        sym += 1;
    }
}

fn last_used(lengths: &[u8]) -> usize {
    lengths.iter().rposition(|&l| l != 0).map_or(0, |p| p + 1)
}

fn rle_extra_bits(sym: u8) -> u32 {
    match sym {
        16 => 2,
        17 => 3,
        18 => 7,
        _ => 0,
    }
}

/// Run-length code a length sequence with symbols 16, 17 and 18.
fn rle_lengths(lengths: &[u8]) -> Vec<(u8, u8)> {
    let mut out = Vec::with_capacity(lengths.len());
    let mut i = 0;
    while i < lengths.len() {
        let v = lengths[i];
        let run = lengths[i..].iter().take_while(|&&l| l == v).count();
        let mut n = run;
        if v == 0 {
            while n >= 11 {
                let take = n.min(138);
                out.push((18, (take - 11) as u8));
                n -= take;
            }
            if n >= 3 {
                out.push((17, (n - 3) as u8));
                n = 0;
            }
            out.extend(std::iter::repeat_n((0, 0), n));
        } else {
            out.push((v, 0));
            n -= 1;
            while n >= 3 {
                let take = n.min(6);
                out.push((16, (take - 3) as u8));
                n -= take;
            }
            out.extend(std::iter::repeat_n((v, 0), n));
        }
        i += run;
    }
    out
}

// ---------------------------------------------------------------------------
// Packer
// ---------------------------------------------------------------------------

/// Writes one scheduler block as byte-aligned, non-final DEFLATE blocks.
#[derive(Debug, Default)]
pub struct DeflatePacker {
    /// Block types chosen for the most recent `pack` call.
    pub choices: Vec<BlockChoice>,
}

impl DeflatePacker {
    pub fn new() -> Self {
        Self::default()
    }

    fn pack_sub_block(&mut self, w: &mut BitWriter, tokens: &[Token], raw: &[u8]) {
        let h = Histogram::of(tokens);
        let fixed = tables::fixed_codes();

        let stored_bits = stored_cost(w.bit_len(), raw.len());
        let fixed_bits = 3 + fixed.litlen_enc.cost(&h.litlen) + fixed.dist_enc.cost(&h.dist) + h.extra_bits;
        let dynamic = DynamicHeader::build(&h);
        let dynamic_bits = 3
            + dynamic.header_bits()
            + dynamic.litlen.cost(&h.litlen)
            + dynamic.dist.cost(&h.dist)
            + h.extra_bits;

        let choice = if stored_bits <= fixed_bits.min(dynamic_bits) {
            BlockChoice::Stored
        } else if fixed_bits <= dynamic_bits {
            BlockChoice::Fixed
        } else {
            BlockChoice::Dynamic
        };
        trace!(
            "deflate sub-block: {} tokens, stored={stored_bits} fixed={fixed_bits} dynamic={dynamic_bits} -> {choice:?}",
            tokens.len()
        );
        self.choices.push(choice);

        match choice {
            BlockChoice::Stored => write_stored(w, raw),
            BlockChoice::Fixed => {
                w.write_bits(0, 1);
                w.write_bits(BTYPE_FIXED, 2);
                write_tokens(w, tokens, &fixed.litlen_enc, &fixed.dist_enc);
            }
            BlockChoice::Dynamic => {
                w.write_bits(0, 1);
                w.write_bits(BTYPE_DYNAMIC, 2);
                dynamic.write(w);
                write_tokens(w, tokens, &dynamic.litlen, &dynamic.dist);
            }
        }
    }
}

impl BlockPacker for DeflatePacker {
    fn pack(&mut self, block: &Block, raw: &[u8], out: &mut Vec<u8>) {
        self.choices.clear();
        let mut w = BitWriter::with_capacity(raw.len() / 2 + 16);
        let mut pos = 0usize;
        for chunk in block.tokens.chunks(MAX_TOKENS_PER_BLOCK) {
            let len: usize = chunk.iter().map(Token::output_len).sum();
            self.pack_sub_block(&mut w, chunk, &raw[pos..pos + len]);
            pos += len;
        }
        debug_assert_eq!(pos, raw.len());
        if !w.is_aligned() {
            // Sync flush: empty non-final stored block.
            write_stored(&mut w, &[]);
        }
        out.extend_from_slice(&w.finish());
    }
}

/// Bits needed to store `len` bytes starting at bit offset `bit_pos`.
fn stored_cost(bit_pos: u64, len: usize) -> u64 {
    let chunks = len.div_ceil(MAX_STORED_LEN).max(1) as u64;
    // First header may need padding to reach a byte boundary.
    let first_pad = (8 - (bit_pos + 3) % 8) % 8;
    let later_pad = 5;
    3 * chunks + first_pad + later_pad * (chunks - 1) + 32 * chunks + 8 * len as u64
}

/// Stored blocks (non-final) covering `raw`; empty `raw` writes one empty block.
fn write_stored(w: &mut BitWriter, raw: &[u8]) {
    let mut chunks = raw.chunks(MAX_STORED_LEN).peekable();
    if chunks.peek().is_none() {
        write_stored_header(w, 0);
        return;
    }
    for chunk in chunks {
        write_stored_header(w, chunk.len());
        w.write_bytes(chunk);
    }
}

fn write_stored_header(w: &mut BitWriter, len: usize) {
    w.write_bits(0, 1);
    w.write_bits(BTYPE_STORED, 2);
    w.align();
    let len = len as u16;
    w.write_bytes(&len.to_le_bytes());
    w.write_bytes(&(!len).to_le_bytes());
}

fn write_tokens(w: &mut BitWriter, tokens: &[Token], litlen: &HuffmanEncoder, dist: &HuffmanEncoder) {
    for t in tokens {
        match *t {
            Token::Literal(b) => litlen.write(w, usize::from(b)),
            Token::Match { offset, length } => {
                let (li, lbits, lextra) = length_code(length as usize);
                litlen.write(w, 257 + li);
                w.write_bits(lextra, lbits);
                let (di, dbits, dextra) = distance_code(offset as usize);
                dist.write(w, di);
                w.write_bits(dextra, dbits);
            }
        }
    }
    litlen.write(w, END_OF_BLOCK);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
