// DEFLATE (RFC 1951) alphabets and fixed codes.

use std::sync::OnceLock;

use crate::huffman::{HuffmanDecoder, HuffmanEncoder};

pub const BTYPE_STORED: u32 = 0;
pub const BTYPE_FIXED: u32 = 1;
pub const BTYPE_DYNAMIC: u32 = 2;

pub const END_OF_BLOCK: usize = 256;

/// Literal/length symbols a dynamic header may declare (257..=286).
pub const LITLEN_SYMBOLS: usize = 286;
/// Distance symbols a dynamic header may declare (1..=30).
pub const DIST_SYMBOLS: usize = 30;
pub const CODE_LENGTH_SYMBOLS: usize = 19;

/// Fixed-code alphabet sizes (including the two unused symbols of each).
pub const FIXED_LITLEN_SYMBOLS: usize = 288;
pub const FIXED_DIST_SYMBOLS: usize = 32;

/// Longest stored-block payload.
pub const MAX_STORED_LEN: usize = 65_535;

/// Order in which code-length code lengths are transmitted.
pub const CODE_LENGTH_ORDER: [usize; CODE_LENGTH_SYMBOLS] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

pub const LEN_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

pub const LEN_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

pub const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

pub const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// `(code index, extra bit count, extra value)` for a match length in 3..=258.
///
/// The literal/length symbol is `257 + code index`.
#[inline]
pub fn length_code(length: usize) -> (usize, u32, u32) {
    let idx = LEN_BASE.partition_point(|&b| usize::from(b) <= length) - 1;
    (
        idx,
        u32::from(LEN_EXTRA[idx]),
        (length - usize::from(LEN_BASE[idx])) as u32,
    )
}

/// `(distance symbol, extra bit count, extra value)` for a distance in 1..=32768.
#[inline]
pub fn distance_code(distance: usize) -> (usize, u32, u32) {
    let idx = DIST_BASE.partition_point(|&b| usize::from(b) <= distance) - 1;
    (
        idx,
        u32::from(DIST_EXTRA[idx]),
        (distance - usize::from(DIST_BASE[idx])) as u32,
    )
}

// ---------------------------------------------------------------------------
// Fixed codes
// ---------------------------------------------------------------------------

pub fn fixed_litlen_lengths() -> [u8; FIXED_LITLEN_SYMBOLS] {
    let mut lengths = [8u8; FIXED_LITLEN_SYMBOLS];
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths
}

pub fn fixed_dist_lengths() -> [u8; FIXED_DIST_SYMBOLS] {
    [5u8; FIXED_DIST_SYMBOLS]
}

pub struct FixedCodes {
    pub litlen_enc: HuffmanEncoder,
    pub dist_enc: HuffmanEncoder,
    pub litlen_dec: HuffmanDecoder,
    pub dist_dec: HuffmanDecoder,
}

/// Process-wide fixed literal/length and distance codes.
pub fn fixed_codes() -> &'static FixedCodes {
    static FIXED: OnceLock<FixedCodes> = OnceLock::new();
    FIXED.get_or_init(|| {
        let lit = fixed_litlen_lengths();
        let dist = fixed_dist_lengths();
        FixedCodes {
            litlen_enc: HuffmanEncoder::from_lengths(&lit),
            dist_enc: HuffmanEncoder::from_lengths(&dist),
            litlen_dec: HuffmanDecoder::from_lengths(&lit)
                .unwrap_or_else(|_| unreachable!("fixed literal code is complete")),
            dist_dec: HuffmanDecoder::from_lengths(&dist)
                .unwrap_or_else(|_| unreachable!("fixed distance code is complete")),
        }
    })
}
