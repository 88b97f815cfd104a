// Little-endian base-128 variable-length integers (LEB128).
//
// Least-significant group first; bit 7 set on every byte except the last.
// Snappy stores the uncompressed block length this way.

use crate::error::{Error, Result};

/// Maximum encoded length for a 32-bit value (ceil(32/7) = 5).
pub const MAX_VARINT32_LEN: usize = 5;

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT64_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append `num` to `out`. Returns the number of bytes written.
pub fn write_u64(out: &mut Vec<u8>, mut num: u64) -> usize {
    let start = out.len();
    while num >= 0x80 {
        out.push((num as u8 & 0x7F) | 0x80);
        num >>= 7;
    }
    out.push(num as u8);
    out.len() - start
}

/// Append `num` to `out`. Returns the number of bytes written.
pub fn write_u32(out: &mut Vec<u8>, num: u32) -> usize {
    write_u64(out, u64::from(num))
}

/// Encoded length of `num` without writing it.
pub fn encoded_len(num: u64) -> usize {
    let bits = 64 - num.max(1).leading_zeros() as usize;
    bits.div_ceil(7)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a `u32` from the front of `data`.
/// Returns `(value, bytes_consumed)`.
pub fn read_u32(data: &[u8]) -> Result<(u32, usize)> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT32_LEN) {
        val |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            let val = u32::try_from(val)
                .map_err(|_| Error::corrupt("varint overflows 32 bits"))?;
            return Ok((val, i + 1));
        }
    }
    if data.len() < MAX_VARINT32_LEN {
        Err(Error::truncated(data.len() + 1, data.len()))
    } else {
        Err(Error::corrupt("varint longer than 5 bytes"))
    }
}

/// Decode a `u64` from the front of `data`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize)> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT64_LEN) {
        let group = u64::from(byte & 0x7F);
        if i == MAX_VARINT64_LEN - 1 && group > 1 {
            return Err(Error::corrupt("varint overflows 64 bits"));
        }
        val |= group << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    if data.len() < MAX_VARINT64_LEN {
        Err(Error::truncated(data.len() + 1, data.len()))
    } else {
        Err(Error::corrupt("varint longer than 10 bytes"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
