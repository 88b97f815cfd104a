// Streaming checksums.
//
// Every algorithm is exposed through one incremental accumulator
// (`Checksum`) plus one-shot helpers.  CRC-32 and Adler-32 are linear over
// byte ranges, so per-block partials computed on different engines can be
// merged in block order with `combine`; xxHash has no combine and is fed
// sequentially by the caller.

pub mod crc32c;

use xxhash_rust::xxh32::Xxh32;
use xxhash_rust::xxh64::Xxh64;

/// Adler-32 modulus.
const ADLER_BASE: u64 = 65521;

/// Checksum algorithms used by the supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// CRC-32 (IEEE 802.3), used by GZIP.
    Crc32,
    /// Adler-32, used by zlib.
    Adler32,
    /// CRC-32C (Castagnoli), used by Snappy framing.
    Crc32c,
    /// xxHash32 with seed 0, used by LZ4 frames.
    Xxh32,
    /// xxHash64 with seed 0 truncated to the low 32 bits, used by Zstandard.
    Xxh64,
}

impl Algorithm {
    /// Whether partial checksums over adjacent ranges can be merged.
    pub fn combinable(self) -> bool {
        matches!(self, Algorithm::Crc32 | Algorithm::Adler32)
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

enum State {
    Crc32(crc32fast::Hasher),
    Adler32(simd_adler32::Adler32),
    Crc32c(u32),
    Xxh32(Xxh32),
    Xxh64(Xxh64),
}

/// Running checksum state owned by one stream.
pub struct Checksum {
    state: State,
    len: u64,
}

impl Checksum {
    /// Fresh accumulator for `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Crc32 => State::Crc32(crc32fast::Hasher::new()),
            Algorithm::Adler32 => State::Adler32(simd_adler32::Adler32::new()),
            Algorithm::Crc32c => State::Crc32c(0),
            Algorithm::Xxh32 => State::Xxh32(Xxh32::new(0)),
            Algorithm::Xxh64 => State::Xxh64(Xxh64::new(0)),
        };
        Self { state, len: 0 }
    }

    /// The algorithm this accumulator computes.
    pub fn algorithm(&self) -> Algorithm {
        match self.state {
            State::Crc32(_) => Algorithm::Crc32,
            State::Adler32(_) => Algorithm::Adler32,
            State::Crc32c(_) => Algorithm::Crc32c,
            State::Xxh32(_) => Algorithm::Xxh32,
            State::Xxh64(_) => Algorithm::Xxh64,
        }
    }

    /// Feed the next byte range in stream order.
    pub fn update(&mut self, data: &[u8]) {
        self.len += data.len() as u64;
        match &mut self.state {
            State::Crc32(h) => h.update(data),
            State::Adler32(h) => h.write(data),
            State::Crc32c(crc) => *crc = crc32c::update(*crc, data),
            State::Xxh32(h) => h.update(data),
            State::Xxh64(h) => h.update(data),
        }
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no bytes have been fed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current 32-bit value (the accumulator stays usable).
    pub fn value(&self) -> u32 {
        match &self.state {
            State::Crc32(h) => h.clone().finalize(),
            State::Adler32(h) => h.finish(),
            State::Crc32c(crc) => *crc,
            State::Xxh32(h) => h.digest(),
            State::Xxh64(h) => h.digest() as u32,
        }
    }

    /// The current value as a combinable partial.
    pub fn partial(&self) -> Partial {
        Partial {
            value: self.value(),
            len: self.len,
        }
    }
}

/// One-shot checksum of `data`.
pub fn checksum(algorithm: Algorithm, data: &[u8]) -> u32 {
    match algorithm {
        Algorithm::Crc32 => crc32fast::hash(data),
        Algorithm::Adler32 => adler32(data),
        Algorithm::Crc32c => crc32c::checksum(data),
        Algorithm::Xxh32 => xxhash_rust::xxh32::xxh32(data, 0),
        Algorithm::Xxh64 => xxhash_rust::xxh64::xxh64(data, 0) as u32,
    }
}

/// One-shot Adler-32.
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = simd_adler32::Adler32::new();
    hasher.write(data);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Partial checksums
// ---------------------------------------------------------------------------

/// Checksum of one contiguous byte range, mergeable with its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partial {
    pub value: u32,
    pub len: u64,
}

impl Partial {
    /// Partial over `data`.
    pub fn of(algorithm: Algorithm, data: &[u8]) -> Self {
        Self {
            value: checksum(algorithm, data),
            len: data.len() as u64,
        }
    }

    /// Partial of the empty range.
    pub fn empty(algorithm: Algorithm) -> Self {
        Self::of(algorithm, &[])
    }
}

/// Merge partials over adjacent ranges, in order.
///
/// Returns `None` for algorithms without a combine function.
pub fn combine<I>(algorithm: Algorithm, parts: I) -> Option<Partial>
where
    I: IntoIterator<Item = Partial>,
{
    if !algorithm.combinable() {
        return None;
    }
    let mut acc = Partial::empty(algorithm);
    for next in parts {
        acc = match algorithm {
            Algorithm::Crc32 => Partial {
                value: crc32_combine(acc.value, next.value, next.len),
                len: acc.len + next.len,
            },
            Algorithm::Adler32 => Partial {
                value: adler32_combine(acc.value, next.value, next.len),
                len: acc.len + next.len,
            },
            _ => return None,
        };
    }
    Some(acc)
}

/// CRC-32 of `A || B` from `crc(A)`, `crc(B)` and `len(B)`.
pub fn crc32_combine(crc_a: u32, crc_b: u32, len_b: u64) -> u32 {
    let mut a = crc32fast::Hasher::new_with_initial(crc_a);
    let b = crc32fast::Hasher::new_with_initial_len(crc_b, len_b);
    a.combine(&b);
    a.finalize()
}

/// Adler-32 of `A || B` from `adler(A)`, `adler(B)` and `len(B)`.
pub fn adler32_combine(adler_a: u32, adler_b: u32, len_b: u64) -> u32 {
    let rem = len_b % ADLER_BASE;
    let a_lo = u64::from(adler_a & 0xffff);
    let a_hi = u64::from(adler_a >> 16);
    let b_lo = u64::from(adler_b & 0xffff);
    let b_hi = u64::from(adler_b >> 16);

    let mut sum1 = a_lo + b_lo + ADLER_BASE - 1;
    let mut sum2 = (rem * a_lo) % ADLER_BASE + a_hi + b_hi + ADLER_BASE - rem;
    if sum1 >= ADLER_BASE {
        sum1 -= ADLER_BASE;
    }
    if sum1 >= ADLER_BASE {
        sum1 -= ADLER_BASE;
    }
    sum2 %= ADLER_BASE;
    (sum1 as u32) | ((sum2 as u32) << 16)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"The quick brown fox jumps over the lazy dog";

    #[test]
    fn empty_values() {
        assert_eq!(checksum(Algorithm::Crc32, b""), 0);
        assert_eq!(checksum(Algorithm::Adler32, b""), 1);
        assert_eq!(checksum(Algorithm::Crc32c, b""), 0);
        assert_eq!(checksum(Algorithm::Xxh32, b""), 0x02CC_5D05);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(checksum(Algorithm::Crc32, SAMPLE), 0x414F_A339);
        assert_eq!(checksum(Algorithm::Adler32, SAMPLE), 0x5BDC_0FDA);
        assert_eq!(checksum(Algorithm::Crc32c, b"123456789"), 0xE306_9283);
    }

    #[test]
    fn accumulator_matches_one_shot() {
        for alg in [
            Algorithm::Crc32,
            Algorithm::Adler32,
            Algorithm::Crc32c,
            Algorithm::Xxh32,
            Algorithm::Xxh64,
        ] {
            let mut acc = Checksum::new(alg);
            for piece in SAMPLE.chunks(7) {
                acc.update(piece);
            }
            assert_eq!(acc.value(), checksum(alg, SAMPLE), "{alg:?}");
            assert_eq!(acc.len(), SAMPLE.len() as u64);
            assert_eq!(acc.algorithm(), alg);
        }
    }

    #[test]
    fn combine_matches_sequential() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 251) as u8).collect();
        for alg in [Algorithm::Crc32, Algorithm::Adler32] {
            let parts = data.chunks(4096).map(|c| Partial::of(alg, c));
            let merged = combine(alg, parts).unwrap();
            assert_eq!(merged.value, checksum(alg, &data), "{alg:?}");
            assert_eq!(merged.len, data.len() as u64);
        }
    }

    #[test]
    fn combine_with_empty_pieces() {
        let parts = [
            Partial::of(Algorithm::Adler32, b""),
            Partial::of(Algorithm::Adler32, b"abc"),
            Partial::of(Algorithm::Adler32, b""),
        ];
        let merged = combine(Algorithm::Adler32, parts).unwrap();
        assert_eq!(merged.value, adler32(b"abc"));
    }

    #[test]
    fn xxhash_is_not_combinable() {
        assert!(combine(Algorithm::Xxh32, [Partial::empty(Algorithm::Xxh32)]).is_none());
    }
}
