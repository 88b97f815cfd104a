// Hash-chain index for LZ77 match finding.
//
// `head[bucket]` holds the most recent position whose prefix hashes to
// `bucket`; `prev[pos & mask]` links each position to the previous one in
// the same bucket.  Stored values are `pos + 1` so that 0 means "empty".
// The prev array is sized to cover the whole window, and walks stop as
// soon as an entry is stale (newer than the current candidate) or outside
// the window.

/// Offset added to stored positions so 0 means "empty".
const POS_OFFSET: u32 = 1;

/// Multiplicative hash constant.
const HASH_MULT: u32 = 1_597_334_677;

/// Smallest and largest bucket-count exponents.
const MIN_HASH_BITS: u32 = 8;
const MAX_HASH_BITS: u32 = 16;

/// Hash chain over one block.
pub struct HashChain {
    head: Vec<u32>,
    prev: Vec<u32>,
    prev_mask: usize,
    hash_shift: u32,
    key_len: usize,
}

impl HashChain {
    /// Create a chain for blocks of up to `block_len` bytes, a history
    /// window of `window` bytes and `key_len`-byte prefixes (3 or 4).
    pub fn new(block_len: usize, window: usize, key_len: usize) -> Self {
        debug_assert!(key_len == 3 || key_len == 4);
        let span = block_len.max(1).next_power_of_two();
        let hash_bits = span
            .trailing_zeros()
            .clamp(MIN_HASH_BITS, MAX_HASH_BITS);
        let prev_size = (window + 1).next_power_of_two().min(span).max(16);
        Self {
            head: vec![0; 1 << hash_bits],
            prev: vec![0; prev_size],
            prev_mask: prev_size - 1,
            hash_shift: 32 - hash_bits,
            key_len,
        }
    }

    /// Whether this chain can serve a block of `block_len` bytes with `window`.
    pub fn fits(&self, block_len: usize, window: usize, key_len: usize) -> bool {
        let span = block_len.max(1).next_power_of_two();
        let wanted_prev = (window + 1).next_power_of_two().min(span).max(16);
        self.key_len == key_len && self.prev.len() >= wanted_prev
    }

    /// Forget every position (start of a new block).
    pub fn reset(&mut self) {
        self.head.fill(0);
        self.prev.fill(0);
    }

    #[inline(always)]
    fn bucket(&self, data: &[u8], pos: usize) -> usize {
        let key = if self.key_len == 4 {
            u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
        } else {
            u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], 0])
        };
        (key.wrapping_mul(HASH_MULT) >> self.hash_shift) as usize
    }

    /// Most recent earlier position sharing the prefix at `pos`.
    ///
    /// Caller guarantees `pos + key_len <= data.len()`.
    #[inline]
    pub fn head(&self, data: &[u8], pos: usize) -> Option<usize> {
        let stored = self.head[self.bucket(data, pos)];
        (stored != 0).then(|| (stored - POS_OFFSET) as usize)
    }

    /// Record `pos` as the newest entry of its bucket.
    ///
    /// Caller guarantees `pos + key_len <= data.len()`.
    #[inline]
    pub fn insert(&mut self, data: &[u8], pos: usize) {
        let Ok(stored) = u32::try_from(pos + POS_OFFSET as usize) else {
            return;
        };
        let bucket = self.bucket(data, pos);
        self.prev[pos & self.prev_mask] = self.head[bucket];
        self.head[bucket] = stored;
    }

    /// The entry preceding `candidate` in its bucket, if it is still valid
    /// for a search at `current` with the given `window`.
    #[inline]
    pub fn next(&self, candidate: usize, current: usize, window: usize) -> Option<usize> {
        let stored = self.prev[candidate & self.prev_mask];
        if stored == 0 {
            return None;
        }
        let prev_pos = (stored - POS_OFFSET) as usize;
        // Slot overwritten by a newer position.
        if prev_pos >= candidate {
            return None;
        }
        if current - prev_pos > window || current - prev_pos > self.prev_mask {
            return None;
        }
        Some(prev_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_walk() {
        let data = b"abcXabcYabcZ";
        let mut chain = HashChain::new(data.len(), 32 * 1024, 3);
        chain.insert(data, 0);
        chain.insert(data, 4);
        chain.insert(data, 8);
        // Head of "abc" is the newest occurrence.
        let head = chain.head(data, 8).unwrap();
        assert_eq!(head, 8);
        assert_eq!(chain.next(8, 8, 1024), Some(4));
        assert_eq!(chain.next(4, 8, 1024), Some(0));
        assert_eq!(chain.next(0, 8, 1024), None);
    }

    #[test]
    fn window_bounds_the_walk() {
        let data = b"abcdabcdabcd";
        let mut chain = HashChain::new(data.len(), 4, 4);
        chain.insert(data, 0);
        chain.insert(data, 4);
        assert_eq!(chain.head(data, 8), Some(4));
        // Position 0 is 8 bytes back: outside a 4-byte window.
        assert_eq!(chain.next(4, 8, 4), None);
    }

    #[test]
    fn empty_bucket() {
        let data = b"xyzw";
        let chain = HashChain::new(data.len(), 1024, 4);
        assert_eq!(chain.head(data, 0), None);
    }

    #[test]
    fn reset_clears() {
        let data = b"aaaaaaaa";
        let mut chain = HashChain::new(data.len(), 1024, 3);
        chain.insert(data, 0);
        chain.reset();
        assert_eq!(chain.head(data, 1), None);
        assert!(chain.fits(8, 1024, 3));
        assert!(!chain.fits(8, 1024, 4));
    }
}
