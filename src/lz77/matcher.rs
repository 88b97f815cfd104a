// Block tokenizer.
//
// Walks one block left to right:
//   1. Search the hash chain at `p` for the longest legal match
//   2. Lazy probe: if the match is shorter than `max_lazy`, search `p + 1`
//      and prefer it when strictly longer (emitting a literal at `p`)
//   3. Emit the match and index every position it covers
//
// Among candidates of equal length the most recent (smallest offset) wins
// because the chain is walked newest-first and only strictly longer
// candidates replace the best so far.

use super::config::MatchParams;
use super::table::HashChain;
use super::Token;

/// Candidate match at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Found {
    offset: usize,
    length: usize,
}

/// Reusable LZ77 tokenizer.
///
/// One instance per engine; its chain is reset for every block, so no
/// state leaks between blocks.
pub struct MatchFinder {
    params: MatchParams,
    chain: Option<HashChain>,
}

impl MatchFinder {
    pub fn new(params: MatchParams) -> Self {
        Self {
            params,
            chain: None,
        }
    }

    /// Parameters in force.
    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    /// Tokenize `data` as one independent block, appending to `out`.
    pub fn tokenize(&mut self, data: &[u8], out: &mut Vec<Token>) {
        let n = data.len();
        let p = self.params;
        if p.profile.is_literal_only() || n < p.min_match.max(p.match_start_margin) {
            out.extend(data.iter().map(|&b| Token::Literal(b)));
            return;
        }

        let mut chain = match self.chain.take() {
            Some(mut c) if c.fits(n, p.window, p.min_match) => {
                c.reset();
                c
            }
            _ => HashChain::new(n, p.window, p.min_match),
        };

        // Matches must end at or before `match_end`.
        let match_end = n - p.end_literals.min(n);
        // Last position whose prefix can be hashed.
        let last_insertable = n - p.min_match;
        let can_start =
            |pos: usize| pos + p.match_start_margin <= n && pos + p.min_match <= match_end;

        let mut pos = 0usize;
        // Next position not yet inserted into the chain.
        let mut next_insert = 0usize;
        out.reserve(n / 4);

        while pos < n {
            if !can_start(pos) {
                out.push(Token::Literal(data[pos]));
                pos += 1;
                continue;
            }

            let current = self.search(&chain, data, pos, match_end, p.profile.max_chain);
            insert_upto(&mut chain, data, &mut next_insert, pos + 1, last_insertable);

            let Some(mut best) = current else {
                out.push(Token::Literal(data[pos]));
                pos += 1;
                continue;
            };

            // Lazy evaluation: keep deferring while p + 1 has a strictly longer match.
            while p.profile.is_lazy() && best.length < p.profile.max_lazy && can_start(pos + 1) {
                let next = self.search(&chain, data, pos + 1, match_end, p.profile.lazy_chain);
                insert_upto(&mut chain, data, &mut next_insert, pos + 2, last_insertable);
                match next {
                    Some(candidate) if candidate.length > best.length => {
                        out.push(Token::Literal(data[pos]));
                        pos += 1;
                        best = candidate;
                    }
                    _ => break,
                }
            }

            out.push(Token::Match {
                offset: best.offset as u32,
                length: best.length as u32,
            });
            pos += best.length;
            insert_upto(&mut chain, data, &mut next_insert, pos, last_insertable);
        }

        self.chain = Some(chain);
    }

    /// Longest legal match at `pos`, walking at most `budget` chain entries.
    fn search(
        &self,
        chain: &HashChain,
        data: &[u8],
        pos: usize,
        match_end: usize,
        budget: usize,
    ) -> Option<Found> {
        let p = &self.params;
        let max_len = p.max_match.min(match_end - pos);
        if max_len < p.min_match || budget == 0 {
            return None;
        }
        let nice = if p.profile.nice_length == 0 {
            max_len
        } else {
            p.profile.nice_length.min(max_len)
        };

        let mut best: Option<Found> = None;
        let mut best_len = p.min_match - 1;
        let mut candidate = chain.head(data, pos);
        let mut steps = 0usize;

        while let Some(cand) = candidate {
            if cand >= pos || pos - cand > p.window {
                break;
            }
            // Quick reject on the byte that would extend the best match.
            if data[cand + best_len] == data[pos + best_len] {
                let len = common_prefix(&data[cand..], &data[pos..], max_len);
                if len > best_len {
                    best_len = len;
                    best = Some(Found {
                        offset: pos - cand,
                        length: len,
                    });
                    if len >= nice {
                        break;
                    }
                }
            }
            steps += 1;
            if steps >= budget {
                break;
            }
            candidate = chain.next(cand, pos, p.window);
        }
        best
    }
}

/// Insert every position in `[*next, upto)` that has a full hash prefix.
#[inline]
fn insert_upto(
    chain: &mut HashChain,
    data: &[u8],
    next: &mut usize,
    upto: usize,
    last_insertable: usize,
) {
    let end = upto.min(last_insertable + 1);
    while *next < end {
        chain.insert(data, *next);
        *next += 1;
    }
    if *next < upto {
        *next = upto;
    }
}

/// Length of the common prefix of `a` and `b`, capped at `max`.
#[inline]
pub fn common_prefix(a: &[u8], b: &[u8], max: usize) -> usize {
    let max = max.min(a.len()).min(b.len());
    let mut i = 0;
    while i + 8 <= max {
        let x = u64::from_le_bytes(a[i..i + 8].try_into().unwrap_or([0; 8]));
        let y = u64::from_le_bytes(b[i..i + 8].try_into().unwrap_or([0; 8]));
        let diff = x ^ y;
        if diff != 0 {
            return i + (diff.trailing_zeros() / 8) as usize;
        }
        i += 8;
    }
    while i < max && a[i] == b[i] {
        i += 1;
    }
    i
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lz77::replay;

    fn tokens_for(params: MatchParams, data: &[u8]) -> Vec<Token> {
        let mut finder = MatchFinder::new(params);
        let mut out = Vec::new();
        finder.tokenize(data, &mut out);
        out
    }

    fn check_bounds(params: &MatchParams, data: &[u8], tokens: &[Token]) {
        let mut produced = 0usize;
        for t in tokens {
            if let Token::Match { offset, length } = *t {
                let (offset, length) = (offset as usize, length as usize);
                assert!(length >= params.min_match, "short match {length}");
                assert!(length <= params.max_match);
                assert!(offset >= 1 && offset <= params.window);
                assert!(offset <= produced);
                assert!(produced + length <= data.len() - params.end_literals.min(data.len()));
            }
            produced += t.output_len();
        }
        assert_eq!(produced, data.len());
    }

    #[test]
    fn run_of_a_uses_offset_one() {
        let data = vec![0x41u8; 10_000];
        let params = MatchParams::deflate(32 * 1024, 6);
        let tokens = tokens_for(params, &data);
        assert_eq!(tokens[0], Token::Literal(0x41));
        for t in &tokens[1..] {
            match *t {
                Token::Match { offset, .. } => assert_eq!(offset, 1),
                Token::Literal(_) => {}
            }
        }
        check_bounds(&params, &data, &tokens);
        let mut out = Vec::new();
        replay(&tokens, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn single_byte_is_one_literal() {
        let tokens = tokens_for(MatchParams::deflate(32 * 1024, 6), &[0xFF]);
        assert_eq!(tokens, vec![Token::Literal(0xFF)]);
    }

    #[test]
    fn smallest_offset_wins_ties() {
        // "abcd" occurs at 0 and 5; at 10 both give length 4, the nearer must win.
        let data = b"abcdXabcdYabcdZ";
        let tokens = tokens_for(MatchParams::deflate(1024, 9), data);
        let offsets: Vec<u32> = tokens
            .iter()
            .filter_map(|t| match *t {
                Token::Match { offset, .. } => Some(offset),
                _ => None,
            })
            .collect();
        assert!(!offsets.is_empty());
        assert!(offsets.iter().all(|&o| o == 5), "{offsets:?}");
    }

    #[test]
    fn lazy_prefers_longer_match_at_next_position() {
        // At "Xabcde" the match for "Xab" (len 3) loses to "abcde" at p+1.
        let data = b"Xab....abcde....Xabcde";
        let lazy = tokens_for(MatchParams::deflate(1024, 9), data);
        let mut out = Vec::new();
        replay(&lazy, &mut out).unwrap();
        assert_eq!(out, data);
        assert!(lazy.contains(&Token::Literal(b'X')));
        assert!(lazy.contains(&Token::Match {
            offset: 10,
            length: 5
        }));
    }

    #[test]
    fn window_limits_offsets() {
        let mut data = b"0123456789abcdef".to_vec();
        data.extend(std::iter::repeat_n(b'-', 100));
        data.extend_from_slice(b"0123456789abcdef");
        let params = MatchParams::deflate(64, 9);
        let tokens = tokens_for(params, &data);
        check_bounds(&params, &data, &tokens);
    }

    #[test]
    fn lz4_tail_rules() {
        let data = vec![7u8; 100];
        let params = MatchParams::lz4(64 * 1024, 6);
        let tokens = tokens_for(params, &data);
        check_bounds(&params, &data, &tokens);
        // Last five tokens are literals.
        assert!(tokens[tokens.len() - 5..]
            .iter()
            .all(|t| matches!(t, Token::Literal(_))));
    }

    #[test]
    fn literal_only_level() {
        let data = vec![1u8; 64];
        let tokens = tokens_for(MatchParams::deflate(32 * 1024, 0), &data);
        assert_eq!(tokens.len(), 64);
        assert!(tokens.iter().all(|t| matches!(t, Token::Literal(1))));
    }

    #[test]
    fn finder_is_reusable_across_blocks() {
        let mut finder = MatchFinder::new(MatchParams::lz4(64 * 1024, 6));
        let a: Vec<u8> = (0..5000u32).map(|i| (i % 97) as u8).collect();
        let b: Vec<u8> = (0..3000u32).map(|i| (i % 13) as u8).collect();
        for block in [&a, &b, &a] {
            let mut tokens = Vec::new();
            finder.tokenize(block, &mut tokens);
            let mut out = Vec::new();
            replay(&tokens, &mut out).unwrap();
            assert_eq!(&out, block);
        }
    }

    #[test]
    fn common_prefix_lengths() {
        assert_eq!(common_prefix(b"abcdefghijk", b"abcdefghijX", 100), 10);
        assert_eq!(common_prefix(b"abc", b"abd", 100), 2);
        assert_eq!(common_prefix(b"same-same-same", b"same-same-same", 5), 5);
    }
}
