// LZ77 match finding.
//
// This module provides:
// - Matcher profiles (literal-only, fastest..slow) and per-codec parameters
// - A hash-chain index keyed by a 3- or 4-byte prefix
// - The greedy/lazy tokenizer producing `Token` streams
//
// Every block is tokenized independently: offsets never reach before the
// start of the block being compressed.

pub mod config;
pub mod matcher;
pub mod table;

pub use config::{MatchParams, MatcherProfile};
pub use matcher::MatchFinder;

use crate::error::{Error, Result};

/// One LZ77 token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// A single uncompressed byte.
    Literal(u8),
    /// Copy `length` bytes starting `offset` bytes back in the output.
    Match { offset: u32, length: u32 },
}

impl Token {
    /// Number of output bytes this token produces.
    #[inline]
    pub fn output_len(&self) -> usize {
        match *self {
            Token::Literal(_) => 1,
            Token::Match { length, .. } => length as usize,
        }
    }
}

/// Expand a token stream, appending to `out`.
///
/// Offsets are resolved against the bytes appended by this call only.
pub fn replay(tokens: &[Token], out: &mut Vec<u8>) -> Result<()> {
    let base = out.len();
    for token in tokens {
        match *token {
            Token::Literal(b) => out.push(b),
            Token::Match { offset, length } => {
                let offset = offset as usize;
                let produced = out.len() - base;
                if offset == 0 || offset > produced {
                    return Err(Error::corrupt(format!(
                        "match offset {offset} exceeds {produced} produced bytes"
                    )));
                }
                copy_within_overlapping(out, offset, length as usize);
            }
        }
    }
    Ok(())
}

/// Append `length` bytes copied from `offset` bytes back; the ranges may
/// overlap (offset < length repeats the pattern).
#[inline]
pub fn copy_within_overlapping(out: &mut Vec<u8>, offset: usize, length: usize) {
    let start = out.len() - offset;
    if offset >= length {
        out.extend_from_within(start..start + length);
    } else if offset == 1 {
        let b = out[start];
        out.resize(out.len() + length, b);
    } else {
        out.reserve(length);
        for i in 0..length {
            let b = out[start + i];
            out.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_overlapping_run() {
        let tokens = [
            Token::Literal(b'a'),
            Token::Literal(b'b'),
            Token::Match {
                offset: 2,
                length: 5,
            },
        ];
        let mut out = Vec::new();
        replay(&tokens, &mut out).unwrap();
        assert_eq!(out, b"abababa");
    }

    #[test]
    fn replay_rejects_far_offset() {
        let tokens = [
            Token::Literal(1),
            Token::Match {
                offset: 2,
                length: 3,
            },
        ];
        assert!(replay(&tokens, &mut Vec::new()).is_err());
    }

    #[test]
    fn replay_is_relative_to_call() {
        let mut out = b"prefix".to_vec();
        let tokens = [Token::Match {
            offset: 1,
            length: 2,
        }];
        assert!(replay(&tokens, &mut out).is_err());
    }
}
