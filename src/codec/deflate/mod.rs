// Raw DEFLATE (RFC 1951) pipeline.
//
// Match engine (minMatch 3, window <= 32 KiB, max 258) -> Huffman coder ->
// byte-aligned block runs.  The stream ends with a final empty stored
// block, so every scheduler block is encoded identically wherever it sits
// in the stream.  Decoding is symbol-driven and therefore sequential; the
// cancel token is checked before every DEFLATE block.

pub mod encoder;
pub mod inflate;
pub mod tables;

use log::{debug, trace};

use crate::block::{Block, BlockPacker};
use crate::checksum::Algorithm;
use crate::config::Codec;
use crate::error::{Error, Result};
use crate::lz77::{MatchFinder, MatchParams, Token};
use crate::scheduler::{CancelToken, Scheduler};

use super::{BlockCodec, BlockEncoder, Decoded, EncodedBlock, StreamDecoder, StreamSummary};

pub use encoder::{BlockChoice, DeflatePacker};
pub use inflate::{InflateStream, inflate, inflate_with};

/// Final empty stored block that terminates every stream we write.
pub const FINAL_EMPTY_BLOCK: [u8; 5] = [0x01, 0x00, 0x00, 0xFF, 0xFF];

// ---------------------------------------------------------------------------
// Per-engine encoder
// ---------------------------------------------------------------------------

/// Match finder plus packer; one per engine.
pub struct DeflateEncoder {
    finder: MatchFinder,
    packer: DeflatePacker,
    tokens: Vec<Token>,
}

impl DeflateEncoder {
    pub fn new(level: u32, window: usize) -> Self {
        Self {
            finder: MatchFinder::new(MatchParams::deflate(window, level)),
            packer: DeflatePacker::new(),
            tokens: Vec::new(),
        }
    }

    /// Append the byte-aligned, non-final DEFLATE run for `raw`.
    /// Returns the number of match tokens used.
    pub fn deflate_into(&mut self, index: usize, raw: &[u8], out: &mut Vec<u8>) -> usize {
        let mut block = Block::new(index, raw.len());
        block.tokens = std::mem::take(&mut self.tokens);
        block.tokens.clear();
        self.finder.tokenize(raw, &mut block.tokens);

        let start = out.len();
        self.packer.pack(&block, raw, out);
        block.meta.packed_len = out.len() - start;
        let matches = block.match_count();
        trace!(
            "deflate block {index}: {} -> {} bytes, {} tokens, {:?}",
            raw.len(),
            block.meta.packed_len,
            block.tokens.len(),
            self.packer.choices
        );
        self.tokens = block.tokens;
        matches
    }
}

impl BlockEncoder for DeflateEncoder {
    fn encode_block(&mut self, index: usize, raw: &[u8]) -> EncodedBlock {
        let mut bytes = Vec::with_capacity(raw.len() / 2 + 16);
        let matches = self.deflate_into(index, raw, &mut bytes);
        EncodedBlock {
            index,
            raw_len: raw.len(),
            bytes,
            partial: None,
            matches,
        }
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeflateCodec {
    level: u32,
    window: usize,
}

impl DeflateCodec {
    pub fn new(level: u32, window: usize) -> Self {
        Self { level, window }
    }
}

impl BlockCodec for DeflateCodec {
    fn codec(&self) -> Codec {
        Codec::Deflate
    }

    fn content_checksum(&self) -> Option<Algorithm> {
        None
    }

    fn write_header(&self, _content_size: Option<u64>, _out: &mut Vec<u8>) {}

    fn new_encoder(&self) -> Box<dyn BlockEncoder> {
        Box::new(DeflateEncoder::new(self.level, self.window))
    }

    fn write_trailer(&self, _summary: &StreamSummary, out: &mut Vec<u8>) {
        out.extend_from_slice(&FINAL_EMPTY_BLOCK);
    }

    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let (out, used) = inflate_with(data, cancel_check(scheduler.cancel_token()))?;
        if used != data.len() {
            return Err(Error::corrupt(format!(
                "{} trailing bytes after deflate stream",
                data.len() - used
            )));
        }
        debug!("deflate: inflated {} -> {} bytes", data.len(), out.len());
        Ok(out)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(DeflateStreamDecoder {
            inflater: InflateStream::new(),
        })
    }
}

/// Block callback for [`inflate_with`] that stops at a fired token.
pub(crate) fn cancel_check(token: Option<&CancelToken>) -> impl FnMut(&[u8]) -> Result<()> + '_ {
    move |_: &[u8]| token.map_or(Ok(()), CancelToken::check)
}

/// Raw DEFLATE stream decoder: one DEFLATE block per step.
struct DeflateStreamDecoder {
    inflater: InflateStream,
}

impl StreamDecoder for DeflateStreamDecoder {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>> {
        if self.inflater.is_finished() {
            if !input.is_empty() {
                return Err(Error::corrupt("trailing bytes after deflate stream"));
            }
            return super::end_of_input(input, eof);
        }
        self.inflater.step(input).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
