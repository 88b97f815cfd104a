// Snappy pipeline: raw blocks inside the framing format.
//
// A scheduler block is cut into chunks of at most 64 KiB; each chunk is
// tokenized (minMatch 4, offsets within the chunk) and packed as a raw
// Snappy block, or stored when that is not smaller.  Chunks carry their
// own lengths and CRC-32C, so decompression fans them out over the
// scheduler.  A content checksum chunk, when enabled, closes the stream and
// is checked once every chunk before it is decoded.

pub mod framing;
pub mod raw;

use log::{debug, trace};

use crate::block::{Block, BlockPacker, ByteCursor};
use crate::checksum::Algorithm;
use crate::config::Codec;
use crate::error::Result;
use crate::lz77::{MatchFinder, MatchParams, Token};
use crate::scheduler::Scheduler;

use super::{BlockCodec, BlockEncoder, Decoded, EncodedBlock, StreamDecoder, StreamSummary};

pub use framing::{Chunk, ChunkUnpacker, ContentVerifier, MAX_CHUNK_DATA, STREAM_IDENTIFIER};
pub use raw::{SnappyPacker, compress_raw, decompress_raw};

/// Per-engine chunk encoder.
pub struct SnappyEncoder {
    finder: MatchFinder,
    tokens: Vec<Token>,
    scratch: Vec<u8>,
}

impl SnappyEncoder {
    pub fn new(level: u32, window: usize) -> Self {
        Self {
            finder: MatchFinder::new(MatchParams::snappy(window, level)),
            tokens: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl BlockEncoder for SnappyEncoder {
    fn encode_block(&mut self, index: usize, raw: &[u8]) -> EncodedBlock {
        let mut bytes = Vec::with_capacity(raw.len() / 2 + 16);
        let mut matches = 0;
        for chunk in raw.chunks(MAX_CHUNK_DATA) {
            let mut block = Block::new(index, chunk.len());
            block.tokens = std::mem::take(&mut self.tokens);
            block.tokens.clear();
            self.finder.tokenize(chunk, &mut block.tokens);
            self.scratch.clear();
            SnappyPacker.pack(&block, chunk, &mut self.scratch);
            framing::write_chunk(chunk, &self.scratch, &mut bytes);
            matches += block.match_count();
            self.tokens = block.tokens;
        }
        trace!("snappy block {index}: {} -> {} bytes", raw.len(), bytes.len());
        EncodedBlock {
            index,
            raw_len: raw.len(),
            bytes,
            partial: None,
            matches,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnappyCodec {
    level: u32,
    window: usize,
    checksum: bool,
}

impl SnappyCodec {
    /// `checksum` adds the whole-stream CRC-32C chunk.
    pub fn new(level: u32, window: usize, checksum: bool) -> Self {
        Self {
            level,
            window,
            checksum,
        }
    }
}

impl BlockCodec for SnappyCodec {
    fn codec(&self) -> Codec {
        Codec::Snappy
    }

    fn content_checksum(&self) -> Option<Algorithm> {
        self.checksum.then_some(Algorithm::Crc32c)
    }

    fn write_header(&self, _content_size: Option<u64>, out: &mut Vec<u8>) {
        out.extend_from_slice(&STREAM_IDENTIFIER);
    }

    fn new_encoder(&self) -> Box<dyn BlockEncoder> {
        Box::new(SnappyEncoder::new(self.level, self.window))
    }

    fn write_trailer(&self, summary: &StreamSummary, out: &mut Vec<u8>) {
        if let (true, Some(checksum)) = (self.checksum, summary.checksum) {
            framing::write_content_checksum(checksum, summary.total_len, out);
        }
    }

    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::new(data);
        let mut unpacker = ChunkUnpacker::new();
        let mut chunks = Vec::new();
        // (data chunks before it, checksum, length) per content checksum chunk.
        let mut checkpoints = Vec::new();
        while !(cursor.is_empty() && unpacker.seen_identifier()) {
            match unpacker.next_chunk(&mut cursor)? {
                Chunk::Data(payload) => chunks.push(payload),
                Chunk::ContentChecksum { checksum, len } => checkpoints.push((chunks.len(), checksum, len)),
                Chunk::Skip => {}
            }
        }
        debug!(
            "snappy: {} chunks, {} content checksum(s) on {} engine(s)",
            chunks.len(),
            checkpoints.len(),
            scheduler.engines()
        );
        let units = scheduler.run(&chunks, |_| (), |_, _, chunk| framing::decode_chunk(chunk))?;

        let mut out = Vec::with_capacity(units.iter().map(|u| u.result.len()).sum());
        let mut verifier = ContentVerifier::default();
        let mut checkpoints = checkpoints.into_iter().peekable();
        for (i, unit) in units.iter().enumerate() {
            while let Some((_, checksum, len)) = checkpoints.next_if(|c| c.0 == i) {
                verifier.verify(checksum, len)?;
            }
            verifier.update(&unit.result);
            out.extend_from_slice(&unit.result);
        }
        for (_, checksum, len) in checkpoints {
            verifier.verify(checksum, len)?;
        }
        Ok(out)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(SnappyStreamDecoder::default())
    }
}

#[derive(Default)]
struct SnappyStreamDecoder {
    chunks: ChunkUnpacker,
    verifier: ContentVerifier,
}

impl StreamDecoder for SnappyStreamDecoder {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>> {
        if input.is_empty() && self.chunks.seen_identifier() {
            return super::end_of_input(input, eof);
        }
        let mut cursor = ByteCursor::new(input);
        let mut unpacker = self.chunks.clone();
        let output = match unpacker.next_chunk(&mut cursor)? {
            Chunk::Data(payload) => {
                let data = framing::decode_chunk(&payload)?;
                self.verifier.update(&data);
                data
            }
            Chunk::ContentChecksum { checksum, len } => {
                self.verifier.verify(checksum, len)?;
                Vec::new()
            }
            Chunk::Skip => Vec::new(),
        };
        self.chunks = unpacker;
        Ok(Some(Decoded {
            consumed: cursor.position(),
            output,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
