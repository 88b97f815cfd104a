// Compression engine: ties a codec pipeline to the block scheduler.
//
// Block mode:
//   - split the input into `block_size` blocks (empty input is one block)
//   - encode blocks on the engine pool, each engine with its own encoder
//   - write header, encoded blocks in index order, trailer
//
// Stream checksums are combined from per-block partials for CRC-32 and
// Adler-32; xxHash has no combine and is computed in one sequential pass.

use std::io::{Read, Write};

use log::debug;

use crate::checksum::{self, Algorithm, Checksum, Partial};
use crate::codec::{self, BlockCodec, BlockEncoder, EncodedBlock, StreamSummary};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::scheduler::{CancelToken, ScheduledUnit, Scheduler, split_blocks};
use crate::source::{BlockSource, HostSource, ResidentSource};
use crate::stream::{StreamCompressor, StreamDecompressor};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by [`Engine::compress_with_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressStats {
    /// Uncompressed input size in bytes.
    pub input_len: u64,
    /// Framed output size in bytes.
    pub output_len: u64,
    /// Scheduler blocks encoded.
    pub blocks: usize,
    /// Engines in the pool.
    pub engines: usize,
    /// Blocks handled by each engine.
    pub blocks_per_engine: Vec<usize>,
    /// LZ77 matches (RLE blocks for Zstandard) emitted.
    pub matches: usize,
    /// Algorithm of [`checksum`](Self::checksum), if any.
    pub checksum_algorithm: Option<Algorithm>,
    /// Whole-stream checksum of the input.
    pub checksum: Option<u32>,
}

impl CompressStats {
    /// Output size over input size (1.0 for empty input).
    pub fn ratio(&self) -> f64 {
        if self.input_len == 0 {
            1.0
        } else {
            self.output_len as f64 / self.input_len as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Content checksum
// ---------------------------------------------------------------------------

/// Whole-stream checksum built up batch by batch.
pub(crate) enum ContentChecksum {
    None,
    /// Partials merged in block order.
    Combined(Algorithm, Partial),
    /// One sequential pass on the calling thread.
    Sequential(Checksum),
}

impl ContentChecksum {
    pub(crate) fn new(algorithm: Option<Algorithm>) -> Self {
        match algorithm {
            None => Self::None,
            Some(alg) if alg.combinable() => Self::Combined(alg, Partial::empty(alg)),
            Some(alg) => Self::Sequential(Checksum::new(alg)),
        }
    }

    /// Algorithm whose partials the encoders must compute, if any.
    pub(crate) fn partial_algorithm(&self) -> Option<Algorithm> {
        match self {
            Self::Combined(alg, _) => Some(*alg),
            _ => None,
        }
    }

    pub(crate) fn algorithm(&self) -> Option<Algorithm> {
        match self {
            Self::None => None,
            Self::Combined(alg, _) => Some(*alg),
            Self::Sequential(sum) => Some(sum.algorithm()),
        }
    }

    /// Account for one block, in index order.
    pub(crate) fn add(&mut self, raw: &[u8], block: &EncodedBlock) {
        match self {
            Self::None => {}
            Self::Combined(alg, acc) => {
                let part = block.partial.unwrap_or_else(|| Partial::of(*alg, raw));
                if let Some(merged) = checksum::combine(*alg, [*acc, part]) {
                    *acc = merged;
                }
            }
            Self::Sequential(sum) => sum.update(raw),
        }
    }

    pub(crate) fn value(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Combined(_, acc) => Some(acc.value),
            Self::Sequential(sum) => Some(sum.value()),
        }
    }
}

/// Encode `blocks` on the pool.  Block `i` gets stream index `first_index + i`.
pub(crate) fn encode_blocks(
    codec: &dyn BlockCodec,
    scheduler: &Scheduler,
    blocks: &[&[u8]],
    first_index: usize,
    partial: Option<Algorithm>,
) -> Result<Vec<ScheduledUnit<EncodedBlock>>> {
    scheduler.run(
        blocks,
        |_| codec.new_encoder(),
        |encoder: &mut Box<dyn BlockEncoder>, i, raw: &&[u8]| {
            let mut block = encoder.encode_block(first_index + i, raw);
            if let Some(alg) = partial {
                block.partial = Some(Partial::of(alg, raw));
            }
            Ok(block)
        },
    )
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A validated pipeline and its engine pool.
pub struct Engine {
    config: PipelineConfig,
    codec: Box<dyn BlockCodec>,
    scheduler: Scheduler,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("codec", &self.config.codec)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Engine {
    /// Validate `config` and build the engine pool.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.engine_count, config.policy)?;
        let codec = codec::make_codec(&config);
        debug!(
            "engine: {} with {} KiB blocks, {} engine(s), level {}",
            config.codec, config.block_size_kib, config.engine_count, config.level
        );
        Ok(Self {
            config,
            codec,
            scheduler,
        })
    }

    /// Abort work at the next block boundary once `token` fires.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.scheduler = self.scheduler.with_cancel(token);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compress `data` into one framed stream.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.compress_with_stats(data).map(|(out, _)| out)
    }

    /// Compress and report what the engines did.
    pub fn compress_with_stats(&self, data: &[u8]) -> Result<(Vec<u8>, CompressStats)> {
        let blocks = split_blocks(data, self.config.block_size());
        let mut content = ContentChecksum::new(codec::stats_checksum(self.codec.as_ref(), &self.config));
        let units = encode_blocks(
            self.codec.as_ref(),
            &self.scheduler,
            &blocks,
            0,
            content.partial_algorithm(),
        )?;

        let encoded_len: usize = units.iter().map(|u| u.result.bytes.len()).sum();
        let mut out = Vec::with_capacity(encoded_len + 64);
        self.codec.write_header(Some(data.len() as u64), &mut out);

        let mut blocks_per_engine = vec![0usize; self.scheduler.engines()];
        let mut matches = 0;
        for (unit, raw) in units.iter().zip(&blocks) {
            blocks_per_engine[unit.engine_id] += 1;
            matches += unit.result.matches;
            content.add(raw, &unit.result);
            out.extend_from_slice(&unit.result.bytes);
        }

        let summary = StreamSummary {
            total_len: data.len() as u64,
            blocks: blocks.len(),
            checksum: content.value(),
        };
        self.codec.write_trailer(&summary, &mut out);
        debug!(
            "{}: {} -> {} bytes in {} block(s)",
            self.config.codec,
            data.len(),
            out.len(),
            blocks.len()
        );

        let stats = CompressStats {
            input_len: data.len() as u64,
            output_len: out.len() as u64,
            blocks: blocks.len(),
            engines: self.scheduler.engines(),
            blocks_per_engine,
            matches,
            checksum_algorithm: content.algorithm(),
            checksum: content.value(),
        };
        Ok((out, stats))
    }

    /// Decompress a complete framed stream.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.codec.decompress(data, &self.scheduler)
    }

    /// Streaming compressor writing to `writer` with this engine's config.
    pub fn stream_compressor<W: Write>(&self, writer: W) -> Result<StreamCompressor<W>> {
        let compressor = StreamCompressor::new(self.config.clone(), writer)?;
        Ok(match self.scheduler.cancel_token() {
            Some(token) => compressor.with_cancel(token.clone()),
            None => compressor,
        })
    }

    /// Lazy decompression of any block source.
    pub fn stream_decompressor<S: BlockSource>(&self, source: S) -> StreamDecompressor<S> {
        let decompressor = StreamDecompressor::with_codec(self.codec.as_ref(), source);
        match self.scheduler.cancel_token() {
            Some(token) => decompressor.with_cancel(token.clone()),
            None => decompressor,
        }
    }

    /// Lazy decompression of a reader.
    pub fn decompress_reader<R: Read>(&self, reader: R) -> StreamDecompressor<HostSource<R>> {
        self.stream_decompressor(HostSource::new(reader))
    }

    /// Lazy decompression of a stream already resident in `data`.
    pub fn decompress_resident<'a>(&self, data: &'a [u8]) -> StreamDecompressor<ResidentSource<'a>> {
        self.stream_decompressor(ResidentSource::new(data))
    }
}

// ---------------------------------------------------------------------------
// One-shot helpers
// ---------------------------------------------------------------------------

/// Compress `data` with `config`.
pub fn compress(config: &PipelineConfig, data: &[u8]) -> Result<Vec<u8>> {
    Engine::new(config.clone())?.compress(data)
}

/// Decompress `data` with `config`.
pub fn decompress(config: &PipelineConfig, data: &[u8]) -> Result<Vec<u8>> {
    Engine::new(config.clone())?.decompress(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
