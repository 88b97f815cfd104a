// Codec pipelines.
//
// Every wire format is a composition of the shared stages behind one
// trait:
//
//   header  ->  N x encode_block (one per scheduler block, any engine)  ->  trailer
//
// Blocks never reference each other, so engines can encode them in any
// order and the scheduler concatenates the results by index.  Whole-stream
// checksums are either combined from per-block partials (CRC-32,
// Adler-32) or computed in one sequential pass (xxHash) by the caller and
// handed to `write_trailer`.
//
// Decompression has two entry points:
//   - `decompress`: a complete stream in memory; formats with explicit
//     block lengths fan their blocks out over the scheduler
//   - `stream_decoder`: an incremental decoder fed from a `BlockSource`

pub mod deflate;
pub mod gzip;
pub mod lz4;
pub mod snappy;
pub mod zlib;
pub mod zstd;

use crate::checksum::{Algorithm, Partial};
use crate::config::{ChecksumKind, Codec, PipelineConfig};
use crate::error::Result;
use crate::scheduler::Scheduler;

pub use deflate::DeflateCodec;
pub use gzip::{GzipCodec, GzipHeader};
pub use lz4::Lz4Codec;
pub use snappy::SnappyCodec;
pub use zlib::ZlibCodec;
pub use zstd::ZstdCodec;

// ---------------------------------------------------------------------------
// Encoded blocks and stream summaries
// ---------------------------------------------------------------------------

/// What an engine hands back for one scheduler block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBlock {
    pub index: usize,
    pub raw_len: usize,
    pub bytes: Vec<u8>,
    /// Partial stream checksum over this block's input, when combinable.
    pub partial: Option<Partial>,
    /// Match tokens the block used (0 for formats without a match stage).
    pub matches: usize,
}

/// Facts about the whole stream, known once every block is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    /// Total uncompressed bytes.
    pub total_len: u64,
    /// Number of scheduler blocks.
    pub blocks: usize,
    /// Value of the codec's content checksum, if it carries one.
    pub checksum: Option<u32>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Per-engine block encoder.  Owns its match tables and entropy buffers.
pub trait BlockEncoder: Send {
    /// Encode one independent block.  Never fails on data.
    fn encode_block(&mut self, index: usize, raw: &[u8]) -> EncodedBlock;
}

/// One pipeline: framing plus the per-block stages.
pub trait BlockCodec: Send + Sync {
    fn codec(&self) -> Codec;

    /// Checksum the stream trailer carries, if any.
    fn content_checksum(&self) -> Option<Algorithm>;

    /// Bytes written once before the first block.
    fn write_header(&self, content_size: Option<u64>, out: &mut Vec<u8>);

    /// Fresh encoder for one engine.
    fn new_encoder(&self) -> Box<dyn BlockEncoder>;

    /// Bytes written once after the last block.
    fn write_trailer(&self, summary: &StreamSummary, out: &mut Vec<u8>);

    /// Decompress a complete framed stream.
    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>>;

    /// Incremental decoder for the same format.
    fn stream_decoder(&self) -> Box<dyn StreamDecoder>;
}

/// Output of one decoding step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Input bytes the step consumed.
    pub consumed: usize,
    /// Uncompressed bytes the step produced (may be empty for headers).
    pub output: Vec<u8>,
}

/// Incremental decoder: one framing unit per call.
///
/// `decode_step` looks at the unconsumed input and either decodes the next
/// unit (header, block, chunk, trailer) or fails.  A
/// `TruncatedInput` failure leaves the decoder unchanged so the caller can
/// retry with more input.  `Ok(None)` means the stream ended cleanly; it is
/// only returned when `eof` is set and no partial unit remains.
pub trait StreamDecoder: Send {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the pipeline selected by `config`.  The config must be valid.
pub fn make_codec(config: &PipelineConfig) -> Box<dyn BlockCodec> {
    let window = config.window_size();
    let level = config.level;
    let with_checksum = config.checksum != ChecksumKind::None;
    match config.codec {
        Codec::Deflate => Box::new(DeflateCodec::new(level, window)),
        Codec::Zlib => Box::new(ZlibCodec::new(level, window)),
        Codec::Gzip => Box::new(GzipCodec::new(level, window, config.gzip_header.clone())),
        Codec::Lz4 => Box::new(Lz4Codec::new(level, window, config.block_size(), with_checksum)),
        Codec::Snappy => Box::new(SnappyCodec::new(level, window, with_checksum)),
        Codec::Zstd => Box::new(ZstdCodec::new(level, with_checksum)),
    }
}

/// Algorithm for the checksum reported in compression stats.
///
/// The codec's own trailer checksum wins; otherwise the configured kind.
pub fn stats_checksum(codec: &dyn BlockCodec, config: &PipelineConfig) -> Option<Algorithm> {
    codec
        .content_checksum()
        .or(match config.stream_checksum() {
            ChecksumKind::None => None,
            ChecksumKind::Crc32 => Some(Algorithm::Crc32),
            ChecksumKind::Adler32 => Some(Algorithm::Adler32),
        })
}

/// Decoder with no stream input left: whether `input` is only at a clean end.
pub(crate) fn end_of_input(input: &[u8], eof: bool) -> Result<Option<Decoded>> {
    if input.is_empty() && eof {
        Ok(None)
    } else {
        Err(crate::error::Error::truncated(1, input.len()))
    }
}
