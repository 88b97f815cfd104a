// Zstandard pipeline.
//
// Decoding covers the full RFC 8878 block format: raw, RLE and compressed
// blocks with Huffman literals and FSE-coded sequences.  Frames are split
// by walking block headers and decoded in parallel; blocks inside a frame
// depend on each other and run in order.
//
// Encoding writes one frame of raw and RLE blocks.

pub mod encoder;
pub mod frame;
pub mod fse;
pub mod huffman;
pub mod literals;
pub mod sequences;

use log::{debug, trace};

use crate::block::{BlockUnpacker, ByteCursor};
use crate::checksum::{self, Algorithm, Checksum};
use crate::config::Codec;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

use super::{BlockCodec, BlockEncoder, Decoded, StreamDecoder, StreamSummary};

pub use encoder::{LAST_EMPTY_BLOCK, ZstdEncoder, write_frame_header};
pub use frame::{BlockType, FrameHeader, FrameUnpacker, RawBlock};

use frame::{MAGIC, is_skippable};
use huffman::HuffmanTable;
use literals::decode_literals;
use sequences::{INITIAL_REPEAT_OFFSETS, SequenceTables, execute_sequences, read_sequences};

// ---------------------------------------------------------------------------
// Block decoding
// ---------------------------------------------------------------------------

/// State carried between the blocks of one frame.
struct FrameDecoder {
    header: FrameHeader,
    huffman: Option<HuffmanTable>,
    tables: SequenceTables,
    reps: [u32; 3],
    literals: Vec<u8>,
}

impl FrameDecoder {
    fn new(header: FrameHeader) -> Self {
        Self {
            header,
            huffman: None,
            tables: SequenceTables::default(),
            reps: INITIAL_REPEAT_OFFSETS,
            literals: Vec::new(),
        }
    }

    /// Append the block's content to `out`; earlier frame output in `out`
    /// is the match history.
    fn decode_block(&mut self, block: &RawBlock<'_>, out: &mut Vec<u8>) -> Result<()> {
        match block.kind {
            BlockType::Raw => out.extend_from_slice(block.data),
            BlockType::Rle => out.resize(out.len() + block.rle_len, block.data[0]),
            BlockType::Compressed => self.decode_compressed(block.data, out).map_err(|e| {
                // Every length inside a block is bounded by the block size.
                if e.is_truncation() {
                    Error::corrupt("compressed block ends early")
                } else {
                    e
                }
            })?,
        }
        Ok(())
    }

    fn decode_compressed(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let used = decode_literals(data, &mut self.huffman, &mut self.literals)?;
        let sequences = read_sequences(&data[used..], &mut self.tables)?;
        trace!(
            "zstd compressed block: {} literals, {} sequences",
            self.literals.len(),
            sequences.len()
        );
        let window = usize::try_from(self.header.window_size).unwrap_or(usize::MAX);
        execute_sequences(&sequences, &self.literals, &mut self.reps, window, out)
    }
}

fn verify_frame(header: &FrameHeader, content: &[u8], cursor: &mut ByteCursor<'_>) -> Result<()> {
    if header.has_checksum() {
        let expected = cursor.read_u32_le()?;
        let actual = checksum::checksum(Algorithm::Xxh64, content);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }
    check_content_size(header, content.len() as u64)
}

fn check_content_size(header: &FrameHeader, actual: u64) -> Result<()> {
    match header.content_size {
        Some(declared) if declared != actual => Err(Error::corrupt(format!(
            "zstd frame declares {declared} bytes, decoded {actual}"
        ))),
        _ => Ok(()),
    }
}

/// Decode one complete frame (magic included).
pub fn decode_frame(data: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = ByteCursor::new(data);
    let magic = cursor.read_u32_le()?;
    if magic != MAGIC {
        return Err(Error::corrupt(format!("bad zstd magic {magic:#010x}")));
    }
    let header = FrameHeader::read(&mut cursor)?;
    let capacity = header
        .content_size
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(data.len() * 2)
        .min(data.len().saturating_mul(32).max(1 << 17));
    let mut out = Vec::with_capacity(capacity);
    let mut decoder = FrameDecoder::new(header);
    loop {
        let block = frame::read_block(&header, &mut cursor)?;
        decoder.decode_block(&block, &mut out)?;
        if block.last {
            break;
        }
    }
    verify_frame(&header, &out, &mut cursor)?;
    if !cursor.is_empty() {
        return Err(Error::corrupt("bytes after the zstd frame"));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ZstdCodec {
    level: u32,
    checksum: bool,
}

impl ZstdCodec {
    pub fn new(level: u32, checksum: bool) -> Self {
        Self { level, checksum }
    }
}

impl BlockCodec for ZstdCodec {
    fn codec(&self) -> Codec {
        Codec::Zstd
    }

    fn content_checksum(&self) -> Option<Algorithm> {
        self.checksum.then_some(Algorithm::Xxh64)
    }

    fn write_header(&self, content_size: Option<u64>, out: &mut Vec<u8>) {
        write_frame_header(content_size, self.checksum, out);
    }

    fn new_encoder(&self) -> Box<dyn BlockEncoder> {
        Box::new(ZstdEncoder::new(self.level))
    }

    fn write_trailer(&self, summary: &StreamSummary, out: &mut Vec<u8>) {
        out.extend_from_slice(&LAST_EMPTY_BLOCK);
        if self.checksum {
            let value = summary
                .checksum
                .unwrap_or_else(|| checksum::checksum(Algorithm::Xxh64, &[]));
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::new(data);
        let frames = FrameUnpacker::default().collect_blocks(&mut cursor)?;
        debug!("zstd: {} frame(s) on {} engine(s)", frames.len(), scheduler.engines());
        let units = scheduler.run(&frames, |_| (), |_, _, frame| decode_frame(frame.data))?;
        let mut out = Vec::with_capacity(units.iter().map(|u| u.result.len()).sum());
        for unit in units {
            out.extend_from_slice(&unit.result);
        }
        Ok(out)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ZstdStreamDecoder::default())
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

enum ZstdState {
    Boundary { seen_frame: bool },
    Skipping(usize),
    Blocks(Box<StreamFrame>),
    Checksum(Box<StreamFrame>),
}

struct StreamFrame {
    decoder: FrameDecoder,
    /// Recent output, at most about two windows.
    history: Vec<u8>,
    content: Checksum,
}

impl StreamFrame {
    fn window(&self) -> usize {
        usize::try_from(self.decoder.header.window_size).unwrap_or(usize::MAX)
    }

    fn trim_history(&mut self) {
        let keep = self.window().max(literals::MAX_BLOCK_SIZE);
        if self.history.len() > keep.saturating_mul(2) {
            let excess = self.history.len() - keep;
            self.history.drain(..excess);
        }
    }
}

/// Frame or skippable-frame header at a frame boundary.
fn read_frame_start(cursor: &mut ByteCursor<'_>) -> Result<ZstdState> {
    let magic = cursor.read_u32_le()?;
    if is_skippable(magic) {
        return Ok(ZstdState::Skipping(cursor.read_u32_le()? as usize));
    }
    if magic != MAGIC {
        return Err(Error::corrupt(format!("bad zstd magic {magic:#010x}")));
    }
    let header = FrameHeader::read(cursor)?;
    Ok(ZstdState::Blocks(Box::new(StreamFrame {
        decoder: FrameDecoder::new(header),
        history: Vec::new(),
        content: Checksum::new(Algorithm::Xxh64),
    })))
}

struct ZstdStreamDecoder {
    state: ZstdState,
}

impl Default for ZstdStreamDecoder {
    fn default() -> Self {
        Self {
            state: ZstdState::Boundary { seen_frame: false },
        }
    }
}

impl StreamDecoder for ZstdStreamDecoder {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>> {
        let mut cursor = ByteCursor::new(input);
        let state = std::mem::replace(&mut self.state, ZstdState::Boundary { seen_frame: true });
        let (next, output) = match state {
            ZstdState::Boundary { seen_frame } => {
                self.state = ZstdState::Boundary { seen_frame };
                if input.is_empty() && seen_frame {
                    return super::end_of_input(input, eof);
                }
                (read_frame_start(&mut cursor)?, Vec::new())
            }
            ZstdState::Skipping(left) => {
                if left > 0 && input.is_empty() {
                    self.state = ZstdState::Skipping(left);
                    return Err(Error::truncated(left, 0));
                }
                let n = left.min(input.len());
                cursor.skip(n)?;
                let next = if left == n {
                    ZstdState::Boundary { seen_frame: true }
                } else {
                    ZstdState::Skipping(left - n)
                };
                (next, Vec::new())
            }
            ZstdState::Blocks(mut frame) => {
                let header = frame.decoder.header;
                let block = match frame::read_block(&header, &mut cursor) {
                    Ok(block) => block,
                    Err(e) => {
                        self.state = ZstdState::Blocks(frame);
                        return Err(e);
                    }
                };
                let start = frame.history.len();
                frame.decoder.decode_block(&block, &mut frame.history)?;
                let output = frame.history[start..].to_vec();
                frame.content.update(&output);
                frame.trim_history();
                let next = if !block.last {
                    ZstdState::Blocks(frame)
                } else if header.has_checksum() {
                    ZstdState::Checksum(frame)
                } else {
                    check_content_size(&header, frame.content.len())?;
                    ZstdState::Boundary { seen_frame: true }
                };
                (next, output)
            }
            ZstdState::Checksum(frame) => {
                let expected = match cursor.read_u32_le() {
                    Ok(v) => v,
                    Err(e) => {
                        self.state = ZstdState::Checksum(frame);
                        return Err(e);
                    }
                };
                let actual = frame.content.value();
                if expected != actual {
                    return Err(Error::ChecksumMismatch { expected, actual });
                }
                check_content_size(&frame.decoder.header, frame.content.len())?;
                (ZstdState::Boundary { seen_frame: true }, Vec::new())
            }
        };
        self.state = next;
        Ok(Some(Decoded {
            consumed: cursor.position(),
            output,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
