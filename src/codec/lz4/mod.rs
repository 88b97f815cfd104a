// LZ4 frame pipeline.
//
// Every scheduler block is tokenized with the LZ4 match rules (minMatch 4,
// 16-bit offsets, five literal tail bytes) and becomes one independent
// frame block, or a stored block when compression does not pay.  The
// frame always sets B.Indep, so decompression fans blocks out over the
// scheduler.  Frames from other encoders with dependent blocks are decoded
// sequentially against a 64 KiB history.

pub mod block;
pub mod frame;

use log::{debug, trace};

use crate::block::{Block, BlockPacker, BlockPayload, BlockUnpacker, ByteCursor, PayloadKind};
use crate::checksum::{self, Algorithm, Checksum};
use crate::config::Codec;
use crate::error::{Error, Result};
use crate::lz77::{MatchFinder, MatchParams, Token};
use crate::scheduler::Scheduler;

use super::{BlockCodec, BlockEncoder, Decoded, EncodedBlock, StreamDecoder, StreamSummary};

pub use block::{Lz4Packer, decode_block};
pub use frame::{FrameFlags, FrameHeader, FrameUnpacker};

use frame::{DEPENDENT_HISTORY, LEGACY_MAGIC, MAGIC, STORED_BIT, is_skippable};

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Per-engine LZ4 block encoder.
pub struct Lz4Encoder {
    finder: MatchFinder,
    tokens: Vec<Token>,
    scratch: Vec<u8>,
    block_checksum: bool,
}

impl Lz4Encoder {
    pub fn new(level: u32, window: usize, block_checksum: bool) -> Self {
        Self {
            finder: MatchFinder::new(MatchParams::lz4(window, level)),
            tokens: Vec::new(),
            scratch: Vec::new(),
            block_checksum,
        }
    }
}

impl BlockEncoder for Lz4Encoder {
    fn encode_block(&mut self, index: usize, raw: &[u8]) -> EncodedBlock {
        // An empty block would read as the EndMark.
        if raw.is_empty() {
            return EncodedBlock {
                index,
                ..EncodedBlock::default()
            };
        }

        let mut block = Block::new(index, raw.len());
        block.tokens = std::mem::take(&mut self.tokens);
        block.tokens.clear();
        self.finder.tokenize(raw, &mut block.tokens);
        self.scratch.clear();
        Lz4Packer.pack(&block, raw, &mut self.scratch);

        let stored = self.scratch.len() >= raw.len();
        let data: &[u8] = if stored { raw } else { &self.scratch };
        let word = data.len() as u32 | if stored { STORED_BIT } else { 0 };

        let mut bytes = Vec::with_capacity(data.len() + 8);
        bytes.extend_from_slice(&word.to_le_bytes());
        bytes.extend_from_slice(data);
        if self.block_checksum {
            bytes.extend_from_slice(&checksum::checksum(Algorithm::Xxh32, data).to_le_bytes());
        }
        trace!(
            "lz4 block {index}: {} -> {} bytes{}",
            raw.len(),
            data.len(),
            if stored { " (stored)" } else { "" }
        );

        let matches = block.match_count();
        self.tokens = block.tokens;
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
pub struct Lz4Codec {
    level: u32,
    window: usize,
    block_size: usize,
    checksums: bool,
}

impl Lz4Codec {
    /// `checksums` enables both block and content checksums.
    pub fn new(level: u32, window: usize, block_size: usize, checksums: bool) -> Self {
        Self {
            level,
            window,
            block_size,
            checksums,
        }
    }

    fn frame_header(&self, content_size: Option<u64>) -> FrameHeader {
        let mut flags = FrameFlags::VERSION_01 | FrameFlags::BLOCK_INDEPENDENT;
        flags.set(FrameFlags::BLOCK_CHECKSUM, self.checksums);
        flags.set(FrameFlags::CONTENT_CHECKSUM, self.checksums);
        flags.set(FrameFlags::CONTENT_SIZE, content_size.is_some());
        FrameHeader {
            flags,
            block_max: frame::block_max_size(frame::block_max_id(self.block_size)),
            content_size,
        }
    }
}

impl BlockCodec for Lz4Codec {
    fn codec(&self) -> Codec {
        Codec::Lz4
    }

    fn content_checksum(&self) -> Option<Algorithm> {
        self.checksums.then_some(Algorithm::Xxh32)
    }

    fn write_header(&self, content_size: Option<u64>, out: &mut Vec<u8>) {
        self.frame_header(content_size).write(out);
    }

    fn new_encoder(&self) -> Box<dyn BlockEncoder> {
        Box::new(Lz4Encoder::new(self.level, self.window, self.checksums))
    }

    fn write_trailer(&self, summary: &StreamSummary, out: &mut Vec<u8>) {
        out.extend_from_slice(&0u32.to_le_bytes());
        if self.checksums {
            let value = summary
                .checksum
                .unwrap_or_else(|| checksum::checksum(Algorithm::Xxh32, &[]));
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        let mut frames = 0usize;
        while !cursor.is_empty() || frames == 0 {
            if let Some(token) = scheduler.cancel_token() {
                token.check()?;
            }
            match read_frame_start(&mut cursor)? {
                FrameStart::Skippable(len) => cursor.skip(len)?,
                FrameStart::Frame(header) => {
                    decode_frame(&header, &mut cursor, scheduler, &mut out)?;
                    frames += 1;
                }
            }
        }
        debug!("lz4: {frames} frame(s), {} -> {} bytes", data.len(), out.len());
        Ok(out)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(Lz4StreamDecoder::default())
    }
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

enum FrameStart {
    Frame(FrameHeader),
    /// Skippable frame; the payload length follows.
    Skippable(usize),
}

fn read_frame_start(cursor: &mut ByteCursor<'_>) -> Result<FrameStart> {
    let magic = cursor.read_u32_le()?;
    match magic {
        MAGIC => FrameHeader::read(cursor).map(FrameStart::Frame),
        LEGACY_MAGIC => Err(Error::unsupported("lz4 legacy frame format")),
        m if is_skippable(m) => Ok(FrameStart::Skippable(cursor.read_u32_le()? as usize)),
        m => Err(Error::corrupt(format!("bad lz4 magic {m:#010x}"))),
    }
}

fn check_block(header: &FrameHeader, block: &BlockPayload<'_>) -> Result<()> {
    if let Some(expected) = block.checksum {
        let actual = checksum::checksum(Algorithm::Xxh32, block.data);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }
    if block.kind == PayloadKind::Stored && block.data.len() > header.block_max {
        return Err(Error::corrupt("lz4 stored block exceeds the block maximum"));
    }
    Ok(())
}

/// Decode one block after `history`, returning only the new bytes.
fn decode_payload(header: &FrameHeader, block: &BlockPayload<'_>, history: &[u8]) -> Result<Vec<u8>> {
    check_block(header, block)?;
    match block.kind {
        PayloadKind::Stored => Ok(block.data.to_vec()),
        _ => {
            let mut out = Vec::with_capacity(history.len() + header.block_max.min(block.data.len() * 4));
            out.extend_from_slice(history);
            decode_block(block.data, &mut out, header.block_max)?;
            Ok(out.split_off(history.len()))
        }
    }
}

fn decode_frame(
    header: &FrameHeader,
    cursor: &mut ByteCursor<'_>,
    scheduler: &Scheduler,
    out: &mut Vec<u8>,
) -> Result<()> {
    let start = out.len();
    let blocks = FrameUnpacker::new(*header).collect_blocks(cursor)?;
    trace!("lz4 frame: {} blocks, independent={}", blocks.len(), header.independent());

    if header.independent() {
        let units = scheduler.run(&blocks, |_| (), |_, _, block| decode_payload(header, block, &[]))?;
        for unit in units {
            out.extend_from_slice(&unit.result);
        }
    } else {
        for block in &blocks {
            if let Some(token) = scheduler.cancel_token() {
                token.check()?;
            }
            let history = &out[start.max(out.len().saturating_sub(DEPENDENT_HISTORY))..];
            let decoded = decode_payload(header, block, history)?;
            out.extend_from_slice(&decoded);
        }
    }

    let content = &out[start..];
    if header.content_checksum() {
        let expected = cursor.read_u32_le()?;
        let actual = checksum::checksum(Algorithm::Xxh32, content);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }
    check_content_size(header, content.len() as u64)
}

fn check_content_size(header: &FrameHeader, actual: u64) -> Result<()> {
    match header.content_size {
        Some(declared) if declared != actual => Err(Error::corrupt(format!(
            "lz4 frame declares {declared} bytes, decoded {actual}"
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

enum Lz4State {
    Boundary { seen_frame: bool },
    Skipping(usize),
    Blocks(FrameState),
}

struct FrameState {
    header: FrameHeader,
    index: usize,
    content: Checksum,
    history: Vec<u8>,
}

struct Lz4StreamDecoder {
    state: Lz4State,
}

impl Default for Lz4StreamDecoder {
    fn default() -> Self {
        Self {
            state: Lz4State::Boundary { seen_frame: false },
        }
    }
}

impl Lz4StreamDecoder {
    fn frame_step(frame: &mut FrameState, input: &[u8]) -> Result<(Decoded, bool)> {
        let mut cursor = ByteCursor::new(input);
        let Some(block) = frame::read_block(&frame.header, frame.index, &mut cursor)? else {
            if frame.header.content_checksum() {
                let expected = cursor.read_u32_le()?;
                let actual = frame.content.value();
                if expected != actual {
                    return Err(Error::ChecksumMismatch { expected, actual });
                }
            }
            check_content_size(&frame.header, frame.content.len())?;
            let done = Decoded {
                consumed: cursor.position(),
                output: Vec::new(),
            };
            return Ok((done, true));
        };

        let output = decode_payload(&frame.header, &block, &frame.history)?;
        frame.index += 1;
        frame.content.update(&output);
        if !frame.header.independent() {
            frame.history.extend_from_slice(&output);
            if frame.history.len() > DEPENDENT_HISTORY {
                let excess = frame.history.len() - DEPENDENT_HISTORY;
                frame.history.drain(..excess);
            }
        }
        Ok((
            Decoded {
                consumed: cursor.position(),
                output,
            },
            false,
        ))
    }
}

impl StreamDecoder for Lz4StreamDecoder {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>> {
        match &mut self.state {
            Lz4State::Boundary { seen_frame } => {
                if input.is_empty() && *seen_frame {
                    return super::end_of_input(input, eof);
                }
                let mut cursor = ByteCursor::new(input);
                self.state = match read_frame_start(&mut cursor)? {
                    FrameStart::Skippable(len) => Lz4State::Skipping(len),
                    FrameStart::Frame(header) => Lz4State::Blocks(FrameState {
                        header,
                        index: 0,
                        content: Checksum::new(Algorithm::Xxh32),
                        history: Vec::new(),
                    }),
                };
                Ok(Some(Decoded {
                    consumed: cursor.position(),
                    output: Vec::new(),
                }))
            }
            Lz4State::Skipping(left) => {
                if *left == 0 {
                    self.state = Lz4State::Boundary { seen_frame: true };
                    return Ok(Some(Decoded::default()));
                }
                if input.is_empty() {
                    return Err(Error::truncated(*left, 0));
                }
                let n = (*left).min(input.len());
                *left -= n;
                Ok(Some(Decoded {
                    consumed: n,
                    output: Vec::new(),
                }))
            }
            Lz4State::Blocks(frame) => {
                let (step, done) = Self::frame_step(frame, input)?;
                if done {
                    self.state = Lz4State::Boundary { seen_frame: true };
                }
                Ok(Some(step))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn compress(codec: &Lz4Codec, data: &[u8], block: usize) -> Vec<u8> {
        let mut out = Vec::new();
        codec.write_header(Some(data.len() as u64), &mut out);
        let mut enc = codec.new_encoder();
        for (i, chunk) in crate::scheduler::split_blocks(data, block).into_iter().enumerate() {
            out.extend(enc.encode_block(i, chunk).bytes);
        }
        let summary = StreamSummary {
            total_len: data.len() as u64,
            blocks: 0,
            checksum: codec
                .content_checksum()
                .map(|alg| checksum::checksum(alg, data)),
        };
        codec.write_trailer(&summary, &mut out);
        out
    }

    fn sample() -> Vec<u8> {
        (0..50_000u32)
            .map(|i| b"lorem ipsum dolor sit amet "[(i % 27) as usize] ^ (i / 5000) as u8)
            .collect()
    }

    #[test]
    fn empty_frame_is_header_and_end_mark() {
        let codec = Lz4Codec::new(6, 64 * 1024, 64 * 1024, false);
        let out = compress(&codec, b"", 4096);
        // magic + FLG + BD + content size + HC + EndMark
        assert_eq!(out.len(), 4 + 2 + 8 + 1 + 4);
        assert!(codec.decompress(&out, &Scheduler::sequential()).unwrap().is_empty());
    }

    #[test]
    fn round_trip_with_checksums() {
        let codec = Lz4Codec::new(6, 64 * 1024, 8 * 1024, true);
        let data = sample();
        let out = compress(&codec, &data, 8 * 1024);
        assert!(out.len() < data.len());
        let scheduler = Scheduler::new(3, crate::config::DispatchPolicy::LeastLoaded).unwrap();
        assert_eq!(codec.decompress(&out, &scheduler).unwrap(), data);
    }

    #[test]
    fn incompressible_blocks_are_stored() {
        let codec = Lz4Codec::new(6, 64 * 1024, 4096, false);
        let mut data = vec![0u8; 4096];
        StdRng::seed_from_u64(7).fill(&mut data[..]);
        let out = compress(&codec, &data, 4096);
        let word = u32::from_le_bytes([out[15], out[16], out[17], out[18]]);
        assert_ne!(word & STORED_BIT, 0);
        assert_eq!(codec.decompress(&out, &Scheduler::sequential()).unwrap(), data);
    }

    #[test]
    fn content_checksum_mismatch() {
        let codec = Lz4Codec::new(6, 64 * 1024, 4096, true);
        let mut out = compress(&codec, b"checked content", 4096);
        let n = out.len();
        out[n - 1] ^= 0x55;
        assert!(matches!(
            codec.decompress(&out, &Scheduler::sequential()),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn skippable_and_concatenated_frames() {
        let codec = Lz4Codec::new(6, 64 * 1024, 4096, false);
        let mut stream = Vec::new();
        stream.extend_from_slice(&0x184D_2A53u32.to_le_bytes());
        stream.extend_from_slice(&3u32.to_le_bytes());
        stream.extend_from_slice(b"xyz");
        stream.extend(compress(&codec, b"first ", 4096));
        stream.extend(compress(&codec, b"second", 4096));
        assert_eq!(
            codec.decompress(&stream, &Scheduler::sequential()).unwrap(),
            b"first second"
        );
    }

    #[test]
    fn legacy_and_dictionary_frames_unsupported() {
        let codec = Lz4Codec::new(6, 64 * 1024, 4096, false);
        let legacy = LEGACY_MAGIC.to_le_bytes();
        assert!(matches!(
            codec.decompress(&legacy, &Scheduler::sequential()),
            Err(Error::UnsupportedFeature(_))
        ));

        let mut dict = MAGIC.to_le_bytes().to_vec();
        let descriptor = [0x61, 0x40, 1, 0, 0, 0];
        dict.extend_from_slice(&descriptor);
        dict.push((checksum::checksum(Algorithm::Xxh32, &descriptor) >> 8) as u8);
        assert!(matches!(
            codec.decompress(&dict, &Scheduler::sequential()),
            Err(Error::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn dependent_blocks_use_history() {
        // Hand-built frame without B.Indep: block 2 copies from block 1.
        let header = FrameHeader {
            flags: FrameFlags::VERSION_01,
            block_max: 64 * 1024,
            content_size: None,
        };
        let mut stream = Vec::new();
        header.write(&mut stream);
        let first = [0x80, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h'];
        stream.extend_from_slice(&(first.len() as u32).to_le_bytes());
        stream.extend_from_slice(&first);
        // Match 8 at offset 8, then an empty literal tail.
        let second = [0x04, 0x08, 0x00, 0x00];
        stream.extend_from_slice(&(second.len() as u32).to_le_bytes());
        stream.extend_from_slice(&second);
        stream.extend_from_slice(&0u32.to_le_bytes());

        let codec = Lz4Codec::new(6, 64 * 1024, 4096, false);
        assert_eq!(
            codec.decompress(&stream, &Scheduler::sequential()).unwrap(),
            b"abcdefghabcdefgh"
        );

        let mut dec = codec.stream_decoder();
        let mut pos = 0;
        let mut out = Vec::new();
        while let Some(step) = dec.decode_step(&stream[pos..], true).unwrap() {
            pos += step.consumed;
            out.extend(step.output);
        }
        assert_eq!(out, b"abcdefghabcdefgh");
    }

    #[test]
    fn streaming_matches_block_mode() {
        let codec = Lz4Codec::new(6, 64 * 1024, 4096, true);
        let data = sample();
        let out = compress(&codec, &data, 4096);
        let mut dec = codec.stream_decoder();
        let mut pos = 0;
        let mut got = Vec::new();
        while let Some(step) = dec.decode_step(&out[pos..], true).unwrap() {
            pos += step.consumed;
            got.extend(step.output);
        }
        assert_eq!(got, data);
    }
}
