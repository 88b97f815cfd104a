// Zstandard frame writer: raw and RLE blocks only.
//
// Blocks never hold more than 128 KiB.  A run of one byte at least as long
// as the level's threshold becomes an RLE block; everything else is copied
// into raw blocks.  Content blocks are never marked last; the trailer
// closes the frame with an empty last raw block.

use log::trace;

use super::frame::{Descriptor, MAGIC};
use super::literals::MAX_BLOCK_SIZE;
use crate::codec::{BlockEncoder, EncodedBlock};

const BLOCK_RAW: u32 = 0;
const BLOCK_RLE: u32 = 1;

/// Window descriptor for frames of unknown size: 128 KiB.
const STREAMING_WINDOW_DESCRIPTOR: u8 = 0x38;

/// Shortest run written as an RLE block.
pub fn rle_threshold(level: u32) -> usize {
    match level {
        0..=2 => 48,
        3..=5 => 32,
        6..=8 => 24,
        _ => 16,
    }
}

/// Frame header: single segment with a content size when it is known.
pub fn write_frame_header(content_size: Option<u64>, checksum: bool, out: &mut Vec<u8>) {
    out.extend_from_slice(&MAGIC.to_le_bytes());
    let mut descriptor = Descriptor::empty();
    descriptor.set(Descriptor::CONTENT_CHECKSUM, checksum);
    match content_size {
        Some(len) => {
            let (code, bytes) = match len {
                0..=255 => (0u8, 1usize),
                256..=65_791 => (1, 2),
                65_792..=0xFFFF_FFFF => (2, 4),
                _ => (3, 8),
            };
            descriptor |= Descriptor::SINGLE_SEGMENT | Descriptor::from_bits_retain(code << 6);
            out.push(descriptor.bits());
            let stored = if bytes == 2 { len - 256 } else { len };
            out.extend_from_slice(&stored.to_le_bytes()[..bytes]);
        }
        None => {
            out.push(descriptor.bits());
            out.push(STREAMING_WINDOW_DESCRIPTOR);
        }
    }
}

/// Closing block: empty, raw, last.
pub const LAST_EMPTY_BLOCK: [u8; 3] = [0x01, 0x00, 0x00];

fn block_header(kind: u32, size: usize, out: &mut Vec<u8>) {
    let word = ((size as u32) << 3) | (kind << 1);
    out.extend_from_slice(&word.to_le_bytes()[..3]);
}

/// Per-engine block writer.
pub struct ZstdEncoder {
    rle_threshold: usize,
}

impl ZstdEncoder {
    pub fn new(level: u32) -> Self {
        Self {
            rle_threshold: rle_threshold(level),
        }
    }

    /// Append raw and RLE blocks for `raw`; returns the RLE block count.
    pub fn write_blocks(&self, raw: &[u8], out: &mut Vec<u8>) -> usize {
        let mut rle_blocks = 0;
        let mut pos = 0;
        let mut literal_start = 0;
        while pos < raw.len() {
            let byte = raw[pos];
            let run = raw[pos..].iter().take_while(|&&b| b == byte).count();
            if run < self.rle_threshold {
                pos += run;
                continue;
            }
            write_raw(&raw[literal_start..pos], out);
            let mut left = run;
            while left > 0 {
                let n = left.min(MAX_BLOCK_SIZE);
                block_header(BLOCK_RLE, n, out);
                out.push(byte);
                left -= n;
                rle_blocks += 1;
            }
            pos += run;
            literal_start = pos;
        }
        write_raw(&raw[literal_start..], out);
        rle_blocks
    }
}

fn write_raw(data: &[u8], out: &mut Vec<u8>) {
    for piece in data.chunks(MAX_BLOCK_SIZE) {
        block_header(BLOCK_RAW, piece.len(), out);
        out.extend_from_slice(piece);
    }
}

impl BlockEncoder for ZstdEncoder {
    fn encode_block(&mut self, index: usize, raw: &[u8]) -> EncodedBlock {
        let mut bytes = Vec::with_capacity(raw.len() + 16);
        let rle_blocks = self.write_blocks(raw, &mut bytes);
        trace!(
            "zstd block {index}: {} -> {} bytes, {rle_blocks} rle block(s)",
            raw.len(),
            bytes.len()
        );
        EncodedBlock {
            index,
            raw_len: raw.len(),
            bytes,
            partial: None,
            matches: rle_blocks,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
