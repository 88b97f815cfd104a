// Zstandard frame layout (RFC 8878 section 3.1).
//
//   magic(4) | FHD | [window descriptor] | [dict id] | [content size]
//   block* (3-byte header: last, type, size)
//   [content checksum: low 32 bits of XXH64, LE]
//
// Skippable frames (magic 0x184D2A5?) carry a u32 length and are ignored.

use bitflags::bitflags;
use log::trace;

use crate::block::{BlockPayload, BlockUnpacker, ByteCursor, PayloadKind};
use crate::error::{Error, Result};

use super::literals::MAX_BLOCK_SIZE;

pub const MAGIC: u32 = 0xFD2F_B528;
const SKIPPABLE_MASK: u32 = 0xFFFF_FFF0;
const SKIPPABLE_MAGIC: u32 = 0x184D_2A50;

/// Largest window the decoder accepts from a window descriptor.
pub const MAX_WINDOW: u64 = 1 << 27;

pub fn is_skippable(magic: u32) -> bool {
    magic & SKIPPABLE_MASK == SKIPPABLE_MAGIC
}

bitflags! {
    /// Frame header descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Descriptor: u8 {
        const CONTENT_SIZE_FLAG = 0b1100_0000;
        const SINGLE_SEGMENT = 0b0010_0000;
        const UNUSED = 0b0001_0000;
        const RESERVED = 0b0000_1000;
        const CONTENT_CHECKSUM = 0b0000_0100;
        const DICT_ID_FLAG = 0b0000_0011;
    }
}

/// Parsed frame header (after the magic number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub descriptor: Descriptor,
    pub window_size: u64,
    pub content_size: Option<u64>,
    pub dict_id: u32,
}

impl FrameHeader {
    pub fn has_checksum(&self) -> bool {
        self.descriptor.contains(Descriptor::CONTENT_CHECKSUM)
    }

    pub fn single_segment(&self) -> bool {
        self.descriptor.contains(Descriptor::SINGLE_SEGMENT)
    }

    /// Largest block this frame may contain.
    pub fn block_max(&self) -> usize {
        (self.window_size.min(MAX_BLOCK_SIZE as u64) as usize).max(1)
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let descriptor = Descriptor::from_bits_retain(cursor.read_u8()?);
        if descriptor.contains(Descriptor::RESERVED) {
            return Err(Error::corrupt("zstd frame header reserved bit set"));
        }
        let fcs_flag = descriptor.bits() >> 6;
        let single_segment = descriptor.contains(Descriptor::SINGLE_SEGMENT);

        let window_size = if single_segment {
            None
        } else {
            let wd = cursor.read_u8()?;
            let exponent = u32::from(wd >> 3);
            let base = 1u64 << (10 + exponent);
            Some(base + (base / 8) * u64::from(wd & 7))
        };

        let dict_id = match descriptor.bits() & 3 {
            0 => 0,
            1 => u32::from(cursor.read_u8()?),
            2 => u32::from(cursor.read_u16_le()?),
            _ => cursor.read_u32_le()?,
        };
        if dict_id != 0 {
            return Err(Error::unsupported(format!("zstd dictionary {dict_id}")));
        }

        let content_size = match (fcs_flag, single_segment) {
            (0, false) => None,
            (0, true) => Some(u64::from(cursor.read_u8()?)),
            (1, _) => Some(u64::from(cursor.read_u16_le()?) + 256),
            (2, _) => Some(u64::from(cursor.read_u32_le()?)),
            _ => Some(cursor.read_u64_le()?),
        };

        let window_size = match window_size {
            Some(w) if w > MAX_WINDOW => {
                return Err(Error::unsupported(format!("zstd window of {w} bytes")));
            }
            Some(w) => w,
            None => content_size.unwrap_or(0),
        };
        Ok(Self {
            descriptor,
            window_size,
            content_size,
            dict_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Raw,
    Rle,
    Compressed,
}

/// One block header plus its content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBlock<'a> {
    pub last: bool,
    pub kind: BlockType,
    /// Raw bytes, the single RLE byte, or the compressed block.
    pub data: &'a [u8],
    /// Regenerated size for RLE blocks.
    pub rle_len: usize,
}

/// Read one block.  The cursor is left unchanged on failure.
pub fn read_block<'a>(header: &FrameHeader, cursor: &mut ByteCursor<'a>) -> Result<RawBlock<'a>> {
    let mut probe = *cursor;
    let word = probe.read_u24_le()?;
    let last = word & 1 == 1;
    let size = (word >> 3) as usize;
    let kind = match (word >> 1) & 3 {
        0 => BlockType::Raw,
        1 => BlockType::Rle,
        2 => BlockType::Compressed,
        _ => return Err(Error::UnsupportedBlockType(3)),
    };
    if size > header.block_max() {
        return Err(Error::corrupt(format!(
            "zstd block of {size} bytes exceeds {}",
            header.block_max()
        )));
    }
    let (data, rle_len) = match kind {
        BlockType::Rle => (probe.take(1)?, size),
        _ => (probe.take(size)?, 0),
    };
    *cursor = probe;
    Ok(RawBlock {
        last,
        kind,
        data,
        rle_len,
    })
}

/// Splits a stream into whole frames by walking block headers, so frames
/// can be decoded independently.  Skippable frames are dropped.
#[derive(Debug, Default)]
pub struct FrameUnpacker {
    index: usize,
    seen_frame: bool,
}

impl<'a> BlockUnpacker<'a> for FrameUnpacker {
    fn next_block(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Option<BlockPayload<'a>>> {
        loop {
            if cursor.is_empty() && self.seen_frame {
                return Ok(None);
            }
            let start = cursor.position();
            let mut probe = *cursor;
            let magic = probe.read_u32_le()?;
            if is_skippable(magic) {
                let len = probe.read_u32_le()? as usize;
                probe.skip(len)?;
                *cursor = probe;
                self.seen_frame = true;
                continue;
            }
            if magic != MAGIC {
                return Err(Error::corrupt(format!("bad zstd magic {magic:#010x}")));
            }
            let header = FrameHeader::read(&mut probe)?;
            loop {
                if read_block(&header, &mut probe)?.last {
                    break;
                }
            }
            if header.has_checksum() {
                probe.skip(4)?;
            }
            let len = probe.position() - start;
            let data = cursor.take(len)?;
            trace!("zstd frame {} at {start}: {len} bytes", self.index);
            let payload = BlockPayload {
                index: self.index,
                kind: PayloadKind::Unit,
                data,
                raw_len: header.content_size.and_then(|n| usize::try_from(n).ok()),
                checksum: None,
            };
            self.index += 1;
            self.seen_frame = true;
            return Ok(Some(payload));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
