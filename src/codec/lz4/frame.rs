// LZ4 frame header and block framing.
//
//   magic 0x184D2204 | FLG | BD | [content size u64] | [dict id u32] | HC
//   blocks: size u32 (bit 31 = stored) | data | [xxh32 of data]
//   EndMark u32 0 | [content xxh32]
//
// HC is the second byte of xxh32 over the descriptor (FLG through the
// optional fields).

use bitflags::bitflags;

use crate::block::{BlockPayload, BlockUnpacker, ByteCursor, PayloadKind};
use crate::checksum::{self, Algorithm};
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x184D_2204;
pub const LEGACY_MAGIC: u32 = 0x184C_2102;
pub const SKIPPABLE_MAGIC_MASK: u32 = 0xFFFF_FFF0;
pub const SKIPPABLE_MAGIC: u32 = 0x184D_2A50;

/// Block size word bit marking an uncompressed block.
pub const STORED_BIT: u32 = 0x8000_0000;

/// History dependent blocks may reference.
pub const DEPENDENT_HISTORY: usize = 64 * 1024;

bitflags! {
    /// Frame descriptor FLG byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        const VERSION_01 = 0x40;
        const BLOCK_INDEPENDENT = 0x20;
        const BLOCK_CHECKSUM = 0x10;
        const CONTENT_SIZE = 0x08;
        const CONTENT_CHECKSUM = 0x04;
        const DICT_ID = 0x01;
    }
}

/// Smallest block max size id (4..=7) covering `block_size`.
pub fn block_max_id(block_size: usize) -> u8 {
    (4u8..=7)
        .find(|&id| block_size <= block_max_size(id))
        .unwrap_or(7)
}

/// Block max size for an id in 4..=7.
pub fn block_max_size(id: u8) -> usize {
    1 << (8 + 2 * usize::from(id))
}

pub fn is_skippable(magic: u32) -> bool {
    magic & SKIPPABLE_MAGIC_MASK == SKIPPABLE_MAGIC
}

/// Parsed frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: FrameFlags,
    pub block_max: usize,
    pub content_size: Option<u64>,
}

impl FrameHeader {
    pub fn independent(&self) -> bool {
        self.flags.contains(FrameFlags::BLOCK_INDEPENDENT)
    }

    pub fn block_checksum(&self) -> bool {
        self.flags.contains(FrameFlags::BLOCK_CHECKSUM)
    }

    pub fn content_checksum(&self) -> bool {
        self.flags.contains(FrameFlags::CONTENT_CHECKSUM)
    }

    /// Serialise magic and descriptor.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC.to_le_bytes());
        let start = out.len();
        out.push(self.flags.bits());
        out.push(block_max_id(self.block_max) << 4);
        if let Some(size) = self.content_size {
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.push(header_checksum(&out[start..]));
    }

    /// Parse a descriptor after the magic number.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let start = cursor.position();
        let flg = cursor.read_u8()?;
        let bd = cursor.read_u8()?;
        if flg >> 6 != 1 {
            return Err(Error::unsupported(format!("lz4 frame version {}", flg >> 6)));
        }
        let flags = FrameFlags::from_bits(flg)
            .ok_or_else(|| Error::corrupt(format!("reserved lz4 FLG bit set in {flg:#04x}")))?;
        if bd & 0x8F != 0 {
            return Err(Error::corrupt(format!("reserved lz4 BD bits set in {bd:#04x}")));
        }
        let id = bd >> 4;
        if id < 4 {
            return Err(Error::corrupt(format!("lz4 block max size id {id} is invalid")));
        }
        let content_size = if flags.contains(FrameFlags::CONTENT_SIZE) {
            Some(cursor.read_u64_le()?)
        } else {
            None
        };
        if flags.contains(FrameFlags::DICT_ID) {
            cursor.read_u32_le()?;
        }
        let covered = &cursor.data()[start..cursor.position()];
        let hc = cursor.read_u8()?;
        if hc != header_checksum(covered) {
            return Err(Error::ChecksumMismatch {
                expected: u32::from(hc),
                actual: u32::from(header_checksum(covered)),
            });
        }
        if flags.contains(FrameFlags::DICT_ID) {
            return Err(Error::unsupported("lz4 dictionary id"));
        }
        Ok(Self {
            flags,
            block_max: block_max_size(id),
            content_size,
        })
    }
}

fn header_checksum(descriptor: &[u8]) -> u8 {
    (checksum::checksum(Algorithm::Xxh32, descriptor) >> 8) as u8
}

// ---------------------------------------------------------------------------
// Block unpacker
// ---------------------------------------------------------------------------

/// Yields the data blocks of one frame, stopping at (and consuming) the
/// EndMark.
#[derive(Debug)]
pub struct FrameUnpacker {
    header: FrameHeader,
    index: usize,
}

impl FrameUnpacker {
    pub fn new(header: FrameHeader) -> Self {
        Self { header, index: 0 }
    }
}

impl<'a> BlockUnpacker<'a> for FrameUnpacker {
    fn next_block(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Option<BlockPayload<'a>>> {
        read_block(&self.header, self.index, cursor).inspect(|block| {
            if block.is_some() {
                self.index += 1;
            }
        })
    }
}

/// Read one block (or the EndMark) at the cursor.  The cursor is left
/// unchanged on failure.
pub fn read_block<'a>(
    header: &FrameHeader,
    index: usize,
    cursor: &mut ByteCursor<'a>,
) -> Result<Option<BlockPayload<'a>>> {
    let mut probe = *cursor;
    let word = probe.read_u32_le()?;
    if word == 0 {
        *cursor = probe;
        return Ok(None);
    }
    let stored = word & STORED_BIT != 0;
    let size = (word & !STORED_BIT) as usize;
    if size > header.block_max {
        return Err(Error::corrupt(format!(
            "lz4 block of {size} bytes exceeds the {} byte maximum",
            header.block_max
        )));
    }
    let data = probe.take(size)?;
    let checksum = if header.block_checksum() {
        Some(probe.read_u32_le()?)
    } else {
        None
    };
    *cursor = probe;
    Ok(Some(BlockPayload {
        index,
        kind: if stored {
            PayloadKind::Stored
        } else {
            PayloadKind::Compressed
        },
        data,
        raw_len: stored.then_some(size),
        checksum,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
