// Zstandard literals section (RFC 8878 section 3.1.1.3.1).
//
//   byte0 bits 0-1  type: raw, RLE, compressed, treeless
//   byte0 bits 2-3  size format
//
// Raw and RLE carry only a regenerated size (5, 12 or 20 bits).  The
// Huffman types carry regenerated and compressed sizes (10, 14 or 18 bits
// each) and one or four streams; four streams are preceded by a six-byte
// jump table holding the first three stream sizes.

use crate::error::{Error, Result};

use super::huffman::HuffmanTable;

/// Largest block content.
pub const MAX_BLOCK_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralsType {
    Raw,
    Rle,
    Compressed,
    /// Huffman streams reusing the previous block's tree.
    Treeless,
}

/// Parsed literals section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralsHeader {
    pub kind: LiteralsType,
    pub regenerated: usize,
    /// Compressed size (tree included); 0 for raw and RLE.
    pub compressed: usize,
    pub four_streams: bool,
    pub header_len: usize,
}

impl LiteralsHeader {
    pub fn read(data: &[u8]) -> Result<Self> {
        let byte = |i: usize| -> Result<usize> {
            data.get(i)
                .map(|&b| usize::from(b))
                .ok_or_else(|| Error::corrupt("literals header overruns the block"))
        };
        let b0 = byte(0)?;
        let kind = match b0 & 3 {
            0 => LiteralsType::Raw,
            1 => LiteralsType::Rle,
            2 => LiteralsType::Compressed,
            _ => LiteralsType::Treeless,
        };
        let format = (b0 >> 2) & 3;

        let header = match kind {
            LiteralsType::Raw | LiteralsType::Rle => {
                let (regenerated, header_len) = match format {
                    0 | 2 => (b0 >> 3, 1),
                    1 => ((b0 >> 4) | (byte(1)? << 4), 2),
                    _ => ((b0 >> 4) | (byte(1)? << 4) | (byte(2)? << 12), 3),
                };
                Self {
                    kind,
                    regenerated,
                    compressed: 0,
                    four_streams: false,
                    header_len,
                }
            }
            LiteralsType::Compressed | LiteralsType::Treeless => {
                let (header_len, size_bits) = match format {
                    0 | 1 => (3, 10),
                    2 => (4, 14),
                    _ => (5, 18),
                };
                let mut value = 0u64;
                for i in 0..header_len {
                    value |= (byte(i)? as u64) << (8 * i);
                }
                let mask = (1u64 << size_bits) - 1;
                Self {
                    kind,
                    regenerated: ((value >> 4) & mask) as usize,
                    compressed: ((value >> (4 + size_bits)) & mask) as usize,
                    four_streams: format != 0,
                    header_len,
                }
            }
        };
        if header.regenerated > MAX_BLOCK_SIZE {
            return Err(Error::corrupt(format!(
                "literals section regenerates {} bytes",
                header.regenerated
            )));
        }
        Ok(header)
    }
}

/// Decode the literals section at the front of `data` into `out`.
///
/// `huffman` holds the tree of the previous compressed literals in the
/// frame; a compressed section replaces it.  Returns the bytes consumed.
pub fn decode_literals(data: &[u8], huffman: &mut Option<HuffmanTable>, out: &mut Vec<u8>) -> Result<usize> {
    let header = LiteralsHeader::read(data)?;
    let body = &data[header.header_len..];
    out.clear();
    match header.kind {
        LiteralsType::Raw => {
            let bytes = body
                .get(..header.regenerated)
                .ok_or_else(|| Error::corrupt("raw literals overrun the block"))?;
            out.extend_from_slice(bytes);
            Ok(header.header_len + header.regenerated)
        }
        LiteralsType::Rle => {
            let &byte = body
                .first()
                .ok_or_else(|| Error::corrupt("rle literals overrun the block"))?;
            out.resize(header.regenerated, byte);
            Ok(header.header_len + 1)
        }
        LiteralsType::Compressed | LiteralsType::Treeless => {
            let mut streams = body
                .get(..header.compressed)
                .ok_or_else(|| Error::corrupt("compressed literals overrun the block"))?;
            if header.kind == LiteralsType::Compressed {
                let (table, used) = HuffmanTable::read(streams)?;
                *huffman = Some(table);
                streams = &streams[used..];
            }
            let table = huffman
                .as_ref()
                .ok_or_else(|| Error::corrupt("treeless literals without a previous tree"))?;
            out.reserve(header.regenerated);
            if header.four_streams {
                decode_four_streams(table, streams, header.regenerated, out)?;
            } else {
                table.decode_stream(streams, header.regenerated, out)?;
            }
            Ok(header.header_len + header.compressed)
        }
    }
}

fn decode_four_streams(table: &HuffmanTable, data: &[u8], regenerated: usize, out: &mut Vec<u8>) -> Result<()> {
    if data.len() < 6 {
        return Err(Error::corrupt("literals jump table overruns the section"));
    }
    let size = |i: usize| usize::from(u16::from_le_bytes([data[2 * i], data[2 * i + 1]]));
    let sizes = [size(0), size(1), size(2)];
    let streams = &data[6..];
    let first_three: usize = sizes.iter().sum();
    if first_three > streams.len() {
        return Err(Error::corrupt("literals jump table exceeds the section"));
    }
    let segment = regenerated.div_ceil(4);
    if 3 * segment > regenerated {
        return Err(Error::corrupt(format!(
            "{regenerated} literals cannot fill four streams"
        )));
    }

    let mut start = 0;
    for (i, &len) in sizes.iter().enumerate() {
        table.decode_stream(&streams[start..start + len], segment, out)
            .map_err(|e| stream_error(i, e))?;
        start += len;
    }
    table
        .decode_stream(&streams[start..], regenerated - 3 * segment, out)
        .map_err(|e| stream_error(3, e))
}

fn stream_error(stream: usize, e: Error) -> Error {
    match e {
        Error::CorruptStream(msg) => Error::corrupt(format!("literal stream {stream}: {msg}")),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
