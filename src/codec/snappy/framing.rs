// Snappy framing format.
//
//   chunk := type(u8) | length(u24 LE) | body
//
//   0xff  stream identifier, body "sNaPpY"
//   0x00  compressed: masked CRC-32C (u32 LE) | raw snappy block
//   0x01  uncompressed: masked CRC-32C (u32 LE) | data
//   0xfe  padding
//   0x80..=0xfd  reserved skippable
//   0x02..=0x7f  reserved unskippable
//
// The CRC covers the uncompressed chunk data.  A chunk never holds more
// than 64 KiB of uncompressed data.
//
// With content checksums enabled the writer ends the stream with a
// skippable 0xfd chunk:
//
//   "oxCS" | masked CRC-32C of all data (u32 LE) | data length (u64 LE)
//
// Other readers skip it.  Ours verify it against every data chunk since the
// previous one, so a chunk that turns skippable cannot vanish silently.

use crate::block::{BlockPayload, BlockUnpacker, ByteCursor, PayloadKind};
use crate::checksum::crc32c;
use crate::error::{Error, Result};

use super::raw;

/// Full stream identifier chunk.
pub const STREAM_IDENTIFIER: [u8; 10] = [0xFF, 0x06, 0x00, 0x00, b's', b'N', b'a', b'P', b'p', b'Y'];

/// Largest uncompressed chunk payload.
pub const MAX_CHUNK_DATA: usize = 64 * 1024;

pub const CHUNK_COMPRESSED: u8 = 0x00;
pub const CHUNK_UNCOMPRESSED: u8 = 0x01;
pub const CHUNK_PADDING: u8 = 0xFE;
pub const CHUNK_STREAM_IDENTIFIER: u8 = 0xFF;
pub const CHUNK_CONTENT_CHECKSUM: u8 = 0xFD;

const CONTENT_CHECKSUM_TAG: [u8; 4] = *b"oxCS";
const CONTENT_CHECKSUM_BODY: usize = 16;

/// Append one data chunk for `data` (at most [`MAX_CHUNK_DATA`] bytes).
/// `compressed` is the raw block for `data`; it is used when it is smaller.
pub fn write_chunk(data: &[u8], compressed: &[u8], out: &mut Vec<u8>) {
    debug_assert!(data.len() <= MAX_CHUNK_DATA);
    let (kind, body) = if compressed.len() < data.len() {
        (CHUNK_COMPRESSED, compressed)
    } else {
        (CHUNK_UNCOMPRESSED, data)
    };
    let len = (body.len() + 4) as u32;
    out.push(kind);
    out.extend_from_slice(&len.to_le_bytes()[..3]);
    out.extend_from_slice(&crc32c::mask(crc32c::checksum(data)).to_le_bytes());
    out.extend_from_slice(body);
}

/// Append the content checksum chunk for `total_len` bytes of data whose
/// CRC-32C is `checksum`.
pub fn write_content_checksum(checksum: u32, total_len: u64, out: &mut Vec<u8>) {
    out.push(CHUNK_CONTENT_CHECKSUM);
    out.extend_from_slice(&(CONTENT_CHECKSUM_BODY as u32).to_le_bytes()[..3]);
    out.extend_from_slice(&CONTENT_CHECKSUM_TAG);
    out.extend_from_slice(&crc32c::mask(checksum).to_le_bytes());
    out.extend_from_slice(&total_len.to_le_bytes());
}

/// Running CRC-32C and length of decoded data, checked at each content
/// checksum chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentVerifier {
    crc: u32,
    len: u64,
}

impl ContentVerifier {
    pub fn update(&mut self, data: &[u8]) {
        self.crc = crc32c::update(self.crc, data);
        self.len += data.len() as u64;
    }

    /// Compare against a content checksum chunk and start a new segment.
    pub fn verify(&mut self, checksum: u32, len: u64) -> Result<()> {
        if len != self.len {
            return Err(Error::corrupt(format!(
                "snappy content checksum covers {len} bytes, stream decoded {}",
                self.len
            )));
        }
        if checksum != self.crc {
            return Err(Error::ChecksumMismatch {
                expected: checksum,
                actual: self.crc,
            });
        }
        *self = Self::default();
        Ok(())
    }
}

/// Yields data chunks, skipping padding, skippable chunks and repeated
/// stream identifiers.  The stream must open with an identifier.
#[derive(Debug, Clone, Default)]
pub struct ChunkUnpacker {
    index: usize,
    seen_identifier: bool,
}

impl ChunkUnpacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stream identifier has been read.
    pub fn seen_identifier(&self) -> bool {
        self.seen_identifier
    }

    /// Read the next chunk, data or not.  The cursor is left unchanged on
    /// failure.
    pub fn next_chunk<'a>(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Chunk<'a>> {
        let mut probe = *cursor;
        let kind = probe.read_u8()?;
        let len = probe.read_u24_le()? as usize;
        let body = probe.take(len)?;

        if !self.seen_identifier && kind != CHUNK_STREAM_IDENTIFIER {
            return Err(Error::corrupt(format!(
                "snappy stream starts with chunk type {kind:#04x}, not the stream identifier"
            )));
        }
        let chunk = match kind {
            CHUNK_STREAM_IDENTIFIER => {
                if body != &STREAM_IDENTIFIER[4..] {
                    return Err(Error::corrupt("bad snappy stream identifier"));
                }
                self.seen_identifier = true;
                Chunk::Skip
            }
            CHUNK_COMPRESSED | CHUNK_UNCOMPRESSED => {
                if len < 4 {
                    return Err(Error::corrupt(format!("snappy chunk of {len} bytes has no checksum")));
                }
                let masked = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                let data = &body[4..];
                let (payload_kind, raw_len) = if kind == CHUNK_COMPRESSED {
                    (PayloadKind::Compressed, None)
                } else {
                    if data.len() > MAX_CHUNK_DATA {
                        return Err(Error::corrupt("uncompressed snappy chunk exceeds 64 KiB"));
                    }
                    (PayloadKind::Stored, Some(data.len()))
                };
                let payload = BlockPayload {
                    index: self.index,
                    kind: payload_kind,
                    data,
                    raw_len,
                    checksum: Some(crc32c::unmask(masked)),
                };
                self.index += 1;
                Chunk::Data(payload)
            }
            CHUNK_CONTENT_CHECKSUM
                if len == CONTENT_CHECKSUM_BODY && body[..4] == CONTENT_CHECKSUM_TAG =>
            {
                let masked = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let mut total = [0u8; 8];
                total.copy_from_slice(&body[8..16]);
                Chunk::ContentChecksum {
                    checksum: crc32c::unmask(masked),
                    len: u64::from_le_bytes(total),
                }
            }
            0x02..=0x7F => return Err(Error::UnsupportedBlockType(kind)),
            _ => Chunk::Skip,
        };
        *cursor = probe;
        Ok(chunk)
    }
}

/// One framing chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk<'a> {
    Data(BlockPayload<'a>),
    /// CRC-32C and length of the data since the previous such chunk.
    ContentChecksum { checksum: u32, len: u64 },
    /// Identifier, padding or skippable chunk.
    Skip,
}

impl<'a> BlockUnpacker<'a> for ChunkUnpacker {
    fn next_block(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Option<BlockPayload<'a>>> {
        loop {
            if cursor.is_empty() && self.seen_identifier {
                return Ok(None);
            }
            if let Chunk::Data(payload) = self.next_chunk(cursor)? {
                return Ok(Some(payload));
            }
        }
    }
}

/// Decode and verify one data chunk.
pub fn decode_chunk(payload: &BlockPayload<'_>) -> Result<Vec<u8>> {
    let data = match payload.kind {
        PayloadKind::Compressed => raw::decompress_raw(payload.data, MAX_CHUNK_DATA)?,
        _ => payload.data.to_vec(),
    };
    if let Some(expected) = payload.checksum {
        let actual = crc32c::checksum(&data);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = STREAM_IDENTIFIER.to_vec();
        for data in chunks {
            write_chunk(data, &raw::compress_raw(data, 6), &mut out);
        }
        out
    }

    #[test]
    fn skips_padding_and_reserved_chunks() {
        let mut stream = framed(&[b"one "]);
        stream.extend_from_slice(&[CHUNK_PADDING, 2, 0, 0, 0, 0]);
        stream.extend_from_slice(&[0x80, 1, 0, 0, 9]);
        stream.extend_from_slice(&STREAM_IDENTIFIER);
        write_chunk(b"two", &raw::compress_raw(b"two", 6), &mut stream);

        let mut cursor = ByteCursor::new(&stream);
        let chunks = ChunkUnpacker::new().collect_blocks(&mut cursor).unwrap();
        let text: Vec<u8> = chunks.iter().flat_map(|c| decode_chunk(c).unwrap()).collect();
        assert_eq!(text, b"one two");
    }

    #[test]
    fn unskippable_reserved_chunk() {
        let mut stream = STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[0x02, 0, 0, 0]);
        let mut cursor = ByteCursor::new(&stream);
        assert!(matches!(
            ChunkUnpacker::new().collect_blocks(&mut cursor),
            Err(Error::UnsupportedBlockType(2))
        ));
    }

    #[test]
    fn missing_identifier() {
        let mut stream = Vec::new();
        write_chunk(b"abc", &[], &mut stream);
        let mut cursor = ByteCursor::new(&stream);
        assert!(matches!(
            ChunkUnpacker::new().collect_blocks(&mut cursor),
            Err(Error::CorruptStream(_))
        ));
    }

    #[test]
    fn chunk_crc_checked() {
        let mut stream = framed(&[b"payload"]);
        let n = stream.len();
        // Uncompressed chunk: flip a data byte.
        stream[n - 1] ^= 1;
        let mut cursor = ByteCursor::new(&stream);
        let chunks = ChunkUnpacker::new().collect_blocks(&mut cursor).unwrap();
        assert!(matches!(decode_chunk(&chunks[0]), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn content_checksum_chunk_parsed_and_verified() {
        let mut stream = framed(&[b"first ", b"second"]);
        write_content_checksum(crc32c::checksum(b"first second"), 12, &mut stream);

        let mut cursor = ByteCursor::new(&stream);
        let mut unpacker = ChunkUnpacker::new();
        let mut verifier = ContentVerifier::default();
        let mut checked = 0;
        while !cursor.is_empty() {
            match unpacker.next_chunk(&mut cursor).unwrap() {
                Chunk::Data(payload) => verifier.update(&decode_chunk(&payload).unwrap()),
                Chunk::ContentChecksum { checksum, len } => {
                    verifier.verify(checksum, len).unwrap();
                    checked += 1;
                }
                Chunk::Skip => {}
            }
        }
        assert_eq!(checked, 1);
        assert_eq!(verifier, ContentVerifier::default());
    }

    #[test]
    fn verifier_rejects_missing_data() {
        let mut verifier = ContentVerifier::default();
        verifier.update(b"second");
        let err = verifier.verify(crc32c::checksum(b"first second"), 12).unwrap_err();
        assert!(matches!(err, Error::CorruptStream(_)));

        let mut verifier = ContentVerifier::default();
        verifier.update(b"first secxnd");
        let err = verifier.verify(crc32c::checksum(b"first second"), 12).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn foreign_0xfd_chunk_is_skipped() {
        let mut stream = framed(&[b"data"]);
        stream.extend_from_slice(&[CHUNK_CONTENT_CHECKSUM, 3, 0, 0, 1, 2, 3]);
        let mut cursor = ByteCursor::new(&stream);
        let mut unpacker = ChunkUnpacker::new();
        unpacker.next_chunk(&mut cursor).unwrap();
        assert!(matches!(unpacker.next_chunk(&mut cursor).unwrap(), Chunk::Data(_)));
        assert_eq!(unpacker.next_chunk(&mut cursor).unwrap(), Chunk::Skip);
    }

    #[test]
    fn incompressible_chunk_stored() {
        let mut out = Vec::new();
        write_chunk(b"xy", &raw::compress_raw(b"xy", 6), &mut out);
        assert_eq!(out[0], CHUNK_UNCOMPRESSED);
        assert_eq!(&out[1..4], &[6, 0, 0]);
    }
}
