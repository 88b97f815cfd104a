// GZIP (RFC 1952) pipeline: one member per scheduler block.
//
// Member layout:
//
//   1f 8b 08 FLG MTIME(4) XFL OS
//   XLEN(2) "GZ" 04 00 TOTAL(4)      FEXTRA: total member length, LE
//   [FNAME\0] [FCOMMENT\0]           first member only
//   [CRC16]                          FHCRC
//   deflate run + final empty stored block
//   CRC32(4) ISIZE(4)
//
// Concatenated members are a standard multi-member stream.  The size
// subfield lets the decoder split the stream without inflating, so members
// are decoded in parallel when every one of them carries it; any other
// stream is decoded member by member.

use bitflags::bitflags;
use log::{debug, trace, warn};

use crate::block::{BlockPayload, BlockUnpacker, ByteCursor, PayloadKind};
use crate::checksum::{Algorithm, Checksum};
use crate::config::Codec;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

use super::deflate::{DeflateEncoder, FINAL_EMPTY_BLOCK, InflateStream, inflate};
use super::{BlockCodec, BlockEncoder, Decoded, EncodedBlock, StreamDecoder, StreamSummary};

const ID1: u8 = 0x1F;
const ID2: u8 = 0x8B;
const CM_DEFLATE: u8 = 8;

/// Subfield carrying the total member length.
pub const SIZE_SUBFIELD_ID: [u8; 2] = [b'G', b'Z'];

/// Operating system byte for "unknown".
pub const OS_UNKNOWN: u8 = 255;

bitflags! {
    /// Member header FLG byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GzipFlags: u8 {
        const FTEXT = 0x01;
        const FHCRC = 0x02;
        const FEXTRA = 0x04;
        const FNAME = 0x08;
        const FCOMMENT = 0x10;
    }
}

/// Optional header fields written by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    /// Modification time (Unix seconds, 0 = unknown).
    pub mtime: u32,
    pub os: u8,
    /// Original file name (first member only).
    pub filename: Option<String>,
    /// Free-form comment (first member only).
    pub comment: Option<String>,
    /// Emit a CRC16 over each member header.
    pub header_crc: bool,
}

impl Default for GzipHeader {
    fn default() -> Self {
        Self {
            mtime: 0,
            os: OS_UNKNOWN,
            filename: None,
            comment: None,
            header_crc: false,
        }
    }
}

/// XFL byte: 2 for maximum compression, 4 for the fastest levels.
pub fn xfl_for_level(level: u32) -> u8 {
    match level {
        9 => 2,
        0 | 1 => 4,
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Member header parsing
// ---------------------------------------------------------------------------

/// Parsed member header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHeader {
    pub flags: GzipFlags,
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    /// Total member length from the size subfield.
    pub member_size: Option<u32>,
    pub filename: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    /// Header bytes, including optional fields.
    pub header_len: usize,
}

/// Parse a member header at the cursor.  Validates magic, CM, reserved
/// flag bits and the header CRC.
pub fn read_member_header(cursor: &mut ByteCursor<'_>) -> Result<MemberHeader> {
    let start = cursor.position();
    let fixed = cursor.take(10)?;
    if fixed[0] != ID1 || fixed[1] != ID2 {
        return Err(Error::corrupt(format!(
            "bad gzip magic {:02x} {:02x}",
            fixed[0], fixed[1]
        )));
    }
    if fixed[2] != CM_DEFLATE {
        return Err(Error::corrupt(format!("gzip compression method {} is not deflate", fixed[2])));
    }
    let flags = GzipFlags::from_bits(fixed[3])
        .ok_or_else(|| Error::corrupt(format!("reserved gzip flag bits set in {:#04x}", fixed[3])))?;
    let mtime = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);

    let mut member_size = None;
    if flags.contains(GzipFlags::FEXTRA) {
        let xlen = usize::from(cursor.read_u16_le()?);
        let mut extra = ByteCursor::new(cursor.take(xlen)?);
        while extra.remaining() >= 4 {
            let id = extra.take(2)?;
            let len = usize::from(extra.read_u16_le()?);
            let data = extra
                .take(len)
                .map_err(|_| Error::corrupt("gzip extra subfield overruns XLEN"))?;
            if id == SIZE_SUBFIELD_ID && len == 4 {
                member_size = Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]));
            }
        }
        if !extra.is_empty() {
            return Err(Error::corrupt("gzip extra field has a partial subfield"));
        }
    }
    let filename = if flags.contains(GzipFlags::FNAME) {
        Some(cursor.read_cstr()?.to_vec())
    } else {
        None
    };
    let comment = if flags.contains(GzipFlags::FCOMMENT) {
        Some(cursor.read_cstr()?.to_vec())
    } else {
        None
    };
    if flags.contains(GzipFlags::FHCRC) {
        let covered = &cursor.data()[start..cursor.position()];
        let actual = crc32fast::hash(covered) & 0xFFFF;
        let expected = u32::from(cursor.read_u16_le()?);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
    }

    Ok(MemberHeader {
        flags,
        mtime,
        xfl: fixed[8],
        os: fixed[9],
        member_size,
        filename,
        comment,
        header_len: cursor.position() - start,
    })
}

/// Decode one member at the start of `data`.  Returns the output and the
/// member's length in bytes.
pub fn decode_member(data: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut cursor = ByteCursor::new(data);
    let header = read_member_header(&mut cursor)?;
    let (out, used) = inflate(cursor.rest())?;
    cursor.skip(used)?;
    let expected_crc = cursor.read_u32_le()?;
    let isize = cursor.read_u32_le()?;
    verify_trailer(expected_crc, crc32fast::hash(&out), isize, out.len() as u64)?;
    if let Some(size) = header.member_size {
        if size as usize != cursor.position() {
            return Err(Error::corrupt(format!(
                "member size subfield says {size} bytes, member is {}",
                cursor.position()
            )));
        }
    }
    Ok((out, cursor.position()))
}

fn verify_trailer(expected: u32, actual: u32, isize: u32, len: u64) -> Result<()> {
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    if u64::from(isize) != len & 0xFFFF_FFFF {
        return Err(Error::corrupt(format!(
            "gzip ISIZE {isize} does not match {len} decoded bytes"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unpacker
// ---------------------------------------------------------------------------

/// Splits a stream into members using the size subfield.
///
/// Fails on a member without the subfield; such streams need symbol-driven
/// decoding.
#[derive(Debug, Default)]
pub struct MemberUnpacker {
    index: usize,
}

impl<'a> BlockUnpacker<'a> for MemberUnpacker {
    fn next_block(&mut self, cursor: &mut ByteCursor<'a>) -> Result<Option<BlockPayload<'a>>> {
        if cursor.is_empty() {
            return Ok(None);
        }
        let start = cursor.position();
        let mut probe = *cursor;
        let header = read_member_header(&mut probe)?;
        let size = header
            .member_size
            .ok_or_else(|| Error::unsupported("gzip member without size subfield"))? as usize;
        if size < header.header_len + 8 {
            return Err(Error::corrupt(format!("gzip member size {size} is too small")));
        }
        let data = cursor.take(size)?;
        let isize = u32::from_le_bytes([data[size - 4], data[size - 3], data[size - 2], data[size - 1]]);
        let payload = BlockPayload {
            index: self.index,
            kind: PayloadKind::Unit,
            data,
            raw_len: Some(isize as usize),
            checksum: None,
        };
        trace!("gzip member {} at {start}: {size} bytes", self.index);
        self.index += 1;
        Ok(Some(payload))
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Writes one complete member per block.
pub struct MemberEncoder {
    deflate: DeflateEncoder,
    header: GzipHeader,
    xfl: u8,
}

impl MemberEncoder {
    pub fn new(level: u32, window: usize, header: GzipHeader) -> Self {
        Self {
            deflate: DeflateEncoder::new(level, window),
            header,
            xfl: xfl_for_level(level),
        }
    }

    fn write_member_header(&self, first: bool, total: Option<u32>, out: &mut Vec<u8>) {
        let start = out.len();
        let name = self.header.filename.as_ref().filter(|_| first);
        let comment = self.header.comment.as_ref().filter(|_| first);

        let mut flags = GzipFlags::empty();
        flags.set(GzipFlags::FEXTRA, total.is_some());
        flags.set(GzipFlags::FNAME, name.is_some());
        flags.set(GzipFlags::FCOMMENT, comment.is_some());
        flags.set(GzipFlags::FHCRC, self.header.header_crc);

        out.extend_from_slice(&[ID1, ID2, CM_DEFLATE, flags.bits()]);
        out.extend_from_slice(&self.header.mtime.to_le_bytes());
        out.extend_from_slice(&[self.xfl, self.header.os]);
        if let Some(total) = total {
            out.extend_from_slice(&8u16.to_le_bytes());
            out.extend_from_slice(&SIZE_SUBFIELD_ID);
            out.extend_from_slice(&4u16.to_le_bytes());
            out.extend_from_slice(&total.to_le_bytes());
        }
        for field in [name, comment].into_iter().flatten() {
            // NUL terminates the field; interior NULs would truncate it.
            out.extend(field.bytes().filter(|&b| b != 0));
            out.push(0);
        }
        if self.header.header_crc {
            let crc = crc32fast::hash(&out[start..]) as u16;
            out.extend_from_slice(&crc.to_le_bytes());
        }
    }

    fn header_len(&self, first: bool) -> usize {
        let field = |f: &Option<String>| {
            f.as_ref()
                .filter(|_| first)
                .map_or(0, |s| s.bytes().filter(|&b| b != 0).count() + 1)
        };
        10 + 12 + field(&self.header.filename) + field(&self.header.comment) + if self.header.header_crc { 2 } else { 0 }
    }
}

impl BlockEncoder for MemberEncoder {
    fn encode_block(&mut self, index: usize, raw: &[u8]) -> EncodedBlock {
        let mut body = Vec::with_capacity(raw.len() / 2 + 16);
        let matches = self.deflate.deflate_into(index, raw, &mut body);
        body.extend_from_slice(&FINAL_EMPTY_BLOCK);

        let first = index == 0;
        let total = self.header_len(first) + body.len() + 8;
        let size_field = match u32::try_from(total) {
            Ok(t) => Some(t),
            Err(_) => {
                warn!("gzip member {index} is {total} bytes; size subfield dropped");
                None
            }
        };

        let mut bytes = Vec::with_capacity(total);
        self.write_member_header(first, size_field, &mut bytes);
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&crc32fast::hash(raw).to_le_bytes());
        bytes.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        debug_assert!(size_field.is_none() || bytes.len() == total);

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
pub struct GzipCodec {
    level: u32,
    window: usize,
    header: GzipHeader,
}

impl GzipCodec {
    pub fn new(level: u32, window: usize, header: GzipHeader) -> Self {
        Self {
            level,
            window,
            header,
        }
    }

    fn decompress_sequential(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 3);
        let mut pos = 0;
        loop {
            if let Some(token) = scheduler.cancel_token() {
                token.check()?;
            }
            let (member, used) = decode_member(&data[pos..])?;
            out.extend_from_slice(&member);
            pos += used;
            if pos == data.len() {
                return Ok(out);
            }
        }
    }
}

impl BlockCodec for GzipCodec {
    fn codec(&self) -> Codec {
        Codec::Gzip
    }

    fn content_checksum(&self) -> Option<Algorithm> {
        None
    }

    fn write_header(&self, _content_size: Option<u64>, _out: &mut Vec<u8>) {}

    fn new_encoder(&self) -> Box<dyn BlockEncoder> {
        Box::new(MemberEncoder::new(self.level, self.window, self.header.clone()))
    }

    fn write_trailer(&self, _summary: &StreamSummary, _out: &mut Vec<u8>) {}

    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::new(data);
        let members = match MemberUnpacker::default().collect_blocks(&mut cursor) {
            Ok(members) if !members.is_empty() => members,
            _ => {
                debug!("gzip: members not size-tagged, decoding sequentially");
                return self.decompress_sequential(data, scheduler);
            }
        };
        debug!("gzip: decoding {} members on {} engine(s)", members.len(), scheduler.engines());

        let units = scheduler.run(&members, |_| (), |_, _, member| {
            let (out, used) = decode_member(member.data)?;
            if used != member.data.len() {
                return Err(Error::corrupt("gzip member shorter than its size subfield"));
            }
            Ok(out)
        })?;
        let total: usize = units.iter().map(|u| u.result.len()).sum();
        let mut out = Vec::with_capacity(total);
        for unit in units {
            out.extend_from_slice(&unit.result);
        }
        Ok(out)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(GzipStreamDecoder::default())
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

enum MemberState {
    /// Before a member header (start of stream or after a trailer).
    Boundary { seen_member: bool },
    Body,
    Trailer,
}

struct GzipStreamDecoder {
    state: MemberState,
    inflater: InflateStream,
    crc: Checksum,
}

impl Default for GzipStreamDecoder {
    fn default() -> Self {
        Self {
            state: MemberState::Boundary { seen_member: false },
            inflater: InflateStream::new(),
            crc: Checksum::new(Algorithm::Crc32),
        }
    }
}

impl StreamDecoder for GzipStreamDecoder {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>> {
        match self.state {
            MemberState::Boundary { seen_member } => {
                if input.is_empty() && seen_member {
                    return super::end_of_input(input, eof);
                }
                let mut cursor = ByteCursor::new(input);
                let header = read_member_header(&mut cursor)?;
                self.state = MemberState::Body;
                self.inflater = InflateStream::new();
                self.crc = Checksum::new(Algorithm::Crc32);
                Ok(Some(Decoded {
                    consumed: header.header_len,
                    output: Vec::new(),
                }))
            }
            MemberState::Body => {
                let step = self.inflater.step(input)?;
                self.crc.update(&step.output);
                if self.inflater.is_finished() {
                    self.state = MemberState::Trailer;
                }
                Ok(Some(step))
            }
            MemberState::Trailer => {
                let mut cursor = ByteCursor::new(input);
                let expected = cursor.read_u32_le()?;
                let isize = cursor.read_u32_le()?;
                verify_trailer(expected, self.crc.value(), isize, self.crc.len())?;
                self.state = MemberState::Boundary { seen_member: true };
                Ok(Some(Decoded {
                    consumed: 8,
                    output: Vec::new(),
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
