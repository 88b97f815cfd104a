// zlib (RFC 1950) framing around the DEFLATE pipeline.
//
//   CMF | FLG | deflate blocks ... | final empty stored block | ADLER32 (BE)
//
// The Adler-32 trailer is combined from per-block partials by the caller.

use log::debug;

use crate::block::ByteCursor;
use crate::checksum::{self, Algorithm, Checksum};
use crate::config::Codec;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

use super::deflate::{DeflateEncoder, FINAL_EMPTY_BLOCK, InflateStream, cancel_check, inflate_with};
use super::{BlockCodec, BlockEncoder, Decoded, StreamDecoder, StreamSummary};

/// Compression method 8 (DEFLATE).
const CM_DEFLATE: u8 = 8;
/// Preset-dictionary flag bit in FLG.
const FDICT: u8 = 0x20;

/// CMF/FLG pair for a window and level.
pub fn header_bytes(window: usize, level: u32) -> [u8; 2] {
    let window_log = window.clamp(256, 32 * 1024).next_power_of_two().trailing_zeros();
    let cinfo = (window_log - 8) as u8;
    let cmf = (cinfo << 4) | CM_DEFLATE;
    let flevel: u8 = match level {
        0 | 1 => 0,
        2..=5 => 1,
        6 => 2,
        _ => 3,
    };
    let mut flg = flevel << 6;
    let rem = ((u16::from(cmf) << 8) | u16::from(flg)) % 31;
    if rem != 0 {
        flg += (31 - rem) as u8;
    }
    [cmf, flg]
}

/// Validate a CMF/FLG pair.
pub fn check_header(cmf: u8, flg: u8) -> Result<()> {
    if cmf & 0x0F != CM_DEFLATE {
        return Err(Error::corrupt(format!("zlib compression method {} is not deflate", cmf & 0x0F)));
    }
    if cmf >> 4 > 7 {
        return Err(Error::corrupt(format!("zlib window exponent {} exceeds 7", cmf >> 4)));
    }
    if ((u16::from(cmf) << 8) | u16::from(flg)) % 31 != 0 {
        return Err(Error::corrupt("zlib header check bits are invalid"));
    }
    if flg & FDICT != 0 {
        return Err(Error::unsupported("zlib preset dictionary"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ZlibCodec {
    level: u32,
    window: usize,
}

impl ZlibCodec {
    pub fn new(level: u32, window: usize) -> Self {
        Self { level, window }
    }
}

impl BlockCodec for ZlibCodec {
    fn codec(&self) -> Codec {
        Codec::Zlib
    }

    fn content_checksum(&self) -> Option<Algorithm> {
        Some(Algorithm::Adler32)
    }

    fn write_header(&self, _content_size: Option<u64>, out: &mut Vec<u8>) {
        out.extend_from_slice(&header_bytes(self.window, self.level));
    }

    fn new_encoder(&self) -> Box<dyn BlockEncoder> {
        Box::new(DeflateEncoder::new(self.level, self.window))
    }

    fn write_trailer(&self, summary: &StreamSummary, out: &mut Vec<u8>) {
        out.extend_from_slice(&FINAL_EMPTY_BLOCK);
        let adler = summary.checksum.unwrap_or(1);
        out.extend_from_slice(&adler.to_be_bytes());
    }

    fn decompress(&self, data: &[u8], scheduler: &Scheduler) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::new(data);
        let cmf = cursor.read_u8()?;
        let flg = cursor.read_u8()?;
        check_header(cmf, flg)?;

        let (out, used) = inflate_with(cursor.rest(), cancel_check(scheduler.cancel_token()))?;
        cursor.skip(used)?;
        let expected = cursor.read_u32_be()?;
        let actual = checksum::adler32(&out);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        if !cursor.is_empty() {
            return Err(Error::corrupt(format!(
                "{} trailing bytes after zlib stream",
                cursor.remaining()
            )));
        }
        debug!("zlib: {} -> {} bytes", data.len(), out.len());
        Ok(out)
    }

    fn stream_decoder(&self) -> Box<dyn StreamDecoder> {
        Box::new(ZlibStreamDecoder::default())
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Default)]
enum ZlibState {
    #[default]
    Header,
    Body,
    Trailer,
    Done,
}

struct ZlibStreamDecoder {
    state: ZlibState,
    inflater: InflateStream,
    adler: Checksum,
}

impl Default for ZlibStreamDecoder {
    fn default() -> Self {
        Self {
            state: ZlibState::Header,
            inflater: InflateStream::new(),
            adler: Checksum::new(Algorithm::Adler32),
        }
    }
}

impl StreamDecoder for ZlibStreamDecoder {
    fn decode_step(&mut self, input: &[u8], eof: bool) -> Result<Option<Decoded>> {
        match self.state {
            ZlibState::Header => {
                let mut cursor = ByteCursor::new(input);
                let cmf = cursor.read_u8()?;
                let flg = cursor.read_u8()?;
                check_header(cmf, flg)?;
                self.state = ZlibState::Body;
                Ok(Some(Decoded {
                    consumed: 2,
                    output: Vec::new(),
                }))
            }
            ZlibState::Body => {
                let step = self.inflater.step(input)?;
                self.adler.update(&step.output);
                if self.inflater.is_finished() {
                    self.state = ZlibState::Trailer;
                }
                Ok(Some(step))
            }
            ZlibState::Trailer => {
                let expected = ByteCursor::new(input).read_u32_be()?;
                let actual = self.adler.value();
                if expected != actual {
                    return Err(Error::ChecksumMismatch { expected, actual });
                }
                self.state = ZlibState::Done;
                Ok(Some(Decoded {
                    consumed: 4,
                    output: Vec::new(),
                }))
            }
            ZlibState::Done => {
                if !input.is_empty() {
                    return Err(Error::corrupt("trailing bytes after zlib stream"));
                }
                super::end_of_input(input, eof)
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

    #[test]
    fn default_header_is_78_9c() {
        assert_eq!(header_bytes(32 * 1024, 6), [0x78, 0x9C]);
        assert_eq!(header_bytes(32 * 1024, 1), [0x78, 0x01]);
        assert_eq!(header_bytes(32 * 1024, 9), [0x78, 0xDA]);
        for level in 0..=9 {
            for window in [256, 1024, 4096, 32 * 1024] {
                let [cmf, flg] = header_bytes(window, level);
                check_header(cmf, flg).unwrap();
            }
        }
    }

    #[test]
    fn header_validation() {
        assert!(matches!(check_header(0x77, 0x9C), Err(Error::CorruptStream(_))));
        assert!(matches!(check_header(0x88, 0x98), Err(Error::CorruptStream(_))));
        assert!(matches!(check_header(0x78, 0x9D), Err(Error::CorruptStream(_))));
        // 0x78 0xBB: FDICT set, check bits valid.
        assert!(matches!(check_header(0x78, 0xBB), Err(Error::UnsupportedFeature(_))));
    }

    #[test]
    fn reference_stream_decodes() {
        // zlib.compress(b"hello")
        let data = [
            0x78, 0x9C, 0xCB, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00, 0x06, 0x2C, 0x02, 0x15,
        ];
        let codec = ZlibCodec::new(6, 32 * 1024);
        assert_eq!(codec.decompress(&data, &Scheduler::sequential()).unwrap(), b"hello");

        let mut bad = data;
        bad[12] ^= 1;
        assert!(matches!(
            codec.decompress(&bad, &Scheduler::sequential()),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn streaming_reference_stream() {
        let data = [
            0x78, 0x9C, 0xCB, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00, 0x06, 0x2C, 0x02, 0x15,
        ];
        let mut dec = ZlibCodec::new(6, 32 * 1024).stream_decoder();
        let mut pos = 0;
        let mut out = Vec::new();
        while let Some(step) = dec.decode_step(&data[pos..], true).unwrap() {
            pos += step.consumed;
            out.extend(step.output);
        }
        assert_eq!(out, b"hello");
    }
}
