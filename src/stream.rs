// Streaming front ends.
//
// `StreamCompressor` buffers writes until a batch of full blocks (one per
// engine) is ready, encodes the batch on the pool and writes it through.
// The output is the same block sequence a one-shot compression of the
// whole input produces; only the header differs for formats that record a
// content size, which a stream does not know up front.
//
// `StreamDecompressor` drives a codec's incremental decoder over a
// `BlockSource` and yields decompressed units lazily.

use std::io::{self, Read, Write};

use log::{debug, trace};

use crate::codec::{self, BlockCodec, StreamDecoder, StreamSummary};
use crate::config::PipelineConfig;
use crate::engine::{ContentChecksum, encode_blocks};
use crate::error::{Error, Result};
use crate::scheduler::{CancelToken, Scheduler};
use crate::source::BlockSource;

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Block-parallel compressor behind [`io::Write`].
///
/// Call [`finish`](Self::finish) to write the trailer; dropping the
/// compressor leaves the stream unterminated.
pub struct StreamCompressor<W: Write> {
    writer: W,
    codec: Box<dyn BlockCodec>,
    scheduler: Scheduler,
    block_size: usize,
    pending: Vec<u8>,
    header_written: bool,
    next_index: usize,
    total_len: u64,
    checksum: ContentChecksum,
}

impl<W: Write> StreamCompressor<W> {
    pub fn new(config: PipelineConfig, writer: W) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.engine_count, config.policy)?;
        let codec = codec::make_codec(&config);
        let checksum = ContentChecksum::new(codec::stats_checksum(codec.as_ref(), &config));
        Ok(Self {
            writer,
            codec,
            scheduler,
            block_size: config.block_size(),
            pending: Vec::new(),
            header_written: false,
            next_index: 0,
            total_len: 0,
            checksum,
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.scheduler = self.scheduler.with_cancel(token);
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Uncompressed bytes accepted so far.
    pub fn total_in(&self) -> u64 {
        self.total_len + self.pending.len() as u64
    }

    fn batch_len(&self) -> usize {
        self.block_size * self.scheduler.engines()
    }

    /// Encode and write the first `len` pending bytes as blocks.
    fn encode_pending(&mut self, len: usize) -> Result<()> {
        let data = &self.pending[..len];
        let blocks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(self.block_size).collect()
        };
        let units = encode_blocks(
            self.codec.as_ref(),
            &self.scheduler,
            &blocks,
            self.next_index,
            self.checksum.partial_algorithm(),
        )?;

        let mut out = Vec::new();
        if !self.header_written {
            self.codec.write_header(None, &mut out);
            self.header_written = true;
        }
        for (unit, raw) in units.iter().zip(&blocks) {
            self.checksum.add(raw, &unit.result);
            out.extend_from_slice(&unit.result.bytes);
        }
        self.writer.write_all(&out)?;
        trace!(
            "stream: blocks {}..{} ({} bytes) -> {} bytes",
            self.next_index,
            self.next_index + blocks.len(),
            len,
            out.len()
        );

        self.next_index += blocks.len();
        self.total_len += len as u64;
        self.pending.drain(..len);
        Ok(())
    }

    /// Encode the remaining input, write the trailer and hand back the writer.
    pub fn finish(mut self) -> Result<W> {
        if let Some(token) = self.scheduler.cancel_token() {
            token.check()?;
        }
        if !self.pending.is_empty() || self.next_index == 0 {
            self.encode_pending(self.pending.len())?;
        }
        let summary = StreamSummary {
            total_len: self.total_len,
            blocks: self.next_index,
            checksum: self.checksum.value(),
        };
        let mut out = Vec::new();
        self.codec.write_trailer(&summary, &mut out);
        self.writer.write_all(&out)?;
        self.writer.flush()?;
        debug!(
            "stream: {} finished, {} bytes in {} block(s)",
            self.codec.codec(),
            self.total_len,
            self.next_index
        );
        Ok(self.writer)
    }
}

impl<W: Write> Write for StreamCompressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        let batch = self.batch_len();
        if self.pending.len() >= batch {
            let full = self.pending.len() / batch * batch;
            self.encode_pending(full)?;
        }
        Ok(buf.len())
    }

    /// Writes every complete block; a partial block stays buffered so the
    /// block boundaries match one-shot compression.
    fn flush(&mut self) -> io::Result<()> {
        let full = self.pending.len() / self.block_size * self.block_size;
        if full > 0 {
            self.encode_pending(full)?;
        }
        self.writer.flush()
    }
}

impl<W: Write> std::fmt::Debug for StreamCompressor<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCompressor")
            .field("codec", &self.codec.codec())
            .field("pending", &self.pending.len())
            .field("blocks", &self.next_index)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Decompression
// ---------------------------------------------------------------------------

/// Lazy decompressor: an iterator of decompressed units that also
/// implements [`io::Read`].
pub struct StreamDecompressor<S> {
    source: S,
    decoder: Box<dyn StreamDecoder>,
    eof: bool,
    done: bool,
    cancel: Option<CancelToken>,
    out: Vec<u8>,
    out_pos: usize,
}

impl<S: BlockSource> StreamDecompressor<S> {
    pub fn new(config: &PipelineConfig, source: S) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_codec(codec::make_codec(config).as_ref(), source))
    }

    pub(crate) fn with_codec(codec: &dyn BlockCodec, source: S) -> Self {
        Self {
            source,
            decoder: codec.stream_decoder(),
            eof: false,
            done: false,
            cancel: None,
            out: Vec::new(),
            out_pos: 0,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Decode everything that is left into one buffer.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut all = self.out.split_off(self.out_pos);
        self.out.clear();
        self.out_pos = 0;
        while let Some(unit) = self.next() {
            all.extend_from_slice(&unit?);
        }
        Ok(all)
    }

    fn fail(&mut self, e: Error) -> Option<Result<Vec<u8>>> {
        self.done = true;
        Some(Err(e))
    }
}

impl<S: BlockSource> Iterator for StreamDecompressor<S> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return self.fail(Error::Cancelled);
            }
            match self.decoder.decode_step(self.source.available(), self.eof) {
                Ok(Some(decoded)) => {
                    self.source.consume(decoded.consumed);
                    if !decoded.output.is_empty() {
                        return Some(Ok(decoded.output));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) if e.is_truncation() && !self.eof => {
                    let want = self.source.available().len() + 1;
                    match self.source.fill(want) {
                        Ok(true) => {}
                        Ok(false) => self.eof = true,
                        Err(e) => return self.fail(e),
                    }
                }
                Err(e) => return self.fail(e),
            }
        }
    }
}

impl<S: BlockSource> Read for StreamDecompressor<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.out_pos == self.out.len() {
            match self.next() {
                None => return Ok(0),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(unit)) => {
                    self.out = unit;
                    self.out_pos = 0;
                }
            }
        }
        let n = buf.len().min(self.out.len() - self.out_pos);
        buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}

impl<S> std::fmt::Debug for StreamDecompressor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecompressor")
            .field("eof", &self.eof)
            .field("done", &self.done)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Codec;
    use crate::engine::Engine;
    use crate::error::ErrorKind;
    use crate::source::ResidentSource;

    fn config(codec: Codec, engines: usize) -> PipelineConfig {
        PipelineConfig {
            engine_count: engines,
            block_size_kib: 1,
            ..PipelineConfig::for_codec(codec)
        }
    }

    fn sample() -> Vec<u8> {
        (0..20_000u32)
            .flat_map(|i| [(i % 7) as u8 + b'a', (i / 97 % 5) as u8 + b'0'])
            .collect()
    }

    #[test]
    fn stream_matches_one_shot_blocks() {
        let data = sample();
        for codec in [Codec::Deflate, Codec::Zlib, Codec::Gzip, Codec::Snappy] {
            let cfg = config(codec, 3);
            let mut comp = StreamCompressor::new(cfg.clone(), Vec::new()).unwrap();
            for piece in data.chunks(777) {
                comp.write_all(piece).unwrap();
            }
            let streamed = comp.finish().unwrap();
            let one_shot = Engine::new(cfg).unwrap().compress(&data).unwrap();
            assert_eq!(streamed, one_shot, "{codec}");
        }
    }

    #[test]
    fn stream_round_trip_every_codec() {
        let data = sample();
        for codec in Codec::ALL {
            let cfg = config(codec, 2);
            let mut comp = StreamCompressor::new(cfg.clone(), Vec::new()).unwrap();
            comp.write_all(&data[..5000]).unwrap();
            comp.flush().unwrap();
            comp.write_all(&data[5000..]).unwrap();
            let packed = comp.finish().unwrap();

            let engine = Engine::new(cfg.clone()).unwrap();
            assert_eq!(engine.decompress(&packed).unwrap(), data, "{codec}");

            let mut lazy = StreamDecompressor::new(&cfg, ResidentSource::new(&packed)).unwrap();
            assert_eq!(lazy.read_all().unwrap(), data, "{codec}");
        }
    }

    #[test]
    fn empty_stream_has_one_block() {
        for codec in Codec::ALL {
            let cfg = config(codec, 2);
            let packed = StreamCompressor::new(cfg.clone(), Vec::new())
                .unwrap()
                .finish()
                .unwrap();
            let engine = Engine::new(cfg).unwrap();
            assert!(engine.decompress(&packed).unwrap().is_empty(), "{codec}");
        }
    }

    #[test]
    fn decompressor_reads_from_reader() {
        let data = sample();
        let engine = Engine::new(config(Codec::Lz4, 2)).unwrap();
        let packed = engine.compress(&data).unwrap();
        let mut out = Vec::new();
        engine
            .decompress_reader(io::Cursor::new(&packed))
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn units_arrive_lazily() {
        let data = sample();
        let engine = Engine::new(config(Codec::Snappy, 1)).unwrap();
        let packed = engine.compress(&data).unwrap();
        let mut lazy = engine.decompress_resident(&packed);
        let first = lazy.next().unwrap().unwrap();
        assert!(!first.is_empty() && first.len() < data.len());
        assert!(lazy.source().position() < packed.len());
    }

    #[test]
    fn truncated_stream_fails_once() {
        let data = sample();
        let engine = Engine::new(config(Codec::Zlib, 1)).unwrap();
        let packed = engine.compress(&data).unwrap();
        let mut lazy = engine.decompress_reader(&packed[..packed.len() - 3]);
        let err = Iterator::by_ref(&mut lazy).find_map(|r| r.err()).unwrap();
        assert_eq!(err.kind(), ErrorKind::Truncated);
        assert!(lazy.next().is_none());
    }

    #[test]
    fn cancel_after_first_unit() {
        let data = sample();
        for codec in Codec::ALL {
            let engine = Engine::new(config(codec, 2)).unwrap();
            let packed = engine.compress(&data).unwrap();
            let token = CancelToken::new();
            let mut lazy = engine.decompress_resident(&packed).with_cancel(token.clone());
            let first = lazy.next().unwrap().unwrap();
            assert!(first.len() < data.len(), "{codec}");
            token.cancel();
            assert_eq!(lazy.next().unwrap().unwrap_err().kind(), ErrorKind::Cancelled, "{codec}");
            assert!(lazy.next().is_none(), "{codec}");
            assert!(lazy.source().position() < packed.len(), "{codec}");
        }
    }

    #[test]
    fn cancel_stops_both_directions() {
        let token = CancelToken::new();
        let cfg = config(Codec::Deflate, 2);
        let mut comp = StreamCompressor::new(cfg.clone(), Vec::new())
            .unwrap()
            .with_cancel(token.clone());
        comp.write_all(&[1, 2, 3]).unwrap();
        token.cancel();
        assert_eq!(comp.finish().unwrap_err().kind(), ErrorKind::Cancelled);

        let packed = Engine::new(cfg.clone()).unwrap().compress(b"abc").unwrap();
        let mut lazy = StreamDecompressor::new(&cfg, ResidentSource::new(&packed))
            .unwrap()
            .with_cancel(token);
        assert_eq!(lazy.next().unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
