// Compressed-input sources for streaming decompression.
//
// A `BlockSource` exposes its unconsumed bytes as one contiguous slice.
// The stream decoder looks at that slice, consumes what a step used, and
// asks for more when a unit is cut off.  `HostSource` buffers a reader;
// `ResidentSource` serves a buffer that already holds the whole stream and
// never copies.

use std::io::{self, Read};

use log::trace;

use crate::error::Result;

/// Read granularity for host sources.
pub const READ_CHUNK: usize = 64 * 1024;

/// Contiguous view over not-yet-consumed compressed bytes.
pub trait BlockSource {
    /// Bytes buffered and not yet consumed.
    fn available(&self) -> &[u8];

    /// Try to buffer at least `min` bytes.  Returns `false` when the
    /// input ended first; whatever arrived is still available.
    fn fill(&mut self, min: usize) -> Result<bool>;

    /// Drop `n` bytes from the front of [`available`](Self::available).
    fn consume(&mut self, n: usize);
}

// ---------------------------------------------------------------------------
// HostSource
// ---------------------------------------------------------------------------

/// Buffers an [`io::Read`] implementation.
#[derive(Debug)]
pub struct HostSource<R> {
    reader: R,
    buf: Vec<u8>,
    start: usize,
    eof: bool,
    bytes_read: u64,
}

impl<R: Read> HostSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            start: 0,
            eof: false,
            bytes_read: 0,
        }
    }

    /// Total bytes pulled from the reader.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

impl<R: Read> BlockSource for HostSource<R> {
    fn available(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    fn fill(&mut self, min: usize) -> Result<bool> {
        if self.buf.len() - self.start >= min {
            return Ok(true);
        }
        self.compact();
        while self.buf.len() < min && !self.eof {
            let old = self.buf.len();
            let want = (min - old).max(READ_CHUNK);
            self.buf.resize(old + want, 0);
            let n = loop {
                match self.reader.read(&mut self.buf[old..]) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.buf.truncate(old);
                        return Err(e.into());
                    }
                }
            };
            self.buf.truncate(old + n);
            self.bytes_read += n as u64;
            if n == 0 {
                self.eof = true;
            }
        }
        trace!("host source: {} bytes buffered, eof={}", self.buf.len(), self.eof);
        Ok(self.buf.len() >= min)
    }

    fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.buf.len());
    }
}

// ---------------------------------------------------------------------------
// ResidentSource
// ---------------------------------------------------------------------------

/// A stream already resident in memory (for example a destination buffer
/// written by a peer).  Nothing is copied; `fill` only reports whether the
/// request fits.
#[derive(Debug, Clone, Copy)]
pub struct ResidentSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ResidentSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl BlockSource for ResidentSource<'_> {
    fn available(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn fill(&mut self, min: usize) -> Result<bool> {
        Ok(self.data.len() - self.pos >= min)
    }

    fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
