// Pipeline configuration.
//
// A `PipelineConfig` selects the codec, block size, checksum, history
// window and engine count.  `validate()` rejects combinations the codec
// framing cannot express before any work starts.

use crate::codec::GzipHeader;
use crate::error::{Error, Result};

/// Default block size (64 KiB).
pub const DEFAULT_BLOCK_SIZE_KIB: u32 = 64;

/// Default compression level (maps to the "default" matcher profile).
pub const DEFAULT_LEVEL: u32 = 6;

/// Largest DEFLATE history window (32 KiB).
pub const DEFLATE_MAX_WINDOW_KIB: u32 = 32;

/// Largest LZ4 history window (64 KiB; offsets are 16-bit).
pub const LZ4_MAX_WINDOW_KIB: u32 = 64;

/// Largest LZ4 frame block (4 MiB, block max size id 7).
pub const LZ4_MAX_BLOCK_KIB: u32 = 4096;

/// Hard upper bound on any block size (256 MiB).
pub const MAX_BLOCK_SIZE_KIB: u32 = 256 * 1024;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Wire format produced by compression and expected by decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// LZ4 frame format.
    Lz4,
    /// Snappy framing format (raw blocks inside CRC-32C framed chunks).
    Snappy,
    /// Raw DEFLATE (RFC 1951).
    Deflate,
    /// zlib (RFC 1950).
    Zlib,
    /// GZIP (RFC 1952), one member per block.
    Gzip,
    /// Zstandard (RFC 8878).
    Zstd,
}

impl Codec {
    /// All codecs, in declaration order.
    pub const ALL: [Codec; 6] = [
        Codec::Lz4,
        Codec::Snappy,
        Codec::Deflate,
        Codec::Zlib,
        Codec::Gzip,
        Codec::Zstd,
    ];

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Codec::Lz4 => "lz4",
            Codec::Snappy => "snappy",
            Codec::Deflate => "deflate",
            Codec::Zlib => "zlib",
            Codec::Gzip => "gzip",
            Codec::Zstd => "zstd",
        }
    }

    /// Largest history window the format can address, in KiB.
    pub fn max_window_kib(self) -> u32 {
        match self {
            Codec::Deflate | Codec::Zlib | Codec::Gzip => DEFLATE_MAX_WINDOW_KIB,
            Codec::Lz4 | Codec::Snappy => LZ4_MAX_WINDOW_KIB,
            // The encoder emits raw/RLE blocks only; the window is a decoder limit.
            Codec::Zstd => 8 * 1024,
        }
    }

    /// The stream checksum the format carries when `checksum` is requested.
    pub fn stream_checksum(self, checksum: ChecksumKind) -> ChecksumKind {
        match self {
            Codec::Zlib => ChecksumKind::Adler32,
            Codec::Gzip => ChecksumKind::Crc32,
            _ => checksum,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Checksum selector from the host configuration.
///
/// For LZ4 and Zstandard any value other than `None` enables the format's
/// own content checksum (xxHash).  Snappy always carries per-chunk CRC-32C;
/// any value other than `None` adds a whole-stream CRC-32C chunk.
/// For raw DEFLATE the selected checksum is computed and reported in the
/// compression stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumKind {
    #[default]
    None,
    Crc32,
    Adler32,
}

/// How the scheduler hands blocks to engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Engine `i` takes blocks `i, i + N, i + 2N, ...`.
    #[default]
    RoundRobin,
    /// An idle engine pulls the next pending block.
    LeastLoaded,
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Configuration recognised by pipeline construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Wire format.
    pub codec: Codec,
    /// Independent block size in KiB (the unit of parallel work).
    pub block_size_kib: u32,
    /// Requested stream checksum.
    pub checksum: ChecksumKind,
    /// Match-finder history window in KiB.
    pub window_size_kib: u32,
    /// Number of engines in the scheduler pool.
    pub engine_count: usize,
    /// Compression level (0-9). Level 0 emits literals only.
    pub level: u32,
    /// Block dispatch policy.
    pub policy: DispatchPolicy,
    /// Optional GZIP member header fields.
    pub gzip_header: GzipHeader,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_codec(Codec::Zlib)
    }
}

impl PipelineConfig {
    /// Defaults appropriate for `codec`.
    pub fn for_codec(codec: Codec) -> Self {
        let checksum = match codec {
            Codec::Zlib => ChecksumKind::Adler32,
            Codec::Gzip => ChecksumKind::Crc32,
            Codec::Lz4 | Codec::Snappy | Codec::Zstd => ChecksumKind::Crc32,
            Codec::Deflate => ChecksumKind::None,
        };
        Self {
            codec,
            block_size_kib: DEFAULT_BLOCK_SIZE_KIB,
            checksum,
            window_size_kib: codec.max_window_kib().min(LZ4_MAX_WINDOW_KIB),
            engine_count: 1,
            level: DEFAULT_LEVEL,
            policy: DispatchPolicy::RoundRobin,
            gzip_header: GzipHeader::default(),
        }
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size_kib as usize * 1024
    }

    /// History window in bytes.
    pub fn window_size(&self) -> usize {
        self.window_size_kib as usize * 1024
    }

    /// Stream checksum actually carried by the codec.
    pub fn stream_checksum(&self) -> ChecksumKind {
        self.codec.stream_checksum(self.checksum)
    }

    /// Reject configurations the framing cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.block_size_kib == 0 {
            return Err(Error::InvalidConfig("block size must be non-zero".into()));
        }
        if self.block_size_kib > MAX_BLOCK_SIZE_KIB {
            return Err(Error::InvalidConfig(format!(
                "block size {} KiB exceeds the {} KiB limit",
                self.block_size_kib, MAX_BLOCK_SIZE_KIB
            )));
        }
        if self.window_size_kib == 0 {
            return Err(Error::InvalidConfig("window size must be non-zero".into()));
        }
        let max_window = self.codec.max_window_kib();
        if self.window_size_kib > max_window {
            return Err(Error::InvalidConfig(format!(
                "{} window is limited to {} KiB, got {}",
                self.codec, max_window, self.window_size_kib
            )));
        }
        if self.engine_count == 0 {
            return Err(Error::InvalidConfig("engine count must be at least 1".into()));
        }
        if self.level > 9 {
            return Err(Error::InvalidConfig(format!(
                "level {} is outside 0-9",
                self.level
            )));
        }
        if self.codec == Codec::Lz4 && self.block_size_kib > LZ4_MAX_BLOCK_KIB {
            return Err(Error::InvalidConfig(format!(
                "lz4 blocks are limited to {LZ4_MAX_BLOCK_KIB} KiB"
            )));
        }
        match (self.codec, self.checksum) {
            (Codec::Zlib, ChecksumKind::Crc32) => Err(Error::InvalidConfig(
                "zlib carries an Adler-32 trailer, not CRC-32".into(),
            )),
            (Codec::Gzip, ChecksumKind::Adler32) => Err(Error::InvalidConfig(
                "gzip carries a CRC-32 trailer, not Adler-32".into(),
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
