//! Oxipress: a block-parallel, multi-codec compression engine in Rust.
//!
//! Supported wire formats:
//! - LZ4 frame (with optional block and content xxHash32)
//! - raw DEFLATE, zlib and GZIP
//! - Snappy, raw and framed
//! - Zstandard: full decoder, raw/RLE frame writer
//!
//! Input is split into independent blocks that a pool of engines encodes
//! in parallel; the framed output is identical for any engine count.
//!
//! # Quick Start
//!
//! ```no_run
//! use oxipress::{Codec, Engine, PipelineConfig};
//!
//! let config = PipelineConfig {
//!     engine_count: 4,
//!     ..PipelineConfig::for_codec(Codec::Gzip)
//! };
//! let engine = Engine::new(config).unwrap();
//!
//! let packed = engine.compress(b"hello hello hello hello").unwrap();
//! let unpacked = engine.decompress(&packed).unwrap();
//! assert_eq!(unpacked, b"hello hello hello hello");
//! ```
//!
//! Streaming goes through [`StreamCompressor`] (an [`std::io::Write`]) and
//! [`StreamDecompressor`] (an iterator of decompressed units that is also
//! an [`std::io::Read`]).

pub mod bitio;
pub mod block;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod huffman;
pub mod lz77;
pub mod scheduler;
pub mod source;
pub mod stream;
pub mod varint;

pub use codec::GzipHeader;
pub use config::{ChecksumKind, Codec, DispatchPolicy, PipelineConfig};
pub use engine::{CompressStats, Engine, compress, decompress};
pub use error::{Error, ErrorKind, Result};
pub use scheduler::CancelToken;
pub use source::{BlockSource, HostSource, ResidentSource};
pub use stream::{StreamCompressor, StreamDecompressor};
