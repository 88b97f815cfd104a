// Error taxonomy shared by every codec pipeline.
//
// Decoders distinguish four data failures:
//   - TruncatedInput: a declared length runs past the available bytes
//   - CorruptStream: structurally invalid header, block or entropy code
//   - ChecksumMismatch: a trailer disagrees with the recomputed value
//   - UnsupportedFeature: a valid format variant this crate does not decode
//
// Scheduler failures wrap the per-block cause in `Error::Block`.

use std::io;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by compression and decompression.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fewer bytes were available than a declared length requires.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    /// The stream is structurally invalid.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// A block-type code outside the codec's enumeration.
    #[error("unsupported block type {0}")]
    UnsupportedBlockType(u8),

    /// A stored checksum disagrees with the recomputed one.
    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A valid but unimplemented format variant (e.g. a Zstandard dictionary).
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The pipeline configuration is rejected before any work starts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A block failed inside the scheduler.
    #[error("block {index} failed: {source}")]
    Block {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// The session was cancelled at a block boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error from a reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Truncated,
    Corrupt,
    UnsupportedBlockType,
    Checksum,
    Unsupported,
    Config,
    Cancelled,
    Io,
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFeature(msg.into())
    }

    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        Self::TruncatedInput { needed, available }
    }

    /// Classify the error, looking through scheduler wrapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TruncatedInput { .. } => ErrorKind::Truncated,
            Self::CorruptStream(_) => ErrorKind::Corrupt,
            Self::UnsupportedBlockType(_) => ErrorKind::UnsupportedBlockType,
            Self::ChecksumMismatch { .. } => ErrorKind::Checksum,
            Self::UnsupportedFeature(_) => ErrorKind::Unsupported,
            Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Block { source, .. } => source.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// True when more input could turn this failure into progress.
    pub fn is_truncation(&self) -> bool {
        self.kind() == ErrorKind::Truncated
    }

    /// Strip `Error::Block` wrapping.
    pub fn into_root(self) -> Error {
        match self {
            Self::Block { source, .. } => source.into_root(),
            other => other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            Error::InvalidConfig(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            Error::Cancelled => io::Error::new(io::ErrorKind::Interrupted, e),
            Error::TruncatedInput { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
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
    fn block_wrapping_keeps_kind() {
        let e = Error::Block {
            index: 3,
            source: Box::new(Error::ChecksumMismatch {
                expected: 1,
                actual: 2,
            }),
        };
        assert_eq!(e.kind(), ErrorKind::Checksum);
        assert!(e.to_string().contains("block 3"));
        assert!(matches!(e.into_root(), Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn truncation_maps_to_unexpected_eof() {
        let io_err: io::Error = Error::truncated(10, 4).into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            Error::UnsupportedBlockType(3).to_string(),
            "unsupported block type 3"
        );
        assert_eq!(
            Error::truncated(8, 2).to_string(),
            "truncated input: needed 8 bytes, 2 available"
        );
    }
}
