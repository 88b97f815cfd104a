// Canonical Huffman coding.
//
// - `build`: length-limited code construction and canonical assignment
// - `codec`: bit-reversed encoder tables and a table-driven decoder
//
// Codes are written least-significant bit first with each code's bits
// reversed, which is the DEFLATE convention.

pub mod build;
pub mod codec;

pub use build::{build_lengths, canonical_codes, kraft_sum};
pub use codec::{HuffmanDecoder, HuffmanEncoder};

/// Longest DEFLATE literal/length or distance code.
pub const DEFLATE_MAX_BITS: u8 = 15;

/// Longest DEFLATE code-length code.
pub const CODE_LENGTH_MAX_BITS: u8 = 7;
