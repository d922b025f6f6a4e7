//! Core traits for the compression transform.
//!
//! The framing code in [`crate::extensions`] never looks inside a compressed
//! payload. It hands byte runs to a [`Codec`] and frames whatever comes back.

use super::error::CodecError;
use super::types::CompressionAlgorithm;

/// Single-shot compressor/decompressor for one algorithm id.
///
/// # Requirements
///
/// - `compress` MUST return `Ok(None)` when the output would not be smaller
///   than the input; the caller then sends the bytes as a literal payload
/// - `decompress` MUST fail rather than produce more than `original_size`
///   bytes
/// - `decompress(compress(x)) == x` for every input `compress` accepted
///
/// # Example
///
/// ```ignore
/// struct Identity;
///
/// impl Codec for Identity {
///     fn algorithm(&self) -> CompressionAlgorithm {
///         CompressionAlgorithm::Lz77Huffman
///     }
///
///     fn compress(&self, _input: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
///         Ok(None)
///     }
///
///     fn decompress(&self, input: &[u8], original_size: usize) -> Result<Vec<u8>, CodecError> {
///         if input.len() != original_size {
///             return Err(CodecError::SizeMismatch { expected: original_size, actual: input.len() });
///         }
///         Ok(input.to_vec())
///     }
/// }
/// ```
pub trait Codec: Send + Sync {
    /// Algorithm id this codec implements.
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress `input`, or `None` if that does not shrink it.
    fn compress(&self, input: &[u8]) -> Result<Option<Vec<u8>>, CodecError>;

    /// Decompress `input` into exactly `original_size` bytes.
    fn decompress(&self, input: &[u8], original_size: usize) -> Result<Vec<u8>, CodecError>;
}
