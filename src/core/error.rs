//! Error types for the SMB transforms.

use thiserror::Error;

/// Malformed or inconsistent wire structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer ended before a structure was complete.
    #[error("buffer too short: expected {expected}, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Protocol id did not match the expected tag.
    #[error("invalid protocol id: {0:02x?}")]
    InvalidProtocolId([u8; 4]),

    /// A header field held a value that is not allowed here.
    #[error("invalid header field {field}: 0x{value:x}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },

    /// Declared length disagrees with the bytes present.
    #[error("declared length {declared} does not match {actual} bytes present")]
    LengthMismatch {
        /// Declared by the header.
        declared: usize,
        /// Actually present.
        actual: usize,
    },

    /// Frame belongs to another session.
    #[error("session id mismatch: expected 0x{expected:016x}, got 0x{actual:016x}")]
    SessionMismatch {
        /// Our session id.
        expected: u64,
        /// Id in the frame.
        actual: u64,
    },

    /// Declared size is above the hard ceiling.
    #[error("declared size exceeds limit: {size} > {limit}")]
    SizeExceeded {
        /// Declared size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Sub-frame overran the declared segment size.
    #[error("sub-frame overruns declared segment size")]
    Overrun,

    /// Bytes left over after the declared size was accounted for.
    #[error("{0} trailing bytes after final sub-frame")]
    TrailingBytes(usize),
}

/// Integrity failures. Fatal for the offending message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Computed signature differs from the one on the wire.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// AEAD tag did not verify.
    #[error("AEAD tag mismatch")]
    TagMismatch,

    /// Signing is in force but the reply carries no signature.
    #[error("reply is not signed")]
    NotSigned,
}

/// Errors from compression primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No codec available for the algorithm id.
    #[error("unsupported compression algorithm: 0x{0:04x}")]
    UnsupportedAlgorithm(u16),

    /// Compressed stream is malformed.
    #[error("corrupt compressed data: {0}")]
    Corrupt(&'static str),

    /// Stream would expand past the expected output length.
    #[error("decompressed output overflows {limit} bytes")]
    OutputOverflow {
        /// Expected output length.
        limit: usize,
    },

    /// Stream ended with the wrong number of bytes.
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Expected output length.
        expected: usize,
        /// Produced output length.
        actual: usize,
    },
}

/// Errors from key derivation and cipher setup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key has a length the primitive cannot accept.
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// KDF could not produce the requested output.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,
}

/// Top-level transform errors.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Missing or unusable key material; re-authentication is required.
    #[error("configuration error: {0}")]
    Config(String),

    /// Signature or tag mismatch.
    #[error("authentication failure: {0}")]
    Auth(#[from] AuthError),

    /// Malformed frame.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// Compression primitive failure.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// Crypto primitive failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl TransformError {
    /// Build a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        TransformError::Config(msg.into())
    }

    /// Check if the message must be discarded outright.
    ///
    /// Everything except a configuration error is tied to the bytes of one
    /// message and cannot be retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransformError::Config(_))
    }

    /// Check if the connection should be treated as untrustworthy.
    pub fn is_security_error(&self) -> bool {
        matches!(self, TransformError::Auth(_))
    }
}

/// Result type for transform operations.
pub type TransformResult<T> = Result<T, TransformError>;
