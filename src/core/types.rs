//! Negotiated protocol parameters.
//!
//! Everything here arrives from the negotiate exchange, which is handled
//! outside this crate. The transforms only read these values.

use super::constants::{DEFAULT_COMPRESSION_CHUNK_SIZE, DEFAULT_COMPRESSION_THRESHOLD};

/// Negotiated protocol dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dialect {
    /// SMB1 (NT LM 0.12), keyed-MD5 signing.
    Legacy,
    /// SMB 2.0.2.
    Smb202,
    /// SMB 2.1.
    Smb210,
    /// SMB 3.0.
    Smb300,
    /// SMB 3.0.2.
    Smb302,
    /// SMB 3.1.1.
    Smb311,
}

impl Dialect {
    /// Parse an SMB2 dialect revision code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0202 => Some(Self::Smb202),
            0x0210 => Some(Self::Smb210),
            0x0300 => Some(Self::Smb300),
            0x0302 => Some(Self::Smb302),
            0x0311 => Some(Self::Smb311),
            _ => None,
        }
    }

    /// SMB2 dialect revision code, `None` for SMB1.
    pub fn code(self) -> Option<u16> {
        match self {
            Self::Legacy => None,
            Self::Smb202 => Some(0x0202),
            Self::Smb210 => Some(0x0210),
            Self::Smb300 => Some(0x0300),
            Self::Smb302 => Some(0x0302),
            Self::Smb311 => Some(0x0311),
        }
    }

    /// SMB 3.x family (derived keys, encryption, channels).
    pub fn is_smb3(self) -> bool {
        self >= Self::Smb300
    }

    /// Uses the pre-auth integrity hash as KDF context.
    pub fn uses_preauth_integrity(self) -> bool {
        self == Self::Smb311
    }
}

/// Negotiated SMB2/3 signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum SigningAlgorithm {
    /// HMAC-SHA-256 (2.x, optionally 3.1.1).
    HmacSha256 = 0x0000,
    /// AES-128-CMAC (3.0 onwards).
    AesCmac = 0x0001,
    /// AES-128-GMAC (3.1.1 signing capabilities).
    AesGmac = 0x0002,
}

impl SigningAlgorithm {
    /// Parse a signing algorithm id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x0000 => Some(Self::HmacSha256),
            0x0001 => Some(Self::AesCmac),
            0x0002 => Some(Self::AesGmac),
            _ => None,
        }
    }

    /// Wire id.
    pub fn id(self) -> u16 {
        self as u16
    }
}

/// Negotiated encryption cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Cipher {
    /// AES-128-CCM.
    Aes128Ccm = 0x0001,
    /// AES-128-GCM.
    Aes128Gcm = 0x0002,
    /// AES-256-CCM.
    Aes256Ccm = 0x0003,
    /// AES-256-GCM.
    Aes256Gcm = 0x0004,
}

impl Cipher {
    /// Parse a cipher id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x0001 => Some(Self::Aes128Ccm),
            0x0002 => Some(Self::Aes128Gcm),
            0x0003 => Some(Self::Aes256Ccm),
            0x0004 => Some(Self::Aes256Gcm),
            _ => None,
        }
    }

    /// Wire id.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// 256-bit variants derive from the full session key.
    pub fn is_256(self) -> bool {
        matches!(self, Self::Aes256Ccm | Self::Aes256Gcm)
    }

    /// GCM family.
    pub fn is_gcm(self) -> bool {
        matches!(self, Self::Aes128Gcm | Self::Aes256Gcm)
    }

    /// Key length in bytes.
    pub fn key_size(self) -> usize {
        if self.is_256() { 32 } else { 16 }
    }

    /// Cipher nonce length (the rest of the 16-byte field is zero).
    pub fn nonce_size(self) -> usize {
        if self.is_gcm() { 12 } else { 11 }
    }
}

/// Compression algorithm ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum CompressionAlgorithm {
    /// Bytes copied through unchanged.
    None = 0x0000,
    /// LZNT1.
    Lznt1 = 0x0001,
    /// Plain LZ77.
    Lz77 = 0x0002,
    /// LZ77 + Huffman.
    Lz77Huffman = 0x0003,
    /// Repeated-byte run.
    PatternV1 = 0x0004,
}

impl CompressionAlgorithm {
    /// Parse an algorithm id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x0000 => Some(Self::None),
            0x0001 => Some(Self::Lznt1),
            0x0002 => Some(Self::Lz77),
            0x0003 => Some(Self::Lz77Huffman),
            0x0004 => Some(Self::PatternV1),
            _ => None,
        }
    }

    /// Wire id.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Real compressors carry an original-payload-size field in chained mode.
    pub fn is_compressor(self) -> bool {
        matches!(self, Self::Lznt1 | Self::Lz77 | Self::Lz77Huffman)
    }
}

/// Set of negotiated compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionSet(u16);

impl CompressionSet {
    /// No compression negotiated.
    pub const EMPTY: Self = Self(0);

    /// Build from a list of algorithms.
    pub fn from_algorithms(algorithms: &[CompressionAlgorithm]) -> Self {
        let mut set = Self::EMPTY;
        for alg in algorithms {
            set = set.with(*alg);
        }
        set
    }

    /// Add an algorithm.
    pub fn with(self, alg: CompressionAlgorithm) -> Self {
        Self(self.0 | (1 << alg.id()))
    }

    /// Check membership.
    pub fn contains(self, alg: CompressionAlgorithm) -> bool {
        self.0 & (1 << alg.id()) != 0
    }

    /// True when nothing except NONE was negotiated.
    pub fn is_empty(self) -> bool {
        self.0 & !(1 << CompressionAlgorithm::None.id()) == 0
    }
}

/// Parameters fixed by negotiation and session setup.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NegotiatedParams {
    /// Negotiated dialect.
    pub dialect: Dialect,
    /// Signing algorithm for 3.1.1; earlier dialects imply theirs.
    pub signing_algorithm: SigningAlgorithm,
    /// Encryption cipher, if encryption was negotiated.
    pub cipher: Option<Cipher>,
    /// Session is anonymous (never signed or verified).
    pub anonymous: bool,
    /// Compression algorithms the server advertised.
    pub compression: CompressionSet,
    /// Chunk length for chained compression.
    pub compression_chunk_size: usize,
    /// Write payloads below this size are sent uncompressed.
    pub compression_threshold: usize,
    /// Peer did not negotiate chained compression.
    pub chaining_disabled: bool,
}

impl Default for NegotiatedParams {
    fn default() -> Self {
        Self {
            dialect: Dialect::Smb311,
            signing_algorithm: SigningAlgorithm::AesCmac,
            cipher: None,
            anonymous: false,
            compression: CompressionSet::EMPTY,
            compression_chunk_size: DEFAULT_COMPRESSION_CHUNK_SIZE,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            chaining_disabled: false,
        }
    }
}

impl NegotiatedParams {
    /// Parameters for a given dialect with defaults elsewhere.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Default::default()
        }
    }

    /// Algorithm actually used to sign SMB2/3 messages.
    pub fn effective_signing_algorithm(&self) -> SigningAlgorithm {
        match self.dialect {
            Dialect::Legacy | Dialect::Smb202 | Dialect::Smb210 => SigningAlgorithm::HmacSha256,
            Dialect::Smb300 | Dialect::Smb302 => SigningAlgorithm::AesCmac,
            Dialect::Smb311 => self.signing_algorithm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_codes() {
        for code in [0x0202, 0x0210, 0x0300, 0x0302, 0x0311] {
            let dialect = Dialect::from_code(code).unwrap();
            assert_eq!(dialect.code(), Some(code));
        }
        assert_eq!(Dialect::from_code(0x0222), None);
        assert_eq!(Dialect::Legacy.code(), None);
    }

    #[test]
    fn test_dialect_families() {
        assert!(!Dialect::Smb210.is_smb3());
        assert!(Dialect::Smb300.is_smb3());
        assert!(Dialect::Smb311.uses_preauth_integrity());
        assert!(!Dialect::Smb302.uses_preauth_integrity());
    }

    #[test]
    fn test_cipher_properties() {
        assert_eq!(Cipher::Aes128Ccm.nonce_size(), 11);
        assert_eq!(Cipher::Aes256Gcm.nonce_size(), 12);
        assert_eq!(Cipher::Aes256Ccm.key_size(), 32);
        assert_eq!(Cipher::Aes128Gcm.key_size(), 16);
        assert_eq!(Cipher::from_id(5), None);
    }

    #[test]
    fn test_compression_set() {
        let set = CompressionSet::from_algorithms(&[
            CompressionAlgorithm::Lz77,
            CompressionAlgorithm::PatternV1,
        ]);
        assert!(set.contains(CompressionAlgorithm::Lz77));
        assert!(set.contains(CompressionAlgorithm::PatternV1));
        assert!(!set.contains(CompressionAlgorithm::Lznt1));
        assert!(!set.is_empty());

        assert!(CompressionSet::EMPTY.is_empty());
        assert!(CompressionSet::EMPTY.with(CompressionAlgorithm::None).is_empty());
    }

    #[test]
    fn test_effective_signing_algorithm() {
        let mut params = NegotiatedParams::for_dialect(Dialect::Smb210);
        params.signing_algorithm = SigningAlgorithm::AesGmac;
        assert_eq!(params.effective_signing_algorithm(), SigningAlgorithm::HmacSha256);

        params.dialect = Dialect::Smb302;
        assert_eq!(params.effective_signing_algorithm(), SigningAlgorithm::AesCmac);

        params.dialect = Dialect::Smb311;
        assert_eq!(params.effective_signing_algorithm(), SigningAlgorithm::AesGmac);
    }
}
