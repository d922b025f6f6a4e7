//! Protocol constants for the SMB signing, encryption and compression transforms.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed.

// =============================================================================
// PROTOCOL IDENTIFIERS
// =============================================================================

/// SMB1 header protocol id (`0xFF 'S' 'M' 'B'`).
pub const SMB1_PROTOCOL_ID: [u8; 4] = [0xFF, b'S', b'M', b'B'];

/// SMB2/SMB3 header protocol id (`0xFE 'S' 'M' 'B'`).
pub const SMB2_PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// Encryption transform header protocol id (`0xFD 'S' 'M' 'B'`).
pub const TRANSFORM_PROTOCOL_ID: [u8; 4] = [0xFD, b'S', b'M', b'B'];

/// Compression transform header protocol id (`0xFC 'S' 'M' 'B'`).
pub const COMPRESSION_PROTOCOL_ID: [u8; 4] = [0xFC, b'S', b'M', b'B'];

// =============================================================================
// SMB1 HEADER LAYOUT
// =============================================================================

/// SMB1 header size.
pub const SMB1_HEADER_SIZE: usize = 32;

/// Offset of the command byte in the SMB1 header.
pub const SMB1_COMMAND_OFFSET: usize = 4;

/// Offset of the 8-byte security signature in the SMB1 header.
pub const SMB1_SIGNATURE_OFFSET: usize = 14;

/// Size of the SMB1 security signature.
pub const SMB1_SIGNATURE_SIZE: usize = 8;

/// Signature written while the session has no MAC key yet.
pub const SMB1_PLACEHOLDER_SIGNATURE: [u8; SMB1_SIGNATURE_SIZE] = *b"BSRSPYL ";

/// SMB_COM_SESSION_SETUP_ANDX.
pub const SMB1_COM_SESSION_SETUP_ANDX: u8 = 0x73;

/// Flags2 offset in the SMB1 header.
pub const SMB1_FLAGS2_OFFSET: usize = 10;

/// SMB_FLAGS2_SECURITY_SIGNATURE.
pub const SMB1_FLAGS2_SECURITY_SIGNATURE: u16 = 0x0004;

/// Half-width of the diagnostic sequence-number resync scan.
pub const SMB1_RESYNC_WINDOW: i64 = 4;

// =============================================================================
// SMB2 HEADER LAYOUT
// =============================================================================

/// SMB2 header size.
pub const SMB2_HEADER_SIZE: usize = 64;

/// Offset of the NT status field.
pub const SMB2_STATUS_OFFSET: usize = 8;

/// Offset of the command field.
pub const SMB2_COMMAND_OFFSET: usize = 12;

/// Offset of the flags field.
pub const SMB2_FLAGS_OFFSET: usize = 16;

/// Offset of the next-command field.
pub const SMB2_NEXT_COMMAND_OFFSET: usize = 20;

/// Offset of the message id.
pub const SMB2_MESSAGE_ID_OFFSET: usize = 24;

/// Offset of the session id.
pub const SMB2_SESSION_ID_OFFSET: usize = 40;

/// Offset of the 16-byte signature.
pub const SMB2_SIGNATURE_OFFSET: usize = 48;

/// Size of the SMB2 signature field.
pub const SMB2_SIGNATURE_SIZE: usize = 16;

/// Compound members are aligned to this boundary.
pub const SMB2_COMPOUND_ALIGNMENT: usize = 8;

/// Response flag.
pub const SMB2_FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;

/// Async header flag.
pub const SMB2_FLAGS_ASYNC_COMMAND: u32 = 0x0000_0002;

/// Related compound operation flag.
pub const SMB2_FLAGS_RELATED_OPERATIONS: u32 = 0x0000_0004;

/// Message is signed.
pub const SMB2_FLAGS_SIGNED: u32 = 0x0000_0008;

/// SMB2 NEGOTIATE.
pub const SMB2_NEGOTIATE: u16 = 0x0000;

/// SMB2 SESSION_SETUP.
pub const SMB2_SESSION_SETUP: u16 = 0x0001;

/// SMB2 READ.
pub const SMB2_READ: u16 = 0x0008;

/// SMB2 WRITE.
pub const SMB2_WRITE: u16 = 0x0009;

/// SMB2 CANCEL.
pub const SMB2_CANCEL: u16 = 0x000C;

/// SMB2 OPLOCK_BREAK.
pub const SMB2_OPLOCK_BREAK: u16 = 0x0012;

/// MessageId carried by unsolicited server messages such as oplock breaks.
pub const SMB2_UNSOLICITED_MESSAGE_ID: u64 = u64::MAX;

/// STATUS_SUCCESS.
pub const STATUS_SUCCESS: u32 = 0x0000_0000;

/// STATUS_MORE_PROCESSING_REQUIRED.
pub const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;

/// Fixed part of the WRITE request body (StructureSize 49 minus the buffer byte).
pub const SMB2_WRITE_REQUEST_SIZE: usize = 48;

// =============================================================================
// KEY DERIVATION (SP800-108 COUNTER MODE, HMAC-SHA-256)
// =============================================================================

/// Size of the truncated session key used for 128-bit derivations.
pub const SESSION_KEY_SIZE: usize = 16;

/// Largest derived key (AES-256).
pub const MAX_DERIVED_KEY_SIZE: usize = 32;

/// SHA-512 output size used by the pre-auth integrity hash.
pub const PREAUTH_HASH_SIZE: usize = 64;

/// 3.0 signing label.
pub const LABEL_SMB30_SIGNING: &[u8] = b"SMB2AESCMAC\0";

/// 3.0 signing context.
pub const CONTEXT_SMB30_SIGNING: &[u8] = b"SmbSign\0";

/// 3.0 encryption/decryption label.
pub const LABEL_SMB30_CIPHER: &[u8] = b"SMB2AESCCM\0";

/// 3.0 client-to-server (encryption) context.
pub const CONTEXT_SMB30_SERVER_IN: &[u8] = b"ServerIn \0";

/// 3.0 server-to-client (decryption) context.
pub const CONTEXT_SMB30_SERVER_OUT: &[u8] = b"ServerOut\0";

/// 3.1.1 signing label.
pub const LABEL_SMB311_SIGNING: &[u8] = b"SMBSigningKey\0";

/// 3.1.1 client-to-server cipher label.
pub const LABEL_SMB311_C2S_CIPHER: &[u8] = b"SMBC2SCipherKey\0";

/// 3.1.1 server-to-client cipher label.
pub const LABEL_SMB311_S2C_CIPHER: &[u8] = b"SMBS2CCipherKey\0";

// =============================================================================
// ENCRYPTION TRANSFORM
// =============================================================================

/// Transform header size.
pub const TRANSFORM_HEADER_SIZE: usize = 52;

/// Offset of the AEAD tag inside the transform header.
pub const TRANSFORM_SIGNATURE_OFFSET: usize = 4;

/// Offset where the authenticated-but-not-encrypted region begins.
pub const TRANSFORM_AAD_OFFSET: usize = 20;

/// Bytes of header covered as AAD (nonce through session id).
pub const TRANSFORM_AAD_SIZE: usize = 32;

/// Size of the nonce field.
pub const TRANSFORM_NONCE_SIZE: usize = 16;

/// AEAD tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// GCM nonce length.
pub const GCM_NONCE_SIZE: usize = 12;

/// CCM nonce length.
pub const CCM_NONCE_SIZE: usize = 11;

/// 3.1.1 transform flag: payload is encrypted.
pub const TRANSFORM_FLAG_ENCRYPTED: u16 = 0x0001;

// =============================================================================
// COMPRESSION TRANSFORM
// =============================================================================

/// Common compression header: protocol id + original segment size.
pub const COMPRESSION_HEADER_SIZE: usize = 8;

/// Non-chained header: common header + algorithm + flags + offset.
pub const COMPRESSION_UNCHAINED_HEADER_SIZE: usize = 16;

/// Chained payload header: algorithm + flags + length.
pub const COMPRESSION_PAYLOAD_HEADER_SIZE: usize = 8;

/// Extra original-payload-size field carried by real algorithms.
pub const COMPRESSION_ORIGINAL_SIZE_FIELD: usize = 4;

/// Pattern_V1 payload size.
pub const PATTERN_V1_PAYLOAD_SIZE: usize = 8;

/// Payload flag: no further payload follows.
pub const COMPRESSION_FLAG_NONE: u16 = 0x0000;

/// Payload flag: another payload follows in the chain.
pub const COMPRESSION_FLAG_CHAINED: u16 = 0x0001;

/// Shortest leading/trailing run worth a Pattern_V1 record.
pub const MIN_PATTERN_RUN: usize = 32;

/// Default negotiated chunk length for chained compression.
pub const DEFAULT_COMPRESSION_CHUNK_SIZE: usize = 1024 * 1024;

/// Default write payload size below which compression is not attempted.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

/// Default hard ceiling for a declared decompressed size.
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;
