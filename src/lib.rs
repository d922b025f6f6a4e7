//! # smb-transform
//!
//! Message-level security and compression transforms for SMB clients.
//!
//! Every request and reply passes through a stack of transforms between the
//! command encoder and the socket:
//!
//! - **Signing**: keyed-MD5 for SMB1, HMAC-SHA-256 for 2.x, AES-CMAC and
//!   AES-GMAC for 3.x, including compound chains and multichannel binding
//! - **Key derivation**: SP800-108 counter-mode KDF over HMAC-SHA-256, with
//!   the 3.1.1 pre-auth integrity hash as context
//! - **Encryption**: the SMB3 transform header with AES-128/256 in CCM or
//!   GCM mode
//! - **Compression**: chained and non-chained framing with LZ77, LZNT1 and
//!   Pattern_V1
//!
//! Negotiation, authentication and the socket stay with the caller. This
//! crate reads the negotiated parameters and the session key they produce.
//!
//! ## Feature Flags
//!
//! - `compression` (default): Compression transform and built-in codecs
//! - `serde`: Serialize/Deserialize for negotiated parameters and config
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types, negotiated parameters and the codec trait
//! - [`transport`]: Message buffers, headers, compound chains
//! - [`crypto`]: Sessions, channels, signing, key derivation, encryption
//! - [`extensions`]: Compression transform (requires `compression` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use smb_transform::prelude::*;
//!
//! let params = NegotiatedParams::for_dialect(Dialect::Smb210);
//! let mut session = Session::new(0x1122, params);
//! session.set_session_key(&[0x11; 16], None);
//! session.derive_session_keys().unwrap();
//!
//! let mut message = MessageBuffer::from(Smb2Header::new(SMB2_READ, 4, 0x1122).to_bytes().to_vec());
//! sign_message(&session, None, &mut message).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Buffers and framing
pub mod transport;

// Signing, key derivation and encryption
pub mod crypto;

// Compression (feature-gated)
#[cfg(feature = "compression")]
#[cfg_attr(docsrs, doc(cfg(feature = "compression")))]
pub mod extensions;

/// Prelude module for convenient imports.
pub mod prelude {
    // Constants, errors and negotiated parameters
    pub use crate::core::*;

    // Buffers, headers and compound chains
    pub use crate::transport::*;

    // Sessions, channels and the transforms
    pub use crate::crypto::*;

    // Compression transform (when enabled)
    #[cfg(feature = "compression")]
    pub use crate::extensions::{CompressionCodec, CompressionConfig, CompressionStatsSnapshot};
}

// Re-export commonly used items at crate root
pub use core::{NegotiatedParams, TransformError, TransformResult};
pub use crypto::{Channel, Session};
pub use transport::{MessageBuffer, Request, TransformFrame};

#[cfg(feature = "compression")]
pub use extensions::CompressionCodec;
