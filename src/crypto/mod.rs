//! Security layer
//!
//! Implements the integrity and confidentiality transforms:
//! - SP800-108 key derivation and the 3.1.1 pre-auth integrity hash
//! - Session and channel key state with monotonic nonce/sequence counters
//! - SMB1 keyed-MD5 signing
//! - SMB2/SMB3 signing (HMAC-SHA-256, AES-CMAC, AES-GMAC)
//! - SMB3 encryption (AES-128/256 in CCM and GCM modes)

pub mod kdf;
mod keys;
mod legacy;
mod preauth;
mod session;
mod signing;
mod transform;

pub use keys::*;
pub use legacy::*;
pub use preauth::*;
pub use session::*;
pub use signing::*;
pub use transform::*;
