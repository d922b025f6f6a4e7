//! Derived key material
//!
//! Keys are zero-length until a derivation succeeds. Every user of a key
//! checks [`DerivedKey::is_empty`] and fails closed.

use std::fmt;

use crate::core::{CryptoError, MAX_DERIVED_KEY_SIZE};
use zeroize::Zeroize;

/// A signing, encryption or decryption key.
///
/// The bytes are zeroized on drop and on [`DerivedKey::clear`].
#[derive(Clone, Default)]
pub struct DerivedKey {
    key: [u8; MAX_DERIVED_KEY_SIZE],
    len: usize,
}

impl DerivedKey {
    /// A key that has not been derived yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy key bytes in.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() > MAX_DERIVED_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        let mut key = Self::empty();
        key.key[..bytes.len()].copy_from_slice(bytes);
        key.len = bytes.len();
        Ok(key)
    }

    /// Check if the key is unusable.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key length in bytes (0 until derived).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key[..self.len]
    }

    /// Scrub the key and mark it as not derived.
    pub fn clear(&mut self) {
        self.key.zeroize();
        self.len = 0;
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey").field("len", &self.len).finish_non_exhaustive()
    }
}

/// The three keys owned by a session.
#[derive(Debug, Clone, Default)]
pub struct SessionKeys {
    /// Signs outgoing and verifies incoming messages.
    pub signing: DerivedKey,
    /// Encrypts client-to-server traffic.
    pub encryption: DerivedKey,
    /// Decrypts server-to-client traffic.
    pub decryption: DerivedKey,
}

impl SessionKeys {
    /// Scrub all keys.
    pub fn clear(&mut self) {
        self.signing.clear();
        self.encryption.clear();
        self.decryption.clear();
    }
}
