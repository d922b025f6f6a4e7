//! Session and channel security state
//!
//! A [`Session`] owns the session key, the keys derived from it, the AEAD
//! nonce counter and the legacy sequence counter. Counters sit behind
//! session-scoped locks so "read, increment, use" is atomic with respect to
//! concurrent signers and encryptors. Key derivation takes `&mut self`, which
//! gives it the single-writer access it needs.
//!
//! A [`Channel`] is a secondary connection bound to a session. It holds a
//! weak reference to the session and owns only its own signing key.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use rand::{RngCore, rngs::OsRng};
use tracing::{debug, error, trace};
use zeroize::Zeroizing;

use crate::core::{
    CONTEXT_SMB30_SERVER_IN, CONTEXT_SMB30_SERVER_OUT, CONTEXT_SMB30_SIGNING, Cipher, Dialect,
    LABEL_SMB30_CIPHER, LABEL_SMB30_SIGNING, LABEL_SMB311_C2S_CIPHER, LABEL_SMB311_S2C_CIPHER,
    LABEL_SMB311_SIGNING, MAX_DERIVED_KEY_SIZE, NegotiatedParams, SESSION_KEY_SIZE,
    TRANSFORM_NONCE_SIZE, TransformError, TransformResult,
};
#[cfg(feature = "compression")]
use crate::extensions::CompressionStats;
use crate::transport::SequencePair;

use super::{
    kdf,
    keys::{DerivedKey, SessionKeys},
    preauth::PreauthIntegrity,
};

/// Monotonic 128-bit AEAD nonce counter.
///
/// The low half is incremented before every use; wrapping it carries into
/// the high half, so a value never repeats for the lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceCounter {
    high: u64,
    low: u64,
}

impl NonceCounter {
    /// Start at a random low half.
    pub fn random() -> Self {
        Self {
            high: 0,
            low: OsRng.next_u64(),
        }
    }

    /// Start at an explicit value. The first nonce handed out is one above it.
    pub fn starting_at(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Advance and return the new `(high, low)` pair.
    pub fn advance(&mut self) -> (u64, u64) {
        self.low = self.low.wrapping_add(1);
        if self.low == 0 {
            self.high = self.high.wrapping_add(1);
        }
        (self.high, self.low)
    }

    /// Last value handed out.
    pub fn current(&self) -> (u64, u64) {
        (self.high, self.low)
    }
}

/// Lay out a counter value as the 16-byte transform nonce field.
///
/// Low half first, then the high half, truncated to the cipher's nonce
/// length; the remaining bytes stay zero (4 for GCM, 5 for CCM).
pub fn nonce_field(cipher: Cipher, high: u64, low: u64) -> [u8; TRANSFORM_NONCE_SIZE] {
    let mut counter = [0u8; TRANSFORM_NONCE_SIZE];
    counter[..8].copy_from_slice(&low.to_le_bytes());
    counter[8..].copy_from_slice(&high.to_le_bytes());

    let mut nonce = [0u8; TRANSFORM_NONCE_SIZE];
    let n = cipher.nonce_size();
    nonce[..n].copy_from_slice(&counter[..n]);
    nonce
}

/// Long-lived security context for one authenticated session.
pub struct Session {
    session_id: u64,
    params: NegotiatedParams,
    session_key: Zeroizing<Vec<u8>>,
    full_session_key: Zeroizing<Vec<u8>>,
    keys: SessionKeys,
    keys_derived: bool,
    preauth: PreauthIntegrity,
    nonce: Mutex<NonceCounter>,
    legacy_sequence: Mutex<u32>,
    #[cfg(feature = "compression")]
    stats: CompressionStats,
}

impl Session {
    /// Create a session with no key material yet.
    pub fn new(session_id: u64, params: NegotiatedParams) -> Self {
        Self {
            session_id,
            params,
            session_key: Zeroizing::new(Vec::new()),
            full_session_key: Zeroizing::new(Vec::new()),
            keys: SessionKeys::default(),
            keys_derived: false,
            preauth: PreauthIntegrity::new(),
            nonce: Mutex::new(NonceCounter::random()),
            legacy_sequence: Mutex::new(0),
            #[cfg(feature = "compression")]
            stats: CompressionStats::default(),
        }
    }

    /// Replace the nonce counter (session resumption, tests).
    pub fn with_nonce_counter(self, counter: NonceCounter) -> Self {
        *self.nonce.lock().unwrap_or_else(PoisonError::into_inner) = counter;
        self
    }

    /// Get the session id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Get the negotiated parameters.
    pub fn params(&self) -> &NegotiatedParams {
        &self.params
    }

    /// Get the negotiated dialect.
    pub fn dialect(&self) -> Dialect {
        self.params.dialect
    }

    /// Install the key produced by authentication.
    ///
    /// `full_key` is the untruncated key used for 256-bit cipher
    /// derivations; when absent the session key is used. Previously derived
    /// keys are scrubbed.
    pub fn set_session_key(&mut self, key: &[u8], full_key: Option<&[u8]>) {
        self.session_key = Zeroizing::new(key.to_vec());
        self.full_session_key = Zeroizing::new(full_key.unwrap_or(key).to_vec());
        self.keys.clear();
        self.keys_derived = false;
    }

    /// Raw session key (the legacy MAC key).
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn session_key(&self) -> &[u8] {
        &self.session_key
    }

    /// Check if the session has any key material.
    pub fn has_session_key(&self) -> bool {
        !self.session_key.is_empty()
    }

    /// Derived keys.
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Install keys derived elsewhere (the peer's view of a session, key export).
    pub fn install_keys(&mut self, keys: SessionKeys) {
        self.keys = keys;
        self.keys_derived = true;
    }

    /// Check if derivation has run for the current session key.
    pub fn keys_derived(&self) -> bool {
        self.keys_derived
    }

    /// Pre-auth integrity state.
    pub fn preauth(&self) -> &PreauthIntegrity {
        &self.preauth
    }

    /// Mutable pre-auth integrity state, fed by the negotiate/setup exchange.
    pub fn preauth_mut(&mut self) -> &mut PreauthIntegrity {
        &mut self.preauth
    }

    /// Compression counters.
    #[cfg(feature = "compression")]
    pub fn compression_stats(&self) -> &CompressionStats {
        &self.stats
    }

    /// Allocate the next AEAD nonce value.
    pub fn next_nonce(&self) -> (u64, u64) {
        let mut counter = self.nonce.lock().unwrap_or_else(PoisonError::into_inner);
        let value = counter.advance();
        trace!(session_id = self.session_id, high = value.0, low = value.1, "nonce allocated");
        value
    }

    /// Reserve a legacy sequence pair: one number for the request, one for its reply.
    pub fn reserve_sequence_pair(&self) -> SequencePair {
        let mut next = self.legacy_sequence.lock().unwrap_or_else(PoisonError::into_inner);
        let pair = SequencePair {
            request: *next,
            reply: next.wrapping_add(1),
        };
        *next = next.wrapping_add(2);
        pair
    }

    /// Derive the signing, encryption and decryption keys, in that order.
    ///
    /// Each key is derived independently: a failure is logged, leaves that
    /// key zero-length and does not stop its siblings. Later operations that
    /// need a zero-length key fail with a configuration error.
    ///
    /// # Errors
    /// Returns a configuration error if the session key is missing or
    /// shorter than 16 bytes.
    pub fn derive_session_keys(&mut self) -> TransformResult<()> {
        if self.session_key.len() < SESSION_KEY_SIZE {
            return Err(TransformError::config(format!(
                "session key missing or undersized: {} bytes",
                self.session_key.len()
            )));
        }

        self.keys.clear();
        self.keys_derived = true;

        let session_key = &self.session_key[..SESSION_KEY_SIZE];
        match self.params.dialect {
            // SMB1 signs with the MAC key itself
            Dialect::Legacy => {}
            Dialect::Smb202 | Dialect::Smb210 => {
                derive_plain(session_key, &mut self.keys.signing);
            }
            Dialect::Smb300 | Dialect::Smb302 => {
                derive_key(
                    "signing",
                    session_key,
                    LABEL_SMB30_SIGNING,
                    CONTEXT_SMB30_SIGNING,
                    SESSION_KEY_SIZE,
                    &mut self.keys.signing,
                );
                derive_key(
                    "encryption",
                    session_key,
                    LABEL_SMB30_CIPHER,
                    CONTEXT_SMB30_SERVER_IN,
                    SESSION_KEY_SIZE,
                    &mut self.keys.encryption,
                );
                derive_key(
                    "decryption",
                    session_key,
                    LABEL_SMB30_CIPHER,
                    CONTEXT_SMB30_SERVER_OUT,
                    SESSION_KEY_SIZE,
                    &mut self.keys.decryption,
                );
            }
            Dialect::Smb311 => {
                let context = *self.preauth.hash();
                derive_key(
                    "signing",
                    session_key,
                    LABEL_SMB311_SIGNING,
                    &context,
                    SESSION_KEY_SIZE,
                    &mut self.keys.signing,
                );

                let (cipher_key, cipher_len): (&[u8], usize) = match self.params.cipher {
                    Some(cipher) if cipher.is_256() => (self.full_session_key.as_slice(), cipher.key_size()),
                    _ => (session_key, SESSION_KEY_SIZE),
                };
                derive_key(
                    "encryption",
                    cipher_key,
                    LABEL_SMB311_C2S_CIPHER,
                    &context,
                    cipher_len,
                    &mut self.keys.encryption,
                );
                derive_key(
                    "decryption",
                    cipher_key,
                    LABEL_SMB311_S2C_CIPHER,
                    &context,
                    cipher_len,
                    &mut self.keys.decryption,
                );
            }
        }

        debug!(
            session_id = self.session_id,
            dialect = ?self.params.dialect,
            signing = self.keys.signing.len(),
            encryption = self.keys.encryption.len(),
            decryption = self.keys.decryption.len(),
            "session keys derived"
        );
        Ok(())
    }
}

fn derive_plain(key: &[u8], slot: &mut DerivedKey) {
    slot.clear();
    match DerivedKey::from_slice(key) {
        Ok(derived) => *slot = derived,
        Err(e) => error!(error = %e, "signing key setup failed"),
    }
}

fn derive_key(
    name: &'static str,
    key: &[u8],
    label: &[u8],
    context: &[u8],
    len: usize,
    slot: &mut DerivedKey,
) {
    slot.clear();

    let mut out = Zeroizing::new([0u8; MAX_DERIVED_KEY_SIZE]);
    let result = kdf::derive(key, label, context, &mut out[..len])
        .and_then(|()| DerivedKey::from_slice(&out[..len]));
    match result {
        Ok(derived) => *slot = derived,
        Err(e) => error!(key = name, error = %e, "key derivation failed"),
    }
}

/// A secondary connection bound to a session (multichannel).
pub struct Channel {
    session: Weak<Session>,
    session_key: Zeroizing<Vec<u8>>,
    preauth: PreauthIntegrity,
    signing_key: DerivedKey,
    channel_key_authoritative: bool,
}

impl Channel {
    /// Create a channel for `session`. Until binding completes the session key signs.
    pub fn new(session: &Arc<Session>) -> Self {
        Self {
            session: Arc::downgrade(session),
            session_key: Zeroizing::new(Vec::new()),
            preauth: PreauthIntegrity::new(),
            signing_key: DerivedKey::empty(),
            channel_key_authoritative: false,
        }
    }

    /// Parent session, if it is still alive.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    /// Install the key produced by the binding session setup.
    pub fn set_session_key(&mut self, key: &[u8]) {
        self.session_key = Zeroizing::new(key.to_vec());
        self.signing_key.clear();
    }

    /// Pre-auth integrity state of the binding exchange.
    pub fn preauth_mut(&mut self) -> &mut PreauthIntegrity {
        &mut self.preauth
    }

    /// Derived channel signing key.
    pub fn signing_key(&self) -> &DerivedKey {
        &self.signing_key
    }

    /// Check if the channel key (rather than the session key) signs now.
    pub fn uses_channel_key(&self) -> bool {
        self.channel_key_authoritative
    }

    /// Make the channel key authoritative. Permanent for this channel.
    pub(crate) fn mark_bound(&mut self) {
        self.channel_key_authoritative = true;
    }

    /// Derive the channel signing key from the channel's own session key.
    ///
    /// # Errors
    /// Returns a configuration error if the parent session is gone, its
    /// dialect predates SMB 3, or the channel key is missing or undersized.
    pub fn derive_signing_key(&mut self) -> TransformResult<()> {
        let dialect = self
            .session()
            .map(|session| session.dialect())
            .ok_or_else(|| TransformError::config("parent session no longer exists"))?;
        if !dialect.is_smb3() {
            return Err(TransformError::config(format!(
                "channel binding requires SMB 3.x, negotiated {dialect:?}"
            )));
        }
        if self.session_key.len() < SESSION_KEY_SIZE {
            return Err(TransformError::config(format!(
                "channel session key missing or undersized: {} bytes",
                self.session_key.len()
            )));
        }

        let key = &self.session_key[..SESSION_KEY_SIZE];
        if dialect.uses_preauth_integrity() {
            let context = *self.preauth.hash();
            derive_key(
                "channel signing",
                key,
                LABEL_SMB311_SIGNING,
                &context,
                SESSION_KEY_SIZE,
                &mut self.signing_key,
            );
        } else {
            derive_key(
                "channel signing",
                key,
                LABEL_SMB30_SIGNING,
                CONTEXT_SMB30_SIGNING,
                SESSION_KEY_SIZE,
                &mut self.signing_key,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dialect: Dialect, cipher: Option<Cipher>) -> Session {
        let mut params = NegotiatedParams::for_dialect(dialect);
        params.cipher = cipher;
        Session::new(0x1122_3344_5566_7788, params)
    }

    fn kdf16(key: &[u8], label: &[u8], context: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 16];
        kdf::derive(key, label, context, &mut out).unwrap();
        out
    }

    #[test]
    fn test_nonce_counter_monotonic() {
        let mut counter = NonceCounter::starting_at(0, 10);
        let mut previous = counter.current();
        for _ in 0..100 {
            let next = counter.advance();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_nonce_counter_wraps_into_high_half() {
        let mut counter = NonceCounter::starting_at(7, u64::MAX - 1);
        assert_eq!(counter.advance(), (7, u64::MAX));
        assert_eq!(counter.advance(), (8, 0));
        assert_eq!(counter.advance(), (8, 1));
    }

    #[test]
    fn test_nonce_field_padding() {
        let gcm = nonce_field(Cipher::Aes128Gcm, 0x0A0B_0C0D_0E0F_1011, 0x0102_0304_0506_0708);
        assert_eq!(&gcm[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&gcm[8..12], &[0x11, 0x10, 0x0F, 0x0E]);
        assert_eq!(&gcm[12..], &[0u8; 4]);

        let ccm = nonce_field(Cipher::Aes256Ccm, u64::MAX, u64::MAX);
        assert_eq!(&ccm[..11], &[0xFF; 11]);
        assert_eq!(&ccm[11..], &[0u8; 5]);
    }

    #[test]
    fn test_session_nonces_strictly_increase() {
        let session = session(Dialect::Smb311, Some(Cipher::Aes128Gcm))
            .with_nonce_counter(NonceCounter::starting_at(0, u64::MAX - 2));
        let values: Vec<_> = (0..5).map(|_| session.next_nonce()).collect();
        assert_eq!(values[0], (0, u64::MAX - 1));
        assert_eq!(values[2], (1, 0));
        for pair in values.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_sequence_pairs() {
        let session = session(Dialect::Legacy, None);
        let first = session.reserve_sequence_pair();
        let second = session.reserve_sequence_pair();
        assert_eq!(first, SequencePair { request: 0, reply: 1 });
        assert_eq!(second, SequencePair { request: 2, reply: 3 });
    }

    #[test]
    fn test_derive_requires_session_key() {
        let mut session = session(Dialect::Smb300, None);
        assert!(matches!(
            session.derive_session_keys(),
            Err(TransformError::Config(_))
        ));

        session.set_session_key(&[0x11; 8], None);
        assert!(matches!(
            session.derive_session_keys(),
            Err(TransformError::Config(_))
        ));
        assert!(!session.keys_derived());
    }

    #[test]
    fn test_smb2_signing_key_is_session_key() {
        let mut session = session(Dialect::Smb210, None);
        session.set_session_key(&[0x11; 16], None);
        session.derive_session_keys().unwrap();

        assert_eq!(session.keys().signing.as_bytes(), &[0x11; 16]);
        assert!(session.keys().encryption.is_empty());
        assert!(session.keys().decryption.is_empty());
    }

    #[test]
    fn test_smb30_fixed_labels() {
        let key = [0x5Au8; 16];
        let mut session = session(Dialect::Smb300, Some(Cipher::Aes128Ccm));
        session.set_session_key(&key, None);
        session.derive_session_keys().unwrap();

        let keys = session.keys();
        assert_eq!(keys.signing.as_bytes(), &kdf16(&key, b"SMB2AESCMAC\0", b"SmbSign\0")[..]);
        assert_eq!(keys.encryption.as_bytes(), &kdf16(&key, b"SMB2AESCCM\0", b"ServerIn \0")[..]);
        assert_eq!(keys.decryption.as_bytes(), &kdf16(&key, b"SMB2AESCCM\0", b"ServerOut\0")[..]);
        assert_ne!(keys.encryption.as_bytes(), keys.decryption.as_bytes());
    }

    #[test]
    fn test_smb311_uses_preauth_context() {
        let key = [0x21u8; 16];
        let mut session = session(Dialect::Smb311, Some(Cipher::Aes128Gcm));
        session.set_session_key(&key, None);
        session
            .preauth_mut()
            .init(true, &crate::transport::MessageBuffer::from(b"negotiate".to_vec()));
        session.derive_session_keys().unwrap();

        let context = *session.preauth().hash();
        assert_eq!(
            session.keys().signing.as_bytes(),
            &kdf16(&key, b"SMBSigningKey\0", &context)[..]
        );
        assert_eq!(session.keys().encryption.len(), 16);

        // Moving the hash forward changes every key
        let before = session.keys().signing.as_bytes().to_vec();
        session
            .preauth_mut()
            .update(&crate::transport::MessageBuffer::from(b"more".to_vec()));
        session.derive_session_keys().unwrap();
        assert_ne!(session.keys().signing.as_bytes(), &before[..]);
    }

    #[test]
    fn test_smb311_256_bit_cipher_uses_full_key() {
        let truncated = [0x01u8; 16];
        let full = [0x02u8; 32];
        let mut session = session(Dialect::Smb311, Some(Cipher::Aes256Gcm));
        session.set_session_key(&truncated, Some(&full));
        session.derive_session_keys().unwrap();

        let context = *session.preauth().hash();
        let mut expected = [0u8; 32];
        kdf::derive(&full, b"SMBC2SCipherKey\0", &context, &mut expected).unwrap();

        assert_eq!(session.keys().encryption.as_bytes(), &expected);
        assert_eq!(session.keys().decryption.len(), 32);
        // Signing stays on the truncated key
        assert_eq!(
            session.keys().signing.as_bytes(),
            &kdf16(&truncated, b"SMBSigningKey\0", &context)[..]
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let derive = || {
            let mut s = session(Dialect::Smb311, Some(Cipher::Aes128Ccm));
            s.set_session_key(&[0x77; 16], None);
            s.derive_session_keys().unwrap();
            (
                s.keys().signing.as_bytes().to_vec(),
                s.keys().encryption.as_bytes().to_vec(),
                s.keys().decryption.as_bytes().to_vec(),
            )
        };
        assert_eq!(derive(), derive());
    }

    #[test]
    fn test_new_session_key_scrubs_derived_keys() {
        let mut session = session(Dialect::Smb300, None);
        session.set_session_key(&[0x11; 16], None);
        session.derive_session_keys().unwrap();
        assert!(!session.keys().signing.is_empty());

        session.set_session_key(&[0x22; 16], None);
        assert!(session.keys().signing.is_empty());
        assert!(!session.keys_derived());
    }

    #[test]
    fn test_channel_signing_key() {
        let session = Arc::new(session(Dialect::Smb311, Some(Cipher::Aes128Gcm)));
        let mut channel = Channel::new(&session);
        assert!(!channel.uses_channel_key());
        assert!(channel.derive_signing_key().is_err());

        channel.set_session_key(&[0x66; 16]);
        channel
            .preauth_mut()
            .init(false, &crate::transport::MessageBuffer::from(b"bind".to_vec()));
        channel.derive_signing_key().unwrap();

        let context = *channel.preauth.hash();
        assert_eq!(
            channel.signing_key().as_bytes(),
            &kdf16(&[0x66; 16], b"SMBSigningKey\0", &context)[..]
        );
    }

    #[test]
    fn test_channel_requires_smb3_and_live_session() {
        let old = Arc::new(session(Dialect::Smb210, None));
        let mut channel = Channel::new(&old);
        channel.set_session_key(&[0x66; 16]);
        assert!(matches!(channel.derive_signing_key(), Err(TransformError::Config(_))));

        let mut orphan = {
            let parent = Arc::new(session(Dialect::Smb311, None));
            Channel::new(&parent)
        };
        orphan.set_session_key(&[0x66; 16]);
        assert!(orphan.session().is_none());
        assert!(matches!(orphan.derive_signing_key(), Err(TransformError::Config(_))));
    }
}
