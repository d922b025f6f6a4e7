//! Pre-authentication integrity hash (SMB 3.1.1)
//!
//! A running SHA-512 over the negotiate and session-setup exchange. The
//! session-setup leg is seeded from the final negotiate-leg hash, and every
//! step hashes the previous output followed by the new message:
//!
//! ```text
//! H(0)   = 64 zero bytes            (negotiate leg)
//!        = negotiate-leg hash       (session-setup leg)
//! H(n+1) = SHA-512(H(n) || message)
//! ```

use sha2::{Digest, Sha512};

use crate::core::PREAUTH_HASH_SIZE;
use crate::transport::MessageBuffer;

/// Which exchange the running hash currently covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreauthLeg {
    /// NEGOTIATE request/response.
    Negotiate,
    /// SESSION_SETUP requests/responses.
    SessionSetup,
}

/// Running pre-auth integrity state.
#[derive(Clone)]
pub struct PreauthIntegrity {
    negotiate: [u8; PREAUTH_HASH_SIZE],
    current: [u8; PREAUTH_HASH_SIZE],
    leg: PreauthLeg,
}

impl PreauthIntegrity {
    /// Fresh state: both hashes are 64 zero bytes.
    pub fn new() -> Self {
        Self {
            negotiate: [0u8; PREAUTH_HASH_SIZE],
            current: [0u8; PREAUTH_HASH_SIZE],
            leg: PreauthLeg::Negotiate,
        }
    }

    /// Start a leg and fold in its first message.
    pub fn init(&mut self, is_negotiate: bool, message: &MessageBuffer) {
        let seed = if is_negotiate {
            self.leg = PreauthLeg::Negotiate;
            [0u8; PREAUTH_HASH_SIZE]
        } else {
            self.leg = PreauthLeg::SessionSetup;
            self.negotiate
        };
        self.current = chain(&seed, message);
        self.commit();
    }

    /// Fold a subsequent message of the current leg into the hash.
    pub fn update(&mut self, message: &MessageBuffer) {
        self.current = chain(&self.current, message);
        self.commit();
    }

    fn commit(&mut self) {
        if self.leg == PreauthLeg::Negotiate {
            self.negotiate = self.current;
        }
    }

    /// Hash of the current leg (the KDF context for 3.1.1).
    pub fn hash(&self) -> &[u8; PREAUTH_HASH_SIZE] {
        &self.current
    }

    /// Final hash of the negotiate leg.
    pub fn negotiate_hash(&self) -> &[u8; PREAUTH_HASH_SIZE] {
        &self.negotiate
    }

    /// Leg the running hash belongs to.
    pub fn leg(&self) -> PreauthLeg {
        self.leg
    }
}

impl Default for PreauthIntegrity {
    fn default() -> Self {
        Self::new()
    }
}

fn chain(previous: &[u8; PREAUTH_HASH_SIZE], message: &MessageBuffer) -> [u8; PREAUTH_HASH_SIZE] {
    let mut hasher = Sha512::new();
    hasher.update(previous);
    for segment in message.segments() {
        hasher.update(segment);
    }
    let mut out = [0u8; PREAUTH_HASH_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha512(parts: &[&[u8]]) -> [u8; PREAUTH_HASH_SIZE] {
        let mut hasher = Sha512::new();
        for part in parts {
            hasher.update(part);
        }
        let mut out = [0u8; PREAUTH_HASH_SIZE];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    #[test]
    fn test_negotiate_leg_starts_from_zero() {
        let mut state = PreauthIntegrity::new();
        state.init(true, &MessageBuffer::from(b"negotiate-request".to_vec()));

        let expected = sha512(&[&[0u8; 64], b"negotiate-request"]);
        assert_eq!(state.hash(), &expected);
        assert_eq!(state.negotiate_hash(), &expected);
    }

    #[test]
    fn test_hash_of_hash_chaining() {
        let mut state = PreauthIntegrity::new();
        state.init(true, &MessageBuffer::from(b"neg-req".to_vec()));
        state.update(&MessageBuffer::from(b"neg-resp".to_vec()));
        let negotiate = *state.hash();

        state.init(false, &MessageBuffer::from(b"ss-req-1".to_vec()));
        assert_eq!(state.leg(), PreauthLeg::SessionSetup);
        assert_eq!(state.hash(), &sha512(&[&negotiate, b"ss-req-1"]));

        state.update(&MessageBuffer::from(b"ss-resp-1".to_vec()));
        let after_resp = sha512(&[&sha512(&[&negotiate, b"ss-req-1"]), b"ss-resp-1"]);
        assert_eq!(state.hash(), &after_resp);

        // Session-setup updates never touch the negotiate-leg hash
        assert_eq!(state.negotiate_hash(), &negotiate);
    }

    #[test]
    fn test_segmentation_does_not_matter() {
        let mut whole = PreauthIntegrity::new();
        whole.init(true, &MessageBuffer::from(b"abcdef".to_vec()));

        let mut split = PreauthIntegrity::new();
        split.init(true, &MessageBuffer::from_segments([b"ab".to_vec(), b"cdef".to_vec()]));

        assert_eq!(whole.hash(), split.hash());
    }

    #[test]
    fn test_second_session_setup_reseeds() {
        let mut state = PreauthIntegrity::new();
        state.init(true, &MessageBuffer::from(b"neg".to_vec()));
        state.init(false, &MessageBuffer::from(b"first".to_vec()));
        let first = *state.hash();

        state.init(false, &MessageBuffer::from(b"first".to_vec()));
        assert_eq!(state.hash(), &first);
    }
}
