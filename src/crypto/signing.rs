//! SMB2/SMB3 message signing
//!
//! | Dialect    | Algorithm                  | Key                               |
//! |------------|----------------------------|-----------------------------------|
//! | 2.0.2, 2.1 | HMAC-SHA-256 (truncated)   | first 16 bytes of the session key |
//! | 3.0, 3.0.2 | AES-128-CMAC               | KDF("SMB2AESCMAC", "SmbSign")     |
//! | 3.1.1      | AES-128-CMAC or AES-GMAC   | KDF("SMBSigningKey", preauth)     |
//!
//! The signature covers one logical message with its 16-byte signature field
//! zeroed. Inside a compound chain, that is exactly the bytes up to the
//! member's NextCommand.

use aes::Aes128;
use aes_gcm::{
    Aes128Gcm,
    aead::{AeadInPlace, KeyInit, generic_array::GenericArray},
};
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use crate::core::{
    AuthError, CryptoError, Dialect, FrameError, GCM_NONCE_SIZE, SMB2_CANCEL, SMB2_COMMAND_OFFSET,
    SMB2_FLAGS_OFFSET, SMB2_FLAGS_SERVER_TO_REDIR, SMB2_FLAGS_SIGNED, SMB2_HEADER_SIZE,
    SMB2_MESSAGE_ID_OFFSET, SMB2_NEGOTIATE, SMB2_OPLOCK_BREAK, SMB2_SESSION_SETUP,
    SMB2_SIGNATURE_OFFSET, SMB2_SIGNATURE_SIZE, SMB2_STATUS_OFFSET, SMB2_UNSOLICITED_MESSAGE_ID,
    STATUS_MORE_PROCESSING_REQUIRED, SigningAlgorithm, TransformError, TransformResult,
};
use crate::transport::{MessageBuffer, Request, reply_length_at, set_smb2_flags};

use super::keys::DerivedKey;
use super::session::{Channel, Session};

type HmacSha256 = Hmac<Sha256>;
type Signature = [u8; SMB2_SIGNATURE_SIZE];

const ZERO_SIGNATURE: Signature = [0u8; SMB2_SIGNATURE_SIZE];

/// Header fields the signature depends on.
///
/// Read without validating the rest of the header, so any buffer long
/// enough to hold a header can be signed.
#[derive(Debug, Clone, Copy)]
struct SignedFields {
    status: u32,
    command: u16,
    flags: u32,
    message_id: u64,
}

impl SignedFields {
    fn read(buf: &MessageBuffer, offset: usize) -> Result<Self, FrameError> {
        if buf.len() < offset + SMB2_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: offset + SMB2_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            status: buf.u32_at(offset + SMB2_STATUS_OFFSET)?,
            command: buf.u16_at(offset + SMB2_COMMAND_OFFSET)?,
            flags: buf.u32_at(offset + SMB2_FLAGS_OFFSET)?,
            message_id: buf.u64_at(offset + SMB2_MESSAGE_ID_OFFSET)?,
        })
    }

    fn is_signed(&self) -> bool {
        self.flags & SMB2_FLAGS_SIGNED != 0
    }

    /// Replies that carry no signature even on a signed session.
    ///
    /// An interim SESSION_SETUP reply is only exempt while unsigned; the
    /// final one is checked by [`verify_session_setup_reply`].
    fn is_exempt(&self) -> bool {
        match self.command {
            SMB2_NEGOTIATE => true,
            SMB2_SESSION_SETUP => {
                self.status == STATUS_MORE_PROCESSING_REQUIRED && !self.is_signed()
            }
            SMB2_OPLOCK_BREAK => self.message_id == SMB2_UNSOLICITED_MESSAGE_ID,
            _ => false,
        }
    }
}

/// Sign the single message in `message` in place.
///
/// Sets the signed flag, zeroes the signature field and writes the
/// signature over it. Anonymous sessions and sessions whose keys have not
/// been derived yet are not signed; the message is left untouched. A bound
/// channel signs with its own key.
///
/// # Errors
/// Returns a configuration error if derivation ran but produced no signing
/// key, or for SMB1 sessions.
pub fn sign_message(
    session: &Session,
    channel: Option<&Channel>,
    message: &mut MessageBuffer,
) -> TransformResult<()> {
    let Some(key) = signing_key(session, channel)? else {
        return Ok(());
    };

    let fields = SignedFields::read(message, 0)?;
    set_smb2_flags(message, 0, SMB2_FLAGS_SIGNED)?;
    message.write_at(SMB2_SIGNATURE_OFFSET, &ZERO_SIGNATURE)?;

    let algorithm = session.params().effective_signing_algorithm();
    let slices = message.slices(0, message.len())?;
    let signature = compute_signature(algorithm, key, &fields, &slices)?;
    message.write_at(SMB2_SIGNATURE_OFFSET, &signature)?;

    trace!(
        session_id = session.session_id(),
        message_id = fields.message_id,
        ?algorithm,
        "signed message"
    );
    Ok(())
}

/// Sign every member of a linked compound chain.
///
/// Call after [`crate::transport::link_compound`] so each signature covers
/// the member's padding.
pub fn sign_chain(
    session: &Session,
    channel: Option<&Channel>,
    chain: &mut [Request],
) -> TransformResult<()> {
    for request in chain {
        sign_message(session, channel, &mut request.message)?;
    }
    Ok(())
}

/// Check `claimed` against the signature of the whole of `message`.
///
/// Succeeds trivially for anonymous sessions and before key derivation.
///
/// # Errors
/// Returns `AuthError::SignatureMismatch` if the signature does not verify.
pub fn verify(
    session: &Session,
    channel: Option<&Channel>,
    message: &MessageBuffer,
    claimed: &[u8; SMB2_SIGNATURE_SIZE],
) -> TransformResult<()> {
    let Some(key) = signing_key(session, channel)? else {
        return Ok(());
    };
    let fields = SignedFields::read(message, 0)?;
    check_signature(session, key, message, 0, message.len(), &fields, claimed)
}

/// Verify the reply starting at `offset` in `chain`.
///
/// Returns the length of that reply so the caller can step to the next
/// compound member. Anonymous sessions and sessions without derived keys
/// are accepted without checking, as are NEGOTIATE replies, unsigned interim
/// SESSION_SETUP replies and unsolicited oplock breaks.
///
/// # Errors
/// - `AuthError::NotSigned` if the reply lacks the signed flag
/// - `AuthError::SignatureMismatch` if the signature does not verify
/// - a configuration error if derivation ran but produced no signing key
pub fn verify_reply(
    session: &Session,
    channel: Option<&Channel>,
    chain: &MessageBuffer,
    offset: usize,
) -> TransformResult<usize> {
    let len = reply_length_at(chain, offset)?;
    let fields = SignedFields::read(chain, offset)?;

    if fields.is_exempt() {
        trace!(message_id = fields.message_id, command = fields.command, "exempt reply");
        return Ok(len);
    }
    let Some(key) = signing_key(session, channel)? else {
        trace!(message_id = fields.message_id, "signature check skipped");
        return Ok(len);
    };
    if !fields.is_signed() {
        return Err(AuthError::NotSigned.into());
    }

    let claimed = claimed_signature(chain, offset)?;
    check_signature(session, key, chain, offset, len, &fields, &claimed)?;
    Ok(len)
}

/// Verify every reply of a received compound chain.
pub fn verify_chain(
    session: &Session,
    channel: Option<&Channel>,
    chain: &MessageBuffer,
) -> TransformResult<()> {
    let mut offset = 0;
    while offset < chain.len() {
        offset += verify_reply(session, channel, chain, offset)?;
    }
    Ok(())
}

/// Verify the final signed SESSION_SETUP reply.
///
/// With a channel whose signing key has been derived, the reply is checked
/// with the channel key and a success makes that key authoritative for the
/// channel. Otherwise the session signing key is used.
///
/// # Errors
/// Returns a configuration error if the selected key is missing.
pub fn verify_session_setup_reply(
    session: &Session,
    channel: Option<&mut Channel>,
    reply: &MessageBuffer,
) -> TransformResult<()> {
    let len = reply_length_at(reply, 0)?;
    let fields = SignedFields::read(reply, 0)?;
    if fields.command != SMB2_SESSION_SETUP {
        return Err(FrameError::InvalidField {
            field: "Command",
            value: u64::from(fields.command),
        }
        .into());
    }
    if !fields.is_signed() {
        return Err(AuthError::NotSigned.into());
    }
    let claimed = claimed_signature(reply, 0)?;

    match channel {
        Some(channel) if !channel.signing_key().is_empty() => {
            check_signature(session, channel.signing_key(), reply, 0, len, &fields, &claimed)?;
            channel.mark_bound();
            debug!(session_id = session.session_id(), "channel binding verified");
            Ok(())
        }
        _ => {
            let key = &session.keys().signing;
            if !session.keys_derived() || key.is_empty() {
                return Err(TransformError::config("session signing key not derived"));
            }
            check_signature(session, key, reply, 0, len, &fields, &claimed)
        }
    }
}

/// Key that signs and verifies, or `None` when signing does not apply yet.
fn signing_key<'a>(
    session: &'a Session,
    channel: Option<&'a Channel>,
) -> TransformResult<Option<&'a DerivedKey>> {
    if session.dialect() == Dialect::Legacy {
        return Err(TransformError::config("SMB1 sessions use legacy signing"));
    }
    if session.params().anonymous || !session.keys_derived() {
        return Ok(None);
    }

    let key = match channel {
        Some(channel) if channel.uses_channel_key() => channel.signing_key(),
        _ => &session.keys().signing,
    };
    if key.is_empty() {
        return Err(TransformError::config("signing key derivation failed"));
    }
    Ok(Some(key))
}

fn claimed_signature(buf: &MessageBuffer, offset: usize) -> Result<Signature, FrameError> {
    let mut claimed = ZERO_SIGNATURE;
    buf.read_at(offset + SMB2_SIGNATURE_OFFSET, &mut claimed)?;
    Ok(claimed)
}

fn check_signature(
    session: &Session,
    key: &DerivedKey,
    buf: &MessageBuffer,
    offset: usize,
    len: usize,
    fields: &SignedFields,
    claimed: &Signature,
) -> TransformResult<()> {
    if len < SMB2_HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: SMB2_HEADER_SIZE,
            actual: len,
        }
        .into());
    }

    // Same bytes as the signer saw: signature field zeroed
    let body = offset + SMB2_HEADER_SIZE;
    let mut slices = buf.slices(offset, SMB2_SIGNATURE_OFFSET)?;
    slices.push(&ZERO_SIGNATURE);
    slices.extend(buf.slices(body, offset + len - body)?);

    let algorithm = session.params().effective_signing_algorithm();
    let expected = compute_signature(algorithm, key, fields, &slices)?;
    if bool::from(expected.ct_eq(claimed)) {
        Ok(())
    } else {
        Err(AuthError::SignatureMismatch.into())
    }
}

fn compute_signature(
    algorithm: SigningAlgorithm,
    key: &DerivedKey,
    fields: &SignedFields,
    slices: &[&[u8]],
) -> Result<Signature, CryptoError> {
    let key = key.as_bytes();
    let mut signature = ZERO_SIGNATURE;
    match algorithm {
        SigningAlgorithm::HmacSha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
            for slice in slices {
                mac.update(slice);
            }
            let digest = mac.finalize().into_bytes();
            signature.copy_from_slice(&digest[..SMB2_SIGNATURE_SIZE]);
        }
        SigningAlgorithm::AesCmac => {
            let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
            for slice in slices {
                mac.update(slice);
            }
            signature.copy_from_slice(&mac.finalize().into_bytes());
        }
        SigningAlgorithm::AesGmac => {
            let cipher = Aes128Gcm::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
            let nonce = gmac_nonce(fields);
            let aad = slices.concat();
            let mut empty: [u8; 0] = [];
            let tag = cipher
                .encrypt_in_place_detached(GenericArray::from_slice(&nonce), &aad, &mut empty)
                .map_err(|_| CryptoError::EncryptionFailed)?;
            signature.copy_from_slice(&tag);
        }
    }
    Ok(signature)
}

/// GMAC nonce: MessageId, then a 32-bit word with bit 0 set for responses
/// and bit 1 set for CANCEL.
fn gmac_nonce(fields: &SignedFields) -> [u8; GCM_NONCE_SIZE] {
    let mut role = 0u32;
    if fields.flags & SMB2_FLAGS_SERVER_TO_REDIR != 0 {
        role |= 1;
    }
    if fields.command == SMB2_CANCEL {
        role |= 2;
    }

    let mut nonce = [0u8; GCM_NONCE_SIZE];
    nonce[..8].copy_from_slice(&fields.message_id.to_le_bytes());
    nonce[8..].copy_from_slice(&role.to_le_bytes());
    nonce
}
