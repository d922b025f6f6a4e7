//! SMB1 message signing
//!
//! The MAC is MD5 over the MAC key followed by the whole message, with the
//! 8-byte signature field holding the little-endian sequence number and four
//! zero bytes at hash time. The first 8 digest bytes become the signature.
//!
//! Every non-secondary request reserves two sequence numbers: one signed
//! into the request and one the reply must carry.

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;
use tracing::{debug, trace, warn};

use crate::core::{
    AuthError, FrameError, SMB1_COM_SESSION_SETUP_ANDX, SMB1_FLAGS2_OFFSET,
    SMB1_FLAGS2_SECURITY_SIGNATURE, SMB1_PLACEHOLDER_SIGNATURE, SMB1_RESYNC_WINDOW,
    SMB1_SIGNATURE_OFFSET, SMB1_SIGNATURE_SIZE, TransformError, TransformResult,
};
use crate::transport::{MessageBuffer, Request, SequencePair, Smb1Header};

use super::session::Session;

/// Sign an SMB1 request in place.
///
/// Until the session has a MAC key the signature field gets the placeholder
/// and no sequence numbers are consumed; counting starts with the MAC key.
/// The session setup that runs with the key installed reserves its pair but
/// still carries the placeholder. A secondary transaction part is signed with
/// the sequence pair already stored on it by [`Request::secondary_of`].
///
/// # Errors
/// Returns a framing error for a malformed header and a configuration error
/// for a secondary part with no primary pair.
pub fn sign_legacy(session: &Session, request: &mut Request) -> TransformResult<()> {
    let header = Smb1Header::parse(&request.message)?;

    if !session.has_session_key() {
        request
            .message
            .write_at(SMB1_SIGNATURE_OFFSET, &SMB1_PLACEHOLDER_SIGNATURE)?;
        return Ok(());
    }

    let pair = if request.secondary {
        request.sequence.ok_or_else(|| {
            TransformError::config("secondary transaction part has no primary sequence pair")
        })?
    } else {
        let pair = session.reserve_sequence_pair();
        request.sequence = Some(pair);
        pair
    };

    if header.command == SMB1_COM_SESSION_SETUP_ANDX {
        request
            .message
            .write_at(SMB1_SIGNATURE_OFFSET, &SMB1_PLACEHOLDER_SIGNATURE)?;
        trace!(seq = pair.request, "session setup carries the placeholder");
        return Ok(());
    }

    let flags2 = request.message.u16_at(SMB1_FLAGS2_OFFSET)?;
    request.message.write_at(
        SMB1_FLAGS2_OFFSET,
        &(flags2 | SMB1_FLAGS2_SECURITY_SIGNATURE).to_le_bytes(),
    )?;

    let signature = legacy_mac(session.session_key(), &request.message, pair.request)?;
    request.message.write_at(SMB1_SIGNATURE_OFFSET, &signature)?;

    trace!(seq = pair.request, command = header.command, "signed legacy request");
    Ok(())
}

/// Verify an SMB1 reply against the sequence number its request reserved.
///
/// On a mismatch, nearby sequence numbers are tried purely for the log; the
/// reply is rejected either way.
///
/// SESSION_SETUP_ANDX replies are not checked. The MAC key only exists once
/// the authentication exchange completes, and servers differ on whether the
/// final setup reply is signed with it.
///
/// # Errors
/// Returns `AuthError::SignatureMismatch` if the signature does not verify.
pub fn verify_legacy(
    session: &Session,
    request: &Request,
    reply: &MessageBuffer,
) -> TransformResult<()> {
    if !session.has_session_key() {
        return Ok(());
    }

    let header = Smb1Header::parse(reply)?;
    if header.command == SMB1_COM_SESSION_SETUP_ANDX {
        return Ok(());
    }

    let pair: SequencePair = request
        .sequence
        .ok_or_else(|| TransformError::config("request was never signed"))?;

    let key = session.session_key();
    let expected = legacy_mac(key, reply, pair.reply)?;
    if bool::from(expected.ct_eq(&header.signature)) {
        return Ok(());
    }

    match resync_scan(key, reply, pair.reply, &header.signature)? {
        Some(seq) => warn!(
            expected = pair.reply,
            matched = seq,
            "legacy reply signed with an unexpected sequence number"
        ),
        None => debug!(
            expected = pair.reply,
            "legacy reply signature matches no nearby sequence number"
        ),
    }
    Err(AuthError::SignatureMismatch.into())
}

fn resync_scan(
    key: &[u8],
    reply: &MessageBuffer,
    expected: u32,
    claimed: &[u8; SMB1_SIGNATURE_SIZE],
) -> Result<Option<u32>, FrameError> {
    for delta in -SMB1_RESYNC_WINDOW..=SMB1_RESYNC_WINDOW {
        if delta == 0 {
            continue;
        }
        let seq = (expected as i64 + delta) as u32;
        if bool::from(legacy_mac(key, reply, seq)?.ct_eq(claimed)) {
            return Ok(Some(seq));
        }
    }
    Ok(None)
}

/// Signature of `message` with `seq` in the signature field.
fn legacy_mac(
    key: &[u8],
    message: &MessageBuffer,
    seq: u32,
) -> Result<[u8; SMB1_SIGNATURE_SIZE], FrameError> {
    let tail_offset = SMB1_SIGNATURE_OFFSET + SMB1_SIGNATURE_SIZE;
    let tail_len = message.len().checked_sub(tail_offset).ok_or(FrameError::Truncated {
        expected: tail_offset,
        actual: message.len(),
    })?;

    let mut field = [0u8; SMB1_SIGNATURE_SIZE];
    field[..4].copy_from_slice(&seq.to_le_bytes());

    let mut hasher = Md5::new();
    hasher.update(key);
    for slice in message.slices(0, SMB1_SIGNATURE_OFFSET)? {
        hasher.update(slice);
    }
    hasher.update(field);
    for slice in message.slices(tail_offset, tail_len)? {
        hasher.update(slice);
    }

    let digest = hasher.finalize();
    let mut signature = [0u8; SMB1_SIGNATURE_SIZE];
    signature.copy_from_slice(&digest[..SMB1_SIGNATURE_SIZE]);
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Dialect, NegotiatedParams};

    const KEY: [u8; 16] = [0x42; 16];

    fn session(key: Option<&[u8]>) -> Session {
        let mut session = Session::new(1, NegotiatedParams::for_dialect(Dialect::Legacy));
        if let Some(key) = key {
            session.set_session_key(key, None);
        }
        session
    }

    fn message(command: u8, mid: u16) -> MessageBuffer {
        let mut bytes = Smb1Header::new(command, mid).to_bytes().to_vec();
        bytes.extend_from_slice(b"\x00\x05\x00hello");
        // Split across segments so the MAC sees more than one slice
        let tail = bytes.split_off(20);
        MessageBuffer::from_segments([bytes, tail])
    }

    fn signed_with(mut buf: MessageBuffer, seq: u32) -> MessageBuffer {
        let signature = legacy_mac(&KEY, &buf, seq).unwrap();
        buf.write_at(SMB1_SIGNATURE_OFFSET, &signature).unwrap();
        buf
    }

    #[test]
    fn test_placeholder_before_authentication() {
        let session = session(None);
        let mut request = Request::new(message(0x2F, 1));
        sign_legacy(&session, &mut request).unwrap();

        let header = Smb1Header::parse(&request.message).unwrap();
        assert_eq!(header.signature, SMB1_PLACEHOLDER_SIGNATURE);
        assert!(request.sequence.is_none());
    }

    #[test]
    fn test_placeholder_for_session_setup() {
        let session = session(Some(&KEY));
        let mut request = Request::new(message(SMB1_COM_SESSION_SETUP_ANDX, 1));
        sign_legacy(&session, &mut request).unwrap();

        assert_eq!(
            Smb1Header::parse(&request.message).unwrap().signature,
            SMB1_PLACEHOLDER_SIGNATURE
        );
        assert_eq!(request.sequence, Some(SequencePair { request: 0, reply: 1 }));

        let mut next = Request::new(message(0x2E, 2));
        sign_legacy(&session, &mut next).unwrap();
        assert_eq!(next.sequence, Some(SequencePair { request: 2, reply: 3 }));
    }

    #[test]
    fn test_signature_layout() {
        let session = session(Some(&KEY));
        let mut request = Request::new(message(0x2F, 1));
        sign_legacy(&session, &mut request).unwrap();
        assert_eq!(request.sequence, Some(SequencePair { request: 0, reply: 1 }));

        let wire = request.message.to_vec();
        let mut hashed = wire.clone();
        hashed[14..22].copy_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        let mut hasher = Md5::new();
        hasher.update(KEY);
        hasher.update(&hashed);
        let digest = hasher.finalize();

        assert_eq!(&wire[14..22], &digest[..8]);
        let flags2 = u16::from_le_bytes([wire[10], wire[11]]);
        assert_ne!(flags2 & SMB1_FLAGS2_SECURITY_SIGNATURE, 0);
    }

    #[test]
    fn test_sequence_pairs_advance_and_secondary_reuses() {
        let session = session(Some(&KEY));
        let mut first = Request::new(message(0x25, 1));
        let mut second = Request::new(message(0x25, 2));
        sign_legacy(&session, &mut first).unwrap();
        sign_legacy(&session, &mut second).unwrap();

        let primary = first.sequence.unwrap();
        assert_eq!(second.sequence, Some(SequencePair { request: 2, reply: 3 }));

        let mut part = Request::new(message(0x26, 1)).secondary_of(primary);
        sign_legacy(&session, &mut part).unwrap();
        assert_eq!(part.sequence, Some(primary));
        assert_eq!(
            Smb1Header::parse(&part.message).unwrap().signature,
            legacy_mac(&KEY, &part.message, primary.request).unwrap()
        );

        let mut third = Request::new(message(0x25, 3));
        sign_legacy(&session, &mut third).unwrap();
        assert_eq!(third.sequence, Some(SequencePair { request: 4, reply: 5 }));
    }

    #[test]
    fn test_secondary_without_primary_is_config_error() {
        let session = session(Some(&KEY));
        let mut part = Request::new(message(0x26, 1));
        part.secondary = true;
        assert!(matches!(
            sign_legacy(&session, &mut part),
            Err(TransformError::Config(_))
        ));
    }

    #[test]
    fn test_verify_reply() {
        let session = session(Some(&KEY));
        let mut request = Request::new(message(0x2E, 7));
        sign_legacy(&session, &mut request).unwrap();

        let reply = signed_with(message(0x2E, 7), 1);
        verify_legacy(&session, &request, &reply).unwrap();

        let mut tampered = reply.clone();
        tampered.write_at(30, &[0xFF]).unwrap();
        assert!(matches!(
            verify_legacy(&session, &request, &tampered),
            Err(TransformError::Auth(AuthError::SignatureMismatch))
        ));
    }

    #[test]
    fn test_resync_scan_never_accepts() {
        let session = session(Some(&KEY));
        let mut request = Request::new(message(0x2E, 7));
        sign_legacy(&session, &mut request).unwrap();

        // Signed with the request's own number instead of the reply's
        let reply = signed_with(message(0x2E, 7), 0);
        assert!(verify_legacy(&session, &request, &reply).is_err());

        let claimed = Smb1Header::parse(&reply).unwrap().signature;
        assert_eq!(resync_scan(&KEY, &reply, 1, &claimed).unwrap(), Some(0));
        assert_eq!(resync_scan(&KEY, &reply, 100, &claimed).unwrap(), None);
    }

    #[test]
    fn test_verify_skipped_in_placeholder_mode() {
        let session = session(None);
        let request = Request::new(message(0x2E, 7));
        let reply = message(0x2E, 7);
        verify_legacy(&session, &request, &reply).unwrap();
    }
}
