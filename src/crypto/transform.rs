//! SMB3 encryption transform
//!
//! Wire format (52-byte header, then ciphertext):
//! ```text
//! +0   ProtocolId         (4)   0xFD 'S' 'M' 'B'
//! +4   Signature          (16)  AEAD tag
//! +20  Nonce              (16)  11 (CCM) or 12 (GCM) bytes, zero padded
//! +36  OriginalMessageSize(4)
//! +40  Reserved           (2)
//! +42  Flags / Cipher     (2)   0x0001 (3.1.1) or cipher id (3.0.x)
//! +44  SessionId          (8)
//! ```
//!
//! Bytes 20..52 are the additional authenticated data. A compound chain is
//! concatenated and sealed as one frame.

use aes::{Aes128, Aes256};
use aes_gcm::{
    Aes128Gcm, Aes256Gcm,
    aead::{
        AeadCore, AeadInPlace, KeyInit,
        generic_array::{GenericArray, typenum::Unsigned},
    },
};
use ccm::{
    Ccm,
    consts::{U11, U16},
};
use tracing::trace;
use zeroize::Zeroizing;

use crate::core::{
    AEAD_TAG_SIZE, AuthError, Cipher, CryptoError, Dialect, FrameError, TRANSFORM_AAD_OFFSET,
    TRANSFORM_AAD_SIZE, TRANSFORM_FLAG_ENCRYPTED, TRANSFORM_HEADER_SIZE, TRANSFORM_NONCE_SIZE,
    TRANSFORM_PROTOCOL_ID, TransformError, TransformResult,
};
use crate::transport::{MessageBuffer, TransformFrame};

use super::keys::DerivedKey;
use super::session::{Session, nonce_field};

type Aes128Ccm = Ccm<Aes128, U16, U11>;
type Aes256Ccm = Ccm<Aes256, U16, U11>;

/// Parsed transform header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformHeader {
    /// AEAD tag.
    pub signature: [u8; AEAD_TAG_SIZE],
    /// Nonce field, zero padded past the cipher's nonce length.
    pub nonce: [u8; TRANSFORM_NONCE_SIZE],
    /// Plaintext length.
    pub original_size: u32,
    /// `ENCRYPTED` flag (3.1.1) or cipher id (3.0.x).
    pub flags: u16,
    /// Session the frame belongs to.
    pub session_id: u64,
}

impl TransformHeader {
    /// Serialize to 52 bytes.
    pub fn to_bytes(&self) -> [u8; TRANSFORM_HEADER_SIZE] {
        let mut buf = [0u8; TRANSFORM_HEADER_SIZE];
        buf[0..4].copy_from_slice(&TRANSFORM_PROTOCOL_ID);
        buf[4..20].copy_from_slice(&self.signature);
        buf[20..36].copy_from_slice(&self.nonce);
        buf[36..40].copy_from_slice(&self.original_size.to_le_bytes());
        buf[42..44].copy_from_slice(&self.flags.to_le_bytes());
        buf[44..52].copy_from_slice(&self.session_id.to_le_bytes());
        buf
    }

    /// Parse the header at the start of a frame.
    pub fn parse(buf: &MessageBuffer) -> Result<Self, FrameError> {
        let mut raw = [0u8; TRANSFORM_HEADER_SIZE];
        buf.read_at(0, &mut raw)?;

        let protocol_id = [raw[0], raw[1], raw[2], raw[3]];
        if protocol_id != TRANSFORM_PROTOCOL_ID {
            return Err(FrameError::InvalidProtocolId(protocol_id));
        }

        let mut signature = [0u8; AEAD_TAG_SIZE];
        signature.copy_from_slice(&raw[4..20]);
        let mut nonce = [0u8; TRANSFORM_NONCE_SIZE];
        nonce.copy_from_slice(&raw[20..36]);
        let mut session_id = [0u8; 8];
        session_id.copy_from_slice(&raw[44..52]);

        Ok(Self {
            signature,
            nonce,
            original_size: u32::from_le_bytes([raw[36], raw[37], raw[38], raw[39]]),
            flags: u16::from_le_bytes([raw[42], raw[43]]),
            session_id: u64::from_le_bytes(session_id),
        })
    }
}

/// Encrypt one message, or a compound chain in order, into a transform frame.
///
/// # Errors
/// Returns a configuration error if the dialect has no encryption, the
/// cipher was not negotiated, or the encryption key is missing.
pub fn encrypt(session: &Session, chain: &[MessageBuffer]) -> TransformResult<TransformFrame> {
    let cipher = session_cipher(session)?;
    let key = cipher_key(session, &session.keys().encryption, cipher, "encryption")?;

    let total: usize = chain.iter().map(MessageBuffer::len).sum();
    let original_size = u32::try_from(total).map_err(|_| FrameError::SizeExceeded {
        size: total,
        limit: u32::MAX as usize,
    })?;

    let mut payload = Vec::with_capacity(total);
    for message in chain {
        for segment in message.segments() {
            payload.extend_from_slice(segment);
        }
    }

    let (high, low) = session.next_nonce();
    let mut header = TransformHeader {
        signature: [0u8; AEAD_TAG_SIZE],
        nonce: nonce_field(cipher, high, low),
        original_size,
        flags: header_flags(session.dialect(), cipher),
        session_id: session.session_id(),
    };

    let aad = header.to_bytes();
    header.signature = seal(
        cipher,
        key.as_bytes(),
        &header.nonce[..cipher.nonce_size()],
        &aad[TRANSFORM_AAD_OFFSET..],
        &mut payload,
    )?;

    trace!(
        session_id = header.session_id,
        ?cipher,
        size = original_size,
        "encrypted frame"
    );
    Ok(TransformFrame::new(MessageBuffer::from_segments([
        header.to_bytes().to_vec(),
        payload,
    ])))
}

/// Authenticate and decrypt a transform frame.
///
/// The header is validated before any key is touched, and plaintext is
/// only returned once the tag has verified.
///
/// # Errors
/// - framing errors for a bad protocol id, flags field, session id or size
/// - `AuthError::TagMismatch` if authentication fails
/// - a configuration error if the decryption key is missing
pub fn decrypt(session: &Session, frame: TransformFrame) -> TransformResult<MessageBuffer> {
    let buf = frame.into_buffer();
    let header = TransformHeader::parse(&buf)?;

    let cipher = session_cipher(session)?;
    let expected_flags = header_flags(session.dialect(), cipher);
    if header.flags != expected_flags {
        return Err(FrameError::InvalidField {
            field: "Flags",
            value: u64::from(header.flags),
        }
        .into());
    }
    if header.session_id != session.session_id() {
        return Err(FrameError::SessionMismatch {
            expected: session.session_id(),
            actual: header.session_id,
        }
        .into());
    }
    let payload_len = buf.len() - TRANSFORM_HEADER_SIZE;
    if header.original_size as usize != payload_len {
        return Err(FrameError::LengthMismatch {
            declared: header.original_size as usize,
            actual: payload_len,
        }
        .into());
    }

    let key = cipher_key(session, &session.keys().decryption, cipher, "decryption")?;

    let mut scratch = Zeroizing::new(Vec::with_capacity(payload_len));
    for slice in buf.slices(TRANSFORM_HEADER_SIZE, payload_len)? {
        scratch.extend_from_slice(slice);
    }

    let mut aad = [0u8; TRANSFORM_AAD_SIZE];
    buf.read_at(TRANSFORM_AAD_OFFSET, &mut aad)?;
    open(
        cipher,
        key.as_bytes(),
        &header.nonce[..cipher.nonce_size()],
        &aad,
        &mut scratch,
        &header.signature,
    )?;

    trace!(session_id = header.session_id, size = payload_len, "decrypted frame");
    Ok(MessageBuffer::from(std::mem::take(&mut *scratch)))
}

fn session_cipher(session: &Session) -> TransformResult<Cipher> {
    match (session.dialect(), session.params().cipher) {
        (Dialect::Smb300 | Dialect::Smb302, None | Some(Cipher::Aes128Ccm)) => Ok(Cipher::Aes128Ccm),
        (dialect @ (Dialect::Smb300 | Dialect::Smb302), Some(cipher)) => Err(TransformError::config(
            format!("{cipher:?} is not defined for {dialect:?}"),
        )),
        (Dialect::Smb311, Some(cipher)) => Ok(cipher),
        (Dialect::Smb311, None) => Err(TransformError::config("no cipher negotiated")),
        (dialect, _) => Err(TransformError::config(format!(
            "encryption requires SMB 3.x, negotiated {dialect:?}"
        ))),
    }
}

fn header_flags(dialect: Dialect, cipher: Cipher) -> u16 {
    if dialect.uses_preauth_integrity() {
        TRANSFORM_FLAG_ENCRYPTED
    } else {
        cipher.id()
    }
}

fn cipher_key<'a>(
    session: &Session,
    key: &'a DerivedKey,
    cipher: Cipher,
    name: &str,
) -> TransformResult<&'a DerivedKey> {
    if !session.keys_derived() || key.is_empty() {
        return Err(TransformError::config(format!("{name} key not derived")));
    }
    if key.len() != cipher.key_size() {
        return Err(CryptoError::InvalidKeyLength(key.len()).into());
    }
    Ok(key)
}

fn seal(
    cipher: Cipher,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; AEAD_TAG_SIZE], CryptoError> {
    match cipher {
        Cipher::Aes128Ccm => seal_with::<Aes128Ccm>(key, nonce, aad, buf),
        Cipher::Aes128Gcm => seal_with::<Aes128Gcm>(key, nonce, aad, buf),
        Cipher::Aes256Ccm => seal_with::<Aes256Ccm>(key, nonce, aad, buf),
        Cipher::Aes256Gcm => seal_with::<Aes256Gcm>(key, nonce, aad, buf),
    }
}

fn open(
    cipher: Cipher,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8; AEAD_TAG_SIZE],
) -> TransformResult<()> {
    match cipher {
        Cipher::Aes128Ccm => open_with::<Aes128Ccm>(key, nonce, aad, buf, tag),
        Cipher::Aes128Gcm => open_with::<Aes128Gcm>(key, nonce, aad, buf, tag),
        Cipher::Aes256Ccm => open_with::<Aes256Ccm>(key, nonce, aad, buf, tag),
        Cipher::Aes256Gcm => open_with::<Aes256Gcm>(key, nonce, aad, buf, tag),
    }
}

fn init<C: KeyInit + AeadCore>(key: &[u8], nonce: &[u8]) -> Result<C, CryptoError> {
    if nonce.len() != C::NonceSize::USIZE || C::TagSize::USIZE != AEAD_TAG_SIZE {
        return Err(CryptoError::EncryptionFailed);
    }
    C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
}

fn seal_with<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; AEAD_TAG_SIZE], CryptoError> {
    let cipher = init::<C>(key, nonce)?;
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buf)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let mut out = [0u8; AEAD_TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn open_with<C: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8; AEAD_TAG_SIZE],
) -> TransformResult<()> {
    let cipher = init::<C>(key, nonce)?;
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            buf,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| AuthError::TagMismatch.into())
}
