//! SP800-108 counter-mode KDF with HMAC-SHA-256 as the PRF.
//!
//! ```text
//! K(i) = HMAC-SHA-256(Ki, [i]be32 || Label || 0x00 || Context || [L]be32)
//! ```
//!
//! `L` is the output length in bits. Output longer than one PRF block
//! concatenates `K(1) || K(2) || ...` and truncates.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// PRF output size.
const PRF_OUTPUT_SIZE: usize = 32;

/// Derive `out.len()` bytes from `key` under `label` and `context`.
///
/// # Errors
/// Returns `InvalidKeyLength` for an empty key and `KeyDerivationFailed` for
/// an empty or oversized output request.
pub fn derive(key: &[u8], label: &[u8], context: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::InvalidKeyLength(0));
    }
    if out.is_empty() {
        return Err(CryptoError::KeyDerivationFailed);
    }
    let bits = u32::try_from(out.len())
        .ok()
        .and_then(|n| n.checked_mul(8))
        .ok_or(CryptoError::KeyDerivationFailed)?;

    for (index, block) in out.chunks_mut(PRF_OUTPUT_SIZE).enumerate() {
        let counter = u32::try_from(index + 1).map_err(|_| CryptoError::KeyDerivationFailed)?;

        let mut prf = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        prf.update(&counter.to_be_bytes());
        prf.update(label);
        prf.update(&[0u8]);
        prf.update(context);
        prf.update(&bits.to_be_bytes());

        let digest = prf.finalize().into_bytes();
        block.copy_from_slice(&digest[..block.len()]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_layout() {
        let key = [0x11u8; 16];
        let mut out = [0u8; 16];
        derive(&key, b"SMB2AESCMAC\0", b"SmbSign\0", &mut out).unwrap();

        let mut prf = <HmacSha256 as Mac>::new_from_slice(&key).unwrap();
        prf.update(&hex::decode("00000001").unwrap());
        prf.update(b"SMB2AESCMAC\0");
        prf.update(&[0x00]);
        prf.update(b"SmbSign\0");
        prf.update(&hex::decode("00000080").unwrap());
        let expected = prf.finalize().into_bytes();

        assert_eq!(&out[..], &expected[..16]);
    }

    #[test]
    fn test_length_is_bound_into_output() {
        let key = [0x22u8; 32];
        let mut short = [0u8; 16];
        let mut long = [0u8; 32];
        derive(&key, b"label\0", b"context", &mut short).unwrap();
        derive(&key, b"label\0", b"context", &mut long).unwrap();

        // L differs, so the 128-bit key is not a prefix of the 256-bit key
        assert_ne!(&long[..16], &short[..]);
    }

    #[test]
    fn test_multi_block_output() {
        let key = [0x33u8; 16];
        let mut out = [0u8; 48];
        derive(&key, b"x\0", b"y", &mut out).unwrap();
        assert_ne!(&out[..32], &[0u8; 32]);
        assert_ne!(&out[32..], &[0u8; 16]);
        assert_ne!(&out[..16], &out[32..]);
    }

    #[test]
    fn test_deterministic() {
        let key = [0x44u8; 16];
        let context = [0xA5u8; 64];
        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        derive(&key, b"SMBSigningKey\0", &context, &mut first).unwrap();
        derive(&key, b"SMBSigningKey\0", &context, &mut second).unwrap();
        assert_eq!(first, second);

        let mut other = [0u8; 16];
        derive(&key, b"SMBC2SCipherKey\0", &context, &mut other).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_rejects_empty_key_and_output() {
        let mut out = [0u8; 16];
        assert_eq!(
            derive(&[], b"l", b"c", &mut out),
            Err(CryptoError::InvalidKeyLength(0))
        );
        assert_eq!(
            derive(&[1], b"l", b"c", &mut []),
            Err(CryptoError::KeyDerivationFailed)
        );
    }
}
