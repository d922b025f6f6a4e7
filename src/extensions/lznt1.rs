//! LZNT1 codec
//!
//! Input is split into 4096-byte chunks, each compressed independently
//! behind a 2-byte header:
//!
//! ```text
//! bits 0-11   chunk size including the header, minus 3
//! bits 12-14  signature 0b011
//! bit  15     1 if the chunk is compressed
//! ```
//!
//! A compressed chunk is a series of groups: one flag byte (LSB first, 1 for
//! a back-reference) followed by up to eight literals or 16-bit tokens. How
//! a token splits into offset and length depends on how far into the chunk
//! it appears.

use crate::core::{Codec, CodecError, CompressionAlgorithm};

use super::lz77::HashChain;

const CHUNK_SIZE: usize = 4096;

const CHUNK_SIGNATURE: u16 = 0x3000;

const CHUNK_COMPRESSED: u16 = 0x8000;

const MIN_MATCH: usize = 3;

/// Number of length bits in a token at `pos` bytes into the chunk.
fn length_bits(pos: usize) -> u32 {
    let mut bits = 12;
    let mut i = pos - 1;
    while i >= 0x10 {
        bits -= 1;
        i >>= 1;
    }
    bits
}

fn compress_chunk(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 8 + 1);
    let mut chain = HashChain::new(chunk.len());
    let mut pos = 0;

    while pos < chunk.len() {
        let flag_at = out.len();
        out.push(0);
        for bit in 0..8 {
            if pos >= chunk.len() {
                break;
            }
            let found = if pos == 0 {
                None
            } else {
                let bits = length_bits(pos);
                let max_offset = 1usize << (16 - bits);
                let max_len = (1usize << bits) - 1 + MIN_MATCH;
                chain.find(chunk, pos, max_offset, max_len)
            };

            match found {
                Some((offset, len)) => {
                    let bits = length_bits(pos);
                    let token = ((offset - 1) << bits) | (len - MIN_MATCH);
                    out.extend_from_slice(&(token as u16).to_le_bytes());
                    out[flag_at] |= 1 << bit;
                    for at in pos..pos + len {
                        chain.insert(chunk, at);
                    }
                    pos += len;
                }
                None => {
                    out.push(chunk[pos]);
                    chain.insert(chunk, pos);
                    pos += 1;
                }
            }
        }
    }
    out
}

/// Compress `input`. Chunks that do not shrink are stored uncompressed.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 2);
    for chunk in input.chunks(CHUNK_SIZE) {
        let packed = compress_chunk(chunk);
        let (flag, body) = if packed.len() < chunk.len() {
            (CHUNK_COMPRESSED, packed.as_slice())
        } else {
            (0, chunk)
        };
        let header = CHUNK_SIGNATURE | flag | (body.len() + 2 - 3) as u16;
        out.extend_from_slice(&header.to_le_bytes());
        out.extend_from_slice(body);
    }
    out
}

fn decompress_chunk(data: &[u8], out: &mut Vec<u8>, limit: usize) -> Result<(), CodecError> {
    let chunk_start = out.len();
    let mut i = 0;

    while i < data.len() {
        let flags = data[i];
        i += 1;
        for bit in 0..8 {
            if i >= data.len() {
                break;
            }
            if flags & (1 << bit) == 0 {
                if out.len() == limit {
                    return Err(CodecError::OutputOverflow { limit });
                }
                out.push(data[i]);
                i += 1;
                continue;
            }

            let raw = data
                .get(i..i + 2)
                .ok_or(CodecError::Corrupt("truncated LZNT1 token"))?;
            let token = usize::from(u16::from_le_bytes([raw[0], raw[1]]));
            i += 2;

            let pos = out.len() - chunk_start;
            if pos == 0 {
                return Err(CodecError::Corrupt("LZNT1 token at chunk start"));
            }
            let bits = length_bits(pos);
            let offset = (token >> bits) + 1;
            let len = (token & ((1 << bits) - 1)) + MIN_MATCH;
            if offset > pos {
                return Err(CodecError::Corrupt("LZNT1 offset before chunk start"));
            }
            if pos + len > CHUNK_SIZE {
                return Err(CodecError::Corrupt("LZNT1 chunk overflows 4096 bytes"));
            }
            if len > limit - out.len() {
                return Err(CodecError::OutputOverflow { limit });
            }
            let start = out.len() - offset;
            for k in 0..len {
                let byte = out[start + k];
                out.push(byte);
            }
        }
    }
    Ok(())
}

/// Decompress `input`, failing if more than `limit` bytes would be produced.
pub fn decompress(input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(limit);
    let mut pos = 0;

    while pos + 2 <= input.len() {
        let header = u16::from_le_bytes([input[pos], input[pos + 1]]);
        if header == 0 {
            break;
        }
        if header & 0x7000 != CHUNK_SIGNATURE {
            return Err(CodecError::Corrupt("bad LZNT1 chunk signature"));
        }
        let body_len = usize::from(header & 0x0FFF) + 3 - 2;
        let body = input
            .get(pos + 2..pos + 2 + body_len)
            .ok_or(CodecError::Corrupt("truncated LZNT1 chunk"))?;
        pos += 2 + body_len;

        if header & CHUNK_COMPRESSED != 0 {
            decompress_chunk(body, &mut out, limit)?;
        } else {
            if body.len() > limit - out.len() {
                return Err(CodecError::OutputOverflow { limit });
            }
            out.extend_from_slice(body);
        }
    }
    Ok(out)
}

/// LZNT1 as a [`Codec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Lznt1;

impl Codec for Lznt1 {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lznt1
    }

    fn compress(&self, input: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        let out = compress(input);
        Ok((out.len() < input.len()).then_some(out))
    }

    fn decompress(&self, input: &[u8], original_size: usize) -> Result<Vec<u8>, CodecError> {
        let out = decompress(input, original_size)?;
        if out.len() != original_size {
            return Err(CodecError::SizeMismatch {
                expected: original_size,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let compressed = compress(data);
        assert_eq!(decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_length_bits_split() {
        assert_eq!(length_bits(1), 12);
        assert_eq!(length_bits(16), 12);
        assert_eq!(length_bits(17), 11);
        assert_eq!(length_bits(32), 11);
        assert_eq!(length_bits(33), 10);
        assert_eq!(length_bits(2048), 5);
        assert_eq!(length_bits(4096), 4);
    }

    #[test]
    fn test_chunk_header() {
        let compressed = compress(&[b'a'; 100]);
        let header = u16::from_le_bytes([compressed[0], compressed[1]]);
        assert_eq!(header & 0x7000, CHUNK_SIGNATURE);
        assert_ne!(header & CHUNK_COMPRESSED, 0);
        assert_eq!(usize::from(header & 0x0FFF) + 3, compressed.len());

        // Flag byte, literal 'a', then one back-reference for the other 99
        assert_eq!(compressed[2], 0b10);
        assert_eq!(compressed[3], b'a');
        let token = u16::from_le_bytes([compressed[4], compressed[5]]);
        assert_eq!(token, 99 - 3);
    }

    #[test]
    fn test_incompressible_chunk_stored_raw() {
        let data: Vec<u8> = (0..=255u8).collect();
        let compressed = compress(&data);
        let header = u16::from_le_bytes([compressed[0], compressed[1]]);
        assert_eq!(header & CHUNK_COMPRESSED, 0);
        assert_eq!(&compressed[2..], &data[..]);
        assert!(Lznt1.compress(&data).unwrap().is_none());
        roundtrip(&data);
    }

    #[test]
    fn test_roundtrip_shapes() {
        roundtrip(b"");
        roundtrip(b"x");
        roundtrip(b"abcabcabcabcabcabc");
        roundtrip(&[0u8; CHUNK_SIZE]);
        roundtrip(&[0u8; CHUNK_SIZE + 1]);
        roundtrip(&(0..20_000u32).map(|i| (i % 97) as u8).collect::<Vec<_>>());
        roundtrip(&(0..9000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 11) as u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_matches_never_cross_chunks() {
        let mut data = vec![0u8; CHUNK_SIZE];
        data.extend(vec![0u8; 100]);
        let compressed = compress(&data);
        roundtrip(&data);

        // The second chunk starts with a literal
        let first_len = usize::from(u16::from_le_bytes([compressed[0], compressed[1]]) & 0x0FFF) + 3;
        assert_eq!(compressed[first_len + 2] & 1, 0);
    }

    #[test]
    fn test_terminator_stops_decoding() {
        let mut compressed = compress(b"hello hello hello");
        compressed.extend_from_slice(&[0, 0, 0xFF, 0xFF]);
        assert_eq!(decompress(&compressed, 100).unwrap(), b"hello hello hello");
    }

    #[test]
    fn test_decompress_rejects_bad_input() {
        let compressed = compress(&[9u8; 500]);
        assert!(matches!(
            decompress(&compressed, 499),
            Err(CodecError::OutputOverflow { limit: 499 })
        ));
        assert!(matches!(
            Lznt1.decompress(&compressed, 600),
            Err(CodecError::SizeMismatch { expected: 600, actual: 500 })
        ));

        assert!(matches!(
            decompress(&[0x05, 0x40, 1, 2, 3, 4], 10),
            Err(CodecError::Corrupt("bad LZNT1 chunk signature"))
        ));
        assert!(matches!(
            decompress(&[0x0A, 0xB0, 0x00, b'a'], 10),
            Err(CodecError::Corrupt("truncated LZNT1 chunk"))
        ));
        // Back-reference as the first item of a chunk
        assert!(matches!(
            decompress(&[0x02, 0xB0, 0x01, 0x00, 0x00], 10),
            Err(CodecError::Corrupt(_))
        ));
    }
}
