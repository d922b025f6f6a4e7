//! Plain LZ77 codec (MS-XCA)
//!
//! The stream interleaves 32-bit flag words with items. Flags are consumed
//! most significant bit first: 0 is a literal byte, 1 is a match.
//!
//! ```text
//! match token (u16) = (offset - 1) << 3 | min(length - 3, 7)
//! length - 3 >= 7   -> shared nibble (two matches per byte)
//! nibble == 15      -> extra byte
//! byte == 255       -> u16 holding length - 3; 0 means a u32 follows
//! ```
//!
//! Unused bits of the final flag word are set, so the decoder stops when it
//! reads a match bit with no input left.

use crate::core::{Codec, CodecError, CompressionAlgorithm};

/// Farthest match the token can address.
const MAX_OFFSET: usize = 8192;

const MIN_MATCH: usize = 3;

/// Candidate positions [`HashChain`] visits per lookup.
const MAX_CHAIN: usize = 48;

const HASH_BITS: u32 = 14;

/// Hash chain over 3-byte prefixes, shared by the LZ-style encoders.
pub(crate) struct HashChain {
    head: Vec<usize>,
    prev: Vec<usize>,
}

impl HashChain {
    const EMPTY: usize = usize::MAX;

    pub(crate) fn new(len: usize) -> Self {
        Self {
            head: vec![Self::EMPTY; 1 << HASH_BITS],
            prev: vec![Self::EMPTY; len],
        }
    }

    fn hash(data: &[u8], pos: usize) -> usize {
        let key = u32::from(data[pos]) << 16 | u32::from(data[pos + 1]) << 8 | u32::from(data[pos + 2]);
        (key.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS)) as usize
    }

    /// Record `pos` as a match candidate.
    pub(crate) fn insert(&mut self, data: &[u8], pos: usize) {
        if pos + MIN_MATCH > data.len() {
            return;
        }
        let h = Self::hash(data, pos);
        self.prev[pos] = self.head[h];
        self.head[h] = pos;
    }

    /// Longest earlier match for `pos` as `(offset, length)`.
    ///
    /// Candidates lie within `max_offset` and the length is capped at
    /// `max_len`.
    pub(crate) fn find(
        &self,
        data: &[u8],
        pos: usize,
        max_offset: usize,
        max_len: usize,
    ) -> Option<(usize, usize)> {
        if pos + MIN_MATCH > data.len() {
            return None;
        }
        let limit = max_len.min(data.len() - pos);
        let mut best: Option<(usize, usize)> = None;
        let mut candidate = self.head[Self::hash(data, pos)];
        let mut visited = 0;

        while candidate != Self::EMPTY && candidate < pos && visited < MAX_CHAIN {
            let offset = pos - candidate;
            if offset > max_offset {
                break;
            }
            let len = data[candidate..]
                .iter()
                .zip(&data[pos..pos + limit])
                .take_while(|(a, b)| a == b)
                .count();
            if len >= MIN_MATCH && best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((offset, len));
                if len == limit {
                    break;
                }
            }
            candidate = self.prev[candidate];
            visited += 1;
        }
        best
    }
}

struct Encoder {
    out: Vec<u8>,
    flags: u32,
    flag_count: u32,
    flag_pos: usize,
    nibble_pos: Option<usize>,
}

impl Encoder {
    fn new(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            flags: 0,
            flag_count: 0,
            flag_pos: 0,
            nibble_pos: None,
        }
        .with_flag_word()
    }

    fn with_flag_word(mut self) -> Self {
        self.flag_pos = self.out.len();
        self.out.extend_from_slice(&[0u8; 4]);
        self
    }

    fn push_flag(&mut self, bit: bool) {
        self.flags = self.flags << 1 | u32::from(bit);
        self.flag_count += 1;
        if self.flag_count == 32 {
            self.out[self.flag_pos..self.flag_pos + 4].copy_from_slice(&self.flags.to_le_bytes());
            self.flags = 0;
            self.flag_count = 0;
            self.flag_pos = self.out.len();
            self.out.extend_from_slice(&[0u8; 4]);
        }
    }

    fn literal(&mut self, byte: u8) {
        self.out.push(byte);
        self.push_flag(false);
    }

    fn matched(&mut self, offset: usize, len: usize) {
        let extra = len - MIN_MATCH;
        let token = ((offset - 1) << 3) as u16;
        if extra < 7 {
            self.out.extend_from_slice(&(token | extra as u16).to_le_bytes());
        } else {
            self.out.extend_from_slice(&(token | 7).to_le_bytes());
            let rest = extra - 7;
            let nibble = rest.min(15) as u8;
            match self.nibble_pos.take() {
                Some(at) => self.out[at] |= nibble << 4,
                None => {
                    self.nibble_pos = Some(self.out.len());
                    self.out.push(nibble);
                }
            }
            if rest >= 15 {
                let rest = rest - 15;
                if rest < 255 {
                    self.out.push(rest as u8);
                } else {
                    self.out.push(255);
                    match u16::try_from(extra) {
                        Ok(short) => self.out.extend_from_slice(&short.to_le_bytes()),
                        Err(_) => {
                            self.out.extend_from_slice(&0u16.to_le_bytes());
                            self.out.extend_from_slice(&(extra as u32).to_le_bytes());
                        }
                    }
                }
            }
        }
        self.push_flag(true);
    }

    fn finish(mut self) -> Vec<u8> {
        let unused = 32 - self.flag_count;
        let word = if unused == 32 {
            u32::MAX
        } else {
            self.flags << unused | ((1u32 << unused) - 1)
        };
        self.out[self.flag_pos..self.flag_pos + 4].copy_from_slice(&word.to_le_bytes());
        self.out
    }
}

/// Compress `input`. The output may be larger than the input.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut encoder = Encoder::new(input.len() / 2 + 8);
    let mut chain = HashChain::new(input.len());
    let mut pos = 0;

    while pos < input.len() {
        match chain.find(input, pos, MAX_OFFSET, u32::MAX as usize) {
            Some((offset, len)) => {
                encoder.matched(offset, len);
                for at in pos..pos + len {
                    chain.insert(input, at);
                }
                pos += len;
            }
            None => {
                encoder.literal(input[pos]);
                chain.insert(input, pos);
                pos += 1;
            }
        }
    }
    encoder.finish()
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or(CodecError::Corrupt("truncated LZ77 stream"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes([self.u8()?, self.u8()?, self.u8()?, self.u8()?]))
    }
}

/// Decompress `input`, failing if more than `limit` bytes would be produced.
pub fn decompress(input: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    let mut reader = Reader { input, pos: 0 };
    let mut out = Vec::with_capacity(limit);
    let mut flags = 0u32;
    let mut flag_count = 0u32;
    let mut nibble_pos: Option<usize> = None;

    loop {
        if flag_count == 0 {
            if reader.at_end() {
                break;
            }
            flags = reader.u32()?;
            flag_count = 32;
        }
        flag_count -= 1;

        if flags & (1 << flag_count) == 0 {
            if reader.at_end() {
                break;
            }
            if out.len() == limit {
                return Err(CodecError::OutputOverflow { limit });
            }
            out.push(reader.u8()?);
            continue;
        }

        if reader.at_end() {
            break;
        }
        let token = reader.u16()?;
        let offset = usize::from(token >> 3) + 1;
        let mut len = usize::from(token & 7);
        if len == 7 {
            len = match nibble_pos.take() {
                Some(at) => usize::from(input[at] >> 4),
                None => {
                    nibble_pos = Some(reader.pos);
                    usize::from(reader.u8()? & 0x0F)
                }
            };
            if len == 15 {
                len = usize::from(reader.u8()?);
                if len == 255 {
                    len = usize::from(reader.u16()?);
                    if len == 0 {
                        len = reader.u32()? as usize;
                    }
                    len = len
                        .checked_sub(15 + 7)
                        .ok_or(CodecError::Corrupt("LZ77 length underflow"))?;
                }
                len += 15;
            }
            len += 7;
        }
        len += MIN_MATCH;

        if offset > out.len() {
            return Err(CodecError::Corrupt("LZ77 match before start of output"));
        }
        if len > limit - out.len() {
            return Err(CodecError::OutputOverflow { limit });
        }
        let start = out.len() - offset;
        for i in 0..len {
            let byte = out[start + i];
            out.push(byte);
        }
    }
    Ok(out)
}

/// Plain LZ77 as a [`Codec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz77;

impl Codec for Lz77 {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz77
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
        let restored = decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_reference_vector() {
        // MS-XCA 3.1: all literals, six unused flag bits set
        let data = b"abcdefghijklmnopqrstuvwxyz";
        let compressed = compress(data);
        assert_eq!(compressed.len(), 4 + 26);
        assert_eq!(&compressed[..13], &hex::decode("3f000000616263646566676869").unwrap()[..]);
        roundtrip(data);
    }

    #[test]
    fn test_repeated_pattern_vector() {
        // MS-XCA 3.2: "abc" x 100 is three literals and one 297-byte match
        let data = b"abc".repeat(100);
        let compressed = compress(&data);
        assert_eq!(compressed, hex::decode("ffffff1f61626317000fff2601").unwrap());
        roundtrip(&data);
    }

    #[test]
    fn test_roundtrip_shapes() {
        roundtrip(b"");
        roundtrip(b"a");
        roundtrip(b"ab");
        roundtrip(&[7u8; 5]);
        roundtrip(&[0u8; 100_000]);
        roundtrip(&(0..70_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>());
        roundtrip(&(0..5000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_length_encodings() {
        // Exercise nibble, byte, u16 and u32 length forms
        for run in [10, 20, 30, 300, 70_000] {
            let mut data = b"xy".to_vec();
            data.extend(std::iter::repeat_n(b'z', run));
            data.extend_from_slice(b"tail");
            roundtrip(&data);
        }
    }

    #[test]
    fn test_shared_nibble_pairs() {
        // Two consecutive long matches share one nibble byte
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(b"0123456789abcdef");
            data.extend(std::iter::repeat_n(b'-', 12));
        }
        roundtrip(&data);
    }

    #[test]
    fn test_flag_word_boundaries() {
        for len in [31, 32, 33, 63, 64, 65] {
            let data: Vec<u8> = (0..len as u8).collect();
            roundtrip(&data);
        }
    }

    #[test]
    fn test_codec_reports_no_gain() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert!(Lz77.compress(&data).unwrap().is_none());
        assert!(Lz77.compress(&vec![0u8; 1000]).unwrap().is_some());
    }

    #[test]
    fn test_decompress_rejects_bad_input() {
        let compressed = compress(&[1u8; 1000]);
        assert!(matches!(
            decompress(&compressed, 999),
            Err(CodecError::OutputOverflow { limit: 999 })
        ));

        assert!(matches!(
            Lz77.decompress(&compressed, 1001),
            Err(CodecError::SizeMismatch { expected: 1001, actual: 1000 })
        ));

        // A match at the very start has nothing to copy from
        let bad = [0x00, 0x00, 0x00, 0x80, 0x08, 0x00];
        assert!(matches!(decompress(&bad, 100), Err(CodecError::Corrupt(_))));

        // Long length with its nibble byte cut off
        let truncated = [0x00, 0x00, 0x00, 0x40, b'a', 0x07, 0x00];
        assert!(decompress(&truncated, 100).is_err());
    }
}
