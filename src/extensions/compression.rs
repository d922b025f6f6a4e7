//! Compression transform
//!
//! Compresses large WRITE requests and decompresses compressed READ replies.
//! The SMB2 header and WRITE request structure always travel as a literal
//! prefix so the receiver can find the write parameters without
//! decompressing.
//!
//! Chained framing (8-byte header, then payloads):
//! ```text
//! +0   ProtocolId                 (4)   0xFC 'S' 'M' 'B'
//! +4   OriginalCompressedSegmentSize (4)  size of the whole message
//! then per payload:
//!      CompressionAlgorithm       (2)
//!      Flags                      (2)   CHAINED on all but the last
//!      Length                     (4)   bytes that follow this field
//!      [OriginalPayloadSize        (4)]  LZNT1 / LZ77 / LZ77+Huffman only
//!      data
//! ```
//!
//! Non-chained framing (16-byte header, prefix, one compressed region):
//! ```text
//! +0   ProtocolId                 (4)
//! +4   OriginalCompressedSegmentSize (4)  size of the compressed region
//! +8   CompressionAlgorithm       (2)
//! +10  Flags                      (2)   0
//! +12  Offset                     (4)   length of the literal prefix
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::core::{
    COMPRESSION_FLAG_CHAINED, COMPRESSION_FLAG_NONE, COMPRESSION_HEADER_SIZE,
    COMPRESSION_ORIGINAL_SIZE_FIELD, COMPRESSION_PAYLOAD_HEADER_SIZE, COMPRESSION_PROTOCOL_ID,
    COMPRESSION_UNCHAINED_HEADER_SIZE, Codec, CodecError, CompressionAlgorithm,
    DEFAULT_MAX_DECOMPRESSED_SIZE, FrameError, MIN_PATTERN_RUN, NegotiatedParams,
    PATTERN_V1_PAYLOAD_SIZE, SMB2_HEADER_SIZE, SMB2_WRITE, SMB2_WRITE_REQUEST_SIZE,
    TransformResult,
};
use crate::crypto::Session;
use crate::transport::{BufCursor, MessageBuffer, Request, TransformFrame};

use super::lz77::Lz77;
use super::lznt1::Lznt1;

/// Offset of DataOffset in a WRITE request, from the start of the SMB2 header.
const WRITE_DATA_OFFSET_FIELD: usize = SMB2_HEADER_SIZE + 2;

/// Compressors in order of preference.
const PREFERENCE: [CompressionAlgorithm; 3] = [
    CompressionAlgorithm::Lz77,
    CompressionAlgorithm::Lz77Huffman,
    CompressionAlgorithm::Lznt1,
];

/// Compression configuration
///
/// Chunk size, threshold and algorithms come from the negotiated session
/// parameters; this covers the receive-side limits.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionConfig {
    /// Largest decompressed message accepted (for DoS protection)
    pub max_decompressed_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

/// Per-session compression counters. Updates are relaxed.
#[derive(Debug, Default)]
pub struct CompressionStats {
    attempted: AtomicU64,
    compressed: AtomicU64,
    skipped: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    decompressed: AtomicU64,
}

impl CompressionStats {
    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_compressed(&self, original: usize, framed: usize) {
        self.compressed.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(original as u64, Ordering::Relaxed);
        self.bytes_out.fetch_add(framed as u64, Ordering::Relaxed);
    }

    fn record_decompressed(&self) {
        self.decompressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> CompressionStatsSnapshot {
        CompressionStatsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            compressed: self.compressed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            decompressed: self.decompressed.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`CompressionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionStatsSnapshot {
    /// Eligible writes a compressor was run on
    pub attempted: u64,
    /// Writes sent compressed
    pub compressed: u64,
    /// Writes sent uncompressed
    pub skipped: u64,
    /// Bytes of the writes that were compressed
    pub bytes_in: u64,
    /// Framed bytes those writes went out as
    pub bytes_out: u64,
    /// Compressed replies decoded
    pub decompressed: u64,
}

impl CompressionStatsSnapshot {
    /// Get compression ratio (compressed / uncompressed)
    pub fn ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            1.0
        } else {
            self.bytes_out as f64 / self.bytes_in as f64
        }
    }

    /// Get bytes saved
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_in.saturating_sub(self.bytes_out)
    }
}

/// One payload of a chained frame.
#[derive(Debug)]
enum Payload {
    Literal(Vec<u8>),
    Pattern { byte: u8, repetitions: u32 },
    Compressed {
        algorithm: CompressionAlgorithm,
        original_size: u32,
        data: Vec<u8>,
    },
}

impl Payload {
    fn wire_len(&self) -> usize {
        COMPRESSION_PAYLOAD_HEADER_SIZE
            + match self {
                Payload::Literal(bytes) => bytes.len(),
                Payload::Pattern { .. } => PATTERN_V1_PAYLOAD_SIZE,
                Payload::Compressed { data, .. } => COMPRESSION_ORIGINAL_SIZE_FIELD + data.len(),
            }
    }

    fn write(&self, out: &mut Vec<u8>, last: bool) {
        let flags = if last {
            COMPRESSION_FLAG_NONE
        } else {
            COMPRESSION_FLAG_CHAINED
        };
        let (algorithm, length) = match self {
            Payload::Literal(bytes) => (CompressionAlgorithm::None, bytes.len()),
            Payload::Pattern { .. } => (CompressionAlgorithm::PatternV1, PATTERN_V1_PAYLOAD_SIZE),
            Payload::Compressed {
                algorithm, data, ..
            } => (*algorithm, COMPRESSION_ORIGINAL_SIZE_FIELD + data.len()),
        };
        out.extend_from_slice(&algorithm.id().to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&(length as u32).to_le_bytes());

        match self {
            Payload::Literal(bytes) => out.extend_from_slice(bytes),
            Payload::Pattern { byte, repetitions } => {
                out.extend_from_slice(&[*byte, 0, 0, 0]);
                out.extend_from_slice(&repetitions.to_le_bytes());
            }
            Payload::Compressed {
                original_size,
                data,
                ..
            } => {
                out.extend_from_slice(&original_size.to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }
}

fn leading_run(data: &[u8]) -> usize {
    data.first()
        .map_or(0, |&first| data.iter().take_while(|&&b| b == first).count())
}

fn trailing_run(data: &[u8]) -> usize {
    data.last()
        .map_or(0, |&last| data.iter().rev().take_while(|&&b| b == last).count())
}

/// Compression transform with a registry of single-shot codecs.
///
/// LZ77 and LZNT1 are built in. LZ77+Huffman has no built-in codec; register
/// one with [`CompressionCodec::register`] to use it.
pub struct CompressionCodec {
    config: CompressionConfig,
    codecs: Vec<Box<dyn Codec>>,
}

impl CompressionCodec {
    /// Create a codec with default settings
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create a codec with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            config,
            codecs: vec![Box::new(Lz77), Box::new(Lznt1)],
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Register a codec, replacing any codec for the same algorithm.
    pub fn register(&mut self, codec: Box<dyn Codec>) {
        let algorithm = codec.algorithm();
        self.codecs.retain(|existing| existing.algorithm() != algorithm);
        self.codecs.push(codec);
    }

    /// Codec registered for `algorithm`.
    pub fn codec(&self, algorithm: CompressionAlgorithm) -> Option<&dyn Codec> {
        self.codecs
            .iter()
            .find(|codec| codec.algorithm() == algorithm)
            .map(Box::as_ref)
    }

    fn select_compressor(&self, params: &NegotiatedParams) -> Option<&dyn Codec> {
        PREFERENCE
            .iter()
            .filter(|&&algorithm| params.compression.contains(algorithm))
            .find_map(|&algorithm| self.codec(algorithm))
    }

    /// Compress a WRITE request.
    ///
    /// Returns `None` (send uncompressed) when the peer supports no
    /// compression, for compound chains, non-WRITE commands, requests with
    /// compression disabled, payloads below the negotiated threshold, and
    /// whenever compression would not shrink anything.
    ///
    /// # Errors
    /// Returns a framing error if the WRITE request's DataOffset does not
    /// point inside the message. Compressor failures fall back to literal
    /// payloads.
    pub fn compress_write(
        &self,
        session: &Session,
        request: &Request,
    ) -> TransformResult<Option<TransformFrame>> {
        let stats = session.compression_stats();
        let params = session.params();
        let message = &request.message;

        let compressor = self.select_compressor(params);
        let patterns = !params.chaining_disabled
            && params.compression.contains(CompressionAlgorithm::PatternV1);
        if (compressor.is_none() && !patterns)
            || request.compression_disabled
            || !request.is_smb2()
            || request.is_compound()?
            || request.command()? != SMB2_WRITE
        {
            stats.record_skipped();
            return Ok(None);
        }

        let prefix_len = usize::from(message.u16_at(WRITE_DATA_OFFSET_FIELD)?);
        if prefix_len < SMB2_HEADER_SIZE + SMB2_WRITE_REQUEST_SIZE || prefix_len > message.len() {
            return Err(FrameError::InvalidField {
                field: "DataOffset",
                value: prefix_len as u64,
            }
            .into());
        }
        let payload_len = message.len() - prefix_len;
        if payload_len == 0 || payload_len < params.compression_threshold {
            stats.record_skipped();
            return Ok(None);
        }

        stats.record_attempt();
        let bytes = message.to_vec();
        let (prefix, payload) = bytes.split_at(prefix_len);

        let framed = if params.chaining_disabled {
            compressor.and_then(|codec| Self::frame_unchained(codec, prefix, payload))
        } else {
            Self::frame_chained(compressor, patterns, params.compression_chunk_size, &bytes, prefix_len)
        };

        match framed {
            Some(frame) => {
                stats.record_compressed(bytes.len(), frame.len());
                trace!(
                    session_id = session.session_id(),
                    original = bytes.len(),
                    framed = frame.len(),
                    chained = !params.chaining_disabled,
                    "compressed write"
                );
                Ok(Some(TransformFrame::new(MessageBuffer::from(frame))))
            }
            None => {
                debug!(
                    session_id = session.session_id(),
                    size = payload_len,
                    "write payload did not compress, sending uncompressed"
                );
                stats.record_skipped();
                Ok(None)
            }
        }
    }

    fn try_compress(codec: &dyn Codec, data: &[u8]) -> Option<Vec<u8>> {
        match codec.compress(data) {
            Ok(Some(out)) if out.len() < data.len() => Some(out),
            Ok(_) => None,
            Err(e) => {
                debug!(algorithm = ?codec.algorithm(), error = %e, "compressor failed, using literal bytes");
                None
            }
        }
    }

    fn frame_chained(
        compressor: Option<&dyn Codec>,
        patterns: bool,
        chunk_size: usize,
        message: &[u8],
        prefix_len: usize,
    ) -> Option<Vec<u8>> {
        let mut payloads = vec![Payload::Literal(message[..prefix_len].to_vec())];
        let mut reduced = false;

        for chunk in message[prefix_len..].chunks(chunk_size.max(1)) {
            let mut body = chunk;
            let mut backward = None;

            if patterns {
                let forward = leading_run(body);
                if forward >= MIN_PATTERN_RUN {
                    payloads.push(Payload::Pattern {
                        byte: body[0],
                        repetitions: forward as u32,
                    });
                    body = &body[forward..];
                    reduced = true;
                }
                let back = trailing_run(body);
                if back >= MIN_PATTERN_RUN {
                    backward = Some(Payload::Pattern {
                        byte: body[body.len() - 1],
                        repetitions: back as u32,
                    });
                    body = &body[..body.len() - back];
                    reduced = true;
                }
            }

            if !body.is_empty() {
                match compressor.and_then(|codec| Self::try_compress(codec, body).map(|c| (codec, c))) {
                    Some((codec, data))
                        if data.len() + COMPRESSION_ORIGINAL_SIZE_FIELD < body.len() =>
                    {
                        payloads.push(Payload::Compressed {
                            algorithm: codec.algorithm(),
                            original_size: body.len() as u32,
                            data,
                        });
                        reduced = true;
                    }
                    _ => payloads.push(Payload::Literal(body.to_vec())),
                }
            }
            payloads.extend(backward);
        }

        if !reduced {
            return None;
        }

        let total: usize = payloads.iter().map(Payload::wire_len).sum();
        let mut out = Vec::with_capacity(COMPRESSION_HEADER_SIZE + total);
        out.extend_from_slice(&COMPRESSION_PROTOCOL_ID);
        out.extend_from_slice(&(message.len() as u32).to_le_bytes());
        let last = payloads.len() - 1;
        for (index, payload) in payloads.iter().enumerate() {
            payload.write(&mut out, index == last);
        }
        Some(out)
    }

    fn frame_unchained(codec: &dyn Codec, prefix: &[u8], payload: &[u8]) -> Option<Vec<u8>> {
        let data = Self::try_compress(codec, payload)?;

        let mut out = Vec::with_capacity(COMPRESSION_UNCHAINED_HEADER_SIZE + prefix.len() + data.len());
        out.extend_from_slice(&COMPRESSION_PROTOCOL_ID);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&codec.algorithm().id().to_le_bytes());
        out.extend_from_slice(&COMPRESSION_FLAG_NONE.to_le_bytes());
        out.extend_from_slice(&(prefix.len() as u32).to_le_bytes());
        out.extend_from_slice(prefix);
        out.extend_from_slice(&data);
        Some(out)
    }

    /// Decompress a compressed reply.
    ///
    /// The framing is chained unless the session negotiated chaining off.
    /// Nothing is returned unless the whole frame decodes to exactly the
    /// declared size.
    ///
    /// # Errors
    /// - framing errors for a bad protocol id, a declared size over the
    ///   ceiling, truncated or overrunning payloads, and trailing bytes
    /// - codec errors for unknown algorithms and decompressor failures
    pub fn decompress_read(
        &self,
        session: &Session,
        frame: TransformFrame,
    ) -> TransformResult<MessageBuffer> {
        let buf = frame.into_buffer();
        let mut cursor = buf.cursor();

        let protocol_id = cursor.read_array::<4>()?;
        if protocol_id != COMPRESSION_PROTOCOL_ID {
            return Err(FrameError::InvalidProtocolId(protocol_id).into());
        }
        let original_size = cursor.read_u32_le()? as usize;
        if original_size > self.config.max_decompressed_size {
            return Err(FrameError::SizeExceeded {
                size: original_size,
                limit: self.config.max_decompressed_size,
            }
            .into());
        }

        let out = if session.params().chaining_disabled {
            self.decode_unchained(&mut cursor, original_size)?
        } else {
            self.decode_chained(&mut cursor, original_size)?
        };
        if cursor.remaining() > 0 {
            return Err(FrameError::TrailingBytes(cursor.remaining()).into());
        }

        session.compression_stats().record_decompressed();
        trace!(session_id = session.session_id(), size = out.len(), "decompressed read");
        Ok(MessageBuffer::from(out))
    }

    fn run_codec(
        &self,
        id: u16,
        data: &[u8],
        original_size: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let codec = CompressionAlgorithm::from_id(id)
            .filter(|algorithm| algorithm.is_compressor())
            .and_then(|algorithm| self.codec(algorithm))
            .ok_or(CodecError::UnsupportedAlgorithm(id))?;
        let out = codec.decompress(data, original_size)?;
        if out.len() != original_size {
            return Err(CodecError::SizeMismatch {
                expected: original_size,
                actual: out.len(),
            });
        }
        Ok(out)
    }

    fn decode_chained(
        &self,
        cursor: &mut BufCursor<'_>,
        original_size: usize,
    ) -> TransformResult<Vec<u8>> {
        let mut out = Vec::with_capacity(original_size);

        while out.len() < original_size {
            let id = cursor.read_u16_le()?;
            let _flags = cursor.read_u16_le()?;
            let length = cursor.read_u32_le()? as usize;
            if length > cursor.remaining() {
                return Err(FrameError::Truncated {
                    expected: length,
                    actual: cursor.remaining(),
                }
                .into());
            }
            let room = original_size - out.len();

            match CompressionAlgorithm::from_id(id) {
                Some(CompressionAlgorithm::None) => {
                    if length > room {
                        return Err(FrameError::Overrun.into());
                    }
                    out.extend_from_slice(&cursor.take(length)?);
                }
                Some(CompressionAlgorithm::PatternV1) => {
                    if length != PATTERN_V1_PAYLOAD_SIZE {
                        return Err(FrameError::InvalidField {
                            field: "Length",
                            value: length as u64,
                        }
                        .into());
                    }
                    let byte = cursor.read_u8()?;
                    cursor.advance(3)?;
                    let repetitions = cursor.read_u32_le()? as usize;
                    if repetitions > room {
                        return Err(FrameError::Overrun.into());
                    }
                    out.resize(out.len() + repetitions, byte);
                }
                _ => {
                    if length < COMPRESSION_ORIGINAL_SIZE_FIELD {
                        return Err(FrameError::InvalidField {
                            field: "Length",
                            value: length as u64,
                        }
                        .into());
                    }
                    let payload_size = cursor.read_u32_le()? as usize;
                    if payload_size > room {
                        return Err(FrameError::Overrun.into());
                    }
                    let data = cursor.take(length - COMPRESSION_ORIGINAL_SIZE_FIELD)?;
                    out.extend_from_slice(&self.run_codec(id, &data, payload_size)?);
                }
            }
        }
        Ok(out)
    }

    fn decode_unchained(
        &self,
        cursor: &mut BufCursor<'_>,
        original_size: usize,
    ) -> TransformResult<Vec<u8>> {
        let id = cursor.read_u16_le()?;
        let _flags = cursor.read_u16_le()?;
        let offset = cursor.read_u32_le()? as usize;

        if offset > cursor.remaining() {
            return Err(FrameError::Truncated {
                expected: offset,
                actual: cursor.remaining(),
            }
            .into());
        }
        if original_size + offset > self.config.max_decompressed_size {
            return Err(FrameError::SizeExceeded {
                size: original_size + offset,
                limit: self.config.max_decompressed_size,
            }
            .into());
        }

        let mut out = Vec::with_capacity(offset + original_size);
        out.extend_from_slice(&cursor.take(offset)?);
        let data = cursor.take_rest();

        if id == CompressionAlgorithm::None.id() {
            if data.len() != original_size {
                return Err(FrameError::LengthMismatch {
                    declared: original_size,
                    actual: data.len(),
                }
                .into());
            }
            out.extend_from_slice(&data);
        } else {
            out.extend_from_slice(&self.run_codec(id, &data, original_size)?);
        }
        Ok(out)
    }
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algorithms: Vec<_> = self.codecs.iter().map(|codec| codec.algorithm()).collect();
        f.debug_struct("CompressionCodec")
            .field("config", &self.config)
            .field("codecs", &algorithms)
            .finish()
    }
}
