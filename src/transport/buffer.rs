//! Segmented message buffers.
//!
//! A [`MessageBuffer`] is an ordered list of byte segments holding one wire
//! message or a compound chain. All offset arithmetic is bounds-checked here
//! once, so callers never track "bytes left in the current segment" by hand.

use crate::core::FrameError;

/// Ordered sequence of byte segments forming one wire message.
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    segments: Vec<Vec<u8>>,
    len: usize,
}

impl MessageBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of segments. Empty segments are dropped.
    pub fn from_segments<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut buf = Self::new();
        for segment in segments {
            buf.append(segment);
        }
        buf
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Iterate over the segments.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.segments.iter().map(Vec::as_slice)
    }

    /// Append a segment.
    pub fn append(&mut self, segment: Vec<u8>) {
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        self.segments.push(segment);
    }

    /// Append bytes to the last segment.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        match self.segments.last_mut() {
            Some(last) => {
                last.extend_from_slice(bytes);
                self.len += bytes.len();
            }
            None => self.append(bytes.to_vec()),
        }
    }

    /// Append all segments of another buffer.
    pub fn append_buffer(&mut self, other: MessageBuffer) {
        for segment in other.segments {
            self.append(segment);
        }
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), FrameError> {
        let end = offset.checked_add(len).ok_or(FrameError::Truncated {
            expected: usize::MAX,
            actual: self.len,
        })?;
        if end > self.len {
            return Err(FrameError::Truncated {
                expected: end,
                actual: self.len,
            });
        }
        Ok(())
    }

    /// Borrow `len` bytes starting at `offset` as per-segment slices.
    pub fn slices(&self, offset: usize, len: usize) -> Result<Vec<&[u8]>, FrameError> {
        self.check_range(offset, len)?;

        let mut out = Vec::new();
        let mut skip = offset;
        let mut want = len;
        for segment in &self.segments {
            if want == 0 {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(want);
            out.push(&segment[skip..skip + take]);
            want -= take;
            skip = 0;
        }
        Ok(out)
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), FrameError> {
        let mut filled = 0;
        for slice in self.slices(offset, dst.len())? {
            dst[filled..filled + slice.len()].copy_from_slice(slice);
            filled += slice.len();
        }
        Ok(())
    }

    /// Overwrite bytes in place starting at `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), FrameError> {
        self.check_range(offset, src.len())?;

        let mut skip = offset;
        let mut written = 0;
        for segment in &mut self.segments {
            if written == src.len() {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(src.len() - written);
            segment[skip..skip + take].copy_from_slice(&src[written..written + take]);
            written += take;
            skip = 0;
        }
        Ok(())
    }

    /// Read a little-endian u16 at `offset`.
    pub fn u16_at(&self, offset: usize) -> Result<u16, FrameError> {
        let mut raw = [0u8; 2];
        self.read_at(offset, &mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    /// Read a little-endian u32 at `offset`.
    pub fn u32_at(&self, offset: usize) -> Result<u32, FrameError> {
        let mut raw = [0u8; 4];
        self.read_at(offset, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Read a little-endian u64 at `offset`.
    pub fn u64_at(&self, offset: usize) -> Result<u64, FrameError> {
        let mut raw = [0u8; 8];
        self.read_at(offset, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Write a little-endian u32 at `offset`.
    pub fn put_u32_at(&mut self, offset: usize, value: u32) -> Result<(), FrameError> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Split the buffer at `at`, returning the bytes from `at` onwards.
    pub fn split_off(&mut self, at: usize) -> Result<MessageBuffer, FrameError> {
        self.check_range(at, 0)?;

        let total = self.len;
        let mut kept = Vec::new();
        let mut rest = Vec::new();
        let mut pos = 0;
        for mut segment in std::mem::take(&mut self.segments) {
            if pos >= at {
                rest.push(segment);
                continue;
            }
            let end = pos + segment.len();
            if end > at {
                rest.push(segment.split_off(at - pos));
            }
            kept.push(segment);
            pos = end;
        }

        self.segments = kept;
        self.len = at;
        Ok(MessageBuffer {
            segments: rest,
            len: total - at,
        })
    }

    /// Copy all bytes into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out
    }

    /// Consume into one contiguous vector, reusing a lone segment.
    pub fn into_vec(mut self) -> Vec<u8> {
        if self.segments.len() == 1 {
            return self.segments.pop().unwrap_or_default();
        }
        self.to_vec()
    }

    /// Sequential reader positioned at the start.
    pub fn cursor(&self) -> BufCursor<'_> {
        BufCursor { buf: self, pos: 0 }
    }
}

impl PartialEq for MessageBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.to_vec() == other.to_vec()
    }
}

impl Eq for MessageBuffer {}

impl From<Vec<u8>> for MessageBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_segments([bytes])
    }
}

impl From<&[u8]> for MessageBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}

/// Bounds-checked sequential reader over a [`MessageBuffer`].
#[derive(Debug, Clone)]
pub struct BufCursor<'a> {
    buf: &'a MessageBuffer,
    pos: usize,
}

impl<'a> BufCursor<'a> {
    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn ensure(&self, n: usize) -> Result<(), FrameError> {
        if n > self.remaining() {
            return Err(FrameError::Truncated {
                expected: n,
                actual: self.remaining(),
            });
        }
        Ok(())
    }

    /// Skip `n` bytes.
    pub fn advance(&mut self, n: usize) -> Result<(), FrameError> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Fill `dst` without moving the cursor.
    pub fn peek(&self, dst: &mut [u8]) -> Result<(), FrameError> {
        self.ensure(dst.len())?;
        self.buf.read_at(self.pos, dst)
    }

    /// Fill `dst` and move past it.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), FrameError> {
        self.peek(dst)?;
        self.pos += dst.len();
        Ok(())
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a little-endian u16.
    pub fn read_u16_le(&mut self) -> Result<u16, FrameError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32, FrameError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64, FrameError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Copy out the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<Vec<u8>, FrameError> {
        let mut out = vec![0u8; n];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    /// Borrow the next `n` bytes as per-segment slices.
    pub fn take_slices(&mut self, n: usize) -> Result<Vec<&'a [u8]>, FrameError> {
        self.ensure(n)?;
        let slices = self.buf.slices(self.pos, n)?;
        self.pos += n;
        Ok(slices)
    }

    /// Copy out everything that is left.
    pub fn take_rest(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.remaining());
        for slice in self.buf.slices(self.pos, self.remaining()).unwrap_or_default() {
            out.extend_from_slice(slice);
        }
        self.pos = self.buf.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_segments() -> MessageBuffer {
        MessageBuffer::from_segments([vec![0, 1, 2], vec![3, 4], vec![5, 6, 7, 8]])
    }

    #[test]
    fn test_from_segments_skips_empty() {
        let buf = MessageBuffer::from_segments([vec![], vec![1, 2], vec![]]);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.segment_count(), 1);
    }

    #[test]
    fn test_read_across_segments() {
        let buf = three_segments();
        let mut out = [0u8; 4];
        buf.read_at(2, &mut out).unwrap();
        assert_eq!(out, [2, 3, 4, 5]);

        assert_eq!(buf.u32_at(1).unwrap(), u32::from_le_bytes([1, 2, 3, 4]));
        assert!(matches!(
            buf.read_at(7, &mut out),
            Err(FrameError::Truncated { expected: 11, actual: 9 })
        ));
    }

    #[test]
    fn test_write_across_segments() {
        let mut buf = three_segments();
        buf.write_at(1, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]).unwrap();
        assert_eq!(buf.to_vec(), vec![0, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 6, 7, 8]);
        assert_eq!(buf.segment_count(), 3);

        assert!(buf.write_at(8, &[1, 2]).is_err());
    }

    #[test]
    fn test_slices() {
        let buf = three_segments();
        let slices = buf.slices(1, 6).unwrap();
        assert_eq!(slices, vec![&[1u8, 2][..], &[3, 4][..], &[5, 6][..]]);
        assert!(buf.slices(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_split_off_mid_segment() {
        let mut buf = three_segments();
        let tail = buf.split_off(4).unwrap();
        assert_eq!(buf.to_vec(), vec![0, 1, 2, 3]);
        assert_eq!(tail.to_vec(), vec![4, 5, 6, 7, 8]);
        assert_eq!(buf.len(), 4);
        assert_eq!(tail.len(), 5);
    }

    #[test]
    fn test_split_off_boundaries() {
        let mut buf = three_segments();
        let tail = buf.split_off(3).unwrap();
        assert_eq!(buf.segment_count(), 1);
        assert_eq!(tail.segment_count(), 2);

        let mut buf = three_segments();
        let tail = buf.split_off(0).unwrap();
        assert!(buf.is_empty());
        assert_eq!(tail.len(), 9);

        let mut buf = three_segments();
        let tail = buf.split_off(9).unwrap();
        assert!(tail.is_empty());

        assert!(three_segments().split_off(10).is_err());
    }

    #[test]
    fn test_equality_ignores_segmentation() {
        let a = three_segments();
        let b = MessageBuffer::from((0u8..9).collect::<Vec<_>>());
        assert_eq!(a, b);
    }

    #[test]
    fn test_cursor_reads() {
        let buf = MessageBuffer::from_segments([vec![0x01, 0x02], vec![0x03, 0x04, 0x05, 0x06, 0x07]]);
        let mut cursor = buf.cursor();

        assert_eq!(cursor.read_u8().unwrap(), 0x01);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x0302);

        let mut peeked = [0u8; 2];
        cursor.peek(&mut peeked).unwrap();
        assert_eq!(peeked, [0x04, 0x05]);
        assert_eq!(cursor.position(), 3);

        cursor.advance(1).unwrap();
        assert_eq!(cursor.take(3).unwrap(), vec![0x05, 0x06, 0x07]);
        assert_eq!(cursor.remaining(), 0);
        assert!(cursor.read_u8().is_err());
    }

    #[test]
    fn test_cursor_truncation_does_not_advance() {
        let buf = MessageBuffer::from(vec![1, 2, 3]);
        let mut cursor = buf.cursor();
        assert!(matches!(
            cursor.read_u32_le(),
            Err(FrameError::Truncated { expected: 4, actual: 3 })
        ));
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.take_rest(), vec![1, 2, 3]);
    }
}
