//! Outgoing requests, compound chains and transform frames.

use crate::core::{
    FrameError, SMB2_COMMAND_OFFSET, SMB2_COMPOUND_ALIGNMENT, SMB2_HEADER_SIZE,
    SMB2_NEXT_COMMAND_OFFSET, SMB2_PROTOCOL_ID,
};

use super::buffer::MessageBuffer;

/// Legacy (SMB1) sequence numbers reserved for one request and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePair {
    /// Sequence number signed into the request.
    pub request: u32,
    /// Sequence number the reply must be signed with.
    pub reply: u32,
}

/// One outgoing protocol message plus the per-request transform state.
#[derive(Debug, Clone)]
pub struct Request {
    /// Wire bytes, header first.
    pub message: MessageBuffer,
    /// Legacy sequence numbers, assigned when the request is signed.
    pub sequence: Option<SequencePair>,
    /// Legacy secondary transaction part: reuses the primary's sequence pair.
    pub secondary: bool,
    /// Never compress this request.
    pub compression_disabled: bool,
}

impl Request {
    /// Wrap an already framed message.
    pub fn new(message: MessageBuffer) -> Self {
        Self {
            message,
            sequence: None,
            secondary: false,
            compression_disabled: false,
        }
    }

    /// Mark as a secondary part of the transaction whose primary holds `primary`.
    pub fn secondary_of(mut self, primary: SequencePair) -> Self {
        self.secondary = true;
        self.sequence = Some(primary);
        self
    }

    /// SMB2 command code.
    pub fn command(&self) -> Result<u16, FrameError> {
        self.message.u16_at(SMB2_COMMAND_OFFSET)
    }

    /// Check if this is an SMB2 message (as opposed to SMB1).
    pub fn is_smb2(&self) -> bool {
        let mut id = [0u8; 4];
        self.message.read_at(0, &mut id).is_ok() && id == SMB2_PROTOCOL_ID
    }

    /// Check if the request is the head of a compound chain.
    pub fn is_compound(&self) -> Result<bool, FrameError> {
        Ok(self.message.u32_at(SMB2_NEXT_COMMAND_OFFSET)? != 0)
    }
}

/// A transform frame (encryption or compression) as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformFrame {
    buf: MessageBuffer,
}

impl TransformFrame {
    /// Wrap received or built bytes.
    pub fn new(buf: MessageBuffer) -> Self {
        Self { buf }
    }

    /// Protocol id of the frame, if it has at least four bytes.
    pub fn protocol_id(&self) -> Option<[u8; 4]> {
        let mut id = [0u8; 4];
        self.buf.read_at(0, &mut id).ok().map(|()| id)
    }

    /// Borrow the wire bytes.
    pub fn as_buffer(&self) -> &MessageBuffer {
        &self.buf
    }

    /// Mutable access to the wire bytes.
    pub fn as_buffer_mut(&mut self) -> &mut MessageBuffer {
        &mut self.buf
    }

    /// Consume into the wire bytes.
    pub fn into_buffer(self) -> MessageBuffer {
        self.buf
    }

    /// Length on the wire.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Link requests into a compound chain.
///
/// Every member except the last is zero-padded to an 8-byte boundary and gets
/// its NextCommand set to its padded length; the last gets NextCommand 0.
pub fn link_compound(requests: &mut [Request]) -> Result<(), FrameError> {
    let count = requests.len();
    for (index, request) in requests.iter_mut().enumerate() {
        if request.message.len() < SMB2_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: SMB2_HEADER_SIZE,
                actual: request.message.len(),
            });
        }

        if index + 1 == count {
            request.message.put_u32_at(SMB2_NEXT_COMMAND_OFFSET, 0)?;
            continue;
        }

        let pad = (SMB2_COMPOUND_ALIGNMENT - request.message.len() % SMB2_COMPOUND_ALIGNMENT)
            % SMB2_COMPOUND_ALIGNMENT;
        if pad > 0 {
            request.message.append(vec![0u8; pad]);
        }
        let next = u32::try_from(request.message.len()).map_err(|_| FrameError::InvalidField {
            field: "NextCommand",
            value: request.message.len() as u64,
        })?;
        request.message.put_u32_at(SMB2_NEXT_COMMAND_OFFSET, next)?;
    }
    Ok(())
}

/// Length of the reply at the start of `buf`: NextCommand if set, else all of it.
pub fn reply_length(buf: &MessageBuffer) -> Result<usize, FrameError> {
    reply_length_at(buf, 0)
}

/// Length of the compound member starting at `offset`.
pub fn reply_length_at(buf: &MessageBuffer, offset: usize) -> Result<usize, FrameError> {
    let remaining = buf.len().saturating_sub(offset);
    if remaining < SMB2_HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: SMB2_HEADER_SIZE,
            actual: remaining,
        });
    }

    let next = buf.u32_at(offset + SMB2_NEXT_COMMAND_OFFSET)? as usize;
    if next == 0 {
        return Ok(remaining);
    }
    if next < SMB2_HEADER_SIZE || next > remaining || next % SMB2_COMPOUND_ALIGNMENT != 0 {
        return Err(FrameError::InvalidField {
            field: "NextCommand",
            value: next as u64,
        });
    }
    Ok(next)
}

/// Split a received compound chain into one buffer per reply.
pub fn split_compound(mut chain: MessageBuffer) -> Result<Vec<MessageBuffer>, FrameError> {
    let mut replies = Vec::new();
    loop {
        let len = reply_length_at(&chain, 0)?;
        if len == chain.len() {
            replies.push(chain);
            return Ok(replies);
        }
        let rest = chain.split_off(len)?;
        replies.push(chain);
        chain = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SMB2_READ;
    use crate::transport::Smb2Header;

    fn message(command: u16, message_id: u64, body: usize) -> MessageBuffer {
        let mut bytes = Smb2Header::new(command, message_id, 1).to_bytes().to_vec();
        bytes.extend(std::iter::repeat_n(0x5A, body));
        MessageBuffer::from(bytes)
    }

    #[test]
    fn test_link_and_split_compound() {
        let mut chain = vec![
            Request::new(message(SMB2_READ, 1, 3)),
            Request::new(message(SMB2_READ, 2, 8)),
            Request::new(message(SMB2_READ, 3, 5)),
        ];
        link_compound(&mut chain).unwrap();

        assert_eq!(chain[0].message.len(), 72);
        assert_eq!(chain[0].message.u32_at(SMB2_NEXT_COMMAND_OFFSET).unwrap(), 72);
        assert_eq!(chain[1].message.u32_at(SMB2_NEXT_COMMAND_OFFSET).unwrap(), 72);
        assert_eq!(chain[2].message.u32_at(SMB2_NEXT_COMMAND_OFFSET).unwrap(), 0);
        assert_eq!(chain[2].message.len(), 69);
        assert!(chain[0].is_compound().unwrap());
        assert!(!chain[2].is_compound().unwrap());

        let mut wire = MessageBuffer::new();
        for request in &chain {
            wire.append_buffer(request.message.clone());
        }
        let replies = split_compound(wire).unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], chain[0].message);
        assert_eq!(replies[1], chain[1].message);
        assert_eq!(replies[2], chain[2].message);
    }

    #[test]
    fn test_reply_length() {
        let single = message(SMB2_READ, 1, 10);
        assert_eq!(reply_length(&single).unwrap(), 74);

        let mut bad = message(SMB2_READ, 1, 10);
        bad.put_u32_at(SMB2_NEXT_COMMAND_OFFSET, 200).unwrap();
        assert!(matches!(
            reply_length(&bad),
            Err(FrameError::InvalidField { field: "NextCommand", .. })
        ));

        let mut unaligned = message(SMB2_READ, 1, 10);
        unaligned.put_u32_at(SMB2_NEXT_COMMAND_OFFSET, 66).unwrap();
        assert!(reply_length(&unaligned).is_err());
    }

    #[test]
    fn test_request_accessors() {
        let request = Request::new(message(SMB2_READ, 9, 0));
        assert!(request.is_smb2());
        assert_eq!(request.command().unwrap(), SMB2_READ);

        let primary = SequencePair { request: 4, reply: 5 };
        let secondary = Request::new(message(SMB2_READ, 10, 0)).secondary_of(primary);
        assert!(secondary.secondary);
        assert_eq!(secondary.sequence, Some(primary));
    }

    #[test]
    fn test_transform_frame_protocol_id() {
        let frame = TransformFrame::new(MessageBuffer::from(vec![0xFD, b'S', b'M', b'B', 0]));
        assert_eq!(frame.protocol_id(), Some(crate::core::TRANSFORM_PROTOCOL_ID));
        assert_eq!(TransformFrame::new(MessageBuffer::new()).protocol_id(), None);
    }
}
