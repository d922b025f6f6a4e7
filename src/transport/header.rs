//! SMB1 and SMB2 header views.
//!
//! Only the fields the transforms read or write are interpreted; everything
//! else is carried opaquely.

use crate::core::{
    FrameError, SMB1_COMMAND_OFFSET, SMB1_HEADER_SIZE, SMB1_PROTOCOL_ID, SMB1_SIGNATURE_OFFSET,
    SMB1_SIGNATURE_SIZE, SMB2_COMMAND_OFFSET, SMB2_FLAGS_OFFSET, SMB2_FLAGS_SERVER_TO_REDIR,
    SMB2_FLAGS_SIGNED, SMB2_HEADER_SIZE, SMB2_MESSAGE_ID_OFFSET, SMB2_NEXT_COMMAND_OFFSET,
    SMB2_PROTOCOL_ID, SMB2_SESSION_ID_OFFSET, SMB2_SIGNATURE_OFFSET, SMB2_SIGNATURE_SIZE,
    SMB2_STATUS_OFFSET,
};

use super::buffer::MessageBuffer;

/// SMB2 sync/async header.
///
/// Wire format (64 bytes):
/// ```text
/// +0   ProtocolId     (4)   0xFE 'S' 'M' 'B'
/// +4   StructureSize  (2)   64
/// +6   CreditCharge   (2)
/// +8   Status         (4)
/// +12  Command        (2)
/// +14  Credits        (2)
/// +16  Flags          (4)
/// +20  NextCommand    (4)
/// +24  MessageId      (8)
/// +32  ProcessId/TreeId or AsyncId (8)
/// +40  SessionId      (8)
/// +48  Signature      (16)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2Header {
    /// Credit charge.
    pub credit_charge: u16,
    /// NT status (replies).
    pub status: u32,
    /// Command code.
    pub command: u16,
    /// Credits requested or granted.
    pub credits: u16,
    /// Header flags.
    pub flags: u32,
    /// Offset to the next compound member, 0 if last.
    pub next_command: u32,
    /// Message id.
    pub message_id: u64,
    /// Reserved / process id (AsyncId low half when async).
    pub process_id: u32,
    /// Tree id (AsyncId high half when async).
    pub tree_id: u32,
    /// Session id.
    pub session_id: u64,
    /// Signature field.
    pub signature: [u8; SMB2_SIGNATURE_SIZE],
}

impl Smb2Header {
    /// Create a request header.
    pub fn new(command: u16, message_id: u64, session_id: u64) -> Self {
        Self {
            credit_charge: 1,
            status: 0,
            command,
            credits: 1,
            flags: 0,
            next_command: 0,
            message_id,
            process_id: 0,
            tree_id: 0,
            session_id,
            signature: [0u8; SMB2_SIGNATURE_SIZE],
        }
    }

    /// Turn this into a response header with the given status.
    pub fn into_response(mut self, status: u32) -> Self {
        self.flags |= SMB2_FLAGS_SERVER_TO_REDIR;
        self.status = status;
        self
    }

    /// Check the response flag.
    pub fn is_response(&self) -> bool {
        self.flags & SMB2_FLAGS_SERVER_TO_REDIR != 0
    }

    /// Check the signed flag.
    pub fn is_signed(&self) -> bool {
        self.flags & SMB2_FLAGS_SIGNED != 0
    }

    /// Serialize to 64 bytes.
    pub fn to_bytes(&self) -> [u8; SMB2_HEADER_SIZE] {
        let mut buf = [0u8; SMB2_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SMB2_PROTOCOL_ID);
        buf[4..6].copy_from_slice(&(SMB2_HEADER_SIZE as u16).to_le_bytes());
        buf[6..8].copy_from_slice(&self.credit_charge.to_le_bytes());
        buf[SMB2_STATUS_OFFSET..12].copy_from_slice(&self.status.to_le_bytes());
        buf[SMB2_COMMAND_OFFSET..14].copy_from_slice(&self.command.to_le_bytes());
        buf[14..16].copy_from_slice(&self.credits.to_le_bytes());
        buf[SMB2_FLAGS_OFFSET..20].copy_from_slice(&self.flags.to_le_bytes());
        buf[SMB2_NEXT_COMMAND_OFFSET..24].copy_from_slice(&self.next_command.to_le_bytes());
        buf[SMB2_MESSAGE_ID_OFFSET..32].copy_from_slice(&self.message_id.to_le_bytes());
        buf[32..36].copy_from_slice(&self.process_id.to_le_bytes());
        buf[36..40].copy_from_slice(&self.tree_id.to_le_bytes());
        buf[SMB2_SESSION_ID_OFFSET..48].copy_from_slice(&self.session_id.to_le_bytes());
        buf[SMB2_SIGNATURE_OFFSET..64].copy_from_slice(&self.signature);
        buf
    }

    /// Parse from the first 64 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < SMB2_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: SMB2_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let protocol_id: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if protocol_id != SMB2_PROTOCOL_ID {
            return Err(FrameError::InvalidProtocolId(protocol_id));
        }

        let structure_size = u16::from_le_bytes([bytes[4], bytes[5]]);
        if structure_size as usize != SMB2_HEADER_SIZE {
            return Err(FrameError::InvalidField {
                field: "StructureSize",
                value: structure_size as u64,
            });
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let mut signature = [0u8; SMB2_SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[SMB2_SIGNATURE_OFFSET..SMB2_HEADER_SIZE]);

        Ok(Self {
            credit_charge: u16_at(6),
            status: u32_at(SMB2_STATUS_OFFSET),
            command: u16_at(SMB2_COMMAND_OFFSET),
            credits: u16_at(14),
            flags: u32_at(SMB2_FLAGS_OFFSET),
            next_command: u32_at(SMB2_NEXT_COMMAND_OFFSET),
            message_id: u64_at(SMB2_MESSAGE_ID_OFFSET),
            process_id: u32_at(32),
            tree_id: u32_at(36),
            session_id: u64_at(SMB2_SESSION_ID_OFFSET),
            signature,
        })
    }

    /// Parse the header starting at `offset` in a segmented buffer.
    pub fn parse(buf: &MessageBuffer, offset: usize) -> Result<Self, FrameError> {
        let mut raw = [0u8; SMB2_HEADER_SIZE];
        buf.read_at(offset, &mut raw)?;
        Self::from_bytes(&raw)
    }
}

/// Set bits in the flags field of the SMB2 header at `offset`.
pub fn set_smb2_flags(buf: &mut MessageBuffer, offset: usize, bits: u32) -> Result<(), FrameError> {
    let flags = buf.u32_at(offset + SMB2_FLAGS_OFFSET)?;
    buf.put_u32_at(offset + SMB2_FLAGS_OFFSET, flags | bits)
}

/// SMB1 header.
///
/// Wire format (32 bytes):
/// ```text
/// +0   Protocol   (4)   0xFF 'S' 'M' 'B'
/// +4   Command    (1)
/// +5   Status     (4)
/// +9   Flags      (1)
/// +10  Flags2     (2)
/// +12  PIDHigh    (2)
/// +14  Signature  (8)
/// +22  Reserved   (2)
/// +24  TID        (2)
/// +26  PIDLow     (2)
/// +28  UID        (2)
/// +30  MID        (2)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb1Header {
    /// Command code.
    pub command: u8,
    /// NT status.
    pub status: u32,
    /// Flags.
    pub flags: u8,
    /// Flags2.
    pub flags2: u16,
    /// Security signature field.
    pub signature: [u8; SMB1_SIGNATURE_SIZE],
    /// Tree id.
    pub tid: u16,
    /// Process id (low half).
    pub pid: u16,
    /// User id.
    pub uid: u16,
    /// Multiplex id.
    pub mid: u16,
}

impl Smb1Header {
    /// Create a request header.
    pub fn new(command: u8, mid: u16) -> Self {
        Self {
            command,
            status: 0,
            flags: 0,
            flags2: 0,
            signature: [0u8; SMB1_SIGNATURE_SIZE],
            tid: 0,
            pid: 0,
            uid: 0,
            mid,
        }
    }

    /// Serialize to 32 bytes.
    pub fn to_bytes(&self) -> [u8; SMB1_HEADER_SIZE] {
        let mut buf = [0u8; SMB1_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SMB1_PROTOCOL_ID);
        buf[SMB1_COMMAND_OFFSET] = self.command;
        buf[5..9].copy_from_slice(&self.status.to_le_bytes());
        buf[9] = self.flags;
        buf[10..12].copy_from_slice(&self.flags2.to_le_bytes());
        buf[SMB1_SIGNATURE_OFFSET..22].copy_from_slice(&self.signature);
        buf[24..26].copy_from_slice(&self.tid.to_le_bytes());
        buf[26..28].copy_from_slice(&self.pid.to_le_bytes());
        buf[28..30].copy_from_slice(&self.uid.to_le_bytes());
        buf[30..32].copy_from_slice(&self.mid.to_le_bytes());
        buf
    }

    /// Parse the header at the start of a segmented buffer.
    pub fn parse(buf: &MessageBuffer) -> Result<Self, FrameError> {
        let mut raw = [0u8; SMB1_HEADER_SIZE];
        buf.read_at(0, &mut raw)?;

        let protocol_id: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
        if protocol_id != SMB1_PROTOCOL_ID {
            return Err(FrameError::InvalidProtocolId(protocol_id));
        }

        let mut signature = [0u8; SMB1_SIGNATURE_SIZE];
        signature.copy_from_slice(&raw[SMB1_SIGNATURE_OFFSET..22]);

        Ok(Self {
            command: raw[SMB1_COMMAND_OFFSET],
            status: u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]),
            flags: raw[9],
            flags2: u16::from_le_bytes([raw[10], raw[11]]),
            signature,
            tid: u16::from_le_bytes([raw[24], raw[25]]),
            pid: u16::from_le_bytes([raw[26], raw[27]]),
            uid: u16::from_le_bytes([raw[28], raw[29]]),
            mid: u16::from_le_bytes([raw[30], raw[31]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SMB2_FLAGS_SIGNED, SMB2_WRITE};

    #[test]
    fn test_smb2_header_layout() {
        let mut header = Smb2Header::new(SMB2_WRITE, 0x0102_0304_0506_0708, 0xAABB_CCDD_EEFF_0011);
        header.next_command = 0x60;
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..4], &SMB2_PROTOCOL_ID);
        assert_eq!(&bytes[4..6], &64u16.to_le_bytes());
        assert_eq!(&bytes[12..14], &SMB2_WRITE.to_le_bytes());
        assert_eq!(&bytes[20..24], &0x60u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[40..48], &0xAABB_CCDD_EEFF_0011u64.to_le_bytes());
        assert_eq!(&bytes[48..64], &[0u8; 16]);

        assert_eq!(Smb2Header::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_smb2_header_rejects_bad_input() {
        let bytes = Smb2Header::new(0, 0, 0).to_bytes();

        assert!(matches!(
            Smb2Header::from_bytes(&bytes[..63]),
            Err(FrameError::Truncated { expected: 64, actual: 63 })
        ));

        let mut wrong_id = bytes;
        wrong_id[0] = 0xFD;
        assert!(matches!(
            Smb2Header::from_bytes(&wrong_id),
            Err(FrameError::InvalidProtocolId(_))
        ));

        let mut wrong_size = bytes;
        wrong_size[4] = 65;
        assert!(matches!(
            Smb2Header::from_bytes(&wrong_size),
            Err(FrameError::InvalidField { field: "StructureSize", .. })
        ));
    }

    #[test]
    fn test_set_flags_in_segmented_buffer() {
        let bytes = Smb2Header::new(0, 7, 9).to_bytes();
        let mut buf = MessageBuffer::from_segments([bytes[..18].to_vec(), bytes[18..].to_vec()]);
        set_smb2_flags(&mut buf, 0, SMB2_FLAGS_SIGNED).unwrap();

        let header = Smb2Header::parse(&buf, 0).unwrap();
        assert!(header.is_signed());
        assert!(!header.is_response());
    }

    #[test]
    fn test_smb1_header_roundtrip() {
        let mut header = Smb1Header::new(0x2F, 42);
        header.uid = 100;
        header.signature = *b"ABCDEFGH";
        let buf = MessageBuffer::from(header.to_bytes().to_vec());

        let parsed = Smb1Header::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(&buf.to_vec()[14..22], b"ABCDEFGH");
    }
}
