//! Common types used throughout the protocol

use thiserror::Error;

/// Magic bytes opening a command or ACK frame
pub const CMD_HEADER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];
/// Magic bytes closing a command or ACK frame
pub const CMD_FOOTER: [u8; 4] = [0x04, 0x03, 0x02, 0x01];
/// Magic bytes opening a cyclic data frame
pub const DATA_HEADER: [u8; 4] = [0xF4, 0xF3, 0xF2, 0xF1];
/// Magic bytes closing a cyclic data frame
pub const DATA_FOOTER: [u8; 4] = [0xF8, 0xF7, 0xF6, 0xF5];

/// Size of the header and footer magic
pub const HEADER_SIZE: usize = 4;
/// Size of the little-endian body length field
pub const LENGTH_SIZE: usize = 2;
/// Size of the footer magic
pub const FOOTER_SIZE: usize = 4;

/// Declared body lengths at or above this value are treated as corrupt
pub const MAX_FRAME_BODYLEN: usize = 40;

/// Number of range gates the module reports on
pub const GATE_COUNT: usize = 9;

/// Bit set on the echoed command word of every ACK
pub const ACK_FLAG: u16 = 0x0100;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Timed out waiting for frame")]
    Timeout,

    #[error("Transmit slot busy")]
    Busy,

    #[error("Declared body length {0} exceeds maximum")]
    BadLength(u16),

    #[error("Footer mismatch: expected {expected:#010X}, got {actual:#010X}")]
    FooterMismatch { expected: u32, actual: u32 },

    #[error("Bad response to command {command:#06X}: echo {echo:#06X}, status {status:#06X}")]
    BadResponse { command: u16, echo: u16, status: u16 },

    #[error("Bad message: {0}")]
    BadMessage(String),

    #[error("Payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),

    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport not connected")]
    NotConnected,
}

/// The two frame families sharing the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Unsolicited radar measurement ("cyclic data")
    Data,
    /// Command acknowledgement
    Ack,
}

impl FrameType {
    /// Header magic for this family
    #[must_use]
    pub fn header(self) -> [u8; 4] {
        match self {
            FrameType::Data => DATA_HEADER,
            FrameType::Ack => CMD_HEADER,
        }
    }

    /// Footer magic for this family
    #[must_use]
    pub fn footer(self) -> [u8; 4] {
        match self {
            FrameType::Data => DATA_FOOTER,
            FrameType::Ack => CMD_FOOTER,
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameType::Data => write!(f, "data"),
            FrameType::Ack => write!(f, "ack"),
        }
    }
}

/// Read a little-endian u16 at `offset`, if present
pub(crate) fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}
