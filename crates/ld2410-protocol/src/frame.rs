//! LD2410 frame structure and ACK handling

use crate::commands::CommandId;
use crate::types::{
    le_u16, FrameType, ProtocolError, CMD_FOOTER, CMD_HEADER, FOOTER_SIZE, HEADER_SIZE,
    LENGTH_SIZE, MAX_FRAME_BODYLEN,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the command word plus status word at the start of an ACK body
pub const ACK_PREAMBLE_SIZE: usize = 4;

/// A complete, validated frame
///
/// Wire format:
/// ```text
/// [Header magic: 4 bytes]
/// [Body length: 2 bytes LE]
/// [Body: body length bytes]
/// [Footer magic: 4 bytes]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub body: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(frame_type: FrameType, body: Bytes) -> Self {
        Self { frame_type, body }
    }

    /// Build the wire bytes of a host command
    pub fn encode_command(command: CommandId, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        encode(FrameType::Ack, &command.code().to_le_bytes(), payload)
    }
}

fn encode(frame_type: FrameType, prefix: &[u8], payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let body_len = prefix.len() + payload.len();
    if body_len >= MAX_FRAME_BODYLEN {
        return Err(ProtocolError::PayloadTooLarge(body_len));
    }

    let mut data = BytesMut::with_capacity(HEADER_SIZE + LENGTH_SIZE + body_len + FOOTER_SIZE);
    data.put_slice(&frame_type.header());
    // Bounded by MAX_FRAME_BODYLEN above
    data.put_u16_le(body_len as u16);
    data.put_slice(prefix);
    data.put_slice(payload);
    data.put_slice(&frame_type.footer());
    Ok(data.freeze())
}

/// Command acknowledgement decoded from an ACK frame body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Echoed command word, including the 0x0100 ACK flag
    pub command: u16,
    /// Status word, zero on success
    pub status: u16,
    /// Command-specific response data
    pub payload: Bytes,
}

impl Ack {
    /// Split an ACK frame into echo, status and payload
    pub fn parse(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.frame_type != FrameType::Ack {
            return Err(ProtocolError::BadMessage(format!(
                "expected ack frame, got {}",
                frame.frame_type
            )));
        }
        let (Some(command), Some(status)) = (le_u16(&frame.body, 0), le_u16(&frame.body, 2)) else {
            return Err(ProtocolError::BadMessage(format!(
                "ack body too short: {} bytes",
                frame.body.len()
            )));
        };

        Ok(Self {
            command,
            status,
            payload: frame.body.slice(ACK_PREAMBLE_SIZE..),
        })
    }

    /// Check that this ACK answers `command` and reports success
    pub fn check(&self, command: CommandId) -> Result<(), ProtocolError> {
        if self.command != command.ack_code() || self.status != 0 {
            return Err(ProtocolError::BadResponse {
                command: command.code(),
                echo: self.command,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Serialize an ACK as the module would send it
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let mut prefix = [0u8; ACK_PREAMBLE_SIZE];
        prefix[..2].copy_from_slice(&self.command.to_le_bytes());
        prefix[2..].copy_from_slice(&self.status.to_le_bytes());
        encode(FrameType::Ack, &prefix, &self.payload)
    }
}

/// Return the command word of a serialized host command, if it is one
#[must_use]
pub fn command_word(wire: &[u8]) -> Option<u16> {
    if wire.get(..HEADER_SIZE)? != &CMD_HEADER[..] {
        return None;
    }
    let body_len = le_u16(wire, HEADER_SIZE)? as usize;
    let footer_at = HEADER_SIZE + LENGTH_SIZE + body_len;
    if wire.get(footer_at..footer_at + FOOTER_SIZE)? != &CMD_FOOTER[..] {
        return None;
    }
    le_u16(wire, HEADER_SIZE + LENGTH_SIZE)
}
