//! Frame buffer and resynchronizer
//!
//! The UART delivers an unstructured byte stream carrying two frame families.
//! [`FrameBuffer`] accumulates bytes for one awaited family, locates its
//! header, validates length and footer, and recovers from garbage by sliding
//! or discarding its contents. It never holds more than its capacity and
//! never blocks, so it can run inside the RX handler.

use crate::frame::Frame;
use crate::types::{
    le_u16, FrameType, ProtocolError, FOOTER_SIZE, HEADER_SIZE, LENGTH_SIZE, MAX_FRAME_BODYLEN,
};
use bytes::{Buf, BufMut, BytesMut};

/// Accumulator capacity: the largest frame that may be accepted
pub const FRAME_BUFFER_CAPACITY: usize = HEADER_SIZE + LENGTH_SIZE + MAX_FRAME_BODYLEN + FOOTER_SIZE;

/// Outcome of feeding bytes into the buffer
#[derive(Debug)]
pub enum FrameResult {
    /// No complete frame yet, keep feeding
    Incomplete,
    /// A validated frame of the awaited family
    Complete(Frame),
    /// A corrupt frame was dropped and the buffer reset
    Rejected(ProtocolError),
}

/// Fixed-capacity receive accumulator
pub struct FrameBuffer {
    buffer: BytesMut,
    capacity: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Create an empty buffer with [`FRAME_BUFFER_CAPACITY`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(FRAME_BUFFER_CAPACITY)
    }

    /// Create an empty buffer with a larger capacity
    ///
    /// Capacities below [`FRAME_BUFFER_CAPACITY`] are raised to it.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(FRAME_BUFFER_CAPACITY);
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Feed bytes from `src`, looking for a frame of `expected` type
    ///
    /// Bytes are consumed from `src` only up to the end of the first frame
    /// that completes or is rejected, so anything after it stays in `src` for
    /// the next call.
    pub fn feed<B: Buf>(&mut self, src: &mut B, expected: FrameType) -> FrameResult {
        let header = expected.header();

        while src.has_remaining() {
            self.buffer.put_u8(src.get_u8());

            if !self.buffer.starts_with(&header) {
                self.resync(&header);
                continue;
            }

            let Some(body_len) = le_u16(&self.buffer, HEADER_SIZE) else {
                continue;
            };
            if body_len as usize >= MAX_FRAME_BODYLEN {
                tracing::debug!("Discarding {} frame with body length {}", expected, body_len);
                self.buffer.clear();
                return FrameResult::Rejected(ProtocolError::BadLength(body_len));
            }

            let body_end = HEADER_SIZE + LENGTH_SIZE + body_len as usize;
            if self.buffer.len() < body_end + FOOTER_SIZE {
                continue;
            }

            return self.finish(expected, body_end);
        }

        FrameResult::Incomplete
    }

    /// Slide the buffer so a header found past offset 0 moves to the front,
    /// or compact it when full without any header
    fn resync(&mut self, header: &[u8; 4]) {
        let len = self.buffer.len();
        if len < HEADER_SIZE {
            return;
        }

        if let Some(offset) = self
            .buffer
            .windows(HEADER_SIZE)
            .position(|window| window == header)
        {
            tracing::debug!("Skipping {} bytes before frame header", offset);
            self.buffer.advance(offset);
        } else if len >= self.capacity {
            // Keep the tail in case a header straddles the boundary
            self.buffer.advance(len - HEADER_SIZE);
        }
    }

    fn finish(&mut self, expected: FrameType, body_end: usize) -> FrameResult {
        let footer = expected.footer();
        let raw = self.buffer.split().freeze();
        let received = &raw[body_end..body_end + FOOTER_SIZE];

        if received != &footer[..] {
            let actual = u32::from_le_bytes([received[0], received[1], received[2], received[3]]);
            tracing::debug!("Discarding {} frame: footer {:02X?}", expected, received);
            return FrameResult::Rejected(ProtocolError::FooterMismatch {
                expected: u32::from_le_bytes(footer),
                actual,
            });
        }

        let body = raw.slice(HEADER_SIZE + LENGTH_SIZE..body_end);
        FrameResult::Complete(Frame::new(expected, body))
    }

    /// Drop everything accumulated so far
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
