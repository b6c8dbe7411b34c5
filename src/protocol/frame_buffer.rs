//! Reassembles frames from arbitrary read chunks.
//!
//! Reads from a pipe or socket split frames anywhere, including inside the
//! 5-byte header. [`FrameBuffer`] keeps the leftover bytes between pushes and
//! remembers a header once it has been read, so each byte is inspected once.
//!
//! Kinds are not checked here; the host validates each extracted frame so
//! that an unknown kind costs one frame, not the connection. An oversize
//! length is fatal because the stream cannot be resynchronized, and the
//! buffer refuses every later push.

use bytes::{Buf, BytesMut};

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{BridgeError, Result};

const INITIAL_CAPACITY: usize = 64 * 1024;

/// Incremental frame decoder for one inbound byte stream.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    // Header of the frame whose payload is still arriving.
    pending: Option<Header>,
    max_payload_size: u32,
    failed: bool,
}

impl FrameBuffer {
    /// Decoder accepting payloads up to [`DEFAULT_MAX_PAYLOAD_SIZE`].
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            pending: None,
            max_payload_size,
            failed: false,
        }
    }

    /// Append `data` and return every frame it completes, in order.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Protocol`] when a header announces a payload over the
    /// limit, and on every push after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        if self.failed {
            return Err(BridgeError::Protocol(
                "frame stream is desynchronized".to_string(),
            ));
        }
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            let header = match self.pending.take() {
                Some(header) => header,
                None => match self.read_header()? {
                    Some(header) => header,
                    None => break,
                },
            };

            let len = header.payload_length as usize;
            if self.buffer.len() < len {
                self.pending = Some(header);
                break;
            }
            frames.push(Frame::new(header, self.buffer.split_to(len).freeze()));
        }

        Ok(frames)
    }

    fn read_header(&mut self) -> Result<Option<Header>> {
        let Some(header) = Header::decode(&self.buffer) else {
            return Ok(None);
        };

        if header.payload_length > self.max_payload_size {
            self.failed = true;
            return Err(BridgeError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                header.payload_length, self.max_payload_size
            )));
        }

        self.buffer.advance(HEADER_SIZE);
        Ok(Some(header))
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn len(&self) -> usize {
        self.buffer.len() + self.pending.map_or(0, |_| HEADER_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes still missing for the frame in progress, if its header
    /// has arrived.
    pub fn awaiting_payload(&self) -> Option<usize> {
        self.pending
            .map(|header| (header.payload_length as usize).saturating_sub(self.buffer.len()))
    }

    /// Drop buffered bytes and any failure, starting over at a frame boundary.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending = None;
        self.failed = false;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
