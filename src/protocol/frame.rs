//! One decoded frame: header plus MessagePack payload.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::wire_format::{kind, Header, HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// A frame as cut out of the byte stream by
/// [`FrameBuffer`](super::FrameBuffer). The payload shares the read buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deserialize the payload as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }

    /// Whether the frame opens a stream rather than a unary call.
    #[inline]
    pub fn is_stream_call(&self) -> bool {
        self.kind() == kind::STREAM_CALL
    }

    /// Serialize back to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Wire bytes for a hand-built frame of `kind` carrying `payload`.
///
/// No kind or length checks; meant for fixtures, including malformed ones.
/// Encoders go through [`Header::for_payload`].
///
/// ```
/// use hostbridge::protocol::{build_frame, kind};
///
/// let bytes = build_frame(kind::CANCEL, b"abc");
/// assert_eq!(bytes, [kind::CANCEL, 0, 0, 0, 3, b'a', b'b', b'c']);
/// ```
pub fn build_frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    Frame::new(
        Header::new(kind, payload.len() as u32),
        Bytes::copy_from_slice(payload),
    )
    .to_bytes()
}
