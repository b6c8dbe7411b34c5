//! Typed frame payloads.
//!
//! Every payload is a MessagePack map with named fields:
//!
//! | Kind | Payload |
//! |---|---|
//! | `CALL`, `STREAM_CALL` | `{service, method, message, request_id}` |
//! | `CANCEL` | `{request_id}` |
//! | `UNARY_RESPONSE` | `{request_id, message}` or `{request_id, error}` |
//! | `STREAM_RESPONSE` | `{request_id, response, isLast, sequenceNumber?}` |
//! | `STREAM_ERROR` | `{request_id, error}` |

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::wire_format::{kind, Header};
use super::Frame;
use crate::codec::MsgPackCodec;
use crate::dispatcher::{CallDescriptor, UnaryResponse};
use crate::error::{BridgeError, Result};
use crate::request::{RequestId, StreamResponse};

/// Payload of a `CANCEL` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMessage {
    pub request_id: RequestId,
}

/// Payload of a `STREAM_RESPONSE` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub request_id: RequestId,
    pub response: Bytes,
    #[serde(rename = "isLast")]
    pub is_last: bool,
    #[serde(
        rename = "sequenceNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence_number: Option<u64>,
}

impl StreamMessage {
    pub fn new(request_id: RequestId, response: StreamResponse) -> Self {
        Self {
            request_id,
            response: response.response,
            is_last: response.is_last,
            sequence_number: response.sequence_number,
        }
    }

    /// The response as delivered to the observer.
    pub fn into_response(self) -> StreamResponse {
        StreamResponse {
            response: self.response,
            is_last: self.is_last,
            sequence_number: self.sequence_number,
        }
    }
}

/// Payload of a `STREAM_ERROR` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorMessage {
    pub request_id: RequestId,
    pub error: String,
}

/// A decoded caller-to-host frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Call(CallDescriptor),
    StreamCall(CallDescriptor),
    Cancel(CancelMessage),
}

impl Inbound {
    /// Decode an inbound frame, rejecting host-to-caller and unknown kinds.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.kind() {
            kind::CALL => Ok(Self::Call(frame.decode()?)),
            kind::STREAM_CALL => Ok(Self::StreamCall(frame.decode()?)),
            kind::CANCEL => Ok(Self::Cancel(frame.decode()?)),
            other => Err(BridgeError::Protocol(format!(
                "Unexpected inbound frame kind {} (0x{:02X})",
                kind::name(other),
                other
            ))),
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Self::Call(_) => kind::CALL,
            Self::StreamCall(_) => kind::STREAM_CALL,
            Self::Cancel(_) => kind::CANCEL,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Call(call) | Self::StreamCall(call) => &call.request_id,
            Self::Cancel(cancel) => &cancel.request_id,
        }
    }

    /// Encode as a complete frame (used by callers and tests).
    pub fn to_frame_bytes(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Call(call) | Self::StreamCall(call) => MsgPackCodec::encode(call)?,
            Self::Cancel(cancel) => MsgPackCodec::encode(cancel)?,
        };
        let header = Header::for_payload(self.kind(), payload.len())?;
        Ok(Frame::new(header, Bytes::from(payload)).to_bytes())
    }
}

/// A host-to-caller message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Unary(UnaryResponse),
    Stream(StreamMessage),
    StreamError(StreamErrorMessage),
}

impl Outbound {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Unary(_) => kind::UNARY_RESPONSE,
            Self::Stream(_) => kind::STREAM_RESPONSE,
            Self::StreamError(_) => kind::STREAM_ERROR,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Unary(resp) => resp.request_id(),
            Self::Stream(msg) => &msg.request_id,
            Self::StreamError(msg) => &msg.request_id,
        }
    }

    /// Encode the payload with MsgPack.
    pub fn encode_payload(&self) -> Result<Bytes> {
        match self {
            Self::Unary(resp) => MsgPackCodec::encode_bytes(resp),
            Self::Stream(msg) => MsgPackCodec::encode_bytes(msg),
            Self::StreamError(msg) => MsgPackCodec::encode_bytes(msg),
        }
    }

    /// Decode an outbound frame (the caller's side of the protocol).
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.kind() {
            kind::UNARY_RESPONSE => Ok(Self::Unary(frame.decode()?)),
            kind::STREAM_RESPONSE => Ok(Self::Stream(frame.decode()?)),
            kind::STREAM_ERROR => Ok(Self::StreamError(frame.decode()?)),
            other => Err(BridgeError::Protocol(format!(
                "Unexpected outbound frame kind {} (0x{:02X})",
                kind::name(other),
                other
            ))),
        }
    }

    /// Header for an encoded payload of this message.
    pub fn header(&self, payload: &Bytes) -> Result<Header> {
        Header::for_payload(self.kind(), payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;

    fn single_frame(bytes: &[u8]) -> Frame {
        let mut buffer = FrameBuffer::new();
        let mut frames = buffer.push(bytes).unwrap();
        assert_eq!(frames.len(), 1);
        frames.remove(0)
    }

    #[test]
    fn test_inbound_call_through_frame() {
        let call = CallDescriptor::new("echo", "say", Bytes::from_static(b"hi"), "r1");
        let bytes = Inbound::StreamCall(call.clone()).to_frame_bytes().unwrap();

        let frame = single_frame(&bytes);
        assert!(frame.is_stream_call());
        assert_eq!(Inbound::from_frame(&frame).unwrap(), Inbound::StreamCall(call));
    }

    #[test]
    fn test_inbound_rejects_outbound_kind() {
        let frame = Frame::new(Header::new(kind::STREAM_ERROR, 0), Bytes::new());
        assert!(Inbound::from_frame(&frame).is_err());
    }

    #[test]
    fn test_inbound_garbage_payload() {
        let bytes = super::super::build_frame(kind::CANCEL, &[0xC1]);
        let frame = single_frame(&bytes);

        let err = Inbound::from_frame(&frame).unwrap_err();
        assert!(matches!(err, BridgeError::MsgPackDecode(_)));
    }

    #[test]
    fn test_stream_message_field_names() {
        #[derive(Deserialize)]
        struct Raw {
            request_id: String,
            #[serde(rename = "isLast")]
            is_last: bool,
            #[serde(rename = "sequenceNumber")]
            sequence_number: u64,
        }

        let msg = StreamMessage::new(
            "r7".into(),
            StreamResponse::new(Bytes::from_static(b"x"), true).with_sequence(3),
        );
        let payload = Outbound::Stream(msg).encode_payload().unwrap();

        let raw: Raw = MsgPackCodec::decode(&payload).unwrap();
        assert_eq!(raw.request_id, "r7");
        assert!(raw.is_last);
        assert_eq!(raw.sequence_number, 3);
    }

    #[test]
    fn test_outbound_unary_error_shape() {
        let out = Outbound::Unary(UnaryResponse::failure("r1", "Unknown service: nope"));
        let payload = out.encode_payload().unwrap();
        let frame = Frame::new(out.header(&payload).unwrap(), payload);

        match Outbound::from_frame(&frame).unwrap() {
            Outbound::Unary(resp) => {
                assert_eq!(resp.request_id().as_str(), "r1");
                assert_eq!(resp.error(), Some("Unknown service: nope"));
                assert!(resp.message().is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
