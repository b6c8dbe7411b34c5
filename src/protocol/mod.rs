//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the binary protocol spoken by [`crate::host`]:
//! - 5-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Typed MsgPack payloads for each frame kind

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{CancelMessage, Inbound, Outbound, StreamErrorMessage, StreamMessage};
pub use wire_format::{kind, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
