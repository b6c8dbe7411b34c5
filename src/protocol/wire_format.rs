//! Wire format encoding and decoding.
//!
//! Implements the 5-byte header format:
//! ```text
//! ┌───────┬──────────┐
//! │ Kind  │ Length   │
//! │ 1 byte│ 4 bytes  │
//! │       │ uint32 BE│
//! └───────┴──────────┘
//! ```
//!
//! The payload that follows is a MessagePack map whose shape depends on the
//! kind (see [`super::message`]).

use crate::error::{BridgeError, Result};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Frame kinds.
///
/// The high bit marks frames written by the host.
pub mod kind {
    /// Unary call (caller to host).
    pub const CALL: u8 = 0x01;
    /// Streaming call (caller to host).
    pub const STREAM_CALL: u8 = 0x02;
    /// Cancel an active streaming call (caller to host).
    pub const CANCEL: u8 = 0x03;

    /// Unary result or error (host to caller).
    pub const UNARY_RESPONSE: u8 = 0x81;
    /// One streamed response (host to caller).
    pub const STREAM_RESPONSE: u8 = 0x82;
    /// Error reported for a streaming call (host to caller).
    pub const STREAM_ERROR: u8 = 0x83;

    /// Direction bit: set on host-written frames.
    pub const OUTBOUND_BIT: u8 = 0b1000_0000;

    /// Check whether `kind` is a known caller-to-host kind.
    #[inline]
    pub fn is_inbound(kind: u8) -> bool {
        matches!(kind, CALL | STREAM_CALL | CANCEL)
    }

    /// Check whether `kind` is a known host-to-caller kind.
    #[inline]
    pub fn is_outbound(kind: u8) -> bool {
        matches!(kind, UNARY_RESPONSE | STREAM_RESPONSE | STREAM_ERROR)
    }

    /// Human-readable name for logs.
    pub fn name(kind: u8) -> &'static str {
        match kind {
            CALL => "CALL",
            STREAM_CALL => "STREAM_CALL",
            CANCEL => "CANCEL",
            UNARY_RESPONSE => "UNARY_RESPONSE",
            STREAM_RESPONSE => "STREAM_RESPONSE",
            STREAM_ERROR => "STREAM_ERROR",
            _ => "UNKNOWN",
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame kind (see [`kind`]).
    pub kind: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: u8, payload_length: u32) -> Self {
        Self {
            kind,
            payload_length,
        }
    }

    /// Header for an outbound payload of `len` bytes.
    ///
    /// Fails with [`BridgeError::Protocol`] when `len` does not fit the
    /// 32-bit length field.
    pub fn for_payload(kind: u8, len: usize) -> Result<Self> {
        let payload_length = u32::try_from(len).map_err(|_| {
            BridgeError::Protocol(format!(
                "Payload size {} does not fit a frame (max {})",
                len,
                u32::MAX
            ))
        })?;
        Ok(Self::new(kind, payload_length))
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use hostbridge::protocol::{kind, Header};
    ///
    /// let bytes = Header::new(kind::CALL, 100).encode();
    /// assert_eq!(bytes, [0x01, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let [a, b, c, d] = self.payload_length.to_be_bytes();
        [self.kind, a, b, c, d]
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }

    /// Validate an inbound header.
    ///
    /// Checks:
    /// - Kind is a known caller-to-host kind
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if !kind::is_inbound(self.kind) {
            return Err(BridgeError::Protocol(format!(
                "Unknown frame kind 0x{:02X}",
                self.kind
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(BridgeError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn is_outbound(&self) -> bool {
        self.kind & kind::OUTBOUND_BIT != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_payload_fits() {
        let header = Header::for_payload(kind::STREAM_RESPONSE, 12).unwrap();
        assert_eq!(header, Header::new(kind::STREAM_RESPONSE, 12));
        assert!(Header::for_payload(kind::STREAM_RESPONSE, u32::MAX as usize).is_ok());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_for_payload_rejects_oversize() {
        let err = Header::for_payload(kind::UNARY_RESPONSE, u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(kind::STREAM_RESPONSE, 0x01020304);
        let bytes = header.encode();

        assert_eq!(bytes, [0x82, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(Header::decode(&bytes), Some(header));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 4];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_known_inbound_kinds() {
        for k in [kind::CALL, kind::STREAM_CALL, kind::CANCEL] {
            assert!(Header::new(k, 10).validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_unknown_and_outbound_kinds() {
        let err = Header::new(0x7F, 0).validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Unknown frame kind 0x7F"));

        assert!(Header::new(kind::UNARY_RESPONSE, 0)
            .validate(DEFAULT_MAX_PAYLOAD_SIZE)
            .is_err());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let result = Header::new(kind::CALL, 1_000_000).validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_direction_bit() {
        assert!(Header::new(kind::STREAM_ERROR, 0).is_outbound());
        assert!(!Header::new(kind::CANCEL, 0).is_outbound());
        assert!(kind::is_outbound(kind::UNARY_RESPONSE));
        assert_eq!(kind::name(kind::STREAM_CALL), "STREAM_CALL");
        assert_eq!(kind::name(0x42), "UNKNOWN");
    }
}
