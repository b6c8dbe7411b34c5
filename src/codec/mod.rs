//! Codec module - payload serialization helpers.
//!
//! The dispatch core treats every message as opaque [`bytes::Bytes`]. The
//! codec is only used where structure is needed: wire messages exchanged by
//! the [`Host`](crate::host::Host), typed handler adapters, and the
//! cancellation acknowledgment.
//!
//! # Example
//!
//! ```
//! use hostbridge::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
