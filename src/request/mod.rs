//! Request module - in-flight call tracking and streaming delivery.
//!
//! Provides:
//! - [`RequestRegistry`] - maps correlation ids to their active stream
//! - [`Emitter`] - the only way a streaming handler produces output
//! - [`StreamObserver`] - the caller's view of a stream (`on_response`,
//!   `on_complete`, `on_error`)
//! - [`StreamHandle`] - cancellation handle returned for every streaming call
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::request::{response_channel, Emitter, RequestId, RequestRegistry};
//!
//! let registry = RequestRegistry::new();
//! let (observer, mut events) = response_channel(16);
//! let emitter = Emitter::new(RequestId::from("r1"), Arc::new(observer), &registry);
//!
//! registry.register_request("r1".into(), emitter.cleanup(), metadata, emitter.clone());
//! emitter.emit(Bytes::from_static(b"1"), false, Some(0)).await;
//!
//! assert!(registry.cancel_request("r1").await?);
//! ```

mod id;
mod observer;
mod registry;
mod stream;

pub use id::{RequestId, RequestKind, RequestMetadata};
pub use observer::{response_channel, ChannelObserver, ResponseStream, StreamCallbacks, StreamEvent};
pub use registry::{Cleanup, RegistryEntry, RequestInfo, RequestRegistry};
pub use stream::{
    CancelAck, Emitter, StreamHandle, StreamObserver, StreamResponse, Termination,
};
