//! Handler module - service handlers and the service registry.
//!
//! Provides:
//! - [`UnaryHandler`] / [`StreamingHandler`] - the contracts host-side
//!   business logic implements
//! - [`unary_fn`], [`streaming_fn`], [`from_stream`], [`typed_unary`],
//!   [`typed_streaming`] - adapters from closures
//! - [`ServiceBuilder`] - routes calls to per-method handlers
//! - [`ServiceRegistry`] - maps service names to [`Service`] bundles
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::handler::{typed_unary, typed_streaming, ServiceBuilder, ServiceRegistry};
//!
//! let echo = ServiceBuilder::new("echo")
//!     .method("say", typed_unary(|_method, text: String| async move { Ok(text) }))
//!     .build();
//!
//! let counter = ServiceBuilder::new("counter")
//!     .stream("tick", typed_streaming(|_method, n: u32, emitter, _id| async move {
//!         for i in 1..=n {
//!             emitter.send(MsgPackCodec::encode_bytes(&i)?).await;
//!         }
//!         emitter.finish(Bytes::new()).await;
//!         Ok(())
//!     }))
//!     .build();
//!
//! let mut services = ServiceRegistry::new();
//! services.register("echo", echo);
//! services.register("counter", counter);
//! ```

mod registry;
mod typed;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::BoxError;
use crate::request::{Emitter, RequestId};

pub use registry::{Service, ServiceBuilder, ServiceRegistry};
pub use typed::{
    from_stream, streaming_fn, typed_streaming, typed_unary, unary_fn, StreamFn, StreamingFn,
    TypedStreaming, TypedUnary, UnaryFn,
};

/// Boxed future for handler and callback results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler bodies. Any error converts with `?`.
pub type HandlerResult<T = ()> = std::result::Result<T, BoxError>;

/// Handler for one-shot calls.
pub trait UnaryHandler: Send + Sync + 'static {
    /// Handle `method` with an opaque message, producing one opaque response.
    fn call(&self, method: &str, message: Bytes) -> BoxFuture<'static, HandlerResult<Bytes>>;
}

/// Handler for streaming calls.
///
/// The handler produces output only through `emitter`, any number of
/// times, including after its returned future resolves. It should either
/// emit a response with `is_last = true` or stop once
/// [`Emitter::cancelled`] resolves.
pub trait StreamingHandler: Send + Sync + 'static {
    /// Start serving `method`.
    fn call(
        &self,
        method: &str,
        message: Bytes,
        emitter: Emitter,
        request_id: RequestId,
    ) -> BoxFuture<'static, HandlerResult>;
}
