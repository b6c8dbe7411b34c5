//! Adapters from closures to handler traits.
//!
//! The `typed_*` adapters decode the opaque message with MsgPack before
//! calling the closure, and `typed_unary` encodes its result the same way.

use std::future::Future;
use std::marker::PhantomData;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{BoxFuture, HandlerResult, StreamingHandler, UnaryHandler};
use crate::codec::MsgPackCodec;
use crate::request::{Emitter, RequestId};

/// Unary handler backed by a closure over raw bytes.
pub struct UnaryFn<F> {
    f: F,
}

/// Wrap `f(method, message)` as a [`UnaryHandler`].
pub fn unary_fn<F, Fut>(f: F) -> UnaryFn<F>
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Bytes>> + Send + 'static,
{
    UnaryFn { f }
}

impl<F, Fut> UnaryHandler for UnaryFn<F>
where
    F: Fn(String, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Bytes>> + Send + 'static,
{
    fn call(&self, method: &str, message: Bytes) -> BoxFuture<'static, HandlerResult<Bytes>> {
        Box::pin((self.f)(method.to_string(), message))
    }
}

/// Streaming handler backed by a closure over raw bytes.
pub struct StreamingFn<F> {
    f: F,
}

/// Wrap `f(method, message, emitter, request_id)` as a [`StreamingHandler`].
pub fn streaming_fn<F, Fut>(f: F) -> StreamingFn<F>
where
    F: Fn(String, Bytes, Emitter, RequestId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    StreamingFn { f }
}

impl<F, Fut> StreamingHandler for StreamingFn<F>
where
    F: Fn(String, Bytes, Emitter, RequestId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        method: &str,
        message: Bytes,
        emitter: Emitter,
        request_id: RequestId,
    ) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.f)(method.to_string(), message, emitter, request_id))
    }
}

/// Unary handler that decodes `T` and encodes `R` with MsgPack.
pub struct TypedUnary<F, T, R, Fut> {
    f: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

/// Wrap a typed closure `f(method, input) -> output` as a [`UnaryHandler`].
pub fn typed_unary<F, T, R, Fut>(f: F) -> TypedUnary<F, T, R, Fut>
where
    F: Fn(String, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    TypedUnary {
        f,
        _phantom: PhantomData,
    }
}

impl<F, T, R, Fut> UnaryHandler for TypedUnary<F, T, R, Fut>
where
    F: Fn(String, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    fn call(&self, method: &str, message: Bytes) -> BoxFuture<'static, HandlerResult<Bytes>> {
        let input: T = match MsgPackCodec::decode(&message) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e.into()) }),
        };

        let fut = (self.f)(method.to_string(), input);
        Box::pin(async move {
            let output = fut.await?;
            Ok(MsgPackCodec::encode_bytes(&output)?)
        })
    }
}

/// Streaming handler that decodes `T` with MsgPack.
pub struct TypedStreaming<F, T, Fut> {
    f: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

/// Wrap a typed closure `f(method, input, emitter, request_id)` as a
/// [`StreamingHandler`].
pub fn typed_streaming<F, T, Fut>(f: F) -> TypedStreaming<F, T, Fut>
where
    F: Fn(String, T, Emitter, RequestId) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    TypedStreaming {
        f,
        _phantom: PhantomData,
    }
}

impl<F, T, Fut> StreamingHandler for TypedStreaming<F, T, Fut>
where
    F: Fn(String, T, Emitter, RequestId) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        method: &str,
        message: Bytes,
        emitter: Emitter,
        request_id: RequestId,
    ) -> BoxFuture<'static, HandlerResult> {
        let input: T = match MsgPackCodec::decode(&message) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e.into()) }),
        };

        Box::pin((self.f)(method.to_string(), input, emitter, request_id))
    }
}

/// Streaming handler backed by a lazily produced sequence of responses.
pub struct StreamFn<F> {
    f: F,
}

/// Serve a streaming call from an async [`Stream`] of responses.
///
/// A fresh stream is built per call. Each item is emitted as it arrives;
/// when the stream ends an empty response with `is_last = true` marks the
/// end. Cancellation stops polling the stream. An item error ends the call
/// as a handler failure.
pub fn from_stream<F, S>(f: F) -> StreamFn<F>
where
    F: Fn(String, Bytes, RequestId) -> S + Send + Sync + 'static,
    S: Stream<Item = HandlerResult<Bytes>> + Send + 'static,
{
    StreamFn { f }
}

impl<F, S> StreamingHandler for StreamFn<F>
where
    F: Fn(String, Bytes, RequestId) -> S + Send + Sync + 'static,
    S: Stream<Item = HandlerResult<Bytes>> + Send + 'static,
{
    fn call(
        &self,
        method: &str,
        message: Bytes,
        emitter: Emitter,
        request_id: RequestId,
    ) -> BoxFuture<'static, HandlerResult> {
        let stream = (self.f)(method.to_string(), message, request_id);

        Box::pin(async move {
            let mut stream = Box::pin(stream);
            let mut sequence = 0u64;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = emitter.cancelled() => return Ok(()),
                    item = stream.next() => item,
                };

                match next {
                    Some(Ok(response)) => {
                        emitter.emit(response, false, Some(sequence)).await;
                        sequence += 1;
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }

            emitter.emit(Bytes::new(), true, Some(sequence)).await;
            Ok(())
        })
    }
}
