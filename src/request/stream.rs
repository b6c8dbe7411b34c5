//! Streaming adapter: turns a handler's emissions into observer callbacks.
//!
//! Every streaming call owns one adapter. The adapter enforces that
//! `on_complete` fires at most once, whether the stream ends because the
//! handler emitted its last response or because the call was cancelled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::registry::{Cleanup, RequestRegistry, WeakRegistry};
use super::RequestId;
use crate::codec::MsgPackCodec;
use crate::error::{BoxError, BridgeError, Result};
use crate::handler::BoxFuture;

/// One response produced by a streaming handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    /// Opaque response payload.
    pub response: Bytes,
    /// Whether the handler marked this as the final response.
    pub is_last: bool,
    /// Informational only; never used for reordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

impl StreamResponse {
    /// Create a response without a sequence number.
    pub fn new(response: impl Into<Bytes>, is_last: bool) -> Self {
        Self {
            response: response.into(),
            is_last,
            sequence_number: None,
        }
    }

    /// Attach a sequence number.
    pub fn with_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    /// Final acknowledgment delivered when a still-open stream is cancelled.
    pub fn cancelled() -> Result<Self> {
        let payload = MsgPackCodec::encode_bytes(&CancelAck { cancelled: true })?;
        Ok(Self::new(payload, true))
    }

    /// Check whether this response is a cancellation acknowledgment.
    pub fn is_cancel_ack(&self) -> bool {
        self.is_last
            && MsgPackCodec::decode::<CancelAck>(&self.response)
                .map(|ack| ack.cancelled)
                .unwrap_or(false)
    }
}

/// Payload of the cancellation acknowledgment (`{cancelled: true}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub cancelled: bool,
}

/// Why a stream stopped.
///
/// A handler returning is not one of these: the stream stays open for
/// later emissions until one of them happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The handler emitted a response with `is_last = true`.
    Completed,
    /// The call was cancelled before completing.
    Cancelled,
    /// The call could not be served or its handler failed. The error was
    /// delivered through `on_error` first.
    Failed,
}

/// The caller's side of a streaming call.
///
/// Only `on_response` is required. The defaults for `on_complete` and
/// `on_error` do nothing, which is how a caller opts out of them.
pub trait StreamObserver: Send + Sync + 'static {
    /// Receive one response. An error is reported back through `on_error`.
    fn on_response(&self, response: StreamResponse) -> BoxFuture<'_, std::result::Result<(), BoxError>>;

    /// The stream ended. Called at most once per call.
    fn on_complete(&self, termination: Termination) -> BoxFuture<'_, std::result::Result<(), BoxError>> {
        let _ = termination;
        Box::pin(async { Ok(()) })
    }

    /// An error occurred while serving the call.
    fn on_error(&self, error: BridgeError) -> BoxFuture<'_, ()> {
        drop(error);
        Box::pin(async {})
    }
}

/// Per-call adapter state shared by every clone of an [`Emitter`].
struct StreamAdapter {
    request_id: RequestId,
    observer: Arc<dyn StreamObserver>,
    completed: AtomicBool,
    token: CancellationToken,
    // Serializes deliveries so responses reach the observer in emit order.
    delivery: Mutex<()>,
    registry: WeakRegistry,
}

impl StreamAdapter {
    async fn report(&self, error: BridgeError) {
        tracing::debug!(request_id = %self.request_id, "stream error: {}", error);
        self.observer.on_error(error).await;
    }

    /// Natural end of stream: signal completion once and drop our registry entry.
    async fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.registry
            .release_entry(&self.request_id, self as *const StreamAdapter as *const ());

        if let Err(err) = self.observer.on_complete(Termination::Completed).await {
            self.report(BridgeError::CallbackFailure(err)).await;
        }
    }

    /// Error path: report `error`, then close the stream unless it already ended.
    async fn fail(&self, error: BridgeError) {
        self.token.cancel();
        let _guard = self.delivery.lock().await;

        if self.completed.swap(true, Ordering::AcqRel) {
            self.report(error).await;
            return;
        }

        self.registry
            .release_entry(&self.request_id, self as *const StreamAdapter as *const ());
        self.report(error).await;

        if let Err(err) = self.observer.on_complete(Termination::Failed).await {
            self.report(BridgeError::CallbackFailure(err)).await;
        }
    }

    /// Cleanup path: stop the handler and resolve the observer exactly once.
    async fn cancel(&self) -> std::result::Result<(), BoxError> {
        self.token.cancel();

        if self.completed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // A response already inside on_response lands before the ack.
        let _guard = self.delivery.lock().await;

        match StreamResponse::cancelled() {
            Ok(ack) => {
                if let Err(err) = self.observer.on_response(ack).await {
                    tracing::warn!(
                        request_id = %self.request_id,
                        "failed to deliver cancellation acknowledgment: {}",
                        err
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    "failed to encode cancellation acknowledgment: {}",
                    err
                );
            }
        }

        self.observer.on_complete(Termination::Cancelled).await
    }
}

/// Handle a streaming handler uses to emit responses.
///
/// Cheap to clone; all clones feed the same stream. Emissions made after the
/// call was cancelled are dropped, so a handler that ignores cancellation
/// keeps running harmlessly until it returns.
#[derive(Clone)]
pub struct Emitter(Arc<StreamAdapter>);

impl Emitter {
    /// Create the emitter for a new stream whose entry lives in `registry`.
    pub fn new(
        request_id: RequestId,
        observer: Arc<dyn StreamObserver>,
        registry: &RequestRegistry,
    ) -> Self {
        Self(Arc::new(StreamAdapter {
            request_id,
            observer,
            completed: AtomicBool::new(false),
            token: CancellationToken::new(),
            delivery: Mutex::new(()),
            registry: registry.downgrade(),
        }))
    }

    /// Correlation id of the stream.
    #[inline]
    pub fn request_id(&self) -> &RequestId {
        &self.0.request_id
    }

    /// Whether the call has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.token.is_cancelled()
    }

    /// Whether completion (natural or cancelled) has been signalled.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.0.completed.load(Ordering::Acquire)
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        self.0.token.cancelled().await
    }

    /// Stop a stream that lost its registry entry to a newer call.
    ///
    /// The handler sees cancellation and later emissions are dropped. The
    /// observer gets no ack and no `on_complete`; it belongs to a caller
    /// that already reused the id.
    pub(crate) fn abandon(&self) {
        self.0.token.cancel();
    }

    /// Emit one response.
    ///
    /// Delivers to `on_response`; with `is_last` set this also signals
    /// completion, once. Callback failures go to `on_error` and never back
    /// to the handler.
    pub async fn emit(&self, response: Bytes, is_last: bool, sequence_number: Option<u64>) {
        let adapter = &self.0;

        if adapter.token.is_cancelled() {
            tracing::debug!(request_id = %adapter.request_id, "dropping emission after cancellation");
            return;
        }

        let _guard = adapter.delivery.lock().await;

        // Cancellation may have landed while we waited for our turn.
        if adapter.token.is_cancelled() {
            tracing::debug!(request_id = %adapter.request_id, "dropping emission after cancellation");
            return;
        }

        let response = StreamResponse {
            response,
            is_last,
            sequence_number,
        };

        if let Err(err) = adapter.observer.on_response(response).await {
            adapter.report(BridgeError::CallbackFailure(err)).await;
        }

        if is_last {
            adapter.complete().await;
        }
    }

    /// Emit an intermediate response.
    pub async fn send(&self, response: impl Into<Bytes>) {
        self.emit(response.into(), false, None).await
    }

    /// Emit the final response.
    pub async fn finish(&self, response: impl Into<Bytes>) {
        self.emit(response.into(), true, None).await
    }

    /// End the stream with an error.
    ///
    /// `error` goes to `on_error`; if the stream was still open it then
    /// closes with [`Termination::Failed`] and releases its registry entry.
    /// Later emissions are dropped.
    pub async fn fail(&self, error: BridgeError) {
        self.0.fail(error).await
    }

    /// Cleanup to register alongside this emitter.
    ///
    /// Running it cancels the token, delivers the cancellation
    /// acknowledgment and calls `on_complete(Cancelled)` unless the stream
    /// already completed. Errors from `on_complete` are returned.
    pub fn cleanup(&self) -> Cleanup {
        let adapter = self.0.clone();
        Cleanup::new(move || async move { adapter.cancel().await })
    }

    /// Whether two emitters feed the same stream.
    #[inline]
    pub fn same_stream(&self, other: &Emitter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn is_adapter(&self, adapter: *const ()) -> bool {
        Arc::as_ptr(&self.0) as *const () == adapter
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("request_id", &self.0.request_id)
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Returned for every streaming call; the caller's cancel handle.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    request_id: RequestId,
    registry: RequestRegistry,
    emitter: Emitter,
}

impl StreamHandle {
    pub(crate) fn new(request_id: RequestId, registry: RequestRegistry, emitter: Emitter) -> Self {
        Self {
            request_id,
            registry,
            emitter,
        }
    }

    /// Correlation id of the call.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Cancel the call. Same semantics as [`RequestRegistry::cancel_request`].
    pub async fn cancel(&self) -> Result<bool> {
        self.registry.cancel_request(self.request_id.as_str()).await
    }

    /// Whether this call still owns the registry entry for its id.
    pub fn is_active(&self) -> bool {
        self.registry
            .get_request_info(self.request_id.as_str())
            .map(|info| info.emitter.same_stream(&self.emitter))
            .unwrap_or(false)
    }

    /// Whether the stream has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.emitter.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{response_channel, RequestMetadata, StreamCallbacks, StreamEvent};
    use std::sync::atomic::AtomicUsize;

    fn counting_observer() -> (Arc<StreamCallbacks>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let responses = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let r = responses.clone();
        let c = completions.clone();
        let observer = StreamCallbacks::new(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (Arc::new(observer), responses, completions)
    }

    #[tokio::test]
    async fn test_complete_fires_once_for_repeated_last() {
        let registry = RequestRegistry::new();
        let (observer, responses, completions) = counting_observer();
        let emitter = Emitter::new("r1".into(), observer, &registry);

        emitter.emit(Bytes::from_static(b"a"), true, None).await;
        emitter.emit(Bytes::from_static(b"b"), true, None).await;

        assert_eq!(responses.load(Ordering::SeqCst), 2);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(emitter.is_completed());
    }

    #[tokio::test]
    async fn test_cleanup_after_completion_does_not_complete_again() {
        let registry = RequestRegistry::new();
        let (observer, _responses, completions) = counting_observer();
        let emitter = Emitter::new("r1".into(), observer, &registry);

        emitter.finish(Bytes::from_static(b"done")).await;
        emitter.cleanup().run().await.unwrap();

        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_delivers_ack_then_closes() {
        let registry = RequestRegistry::new();
        let (observer, mut events) = response_channel(8);
        let emitter = Emitter::new("r1".into(), Arc::new(observer), &registry);

        emitter.cleanup().run().await.unwrap();
        assert!(emitter.is_cancelled());

        match events.next_event().await {
            Some(StreamEvent::Response(resp)) => assert!(resp.is_cancel_ack()),
            other => panic!("expected ack, got {:?}", other),
        }
        assert!(matches!(
            events.next_event().await,
            Some(StreamEvent::Closed(Termination::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_emit_after_cancel_is_dropped() {
        let registry = RequestRegistry::new();
        let (observer, responses, completions) = counting_observer();
        let emitter = Emitter::new("r1".into(), observer, &registry);

        emitter.cleanup().run().await.unwrap();
        let after_cancel = responses.load(Ordering::SeqCst);

        emitter.send(Bytes::from_static(b"late")).await;
        emitter.finish(Bytes::from_static(b"later")).await;

        assert_eq!(responses.load(Ordering::SeqCst), after_cancel);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_failure_routed_to_on_error() {
        let registry = RequestRegistry::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        let observer = StreamCallbacks::new(|_| Err("ui exploded".into())).on_error(move |err| {
            assert!(matches!(err, BridgeError::CallbackFailure(_)));
            e.fetch_add(1, Ordering::SeqCst);
        });
        let emitter = Emitter::new("r1".into(), Arc::new(observer), &registry);

        emitter.send(Bytes::from_static(b"x")).await;
        emitter.finish(Bytes::from_static(b"y")).await;

        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert!(emitter.is_completed());
    }

    #[tokio::test]
    async fn test_callback_failure_without_on_error_is_swallowed() {
        let registry = RequestRegistry::new();
        let observer = StreamCallbacks::new(|_| Err("ignored".into()));
        let emitter = Emitter::new("r1".into(), Arc::new(observer), &registry);

        emitter.finish(Bytes::from_static(b"x")).await;
        assert!(emitter.is_completed());
    }

    #[tokio::test]
    async fn test_natural_completion_releases_entry() {
        let registry = RequestRegistry::new();
        let (observer, _r, _c) = counting_observer();
        let emitter = Emitter::new("r1".into(), observer, &registry);
        registry.register_request(
            "r1".into(),
            emitter.cleanup(),
            RequestMetadata::streaming("counter", "tick"),
            emitter.clone(),
        );

        emitter.finish(Bytes::from_static(b"end")).await;

        assert!(!registry.contains("r1"));
        assert!(!registry.cancel_request("r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_completion_keeps_newer_entry_for_reused_id() {
        let registry = RequestRegistry::new();
        let (first_obs, _r1, _c1) = counting_observer();
        let (second_obs, _r2, _c2) = counting_observer();
        let first = Emitter::new("r1".into(), first_obs, &registry);
        let second = Emitter::new("r1".into(), second_obs, &registry);

        registry.register_request(
            "r1".into(),
            first.cleanup(),
            RequestMetadata::streaming("s", "m"),
            first.clone(),
        );
        registry.register_request(
            "r1".into(),
            second.cleanup(),
            RequestMetadata::streaming("s", "m"),
            second.clone(),
        );

        first.finish(Bytes::from_static(b"end")).await;

        let info = registry.get_request_info("r1").unwrap();
        assert!(info.emitter.same_stream(&second));
    }

    #[tokio::test]
    async fn test_fail_reports_then_closes_once() {
        let registry = RequestRegistry::new();
        let (observer, events) = response_channel(8);
        let emitter = Emitter::new("r1".into(), Arc::new(observer), &registry);
        registry.register_request(
            "r1".into(),
            emitter.cleanup(),
            RequestMetadata::streaming("s", "m"),
            emitter.clone(),
        );

        emitter.fail(BridgeError::handler("boom")).await;
        emitter.send(Bytes::from_static(b"late")).await;
        emitter.cleanup().run().await.unwrap();
        drop(emitter);

        assert!(!registry.contains("r1"));
        let (responses, errors, end) = events.drain().await;
        assert!(responses.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "boom");
        assert_eq!(end, Some(Termination::Failed));
    }

    #[tokio::test]
    async fn test_fail_after_completion_only_reports() {
        let registry = RequestRegistry::new();
        let (observer, _responses, completions) = counting_observer();
        let emitter = Emitter::new("r1".into(), observer, &registry);

        emitter.finish(Bytes::from_static(b"done")).await;
        emitter.fail(BridgeError::handler("late failure")).await;

        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_ack_payload() {
        let ack = StreamResponse::cancelled().unwrap();
        assert!(ack.is_last);
        assert!(ack.is_cancel_ack());

        let decoded: CancelAck = MsgPackCodec::decode(&ack.response).unwrap();
        assert!(decoded.cancelled);

        assert!(!StreamResponse::new(Bytes::from_static(b"1"), true).is_cancel_ack());
    }
}
