//! Ready-made [`StreamObserver`] implementations.
//!
//! - [`StreamCallbacks`] - plain closures, `on_complete`/`on_error` optional
//! - [`response_channel`] - a bounded channel exposed as a [`futures::Stream`]

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::{StreamObserver, StreamResponse, Termination};
use crate::error::{BoxError, BridgeError};
use crate::handler::BoxFuture;

type ResponseFn = Box<dyn Fn(StreamResponse) -> Result<(), BoxError> + Send + Sync>;
type CompleteFn = Box<dyn Fn(Termination) -> Result<(), BoxError> + Send + Sync>;
type ErrorFn = Box<dyn Fn(BridgeError) + Send + Sync>;

/// Observer built from closures.
///
/// # Example
///
/// ```
/// use hostbridge::request::StreamCallbacks;
///
/// let callbacks = StreamCallbacks::new(|resp| {
///     println!("got {} bytes", resp.response.len());
///     Ok(())
/// })
/// .on_complete(|why| {
///     println!("stream ended: {:?}", why);
///     Ok(())
/// });
/// ```
pub struct StreamCallbacks {
    on_response: ResponseFn,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl StreamCallbacks {
    /// Create callbacks with only `on_response` set.
    pub fn new<F>(on_response: F) -> Self
    where
        F: Fn(StreamResponse) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            on_response: Box::new(on_response),
            on_complete: None,
            on_error: None,
        }
    }

    /// Set the completion callback.
    pub fn on_complete<F>(mut self, on_complete: F) -> Self
    where
        F: Fn(Termination) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    /// Set the error callback.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(BridgeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

impl StreamObserver for StreamCallbacks {
    fn on_response(&self, response: StreamResponse) -> BoxFuture<'_, Result<(), BoxError>> {
        let result = (self.on_response)(response);
        Box::pin(async move { result })
    }

    fn on_complete(&self, termination: Termination) -> BoxFuture<'_, Result<(), BoxError>> {
        let result = match &self.on_complete {
            Some(on_complete) => on_complete(termination),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn on_error(&self, error: BridgeError) -> BoxFuture<'_, ()> {
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }
        Box::pin(async {})
    }
}

/// Event delivered through a [`ResponseStream`].
#[derive(Debug)]
pub enum StreamEvent {
    /// A response emitted by the handler (or the cancellation acknowledgment).
    Response(StreamResponse),
    /// A lookup, handler or callback error.
    Error(BridgeError),
    /// The stream ended; no further events follow.
    Closed(Termination),
}

/// Create a bounded channel observer and the stream that reads from it.
///
/// Deliveries wait for capacity, so a slow reader slows the handler's
/// `emit` calls down instead of buffering without bound.
pub fn response_channel(capacity: usize) -> (ChannelObserver, ResponseStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelObserver { tx }, ResponseStream { rx, closed: false })
}

/// Observer half of [`response_channel`].
#[derive(Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelObserver {
    async fn deliver(&self, event: StreamEvent) -> Result<(), BoxError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| "response stream dropped".into())
    }
}

impl StreamObserver for ChannelObserver {
    fn on_response(&self, response: StreamResponse) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(self.deliver(StreamEvent::Response(response)))
    }

    fn on_complete(&self, termination: Termination) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(self.deliver(StreamEvent::Closed(termination)))
    }

    fn on_error(&self, error: BridgeError) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.deliver(StreamEvent::Error(error)).await;
        })
    }
}

/// Reading half of [`response_channel`].
///
/// Ends after yielding [`StreamEvent::Closed`], or when every emitter for
/// the call has been dropped.
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
    closed: bool,
}

impl ResponseStream {
    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        let event = self.rx.recv().await;
        if matches!(event, Some(StreamEvent::Closed(_))) {
            self.closed = true;
        }
        event
    }

    /// Drain events until the stream closes.
    ///
    /// Returns the responses in delivery order, the errors seen, and how the
    /// stream ended (`None` if every emitter was dropped without closing).
    pub async fn drain(mut self) -> (Vec<StreamResponse>, Vec<BridgeError>, Option<Termination>) {
        let mut responses = Vec::new();
        let mut errors = Vec::new();

        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Response(response) => responses.push(response),
                StreamEvent::Error(error) => errors.push(error),
                StreamEvent::Closed(termination) => return (responses, errors, Some(termination)),
            }
        }

        (responses, errors, None)
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(StreamEvent::Closed(_))) = &polled {
            self.closed = true;
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_callbacks_defaults_are_noops() {
        let callbacks = StreamCallbacks::new(|_| Ok(()));

        assert!(StreamObserver::on_complete(&callbacks, Termination::Completed)
            .await
            .is_ok());
        StreamObserver::on_error(&callbacks, BridgeError::UnknownService("x".into())).await;
    }

    #[tokio::test]
    async fn test_callbacks_invoked() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let callbacks = StreamCallbacks::new(move |resp| {
            assert_eq!(&resp.response[..], b"x");
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        callbacks
            .on_response(StreamResponse::new(Bytes::from_static(b"x"), false))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_response_stream_ends_after_closed() {
        let (observer, mut stream) = response_channel(4);

        observer
            .on_response(StreamResponse::new(Bytes::from_static(b"1"), false))
            .await
            .unwrap();
        observer.on_complete(Termination::Completed).await.unwrap();

        assert!(matches!(stream.next().await, Some(StreamEvent::Response(_))));
        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Closed(Termination::Completed))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_delivery_fails_once_reader_dropped() {
        let (observer, stream) = response_channel(1);
        drop(stream);

        let result = observer
            .on_response(StreamResponse::new(Bytes::from_static(b"1"), false))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_collect() {
        let (observer, stream) = response_channel(8);

        observer
            .on_response(StreamResponse::new(Bytes::from_static(b"a"), false))
            .await
            .unwrap();
        observer
            .on_error(BridgeError::UnsupportedOperation("svc".into()))
            .await;
        observer.on_complete(Termination::Cancelled).await.unwrap();
        drop(observer);

        let (responses, errors, end) = stream.drain().await;
        assert_eq!(responses.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(end, Some(Termination::Cancelled));
    }
}
