//! Host builder and connection loop.
//!
//! The [`HostBuilder`] collects services and configuration. The [`Host`]
//! serves one caller per [`Host::serve`] call over any byte stream:
//! 1. Spawn the writer task on the write half
//! 2. Read frames and dispatch them (unary calls on their own tasks,
//!    streaming calls through a [`Dispatcher`] bound to this connection)
//! 3. On EOF, cancel every stream still open and let pending unary calls
//!    finish
//! 4. Flush and close the write half
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::Host;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::builder()
//!         .service("echo", echo_service())
//!         .service("counter", counter_service())
//!         .max_concurrent_calls(64)
//!         .build();
//!
//!     host.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::dispatcher::{Dispatcher, UnaryResponse};
use crate::error::{BoxError, BridgeError, Result};
use crate::handler::{BoxFuture, Service, ServiceRegistry};
use crate::protocol::{
    kind, Frame, FrameBuffer, Inbound, Outbound, StreamErrorMessage, StreamMessage,
};
use crate::request::{RequestId, RequestRegistry, StreamObserver, StreamResponse};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default maximum unary calls running at once per connection.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

pub use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
pub use crate::writer::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_SEND_TIMEOUT};

/// Error returned to unary calls that arrive while the call limit is reached.
pub const BUSY_MESSAGE: &str = "Host busy: too many concurrent calls";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Unary calls running at once; calls over the limit are answered with
    /// an error right away. Streaming calls are not counted.
    pub max_concurrent_calls: usize,
    /// Capacity of the outbound frame queue.
    pub channel_capacity: usize,
    /// How long a response may wait for room in the outbound queue.
    pub send_timeout: Duration,
    /// Largest inbound payload accepted.
    pub max_payload_size: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl HostConfig {
    fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            channel_capacity: self.channel_capacity,
            send_timeout: self.send_timeout,
        }
    }

    // Permits are acquired back in one call on shutdown, which takes a u32.
    fn call_permits(&self) -> u32 {
        let permits = self.max_concurrent_calls.min(Semaphore::MAX_PERMITS);
        u32::try_from(permits).unwrap_or(u32::MAX)
    }
}

/// Builder for configuring and creating a [`Host`].
#[derive(Default)]
pub struct HostBuilder {
    services: ServiceRegistry,
    config: HostConfig,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. A later registration under the same name wins.
    pub fn service(mut self, name: impl Into<String>, service: Service) -> Self {
        self.services.register(name, service);
        self
    }

    /// Use an already populated registry, replacing any services added so far.
    pub fn services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of concurrent unary calls.
    ///
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = limit;
        self
    }

    /// Set the outbound channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the outbound send timeout.
    ///
    /// Default: 5 seconds
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Set the maximum inbound payload size.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    pub fn build(self) -> Host {
        Host {
            services: Arc::new(self.services),
            config: self.config,
        }
    }
}

/// Serves registered services to callers.
///
/// Services are fixed once built. Each connection gets its own request
/// registry, so cancellation and teardown never reach across connections.
#[derive(Clone)]
pub struct Host {
    services: Arc<ServiceRegistry>,
    config: HostConfig,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Serve one caller until it closes its side of the channel.
    ///
    /// Returns the read error that ended the connection, if any. Streams
    /// still open at that point are cancelled either way.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let dispatcher = Dispatcher::with_registry(self.services.clone(), RequestRegistry::new());
        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer_config());
        let permits = self.config.call_permits();
        let calls = Arc::new(Semaphore::new(permits as usize));

        let result = self.read_loop(reader, &dispatcher, &writer, &calls).await;
        match &result {
            Ok(()) => debug!("caller closed the channel"),
            Err(e) => error!("read loop error: {}", e),
        }

        let cancelled = dispatcher.shutdown().await;
        if cancelled > 0 {
            debug!(cancelled, "cancelled streams left open by the caller");
        }

        // Let in-flight unary calls queue their responses.
        let _ = calls.acquire_many(permits).await;

        writer.close();
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("writer task failed: {}", e),
            Err(e) => warn!("writer task panicked: {}", e),
        }

        result
    }

    async fn read_loop<R>(
        &self,
        mut reader: R,
        dispatcher: &Dispatcher,
        writer: &WriterHandle,
        calls: &Arc<Semaphore>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_payload(self.config.max_payload_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            for frame in frame_buffer.push(&buf[..n])? {
                self.dispatch_frame(frame, dispatcher, writer, calls).await;
            }
        }
    }

    /// Dispatch a single frame. Bad frames are logged and skipped.
    async fn dispatch_frame(
        &self,
        frame: Frame,
        dispatcher: &Dispatcher,
        writer: &WriterHandle,
        calls: &Arc<Semaphore>,
    ) {
        if let Err(e) = frame.header.validate(self.config.max_payload_size) {
            warn!("skipping frame: {}", e);
            return;
        }

        let inbound = match Inbound::from_frame(&frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(kind = kind::name(frame.kind()), "skipping undecodable frame: {}", e);
                return;
            }
        };

        match inbound {
            Inbound::Call(call) => {
                let permit = match calls.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(request_id = %call.request_id, "call limit reached, rejecting call");
                        let reply = UnaryResponse::failure(call.request_id, BUSY_MESSAGE);
                        send_or_log(writer, Outbound::Unary(reply)).await;
                        return;
                    }
                };

                let dispatcher = dispatcher.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let reply = dispatcher.handle_unary(call).await;
                    send_or_log(&writer, Outbound::Unary(reply)).await;
                });
            }

            Inbound::StreamCall(call) => {
                let observer = WireObserver {
                    request_id: call.request_id.clone(),
                    writer: writer.clone(),
                };
                dispatcher.handle_streaming(call, Arc::new(observer)).await;
            }

            Inbound::Cancel(cancel) => {
                let request_id = cancel.request_id;
                match dispatcher.cancel_request(request_id.as_str()).await {
                    Ok(true) => debug!(request_id = %request_id, "stream cancelled"),
                    Ok(false) => debug!(request_id = %request_id, "cancel for inactive request"),
                    Err(e) => error!(request_id = %request_id, "cancel failed: {}", e),
                }
            }
        }
    }
}

async fn send_or_log(writer: &WriterHandle, message: Outbound) {
    if let Err(e) = writer.send_message(&message).await {
        warn!(
            request_id = %message.request_id(),
            kind = kind::name(message.kind()),
            "failed to send response: {}",
            e
        );
    }
}

/// Writes a stream's responses and errors back to the caller as frames.
///
/// The caller learns a stream ended from `isLast` on a response or from a
/// `STREAM_ERROR` frame, so completion itself writes nothing.
struct WireObserver {
    request_id: RequestId,
    writer: WriterHandle,
}

impl StreamObserver for WireObserver {
    fn on_response(&self, response: StreamResponse) -> BoxFuture<'_, std::result::Result<(), BoxError>> {
        Box::pin(async move {
            let message = Outbound::Stream(StreamMessage::new(self.request_id.clone(), response));
            self.writer.send_message(&message).await?;
            Ok(())
        })
    }

    fn on_error(&self, error: BridgeError) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let message = Outbound::StreamError(StreamErrorMessage {
                request_id: self.request_id.clone(),
                error: error.to_string(),
            });
            send_or_log(&self.writer, message).await;
        })
    }
}
