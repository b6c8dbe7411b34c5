//! # hostbridge
//!
//! Host-side call dispatch and stream correlation for UI ↔ host IPC.
//!
//! A UI process invokes services implemented in a host process over one
//! duplex channel. This crate routes each call to its service, answers
//! unary calls with a correlated `{message}` / `{error}`, and multiplexes
//! any number of independently cancellable response streams.
//!
//! ## Architecture
//!
//! - **Service Registry** ([`handler`]): service name → unary handler plus
//!   optional streaming handler, fixed at startup
//! - **Request Registry** ([`request`]): correlation id → active stream,
//!   with exactly-once cleanup
//! - **Dispatcher** ([`dispatcher`]): one entry point per incoming call
//! - **Host** ([`host`]): the dispatcher served over any byte stream with a
//!   small binary protocol ([`protocol`]) and a dedicated writer task
//!   ([`writer`])
//!
//! ## Example
//!
//! ```ignore
//! use hostbridge::handler::{typed_streaming, typed_unary, ServiceBuilder};
//! use hostbridge::Host;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::builder()
//!         .service(
//!             "echo",
//!             ServiceBuilder::new("echo")
//!                 .method("say", typed_unary(|_m, text: String| async move { Ok(text) }))
//!                 .build(),
//!         )
//!         .build();
//!
//!     host.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod host;
pub mod protocol;
pub mod request;
pub mod writer;

pub use dispatcher::{CallDescriptor, DispatchOutcome, Dispatcher, UnaryResponse};
pub use error::{BridgeError, ErrorKind, Result};
pub use handler::{Service, ServiceBuilder, ServiceRegistry};
pub use host::{Host, HostBuilder, HostConfig};
pub use request::{Emitter, RequestId, RequestRegistry, StreamHandle, StreamObserver, StreamResponse, Termination};
