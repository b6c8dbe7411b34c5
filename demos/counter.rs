//! Counter host - streaming calls with cancellation.
//!
//! This example demonstrates:
//! - A streaming method written against the `Emitter`
//! - A streaming method written as an async `Stream` via `from_stream`
//! - Stopping promptly when the caller sends CANCEL
//!
//! `counter.tick` with `{to: 3, interval_ms: 100}` streams 1, 2, 3 and
//! marks the last one `isLast`. `counter.forever` never ends on its own;
//! it stops when cancelled (or when the caller closes stdin).
//!
//! ```text
//! RUST_LOG=hostbridge=debug cargo run --example counter
//! ```

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use hostbridge::codec::MsgPackCodec;
use hostbridge::error::BoxError;
use hostbridge::handler::{from_stream, typed_streaming, typed_unary, ServiceBuilder};
use hostbridge::{Emitter, Host};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Debug)]
struct TickInput {
    to: u64,
    #[serde(default = "default_interval")]
    interval_ms: u64,
}

fn default_interval() -> u64 {
    100
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let counter = ServiceBuilder::new("counter")
        .method("version", typed_unary(|_method, _: ()| async { Ok("1") }))
        .stream(
            "tick",
            typed_streaming(|_method, input: TickInput, emitter: Emitter, _id| async move {
                let interval = Duration::from_millis(input.interval_ms);
                for n in 1..=input.to {
                    tokio::select! {
                        _ = emitter.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(interval) => {}
                    }
                    let payload = MsgPackCodec::encode_bytes(&n)?;
                    emitter.emit(payload, n == input.to, Some(n)).await;
                }
                Ok(())
            }),
        )
        .stream(
            "forever",
            from_stream(|_method, _message, _id| {
                futures::stream::iter(1u64..).then(|n| async move {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    Ok::<_, BoxError>(Bytes::from(MsgPackCodec::encode(&n)?))
                })
            }),
        )
        .build();

    let host = Host::builder().service("counter", counter).build();

    host.serve(tokio::io::stdin(), tokio::io::stdout()).await?;

    Ok(())
}
