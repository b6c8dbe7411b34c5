//! Echo host - unary calls over stdin/stdout.
//!
//! This example demonstrates:
//! - Building a service with typed unary methods
//! - Serving it over the process's own stdio
//! - Logging to stderr, since stdout carries frames
//!
//! Every CALL frame for `echo.say` is answered with its input; `echo.shout`
//! answers in upper case. Any other method gets `{error: "Unknown method: ..."}`.
//!
//! ```text
//! RUST_LOG=hostbridge=debug cargo run --example echo
//! ```

use hostbridge::handler::{typed_unary, ServiceBuilder};
use hostbridge::Host;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Debug)]
struct ShoutInput {
    text: String,
}

#[derive(Serialize, Debug)]
struct ShoutOutput {
    text: String,
    length: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let echo = ServiceBuilder::new("echo")
        .method("say", typed_unary(|_method, text: String| async move { Ok(text) }))
        .method(
            "shout",
            typed_unary(|_method, input: ShoutInput| async move {
                let text = input.text.to_uppercase();
                Ok(ShoutOutput {
                    length: text.chars().count(),
                    text,
                })
            }),
        )
        .build();

    let host = Host::builder().service("echo", echo).build();

    host.serve(tokio::io::stdin(), tokio::io::stdout()).await?;

    Ok(())
}
