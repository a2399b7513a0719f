//! Chat server - Entry point
//!
//! Binds the TCP listener and runs the accept loop and ChatServer actor.

use std::env;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use echat::serve;

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:3490";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=echat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("echat=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    // Bind failure is startup-fatal: the server cannot run at all.
    let listener = TcpListener::bind(&addr).await?;
    info!("chat server listening on {}", addr);

    serve(listener).await;

    Ok(())
}
