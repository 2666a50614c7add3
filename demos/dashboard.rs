//! Minimal dashboard client: connect, send, observe events.
//!
//! Run against any WebSocket endpoint that speaks the JSON envelope
//! protocol:
//!
//! ```text
//! cargo run --example dashboard -- ws://127.0.0.1:8080/ws
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use agentlink::{Client, ClientEvent, Envelope, Result};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("agentlink=debug")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string());

    let client = Client::builder(url.parse().expect("valid ws:// url"))
        .with_queue_path("offline-queue.json")
        .build()?;

    let _events = client.subscribe(|event| match event {
        ClientEvent::StateChanged { connection, state } => {
            println!("[{connection}] -> {state}");
        }
        ClientEvent::Message { envelope, .. } => {
            println!("<- {} ({})", envelope.message_type, envelope.id);
        }
        ClientEvent::ConnectionError { error, .. } => {
            println!("!! {error}");
        }
        ClientEvent::ReconnectExhausted { connection, attempts } => {
            println!("[{connection}] gave up after {attempts} attempts");
        }
    });

    client.start()?;
    client.wait_until_connected(Duration::from_secs(10)).await?;

    let disposition = client
        .send(Envelope::new("dashboard.refresh", json!({"panels": "all"})))
        .await?;
    println!("send -> {disposition:?}");

    tokio::time::sleep(Duration::from_secs(30)).await;
    print!("{}", client.metrics().export_text());

    client.stop();
    Ok(())
}
