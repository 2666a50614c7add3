//! AgentLink - Resilient real-time messaging client.
//!
//! This library provides the WebSocket client layer for dashboard-style
//! applications: pooled connections with heartbeat and automatic reconnect,
//! plus a durable offline queue so messages written while disconnected are
//! replayed once the link returns.
//!
//! # Architecture
//!
//! The client is layered, each layer usable on its own:
//!
//! - **[`ConnectionManager`]**: one connection's full lifecycle (dial,
//!   heartbeat ping/pong, bounded reconnect with backoff, dispose)
//! - **[`ConnectionPool`]**: a bounded set of connections to one endpoint
//!   with load balancing and background health checks
//! - **[`OfflineQueue`]**: bounded, persisted FIFO of undelivered messages
//!   with at-least-once replay
//! - **[`Client`]**: the facade wiring them together
//!
//! Key design principles:
//!
//! - Manual closes never reconnect; the distinction travels as close code
//!   1000, never inferred from timing
//! - All per-connection timers live in one supervisor task, so `dispose()`
//!   cancels everything deterministically
//! - Delivery is at-least-once; consumers deduplicate on [`MessageId`]
//!
//! # Quick Start
//!
//! ```no_run
//! use agentlink::{Client, Envelope, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder("ws://127.0.0.1:8080/ws".parse().expect("url"))
//!         .with_queue_path("offline-queue.json")
//!         .build()?;
//!     client.start()?;
//!
//!     // Delivered now, or queued and replayed when the link returns.
//!     client
//!         .send(Envelope::new("command.dispatch", json!({"action": "refresh"})))
//!         .await?;
//!
//!     client.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Top-level facade: [`Client`], fallback routing |
//! | [`config`] | Connection, pool and queue configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Event bus and [`ClientEvent`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`metrics`] | Counters, gauges, text exposition |
//! | [`pool`] | Connection pool and load balancing |
//! | [`protocol`] | Wire envelope and close-code policy |
//! | [`queue`] | Durable offline queue |
//! | [`transport`] | Single-connection lifecycle (internal workhorse) |

// ============================================================================
// Modules
// ============================================================================

/// Top-level client facade.
///
/// Use [`Client::builder()`] to create a configured client instance.
pub mod client;

/// Connection, pool and queue configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Event bus and client events.
pub mod events;

/// Type-safe identifiers for connections, messages and subscriptions.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Metrics collection and text exposition.
pub mod metrics;

/// Connection pool and load balancing strategies.
pub mod pool;

/// Wire protocol message types.
pub mod protocol;

/// Durable offline queue.
pub mod queue;

/// Connection lifecycle management.
///
/// Internal workhorse; most applications go through [`Client`] or
/// [`ConnectionPool`] instead.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, ConnectivityHandle, FallbackPreference, SendDisposition};

// Configuration types
pub use config::{ConnectionConfig, PoolConfig, QueueConfig};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{ClientEvent, EventBus, Subscription};

// Identifier types
pub use identifiers::{ConnectionId, MessageId, SubscriptionId};

// Metrics types
pub use metrics::{Direction, MetricsCollector, MetricsSnapshot};

// Pool types
pub use pool::{ConnectionPool, LoadBalancingStrategy, SendOutcome};

// Protocol types
pub use protocol::{CloseReason, Envelope, PRIORITY_RANGE, TYPE_PING, TYPE_PONG};

// Queue types
pub use queue::{
    FileStore, MemoryStore, OfflineQueue, OverflowPolicy, QueueStore, SyncOutcome, SyncReport,
};

// Transport types
pub use transport::{BackoffPolicy, ConnectionManager, ConnectionSnapshot, ConnectionState};
