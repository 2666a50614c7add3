//! Transport layer: a single managed connection and its lifecycle.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `manager` | [`ConnectionManager`]: dial, heartbeat, reconnect, dispose |
//! | `state` | State machine types and read-only snapshots |
//! | `backoff` | Reconnect delay policies |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect delay policies.
pub mod backoff;

/// Connection lifecycle management.
pub mod manager;

/// State machine types and snapshots.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::BackoffPolicy;
pub use manager::ConnectionManager;
pub use state::{ConnectionSnapshot, ConnectionState};
