//! Wire protocol types.
//!
//! Defines the JSON message envelope exchanged with the server and the
//! close-code policy that drives the reconnect decision.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Wire envelope, reserved control types, validation |
//! | `close` | Close-code classification (manual vs. reconnectable) |

// ============================================================================
// Submodules
// ============================================================================

/// Wire envelope and validation.
pub mod envelope;

/// Close-code classification.
pub mod close;

// ============================================================================
// Re-exports
// ============================================================================

pub use close::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CloseReason};
pub use envelope::{Envelope, PRIORITY_RANGE, TYPE_PING, TYPE_PONG};
