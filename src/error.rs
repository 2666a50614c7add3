//! Error types for the messaging client.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::ConnectionFailed`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::HeartbeatTimeout`] |
//! | Send | [`Error::SendFailed`], [`Error::InvalidMessage`] |
//! | Resilience | [`Error::ReconnectExhausted`], [`Error::PoolExhausted`] |
//! | Queue | [`Error::QueueFull`], [`Error::Storage`] |
//! | Lifecycle | [`Error::Lifecycle`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! Transient connection errors are handled by the reconnect state machine and
//! surfaced as informational events; only terminal conditions
//! ([`Error::ReconnectExhausted`]) and programming errors
//! ([`Error::InvalidMessage`]) reach the caller as hard errors.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Initial handshake never completed.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Connection establishment exceeded its bound.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection was lost during operation.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No pong received within the heartbeat bound on an open connection.
    #[error("Heartbeat timeout after {timeout_ms}ms")]
    HeartbeatTimeout {
        /// Milliseconds waited for the pong.
        timeout_ms: u64,
    },

    // ========================================================================
    // Send Errors
    // ========================================================================
    /// Transport rejected the message or the connection was not open.
    #[error("Send failed: {message}")]
    SendFailed {
        /// Description of the send failure.
        message: String,
    },

    /// Message failed schema validation before transmission.
    ///
    /// This is a programming error, not a network condition; it is never
    /// retried or queued.
    #[error("Invalid message: {message}")]
    InvalidMessage {
        /// Description of the validation failure.
        message: String,
    },

    // ========================================================================
    // Resilience Errors
    // ========================================================================
    /// The reconnect attempt budget is exhausted.
    ///
    /// Terminal for the connection; requires an explicit application action
    /// (a new `connect()`) to recover.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts that were made.
        attempts: u32,
    },

    /// No healthy connection available and the caller requested fail-fast.
    #[error("Pool exhausted: no healthy connection available")]
    PoolExhausted,

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Queue is at capacity and the overflow policy rejects new entries.
    #[error("Offline queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Durable queue storage failed.
    #[error("Queue storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation invalid in the component's current lifecycle state.
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        /// Description of the lifecycle violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error, typically from a custom [`QueueStore`] backend.
    ///
    /// [`QueueStore`]: crate::queue::QueueStore
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection failed error.
    #[inline]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a heartbeat timeout error.
    #[inline]
    pub fn heartbeat_timeout(timeout_ms: u64) -> Self {
        Self::HeartbeatTimeout { timeout_ms }
    }

    /// Creates a send failed error.
    #[inline]
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid message error.
    #[inline]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Creates a reconnect exhausted error.
    #[inline]
    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::ReconnectExhausted { attempts }
    }

    /// Creates a queue full error.
    #[inline]
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a lifecycle error.
    #[inline]
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::HeartbeatTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HeartbeatTimeout { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error may succeed on retry.
    ///
    /// Recoverable errors are routed to the offline queue when the caller
    /// opted into queue fallback; everything else is surfaced immediately.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HeartbeatTimeout { .. }
                | Self::SendFailed { .. }
                | Self::PoolExhausted
        )
    }

    /// Returns `true` if this error is terminal for its connection.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection_failed("peer refused");
        assert_eq!(err.to_string(), "Connection failed: peer refused");
    }

    #[test]
    fn test_heartbeat_timeout_display() {
        let err = Error::heartbeat_timeout(5000);
        assert_eq!(err.to_string(), "Heartbeat timeout after 5000ms");
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connection_timeout(1000).is_timeout());
        assert!(Error::heartbeat_timeout(1000).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection_failed("x").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::heartbeat_timeout(1).is_connection_error());
        assert!(!Error::invalid_message("x").is_connection_error());
    }

    #[test]
    fn test_invalid_message_not_recoverable() {
        assert!(!Error::invalid_message("bad type").is_recoverable());
        assert!(Error::PoolExhausted.is_recoverable());
        assert!(Error::send_failed("not open").is_recoverable());
    }

    #[test]
    fn test_reconnect_exhausted_terminal() {
        let err = Error::reconnect_exhausted(5);
        assert!(err.is_terminal());
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Reconnect attempts exhausted after 5 attempts"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
