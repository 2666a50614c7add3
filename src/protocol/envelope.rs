//! Wire message envelope.
//!
//! Every frame on the socket is a JSON-encoded [`Envelope`]:
//!
//! ```json
//! {
//!   "id": "uuid-or-caller-key",
//!   "type": "command.dispatch",
//!   "data": { ... },
//!   "priority": 5,
//!   "timestamp": 1735689600000
//! }
//! ```
//!
//! Control messages use the reserved `type` values [`TYPE_PING`] and
//! [`TYPE_PONG`]; application code cannot send those.

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

// ============================================================================
// Constants
// ============================================================================

/// Reserved type for heartbeat pings.
pub const TYPE_PING: &str = "ping";

/// Reserved type for heartbeat pongs.
pub const TYPE_PONG: &str = "pong";

/// Valid priority range, inclusive.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

// ============================================================================
// Envelope
// ============================================================================

/// A single wire message.
///
/// Immutable once enqueued; delivery bookkeeping (attempt counts) lives on
/// the queue entry, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Idempotency key, caller-supplied or generated.
    pub id: MessageId,

    /// Application message type, or a reserved control type.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Delivery priority, 1 (lowest) to 10 (highest).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Milliseconds since the Unix epoch at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

// ============================================================================
// Constructors
// ============================================================================

impl Envelope {
    /// Creates an application message with a generated ID and current timestamp.
    #[must_use]
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: MessageId::generate(),
            message_type: message_type.into(),
            data: Some(data),
            priority: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Creates an application message with a caller-supplied idempotency key.
    #[must_use]
    pub fn with_id(id: MessageId, message_type: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            message_type: message_type.into(),
            data: Some(data),
            priority: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Sets the delivery priority.
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Creates a heartbeat ping.
    #[must_use]
    pub(crate) fn ping() -> Self {
        Self {
            id: MessageId::generate(),
            message_type: TYPE_PING.to_string(),
            data: None,
            priority: None,
            timestamp: Some(now_millis()),
        }
    }

    /// Creates a heartbeat pong answering `ping_id`.
    #[must_use]
    pub(crate) fn pong(ping_id: MessageId) -> Self {
        Self {
            id: ping_id,
            message_type: TYPE_PONG.to_string(),
            data: None,
            priority: None,
            timestamp: Some(now_millis()),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl Envelope {
    /// Returns `true` if this is a reserved control message.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.message_type == TYPE_PING || self.message_type == TYPE_PONG
    }

    /// Validates an application message before transmission.
    ///
    /// Invalid messages fail fast and are never sent, retried or queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the type is empty or reserved,
    /// the ID is empty, or the priority is outside [`PRIORITY_RANGE`].
    pub fn validate(&self) -> Result<()> {
        if self.message_type.is_empty() {
            return Err(Error::invalid_message("message type must not be empty"));
        }
        if self.is_control() {
            return Err(Error::invalid_message(format!(
                "type '{}' is reserved for control messages",
                self.message_type
            )));
        }
        if self.id.as_str().is_empty() {
            return Err(Error::invalid_message("message id must not be empty"));
        }
        if let Some(priority) = self.priority
            && !PRIORITY_RANGE.contains(&priority)
        {
            return Err(Error::invalid_message(format!(
                "priority {priority} outside valid range 1-10"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Milliseconds since the Unix epoch.
#[must_use]
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_new_envelope_valid() {
        let env = Envelope::new("agent_status", json!({"agent": "planner"}));
        assert!(env.validate().is_ok());
        assert!(env.timestamp.is_some());
        assert!(!env.is_control());
    }

    #[test]
    fn test_empty_type_rejected() {
        let env = Envelope::new("", json!(null));
        assert!(matches!(
            env.validate(),
            Err(Error::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_reserved_type_rejected() {
        for reserved in [TYPE_PING, TYPE_PONG] {
            let env = Envelope::new(reserved, json!(null));
            assert!(env.validate().is_err(), "{reserved} must be rejected");
        }
    }

    #[test]
    fn test_priority_bounds() {
        let ok = Envelope::new("cmd", json!(null)).with_priority(10);
        assert!(ok.validate().is_ok());

        let low = Envelope::new("cmd", json!(null)).with_priority(0);
        assert!(low.validate().is_err());

        let high = Envelope::new("cmd", json!(null)).with_priority(11);
        assert!(high.validate().is_err());
    }

    #[test]
    fn test_ping_pong_are_control() {
        let ping = Envelope::ping();
        assert!(ping.is_control());
        assert_eq!(ping.message_type, TYPE_PING);

        let pong = Envelope::pong(ping.id.clone());
        assert!(pong.is_control());
        assert_eq!(pong.id, ping.id);
    }

    #[test]
    fn test_wire_format() {
        let env = Envelope::with_id(
            MessageId::new("k1"),
            "command.dispatch",
            json!({"action": "restart"}),
        )
        .with_priority(7);

        let json = serde_json::to_string(&env).expect("serialize");
        assert!(json.contains("\"type\":\"command.dispatch\""));
        assert!(json.contains("\"id\":\"k1\""));
        assert!(json.contains("\"priority\":7"));

        let back: Envelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, env);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let env = Envelope {
            id: MessageId::new("x"),
            message_type: "t".into(),
            data: None,
            priority: None,
            timestamp: None,
        };
        let json = serde_json::to_string(&env).expect("serialize");
        assert!(!json.contains("data"));
        assert!(!json.contains("priority"));
        assert!(!json.contains("timestamp"));
    }
}
