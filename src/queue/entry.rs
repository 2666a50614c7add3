//! Persisted queue schema.
//!
//! The whole queue is persisted as one JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": [
//!     {
//!       "id": "uuid-or-caller-key",
//!       "message": { "id": "...", "type": "command.dispatch", ... },
//!       "timestamp": 1735689600000,
//!       "attempts": 2,
//!       "lastAttempt": 1735689660000
//!     }
//!   ]
//! }
//! ```
//!
//! The `version` field gates future migrations; an unknown version is
//! treated as an empty queue rather than an error, so a downgrade never
//! bricks the client.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::identifiers::MessageId;
use crate::protocol::Envelope;
use crate::protocol::envelope::now_millis;

// ============================================================================
// Constants
// ============================================================================

/// Current persisted schema version.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// QueueEntry
// ============================================================================

/// One queued message with its delivery bookkeeping.
///
/// The envelope itself is immutable once enqueued; only the attempt
/// counters change across sync passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Idempotency key, mirrors `message.id`.
    pub id: MessageId,

    /// The message to replay.
    pub message: Envelope,

    /// Milliseconds since the Unix epoch when enqueued.
    pub timestamp: u64,

    /// Replay attempts so far.
    pub attempts: u32,

    /// Milliseconds since the Unix epoch of the last attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<u64>,
}

impl QueueEntry {
    /// Wraps an envelope for queuing.
    #[must_use]
    pub fn new(message: Envelope) -> Self {
        Self {
            id: message.id.clone(),
            message,
            timestamp: now_millis(),
            attempts: 0,
            last_attempt: None,
        }
    }

    /// Records one failed replay attempt.
    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt = Some(now_millis());
    }
}

// ============================================================================
// PersistedQueue
// ============================================================================

/// The on-disk document: a versioned FIFO of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedQueue {
    /// Schema version, currently [`SCHEMA_VERSION`].
    pub version: u32,

    /// Queued entries, oldest first.
    pub entries: Vec<QueueEntry>,
}

impl PersistedQueue {
    /// Creates an empty queue at the current schema version.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }

    /// Decodes a persisted document, tolerating unknown versions.
    ///
    /// Corrupt JSON or a version from the future yields an empty queue with
    /// a warning; queued messages are best-effort by contract.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Self>(bytes) {
            Ok(queue) if queue.version == SCHEMA_VERSION => queue,
            Ok(queue) => {
                warn!(
                    version = queue.version,
                    supported = SCHEMA_VERSION,
                    "Unknown queue schema version, starting empty"
                );
                Self::empty()
            }
            Err(e) => {
                warn!(error = %e, "Corrupt queue document, starting empty");
                Self::empty()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
