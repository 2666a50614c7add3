//! Connection state machine types and read-only snapshots.
//!
//! The mutable connection record is owned exclusively by its
//! [`ConnectionManager`](super::ConnectionManager); the pool and metrics
//! layers only ever see a [`ConnectionSnapshot`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::identifiers::ConnectionId;

// ============================================================================
// Constants
// ============================================================================

/// Number of recent send outcomes kept for the rolling success rate.
const HEALTH_WINDOW: usize = 20;

/// Latency above which the latency factor bottoms out, in milliseconds.
const LATENCY_CEILING_MS: f64 = 1000.0;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a single connection.
///
/// ```text
/// Idle ─connect()─► Connecting ─open─► Open ─unexpected close─► Reconnecting
///                       ▲                │                          │
///                       └────backoff─────┼──────────────────────────┘
///                                        │
///                                 manual close()
///                                        ▼
///                                    Closing ─► Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, `connect()` not yet called.
    Idle,
    /// Dialing the peer.
    Connecting,
    /// Established; sends are accepted.
    Open,
    /// Lost unexpectedly; waiting out the backoff before redialing.
    Reconnecting,
    /// Manual close in progress.
    Closing,
    /// Terminal; no further reconnects.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if sends are accepted in this state.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if no further transitions can occur.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionSnapshot
// ============================================================================

/// Read-only view of a connection for the pool, metrics and UI layers.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    /// Connection identity.
    pub id: ConnectionId,
    /// Endpoint URL.
    pub url: String,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Milliseconds since the Unix epoch of the last pong, if any.
    pub last_pong_at: Option<u64>,
    /// Rolling health score in `[0, 1]`.
    pub health_score: f64,
    /// Messages currently being written on this connection.
    pub in_flight: usize,
}

// ============================================================================
// HealthTracker
// ============================================================================

/// Rolling health score from recent send outcomes and heartbeat latency.
///
/// Owned by the io loop of a single connection; never written concurrently.
#[derive(Debug)]
pub(crate) struct HealthTracker {
    outcomes: VecDeque<bool>,
    latency_ema_ms: Option<f64>,
}

impl HealthTracker {
    pub(crate) fn new() -> Self {
        Self {
            outcomes: VecDeque::with_capacity(HEALTH_WINDOW),
            latency_ema_ms: None,
        }
    }

    /// Records a send outcome.
    pub(crate) fn record_send(&mut self, success: bool) {
        if self.outcomes.len() == HEALTH_WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// Records a ping round-trip time in milliseconds.
    pub(crate) fn record_rtt(&mut self, rtt_ms: f64) {
        self.latency_ema_ms = Some(match self.latency_ema_ms {
            Some(ema) => ema * 0.8 + rtt_ms * 0.2,
            None => rtt_ms,
        });
    }

    /// Current score in `[0, 1]`: recent success rate weighted with a
    /// latency factor. A fresh connection scores 1.0.
    pub(crate) fn score(&self) -> f64 {
        let success_rate = if self.outcomes.is_empty() {
            1.0
        } else {
            let ok = self.outcomes.iter().filter(|s| **s).count();
            ok as f64 / self.outcomes.len() as f64
        };

        let latency_factor = match self.latency_ema_ms {
            Some(ema) => (1.0 - ema / LATENCY_CEILING_MS).clamp(0.1, 1.0),
            None => 1.0,
        };

        success_rate * 0.7 + latency_factor * 0.3
    }
}

// ============================================================================
// Tests
// ============================================================================
