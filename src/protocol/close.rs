//! Close-code policy.
//!
//! | Code | Meaning | Reconnect |
//! |------|---------|-----------|
//! | 1000 | Intentional/manual closure | never |
//! | 1001 | Peer going away (expected during teardown) | never, logged at debug |
//! | other / abnormal | Unexpected loss | yes, subject to the attempt cap |
//!
//! The distinction between a manual close and a lost connection is carried
//! explicitly as a close code, never inferred from timing.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// ============================================================================
// Constants
// ============================================================================

/// Intentional, application-initiated closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Peer going away (server shutdown, page navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ============================================================================
// CloseReason
// ============================================================================

/// Why a connection stopped, as classified by the io loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Application called `close()` or `dispose()`.
    Manual,

    /// Peer sent a clean close frame (1000 or 1001).
    PeerClean {
        /// Close code from the frame.
        code: u16,
    },

    /// Peer closed with an unexpected code.
    PeerAbnormal {
        /// Close code from the frame.
        code: u16,
    },

    /// No pong within the heartbeat bound.
    ///
    /// Internal reason distinct from a server-initiated close; always takes
    /// the reconnect path.
    HeartbeatTimeout,

    /// Transport error or the stream ended without a close frame.
    TransportLost {
        /// Description of the loss.
        detail: String,
    },
}

impl CloseReason {
    /// Classifies a received close frame.
    #[must_use]
    pub fn from_frame(frame: Option<&CloseFrame>) -> Self {
        match frame {
            Some(frame) => {
                let code = u16::from(frame.code);
                if code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY {
                    Self::PeerClean { code }
                } else {
                    Self::PeerAbnormal { code }
                }
            }
            // Close without a frame is abnormal (1006 territory).
            None => Self::TransportLost {
                detail: "close without frame".to_string(),
            },
        }
    }

    /// Returns `true` if this closure triggers the reconnect path.
    ///
    /// Manual and clean closures never reconnect, regardless of the
    /// auto-reconnect setting.
    #[inline]
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Self::PeerAbnormal { .. } | Self::HeartbeatTimeout | Self::TransportLost { .. }
        )
    }

    /// Returns `true` if this closure is an expected teardown, not an error.
    #[inline]
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Manual | Self::PeerClean { .. })
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual close"),
            Self::PeerClean { code } => write!(f, "peer closed cleanly (code {code})"),
            Self::PeerAbnormal { code } => write!(f, "peer closed abnormally (code {code})"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::TransportLost { detail } => write!(f, "transport lost: {detail}"),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Close frame sent on intentional shutdown.
#[must_use]
pub(crate) fn normal_close_frame() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "client shutdown".into(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: u16) -> CloseFrame {
        CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        }
    }

    #[test]
    fn test_normal_close_no_reconnect() {
        let reason = CloseReason::from_frame(Some(&frame(CLOSE_NORMAL)));
        assert_eq!(reason, CloseReason::PeerClean { code: 1000 });
        assert!(!reason.should_reconnect());
        assert!(reason.is_expected());
    }

    #[test]
    fn test_going_away_no_reconnect() {
        let reason = CloseReason::from_frame(Some(&frame(CLOSE_GOING_AWAY)));
        assert!(!reason.should_reconnect());
        assert!(reason.is_expected());
    }

    #[test]
    fn test_abnormal_code_reconnects() {
        let reason = CloseReason::from_frame(Some(&frame(1011)));
        assert_eq!(reason, CloseReason::PeerAbnormal { code: 1011 });
        assert!(reason.should_reconnect());
        assert!(!reason.is_expected());
    }

    #[test]
    fn test_missing_frame_reconnects() {
        let reason = CloseReason::from_frame(None);
        assert!(reason.should_reconnect());
    }

    #[test]
    fn test_heartbeat_timeout_reconnects_but_manual_does_not() {
        assert!(CloseReason::HeartbeatTimeout.should_reconnect());
        assert!(!CloseReason::Manual.should_reconnect());
    }
}
