//! Connection selection strategies.
//!
//! Selection is a pure function over connection snapshots so the policies
//! can be tested without sockets. Only open connections are candidates;
//! connecting, reconnecting and closed members are skipped.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::transport::ConnectionSnapshot;

// ============================================================================
// LoadBalancingStrategy
// ============================================================================

/// How the pool picks a connection for each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Rotates through open connections in order.
    RoundRobin,
    /// Picks the open connection with the fewest in-flight messages.
    LeastUsed,
    /// Picks the open connection with the best health score; connections
    /// below the configured minimum score are treated as unavailable.
    HealthBased,
}

// ============================================================================
// Selection
// ============================================================================

/// Picks the index of the connection to use, or `None` when no open
/// connection qualifies.
///
/// `cursor` is a monotonically increasing counter supplied by the pool; it
/// drives the rotation for [`LoadBalancingStrategy::RoundRobin`] and breaks
/// ties for [`LoadBalancingStrategy::LeastUsed`].
pub(crate) fn select(
    strategy: LoadBalancingStrategy,
    snapshots: &[ConnectionSnapshot],
    cursor: usize,
    min_health_score: f64,
) -> Option<usize> {
    let open: Vec<usize> = snapshots
        .iter()
        .enumerate()
        .filter(|(_, snap)| snap.state.is_open())
        .map(|(i, _)| i)
        .collect();

    if open.is_empty() {
        return None;
    }

    match strategy {
        LoadBalancingStrategy::RoundRobin => Some(open[cursor % open.len()]),

        LoadBalancingStrategy::LeastUsed => {
            // Ties rotate round-robin; in_flight is usually 0 across the
            // board between bursts, and pinning every tie to the first
            // connection would defeat the load spreading.
            let least = open.iter().map(|&i| snapshots[i].in_flight).min()?;
            let tied: Vec<usize> = open
                .into_iter()
                .filter(|&i| snapshots[i].in_flight == least)
                .collect();
            Some(tied[cursor % tied.len()])
        }

        LoadBalancingStrategy::HealthBased => open
            .into_iter()
            .filter(|&i| snapshots[i].health_score >= min_health_score)
            .max_by(|&a, &b| {
                snapshots[a]
                    .health_score
                    .total_cmp(&snapshots[b].health_score)
            }),
    }
}

// ============================================================================
// Tests
// ============================================================================
