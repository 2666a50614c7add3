//! Connection and queue metrics.
//!
//! [`MetricsCollector`] aggregates monotonic counters and instantaneous
//! gauges from the transport, pool and queue layers. It performs no IO and
//! has no side effects beyond counter mutation; each `record_*` method is
//! called only by the component that owns the underlying event
//! (single-writer discipline).
//!
//! [`MetricsCollector::export_text`] renders the standard line-oriented
//! text exposition format (`# HELP` / `# TYPE` comments, one
//! `name value` line per metric) for scraping by an external collector.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

// ============================================================================
// Direction
// ============================================================================

/// Direction of a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent to the server.
    Outbound,
    /// Received from the server.
    Inbound,
}

// ============================================================================
// MetricsSnapshot
// ============================================================================

/// Point-in-time view of all metrics.
///
/// Counters never decrease across snapshots; gauges reflect instantaneous
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Successful connection opens.
    pub connections: u64,
    /// Connection losses and closes.
    pub disconnections: u64,
    /// Reconnect attempts scheduled.
    pub reconnect_attempts: u64,
    /// Transport and handshake errors.
    pub errors: u64,
    /// Application messages written to a socket.
    pub messages_sent: u64,
    /// Application messages received.
    pub messages_received: u64,
    /// Whether at least one connection is currently healthy.
    pub is_connected: bool,
    /// Current offline queue size.
    pub queue_size: u64,
    /// Seconds since the collector was created.
    pub uptime_secs: u64,
}

// ============================================================================
// MetricsCollector
// ============================================================================

/// Aggregates counters and gauges for the whole client.
#[derive(Debug)]
pub struct MetricsCollector {
    connections: AtomicU64,
    disconnections: AtomicU64,
    reconnect_attempts: AtomicU64,
    errors: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    connected: AtomicBool,
    queue_size: AtomicU64,
    started_at: Instant,
}

impl MetricsCollector {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            queue_size: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records a successful connection open.
    #[inline]
    pub fn record_connect(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection loss or close.
    #[inline]
    pub fn record_disconnect(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a scheduled reconnect attempt.
    #[inline]
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transport or handshake error.
    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an application message in the given direction.
    #[inline]
    pub fn record_message(&self, direction: Direction) {
        match direction {
            Direction::Outbound => self.messages_sent.fetch_add(1, Ordering::Relaxed),
            Direction::Inbound => self.messages_received.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Sets the connected gauge.
    #[inline]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Sets the queue size gauge.
    #[inline]
    pub fn set_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            is_connected: self.connected.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Renders all metrics in the text exposition format.
    #[must_use]
    pub fn export_text(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::with_capacity(1024);

        write_metric(
            &mut out,
            "agentlink_connections_total",
            "counter",
            "Successful connection opens",
            snap.connections,
        );
        write_metric(
            &mut out,
            "agentlink_disconnections_total",
            "counter",
            "Connection losses and closes",
            snap.disconnections,
        );
        write_metric(
            &mut out,
            "agentlink_reconnect_attempts_total",
            "counter",
            "Reconnect attempts scheduled",
            snap.reconnect_attempts,
        );
        write_metric(
            &mut out,
            "agentlink_errors_total",
            "counter",
            "Transport and handshake errors",
            snap.errors,
        );
        write_metric(
            &mut out,
            "agentlink_messages_sent_total",
            "counter",
            "Application messages sent",
            snap.messages_sent,
        );
        write_metric(
            &mut out,
            "agentlink_messages_received_total",
            "counter",
            "Application messages received",
            snap.messages_received,
        );
        write_metric(
            &mut out,
            "agentlink_connected",
            "gauge",
            "Whether any connection is healthy (1) or not (0)",
            u64::from(snap.is_connected),
        );
        write_metric(
            &mut out,
            "agentlink_queue_size",
            "gauge",
            "Messages waiting in the offline queue",
            snap.queue_size,
        );
        write_metric(
            &mut out,
            "agentlink_uptime_seconds",
            "gauge",
            "Seconds since the client was created",
            snap.uptime_secs,
        );

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn write_metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    // String writes cannot fail.
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_connect();
        metrics.record_connect();
        metrics.record_disconnect();
        metrics.record_reconnect_attempt();
        metrics.record_error();
        metrics.record_message(Direction::Outbound);
        metrics.record_message(Direction::Inbound);
        metrics.record_message(Direction::Inbound);

        let snap = metrics.snapshot();
        assert_eq!(snap.connections, 2);
        assert_eq!(snap.disconnections, 1);
        assert_eq!(snap.reconnect_attempts, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.messages_sent, 1);
        assert_eq!(snap.messages_received, 2);
    }

    #[test]
    fn test_counters_never_decrease() {
        let metrics = MetricsCollector::new();
        metrics.record_connect();
        let before = metrics.snapshot();
        metrics.record_disconnect();
        let after = metrics.snapshot();
        assert!(after.connections >= before.connections);
        assert!(after.disconnections >= before.disconnections);
    }

    #[test]
    fn test_gauges_reflect_current_state() {
        let metrics = MetricsCollector::new();
        metrics.set_connected(true);
        metrics.set_queue_size(17);
        let snap = metrics.snapshot();
        assert!(snap.is_connected);
        assert_eq!(snap.queue_size, 17);

        metrics.set_connected(false);
        metrics.set_queue_size(0);
        let snap = metrics.snapshot();
        assert!(!snap.is_connected);
        assert_eq!(snap.queue_size, 0);
    }

    #[test]
    fn test_export_text_format() {
        let metrics = MetricsCollector::new();
        metrics.record_connect();
        metrics.set_connected(true);

        let text = metrics.export_text();
        assert!(text.contains("# HELP agentlink_connections_total"));
        assert!(text.contains("# TYPE agentlink_connections_total counter"));
        assert!(text.contains("agentlink_connections_total 1"));
        assert!(text.contains("# TYPE agentlink_connected gauge"));
        assert!(text.contains("agentlink_connected 1"));

        // Every non-comment line is "name value".
        for line in text.lines().filter(|l| !l.starts_with('#')) {
            let mut parts = line.split(' ');
            assert!(parts.next().is_some_and(|n| n.starts_with("agentlink_")));
            assert!(parts.next().is_some_and(|v| v.parse::<u64>().is_ok()));
            assert!(parts.next().is_none());
        }
    }
}
