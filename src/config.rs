//! Client, pool and queue configuration.
//!
//! All configs are immutable after construction. Changing pool topology at
//! runtime goes through [`ConnectionPool::add_connection`] and
//! [`ConnectionPool::remove_connection`](crate::pool::ConnectionPool::remove_connection),
//! never through config mutation.
//!
//! # Example
//!
//! ```ignore
//! use agentlink::{ConnectionConfig, PoolConfig, LoadBalancingStrategy};
//! use std::time::Duration;
//!
//! let pool = PoolConfig::new()
//!     .with_connections(2, 4)
//!     .with_strategy(LoadBalancingStrategy::LeastUsed)
//!     .with_health_check_interval(Duration::from_secs(10));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::LoadBalancingStrategy;
use crate::queue::OverflowPolicy;
use crate::transport::BackoffPolicy;

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Configuration for a single managed connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Bound on connection establishment.
    pub connect_timeout: Duration,

    /// Interval between heartbeat pings while open.
    pub heartbeat_interval: Duration,

    /// Bound on the pong after a ping; firing forces a reconnect.
    pub heartbeat_timeout: Duration,

    /// Whether non-manual closures trigger reconnection.
    pub auto_reconnect: bool,

    /// Maximum reconnect attempts before the connection fails terminally.
    pub max_reconnect_attempts: u32,

    /// Delay strategy between reconnect attempts.
    pub backoff: BackoffPolicy,
}

impl ConnectionConfig {
    /// Creates a config with production defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            backoff: BackoffPolicy::default_exponential(),
        }
    }

    /// Sets the connection establishment timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the heartbeat ping interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the heartbeat pong timeout.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn without_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Sets the reconnect attempt cap.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the backoff policy.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PoolConfig
// ============================================================================

/// Configuration for the connection pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Hard upper bound on pool size.
    pub max_connections: usize,

    /// Size below which evicted connections are replaced.
    pub min_connections: usize,

    /// Per-connection configuration.
    pub connection: ConnectionConfig,

    /// Interval between background health checks.
    pub health_check_interval: Duration,

    /// Consecutive failed checks before a connection is evicted.
    pub max_failed_checks: u32,

    /// Health score below which a connection is treated as unavailable
    /// under the health-based strategy.
    pub min_health_score: f64,

    /// Selection strategy for `send`.
    pub strategy: LoadBalancingStrategy,
}

impl PoolConfig {
    /// Creates a config with production defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_connections: 4,
            min_connections: 1,
            connection: ConnectionConfig::new(),
            health_check_interval: Duration::from_secs(30),
            max_failed_checks: 3,
            min_health_score: 0.3,
            strategy: LoadBalancingStrategy::RoundRobin,
        }
    }

    /// Sets the min/max pool bounds.
    #[inline]
    #[must_use]
    pub fn with_connections(mut self, min: usize, max: usize) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }

    /// Sets the per-connection configuration.
    #[inline]
    #[must_use]
    pub fn with_connection_config(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Sets the health check interval.
    #[inline]
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Sets the consecutive-failure eviction threshold.
    #[inline]
    #[must_use]
    pub fn with_max_failed_checks(mut self, checks: u32) -> Self {
        self.max_failed_checks = checks;
        self
    }

    /// Sets the minimum health score for health-based selection.
    #[inline]
    #[must_use]
    pub fn with_min_health_score(mut self, score: f64) -> Self {
        self.min_health_score = score;
        self
    }

    /// Sets the load balancing strategy.
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Validates bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if the bounds are inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::lifecycle("max_connections must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::lifecycle(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if !(0.0..=1.0).contains(&self.min_health_score) {
            return Err(Error::lifecycle("min_health_score must be within [0, 1]"));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// QueueConfig
// ============================================================================

/// Configuration for the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of persisted entries.
    pub max_queue_size: usize,

    /// Replay attempts per entry before it is dropped and reported.
    pub max_sync_attempts: u32,

    /// Behavior when an enqueue would exceed capacity.
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    /// Creates a config with production defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_queue_size: 100,
            max_sync_attempts: 5,
            overflow: OverflowPolicy::EvictOldest,
        }
    }

    /// Sets the queue capacity.
    #[inline]
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the per-entry replay attempt cap.
    #[inline]
    #[must_use]
    pub fn with_max_sync_attempts(mut self, attempts: u32) -> Self {
        self.max_sync_attempts = attempts;
        self
    }

    /// Sets the overflow policy.
    #[inline]
    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
