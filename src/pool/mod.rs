//! Connection pool: load balancing and background health checks.
//!
//! The pool owns a set of [`ConnectionManager`]s dialed at the same endpoint
//! and spreads sends across them. Pool size changes only through explicit
//! [`ConnectionPool::add_connection`] / [`ConnectionPool::remove_connection`]
//! calls or health-check eviction, never implicitly per message.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `strategy` | Selection policies over connection snapshots |

// ============================================================================
// Submodules
// ============================================================================

/// Selection policies.
pub mod strategy;

pub use strategy::LoadBalancingStrategy;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventBus, Subscription};
use crate::identifiers::ConnectionId;
use crate::metrics::MetricsCollector;
use crate::protocol::Envelope;
use crate::transport::{ConnectionManager, ConnectionSnapshot};

// ============================================================================
// Types
// ============================================================================

/// Result of a pool send that had no hard failure.
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered on the given connection.
    Sent {
        /// The connection that carried the message.
        connection: ConnectionId,
    },
    /// No open connection qualified under the active strategy; the caller
    /// decides whether to queue.
    NoHealthyConnection,
}

impl SendOutcome {
    /// Returns `true` if the message was delivered.
    #[inline]
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

struct PoolMember {
    manager: Arc<ConnectionManager>,
    consecutive_failures: u32,
}

struct PoolInner {
    url: Url,
    config: PoolConfig,
    members: RwLock<Vec<PoolMember>>,
    rr_cursor: AtomicUsize,
    events: EventBus<ClientEvent>,
    metrics: Arc<MetricsCollector>,
    shutting_down: AtomicBool,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// A bounded pool of connections to one endpoint.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// ConnectionPool - Construction
// ============================================================================

impl ConnectionPool {
    /// Creates a pool. No connections are dialed until [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if the config bounds are inconsistent.
    pub fn new(url: Url, config: PoolConfig, metrics: Arc<MetricsCollector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                url,
                config,
                members: RwLock::new(Vec::new()),
                rr_cursor: AtomicUsize::new(0),
                events: EventBus::new(),
                metrics,
                shutting_down: AtomicBool::new(false),
            }),
            health_task: Mutex::new(None),
        })
    }

    /// Dials the minimum number of connections and starts health checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if already started or shut down.
    pub fn start(&self) -> Result<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::lifecycle("pool is shut down"));
        }
        let mut task = self.health_task.lock();
        if task.is_some() {
            return Err(Error::lifecycle("pool already started"));
        }

        for _ in 0..self.inner.config.min_connections {
            Self::spawn_member(&self.inner)?;
        }

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(Self::health_loop(inner)));
        info!(
            url = %self.inner.url,
            min = self.inner.config.min_connections,
            max = self.inner.config.max_connections,
            "Connection pool started"
        );
        Ok(())
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Sends a message on a connection picked by the active strategy.
    ///
    /// Returns [`SendOutcome::NoHealthyConnection`] when nothing qualifies,
    /// so the caller can fall back to the offline queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] for schema failures (never queued),
    /// or the underlying send error if delivery fails on the chosen
    /// connection.
    pub async fn send(&self, envelope: Envelope) -> Result<SendOutcome> {
        envelope.validate()?;

        let Some(manager) = self.pick() else {
            return Ok(SendOutcome::NoHealthyConnection);
        };
        let connection = manager.id();
        manager.send(envelope).await?;
        Ok(SendOutcome::Sent { connection })
    }

    /// Sends a message, failing immediately when no connection qualifies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when no open connection qualifies,
    /// plus the failure modes of [`Self::send`].
    pub async fn send_fail_fast(&self, envelope: Envelope) -> Result<ConnectionId> {
        envelope.validate()?;

        let manager = self.pick().ok_or(Error::PoolExhausted)?;
        let connection = manager.id();
        manager.send(envelope).await?;
        Ok(connection)
    }

    /// Sends a message on every open connection.
    ///
    /// Returns the per-connection outcome; an empty vec means nothing was
    /// open.
    pub async fn broadcast(&self, envelope: Envelope) -> Vec<(ConnectionId, Result<()>)> {
        let targets: Vec<Arc<ConnectionManager>> = {
            let members = self.inner.members.read();
            members
                .iter()
                .filter(|m| m.manager.state().is_open())
                .map(|m| Arc::clone(&m.manager))
                .collect()
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for manager in targets {
            let outcome = manager.send(envelope.clone()).await;
            outcomes.push((manager.id(), outcome));
        }
        outcomes
    }

    /// Adds one connection, bounded by `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] at the bound, or [`Error::Lifecycle`]
    /// after shutdown.
    pub fn add_connection(&self) -> Result<ConnectionId> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::lifecycle("pool is shut down"));
        }
        Self::spawn_member(&self.inner)
    }

    /// Removes and disposes a connection. Returns `false` if unknown.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        let mut members = self.inner.members.write();
        let Some(index) = members.iter().position(|m| m.manager.id() == id) else {
            return false;
        };
        let member = members.remove(index);
        drop(members);

        member.manager.dispose();
        debug!(connection_id = %id, "Connection removed from pool");
        true
    }

    /// Returns the current pool size, including non-open members.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.members.read().len()
    }

    /// Returns the number of open connections at or above the minimum
    /// health score.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        let min_score = self.inner.config.min_health_score;
        self.inner
            .members
            .read()
            .iter()
            .map(|m| m.manager.snapshot())
            .filter(|s| s.state.is_open() && s.health_score >= min_score)
            .count()
    }

    /// Returns `true` if at least one connection is open.
    #[must_use]
    pub fn has_open(&self) -> bool {
        self.inner
            .members
            .read()
            .iter()
            .any(|m| m.manager.state().is_open())
    }

    /// Returns a snapshot of every member connection.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        self.inner
            .members
            .read()
            .iter()
            .map(|m| m.manager.snapshot())
            .collect()
    }

    /// Subscribes to events from every member connection.
    #[must_use]
    pub fn subscribe(&self, handler: impl Fn(&ClientEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.events.subscribe(handler)
    }

    /// Returns the shared metrics collector.
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.inner.metrics
    }

    /// Disposes every connection and stops health checks.
    ///
    /// Idempotent; the pool cannot be restarted afterwards.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }

        let drained: Vec<PoolMember> = {
            let mut members = self.inner.members.write();
            members.drain(..).collect()
        };
        for member in &drained {
            member.manager.dispose();
        }
        self.inner.metrics.set_connected(false);
        info!(count = drained.len(), "Connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// ConnectionPool - Internals
// ============================================================================

impl ConnectionPool {
    /// Creates, connects and registers one member.
    fn spawn_member(inner: &Arc<PoolInner>) -> Result<ConnectionId> {
        let mut members = inner.members.write();
        if members.len() >= inner.config.max_connections {
            return Err(Error::PoolExhausted);
        }

        let manager = Arc::new(ConnectionManager::with_bus(
            inner.url.clone(),
            inner.config.connection.clone(),
            Arc::clone(&inner.metrics),
            inner.events.clone(),
        ));
        manager.connect()?;
        let id = manager.id();
        members.push(PoolMember {
            manager,
            consecutive_failures: 0,
        });
        debug!(connection_id = %id, size = members.len(), "Connection added to pool");
        Ok(id)
    }

    /// Picks a manager under the active strategy.
    fn pick(&self) -> Option<Arc<ConnectionManager>> {
        let (snapshots, managers): (Vec<ConnectionSnapshot>, Vec<Arc<ConnectionManager>>) = {
            let members = self.inner.members.read();
            members
                .iter()
                .map(|m| (m.manager.snapshot(), Arc::clone(&m.manager)))
                .unzip()
        };

        let cursor = self.inner.rr_cursor.fetch_add(1, Ordering::Relaxed);
        let index = strategy::select(
            self.inner.config.strategy,
            &snapshots,
            cursor,
            self.inner.config.min_health_score,
        )?;
        Some(Arc::clone(&managers[index]))
    }

    /// Periodic health check: evicts persistently unhealthy members and
    /// tops the pool back up to the minimum.
    async fn health_loop(inner: Arc<PoolInner>) {
        let mut ticker = tokio::time::interval(inner.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so fresh connections get
        // a full interval to come up.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            Self::run_health_check(&inner);
        }
    }

    fn run_health_check(inner: &Arc<PoolInner>) {
        let min_score = inner.config.min_health_score;
        let max_failed = inner.config.max_failed_checks;

        let evicted: Vec<PoolMember> = {
            let mut members = inner.members.write();
            for member in members.iter_mut() {
                let snap = member.manager.snapshot();
                let healthy = snap.state.is_open() && snap.health_score >= min_score;
                if healthy {
                    member.consecutive_failures = 0;
                } else {
                    member.consecutive_failures += 1;
                }
            }

            let mut evicted = Vec::new();
            let mut index = 0;
            while index < members.len() {
                if members[index].consecutive_failures >= max_failed {
                    evicted.push(members.remove(index));
                } else {
                    index += 1;
                }
            }
            evicted
        };

        for member in &evicted {
            warn!(
                connection_id = %member.manager.id(),
                failures = member.consecutive_failures,
                "Evicting unhealthy connection"
            );
            member.manager.dispose();
        }

        // Top back up to the minimum.
        while inner.members.read().len() < inner.config.min_connections {
            if let Err(e) = Self::spawn_member(inner) {
                warn!(error = %e, "Failed to replace evicted connection");
                break;
            }
        }

        inner.metrics.set_connected(
            inner
                .members
                .read()
                .iter()
                .any(|m| m.manager.state().is_open()),
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
