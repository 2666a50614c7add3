//! Durable offline queue with FIFO replay.
//!
//! When no connection is available, outbound messages land here and are
//! replayed in order once connectivity returns. Delivery is at-least-once;
//! consumers deduplicate on the message's idempotency key.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `entry` | Versioned persisted schema |
//! | `store` | Persistence backends (file, memory) |

// ============================================================================
// Submodules
// ============================================================================

/// Persisted schema.
pub mod entry;

/// Persistence backends.
pub mod store;

pub use entry::{PersistedQueue, QueueEntry, SCHEMA_VERSION};
pub use store::{FileStore, MemoryStore, QueueStore};

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::metrics::MetricsCollector;
use crate::protocol::Envelope;

// ============================================================================
// Types
// ============================================================================

/// What to do when an enqueue would exceed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the oldest entry to make room.
    EvictOldest,
    /// Refuse the new message with [`Error::QueueFull`].
    RejectNewest,
}

/// Result of a sync pass.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The pass ran to completion.
    Completed(SyncReport),
    /// Another sync was already in flight; nothing was done.
    AlreadyRunning,
}

/// Accounting for one completed sync pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries delivered and removed.
    pub delivered: usize,
    /// Entries that failed and remain queued.
    pub retained: usize,
    /// Entries dropped after exceeding the attempt cap. Never silent: the
    /// caller decides whether to surface these to the user.
    pub dropped: Vec<MessageId>,
}

// ============================================================================
// OfflineQueue
// ============================================================================

/// Bounded, persisted FIFO of undelivered messages.
pub struct OfflineQueue {
    config: QueueConfig,
    store: Arc<dyn QueueStore>,
    metrics: Arc<MetricsCollector>,
    /// Serializes all load-modify-save cycles against the store.
    mutation: Mutex<()>,
    /// Set while a sync pass is in flight.
    syncing: AtomicBool,
}

impl OfflineQueue {
    /// Creates a queue over the given store.
    #[must_use]
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn QueueStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            store,
            metrics,
            mutation: Mutex::new(()),
            syncing: AtomicBool::new(false),
        }
    }

    /// Queues a message for later delivery.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMessage`] for schema failures (never queued)
    /// - [`Error::QueueFull`] at capacity under [`OverflowPolicy::RejectNewest`]
    /// - [`Error::Storage`] from the store
    pub async fn enqueue(&self, message: Envelope) -> Result<()> {
        message.validate()?;

        let _guard = self.mutation.lock().await;
        let mut queue = self.store.load().await?;

        while queue.entries.len() >= self.config.max_queue_size {
            match self.config.overflow {
                OverflowPolicy::EvictOldest => {
                    let evicted = queue.entries.remove(0);
                    warn!(
                        message_id = %evicted.id,
                        "Queue full, evicting oldest entry"
                    );
                }
                OverflowPolicy::RejectNewest => {
                    return Err(Error::queue_full(self.config.max_queue_size));
                }
            }
        }

        debug!(message_id = %message.id, "Message queued for later delivery");
        queue.entries.push(QueueEntry::new(message));
        let size = queue.entries.len();
        self.store.save(&queue).await?;
        self.metrics.set_queue_size(size as u64);
        Ok(())
    }

    /// Returns the number of queued entries.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn size(&self) -> Result<usize> {
        Ok(self.store.load().await?.entries.len())
    }

    /// Removes every queued entry.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.store.save(&PersistedQueue::empty()).await?;
        self.metrics.set_queue_size(0);
        Ok(())
    }

    /// Replays queued entries in FIFO order through `send`.
    ///
    /// A delivered entry is removed; a failed one stays with its attempt
    /// count incremented, unless it exceeded `max_sync_attempts`, in which
    /// case it is dropped and reported. Concurrent calls do not interleave:
    /// the second caller gets [`SyncOutcome::AlreadyRunning`].
    ///
    /// # Errors
    ///
    /// Propagates store failures; send failures are accounted in the report,
    /// not returned.
    pub async fn sync<F, Fut>(&self, send: F) -> Result<SyncOutcome>
    where
        F: Fn(Envelope) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!("Sync already in flight, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let outcome = self.run_sync(send).await;
        self.syncing.store(false, Ordering::SeqCst);
        outcome.map(SyncOutcome::Completed)
    }

    async fn run_sync<F, Fut>(&self, send: F) -> Result<SyncReport>
    where
        F: Fn(Envelope) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _guard = self.mutation.lock().await;
        let queue = self.store.load().await?;
        if queue.entries.is_empty() {
            return Ok(SyncReport::default());
        }

        let mut report = SyncReport::default();
        let mut remaining = Vec::with_capacity(queue.entries.len());

        for mut entry in queue.entries {
            match send(entry.message.clone()).await {
                Ok(()) => {
                    report.delivered += 1;
                }
                Err(e) => {
                    entry.record_attempt();
                    if entry.attempts >= self.config.max_sync_attempts {
                        warn!(
                            message_id = %entry.id,
                            attempts = entry.attempts,
                            "Dropping message after repeated sync failures"
                        );
                        report.dropped.push(entry.id);
                    } else {
                        debug!(
                            message_id = %entry.id,
                            attempts = entry.attempts,
                            error = %e,
                            "Sync attempt failed, retaining entry"
                        );
                        report.retained += 1;
                        remaining.push(entry);
                    }
                }
            }
        }

        let size = remaining.len();
        self.store
            .save(&PersistedQueue {
                version: SCHEMA_VERSION,
                entries: remaining,
            })
            .await?;
        self.metrics.set_queue_size(size as u64);

        info!(
            delivered = report.delivered,
            retained = report.retained,
            dropped = report.dropped.len(),
            "Offline queue sync complete"
        );
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    fn queue_with(config: QueueConfig) -> OfflineQueue {
        OfflineQueue::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MetricsCollector::new()),
        )
    }

    fn envelope(n: u64) -> Envelope {
        Envelope::with_id(
            MessageId::new(format!("m{n}")),
            "cmd",
            json!({ "n": n }),
        )
    }

    #[tokio::test]
    async fn test_enqueue_and_size() {
        let queue = queue_with(QueueConfig::new());
        queue.enqueue(envelope(1)).await.expect("enqueue");
        queue.enqueue(envelope(2)).await.expect("enqueue");
        assert_eq!(queue.size().await.expect("size"), 2);
    }

    #[tokio::test]
    async fn test_invalid_message_never_queued() {
        let queue = queue_with(QueueConfig::new());
        let bad = Envelope::new("ping", json!(null));
        assert!(queue.enqueue(bad).await.is_err());
        assert_eq!(queue.size().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn test_evict_oldest_bounds_queue() {
        let queue = queue_with(QueueConfig::new().with_max_queue_size(3));
        for n in 0..5 {
            queue.enqueue(envelope(n)).await.expect("enqueue");
        }
        assert_eq!(queue.size().await.expect("size"), 3);

        // The two oldest were evicted; the remainder replays in order.
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        queue
            .sync(move |message| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.lock().push(message.id.as_str().to_string());
                    Ok(())
                }
            })
            .await
            .expect("sync");
        assert_eq!(*seen.lock(), vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_reject_newest_errors_at_capacity() {
        let queue = queue_with(
            QueueConfig::new()
                .with_max_queue_size(2)
                .with_overflow(OverflowPolicy::RejectNewest),
        );
        queue.enqueue(envelope(1)).await.expect("enqueue");
        queue.enqueue(envelope(2)).await.expect("enqueue");

        let result = queue.enqueue(envelope(3)).await;
        assert!(matches!(result, Err(Error::QueueFull { capacity: 2 })));
        assert_eq!(queue.size().await.expect("size"), 2);
    }

    #[tokio::test]
    async fn test_sync_delivers_fifo_and_drains() {
        let queue = queue_with(QueueConfig::new());
        for n in 0..4 {
            queue.enqueue(envelope(n)).await.expect("enqueue");
        }

        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let outcome = queue
            .sync(move |message| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.lock().push(message.id.as_str().to_string());
                    Ok(())
                }
            })
            .await
            .expect("sync");

        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.delivered, 4);
                assert_eq!(report.retained, 0);
                assert!(report.dropped.is_empty());
            }
            SyncOutcome::AlreadyRunning => panic!("no concurrent sync"),
        }
        assert_eq!(*seen.lock(), vec!["m0", "m1", "m2", "m3"]);
        assert_eq!(queue.size().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn test_failed_entries_retained_with_attempts() {
        let queue = queue_with(QueueConfig::new().with_max_sync_attempts(3));
        queue.enqueue(envelope(1)).await.expect("enqueue");

        let outcome = queue
            .sync(|_| async { Err(Error::send_failed("offline")) })
            .await
            .expect("sync");
        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.delivered, 0);
                assert_eq!(report.retained, 1);
            }
            SyncOutcome::AlreadyRunning => panic!("no concurrent sync"),
        }
        assert_eq!(queue.size().await.expect("size"), 1);
    }

    #[tokio::test]
    async fn test_entry_dropped_after_max_attempts() {
        let queue = queue_with(QueueConfig::new().with_max_sync_attempts(2));
        queue.enqueue(envelope(7)).await.expect("enqueue");

        // First failing pass: retained. Second: dropped and reported.
        queue
            .sync(|_| async { Err(Error::send_failed("offline")) })
            .await
            .expect("sync");
        let outcome = queue
            .sync(|_| async { Err(Error::send_failed("offline")) })
            .await
            .expect("sync");

        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.dropped, vec![MessageId::new("m7")]);
                assert_eq!(report.retained, 0);
            }
            SyncOutcome::AlreadyRunning => panic!("no concurrent sync"),
        }
        assert_eq!(queue.size().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn test_partial_sync_keeps_failures_only() {
        let queue = queue_with(QueueConfig::new());
        for n in 0..3 {
            queue.enqueue(envelope(n)).await.expect("enqueue");
        }

        // Fail only m1.
        let outcome = queue
            .sync(|message| async move {
                if message.id.as_str() == "m1" {
                    Err(Error::send_failed("flaky"))
                } else {
                    Ok(())
                }
            })
            .await
            .expect("sync");

        match outcome {
            SyncOutcome::Completed(report) => {
                assert_eq!(report.delivered, 2);
                assert_eq!(report.retained, 1);
            }
            SyncOutcome::AlreadyRunning => panic!("no concurrent sync"),
        }
        assert_eq!(queue.size().await.expect("size"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_serialized() {
        let queue = Arc::new(queue_with(QueueConfig::new()));
        queue.enqueue(envelope(1)).await.expect("enqueue");

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));

        let first = {
            let queue = Arc::clone(&queue);
            let release_rx = Arc::clone(&release_rx);
            tokio::spawn(async move {
                queue
                    .sync(move |_| {
                        let release_rx = Arc::clone(&release_rx);
                        async move {
                            // Hold the pass open until released.
                            if let Some(rx) = release_rx.lock().await.take() {
                                let _ = rx.await;
                            }
                            Ok(())
                        }
                    })
                    .await
            })
        };

        // Give the first sync time to take the slot.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = queue.sync(|_| async { Ok(()) }).await.expect("sync");
        assert!(matches!(second, SyncOutcome::AlreadyRunning));

        release_tx.send(()).expect("release");
        let first = first.await.expect("join").expect("sync");
        assert!(matches!(first, SyncOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = queue_with(QueueConfig::new());
        queue.enqueue(envelope(1)).await.expect("enqueue");
        queue.clear().await.expect("clear");
        assert_eq!(queue.size().await.expect("size"), 0);
    }

    #[tokio::test]
    async fn test_sync_empty_queue_is_noop() {
        let queue = queue_with(QueueConfig::new());
        let outcome = queue
            .sync(|_| async { panic!("nothing to send") })
            .await
            .expect("sync");
        match outcome {
            SyncOutcome::Completed(report) => assert_eq!(report, SyncReport::default()),
            SyncOutcome::AlreadyRunning => panic!("no concurrent sync"),
        }
    }
}
