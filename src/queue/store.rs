//! Queue persistence backends.
//!
//! [`QueueStore`] abstracts where the persisted queue lives. Production
//! uses [`FileStore`]; [`MemoryStore`] backs tests and clients configured
//! without a path.
//!
//! Both stores replace the whole document per save. The queue is small by
//! contract (bounded at `max_queue_size`), so whole-document replacement is
//! simpler and atomic.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

use super::entry::PersistedQueue;

// ============================================================================
// QueueStore
// ============================================================================

/// Persistence seam for the offline queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Loads the persisted queue; absent storage yields an empty queue.
    async fn load(&self) -> Result<PersistedQueue>;

    /// Replaces the persisted queue atomically.
    async fn save(&self, queue: &PersistedQueue) -> Result<()>;
}

// ============================================================================
// FileStore
// ============================================================================

/// JSON-file persistence with atomic replace.
///
/// Saves write to a sibling temp file and rename over the target, so a
/// crash mid-write never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a store at the given path. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueueStore for FileStore {
    async fn load(&self) -> Result<PersistedQueue> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(PersistedQueue::decode(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted queue, starting empty");
                Ok(PersistedQueue::empty())
            }
            Err(e) => Err(Error::storage(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, queue: &PersistedQueue) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(queue)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::storage(format!("replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory persistence for tests and path-less configurations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queue: Mutex<PersistedQueue>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(PersistedQueue::empty()),
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn load(&self) -> Result<PersistedQueue> {
        Ok(self.queue.lock().clone())
    }

    async fn save(&self, queue: &PersistedQueue) -> Result<()> {
        *self.queue.lock() = queue.clone();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::Envelope;
    use crate::queue::entry::QueueEntry;

    fn sample_queue() -> PersistedQueue {
        let mut queue = PersistedQueue::empty();
        queue
            .entries
            .push(QueueEntry::new(Envelope::new("cmd", json!({"n": 1}))));
        queue
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("queue.json"));
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, PersistedQueue::empty());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("queue.json"));

        let queue = sample_queue();
        store.save(&queue).await.expect("save");
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, queue);
    }

    #[tokio::test]
    async fn test_file_store_save_replaces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("queue.json"));

        store.save(&sample_queue()).await.expect("save one");
        store.save(&PersistedQueue::empty()).await.expect("save two");
        let loaded = store.load().await.expect("load");
        assert!(loaded.entries.is_empty());

        // No temp file left behind.
        assert!(!dir.path().join("queue.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.json");
        tokio::fs::write(&path, b"{{{ garbage").await.expect("write");

        let store = FileStore::new(path);
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, PersistedQueue::empty());
    }

    #[tokio::test]
    async fn test_file_store_save_failure_is_storage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Parent directory does not exist, so the temp-file write fails.
        let store = FileStore::new(dir.path().join("missing").join("queue.json"));

        let result = store.save(&sample_queue()).await;
        assert!(matches!(result, Err(crate::error::Error::Storage { .. })));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load().await.expect("load").entries.is_empty());

        let queue = sample_queue();
        store.save(&queue).await.expect("save");
        assert_eq!(store.load().await.expect("load"), queue);
    }
}
