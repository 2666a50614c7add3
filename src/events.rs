//! Publish/subscribe event delivery.
//!
//! Incoming messages and lifecycle transitions are delivered through an
//! explicit [`EventBus`] rather than ad hoc callbacks: every `subscribe`
//! returns a [`Subscription`] handle, so teardown can deterministically
//! remove every handler.
//!
//! Handlers run synchronously on the event loop that emits them and must not
//! block.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::identifiers::{ConnectionId, SubscriptionId};
use crate::protocol::Envelope;
use crate::transport::ConnectionState;

// ============================================================================
// ClientEvent
// ============================================================================

/// Events surfaced to the consuming application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection changed lifecycle state.
    StateChanged {
        /// The connection that transitioned.
        connection: ConnectionId,
        /// The new state.
        state: ConnectionState,
    },

    /// An application message arrived.
    Message {
        /// The connection it arrived on.
        connection: ConnectionId,
        /// The decoded envelope.
        envelope: Envelope,
    },

    /// A transient connection error, handled internally by the reconnect
    /// state machine and surfaced for observability only.
    ConnectionError {
        /// The affected connection.
        connection: ConnectionId,
        /// What went wrong; subscribers can use the [`Error`] predicates
        /// (`is_timeout`, ...) to classify it.
        error: Arc<Error>,
    },

    /// The reconnect budget for a connection is exhausted.
    ///
    /// Terminal: the application must reconnect explicitly.
    ReconnectExhausted {
        /// The failed connection.
        connection: ConnectionId,
        /// Attempts that were made.
        attempts: u32,
    },
}

// ============================================================================
// EventBus
// ============================================================================

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A multi-subscriber event bus.
///
/// Cloning shares the subscriber set.
pub struct EventBus<T> {
    handlers: Arc<RwLock<FxHashMap<SubscriptionId, Handler<T>>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    /// Registers a handler and returns its subscription handle.
    ///
    /// The handler is removed when the handle is dropped or
    /// [`Subscription::unsubscribe`] is called.
    #[must_use]
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: 'static,
    {
        let id = SubscriptionId::next();
        self.handlers.write().insert(id, Arc::new(handler));

        let handlers = Arc::clone(&self.handlers);
        Subscription {
            id,
            cancel: Some(Box::new(move || {
                handlers.write().remove(&id);
            })),
        }
    }

    /// Delivers an event to every current subscriber.
    pub fn emit(&self, event: &T) {
        // Snapshot handlers outside the lock so a handler may subscribe
        // or unsubscribe without deadlocking.
        let snapshot: Vec<Handler<T>> = self.handlers.read().values().cloned().collect();
        for handler in snapshot {
            handler(event);
        }
    }

    /// Returns the number of live subscriptions.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Removes every subscriber.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to a registered event handler.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Returns the subscription ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the handler immediately.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let _s1 = bus.subscribe(move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = Arc::clone(&hits);
        let _s2 = bus.subscribe(move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&7);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let bus: EventBus<u32> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.emit(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_with_no_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        bus.emit(&42);
    }

    #[test]
    fn test_clear() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe(|_| {});
        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
        // Unsubscribing an already-cleared handle is a no-op.
        sub.unsubscribe();
    }
}
