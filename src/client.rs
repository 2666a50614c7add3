//! Top-level client facade.
//!
//! [`Client`] wires the pool, the offline queue and the metrics collector
//! together behind one handle:
//!
//! ```text
//! send() ──► pool ──► open connection ──► delivered
//!              │
//!              └─ no healthy connection / transport failure
//!                         │ (QueueOnFailure)
//!                         ▼
//!                   offline queue ── sync on reconnect ──► delivered
//! ```
//!
//! Connectivity changes come from two sources: the pool's own state events
//! and the host environment via [`ConnectivityHandle`]. Either one flipping
//! to online triggers a queue sync.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{PoolConfig, QueueConfig};
use crate::error::{Error, Result};
use crate::events::{ClientEvent, Subscription};
use crate::identifiers::ConnectionId;
use crate::metrics::MetricsCollector;
use crate::pool::{ConnectionPool, SendOutcome};
use crate::protocol::Envelope;
use crate::queue::{FileStore, MemoryStore, OfflineQueue, QueueStore, SyncOutcome};
use crate::transport::ConnectionState;

// ============================================================================
// Types
// ============================================================================

/// What to do with a message when no connection can carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPreference {
    /// Queue the message and replay it once connectivity returns.
    #[default]
    QueueOnFailure,
    /// Surface the failure to the caller immediately.
    FailFast,
}

/// Where a message ended up after [`Client::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Delivered on an open connection.
    Delivered {
        /// The connection that carried it.
        connection: ConnectionId,
    },
    /// Stored in the offline queue for later replay.
    Queued,
}

/// Handle for feeding the host environment's online/offline signal into
/// the client.
///
/// Cheap to clone; an offline-to-online edge triggers a queue sync.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Reports the environment's connectivity.
    pub fn set_online(&self, online: bool) {
        let _ = self.tx.send(online);
    }

    /// Returns the last reported connectivity.
    #[inline]
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for [`Client`].
pub struct ClientBuilder {
    url: Url,
    pool: PoolConfig,
    queue: QueueConfig,
    fallback: FallbackPreference,
    store: Option<Arc<dyn QueueStore>>,
    queue_path: Option<PathBuf>,
}

impl ClientBuilder {
    fn new(url: Url) -> Self {
        Self {
            url,
            pool: PoolConfig::new(),
            queue: QueueConfig::new(),
            fallback: FallbackPreference::default(),
            store: None,
            queue_path: None,
        }
    }

    /// Sets the pool configuration.
    #[inline]
    #[must_use]
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the offline queue configuration.
    #[inline]
    #[must_use]
    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the fallback behavior for undeliverable messages.
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackPreference) -> Self {
        self.fallback = fallback;
        self
    }

    /// Persists the offline queue at the given file path.
    ///
    /// Without a path (or explicit store) the queue lives in memory only.
    #[inline]
    #[must_use]
    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = Some(path.into());
        self
    }

    /// Uses a custom queue store. Takes precedence over a queue path.
    #[inline]
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the client. No connections are dialed until [`Client::start`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if the pool config is inconsistent.
    pub fn build(self) -> Result<Client> {
        let metrics = Arc::new(MetricsCollector::new());

        let store: Arc<dyn QueueStore> = match (self.store, self.queue_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::new(path)),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let pool = Arc::new(ConnectionPool::new(
            self.url.clone(),
            self.pool,
            Arc::clone(&metrics),
        )?);
        let queue = Arc::new(OfflineQueue::new(
            self.queue,
            store,
            Arc::clone(&metrics),
        ));

        let (connectivity_tx, connectivity_rx) = watch::channel(true);

        Ok(Client {
            url: self.url,
            pool,
            queue,
            metrics,
            fallback: self.fallback,
            connectivity_tx,
            connectivity_rx: Mutex::new(Some(connectivity_rx)),
            sync_notify: Arc::new(Notify::new()),
            running: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Resilient messaging client: pooled connections with offline fallback.
pub struct Client {
    url: Url,
    pool: Arc<ConnectionPool>,
    queue: Arc<OfflineQueue>,
    metrics: Arc<MetricsCollector>,
    fallback: FallbackPreference,
    connectivity_tx: watch::Sender<bool>,
    connectivity_rx: Mutex<Option<watch::Receiver<bool>>>,
    sync_notify: Arc<Notify>,
    running: Mutex<Option<(JoinHandle<()>, Subscription)>>,
    stopped: AtomicBool,
}

impl Client {
    /// Starts building a client for the given endpoint.
    #[must_use]
    pub fn builder(url: Url) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Dials the pool and starts the background sync trigger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if already started or stopped.
    pub fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::lifecycle("client is stopped"));
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::lifecycle("client already started"));
        }
        let connectivity_rx = self
            .connectivity_rx
            .lock()
            .take()
            .ok_or_else(|| Error::lifecycle("client already started"))?;

        self.pool.start()?;

        // Any connection reaching Open is a moment to flush the queue.
        let notify = Arc::clone(&self.sync_notify);
        let metrics = Arc::clone(&self.metrics);
        let subscription = self.pool.subscribe(move |event| {
            if let ClientEvent::StateChanged {
                state: ConnectionState::Open,
                ..
            } = event
            {
                metrics.set_connected(true);
                notify.notify_one();
            }
        });

        let task = tokio::spawn(Self::sync_trigger_loop(
            Arc::clone(&self.pool),
            Arc::clone(&self.queue),
            Arc::clone(&self.sync_notify),
            connectivity_rx,
        ));
        *running = Some((task, subscription));
        info!(url = %self.url, "Client started");
        Ok(())
    }

    /// Sends a message, falling back to the offline queue when configured.
    ///
    /// # Errors
    ///
    /// Under [`FallbackPreference::FailFast`], any delivery failure.
    /// Under [`FallbackPreference::QueueOnFailure`], only non-recoverable
    /// errors ([`Error::InvalidMessage`], storage failures) reach the caller.
    pub async fn send(&self, envelope: Envelope) -> Result<SendDisposition> {
        match self.fallback {
            FallbackPreference::FailFast => {
                let connection = self.pool.send_fail_fast(envelope).await?;
                Ok(SendDisposition::Delivered { connection })
            }
            FallbackPreference::QueueOnFailure => match self.pool.send(envelope.clone()).await {
                Ok(SendOutcome::Sent { connection }) => {
                    Ok(SendDisposition::Delivered { connection })
                }
                Ok(SendOutcome::NoHealthyConnection) => {
                    self.queue.enqueue(envelope).await?;
                    Ok(SendDisposition::Queued)
                }
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "Send failed, queueing message");
                    self.queue.enqueue(envelope).await?;
                    Ok(SendDisposition::Queued)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Replays the offline queue through the pool now.
    ///
    /// # Errors
    ///
    /// Propagates queue storage failures.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        Self::run_sync(&self.pool, &self.queue).await
    }

    /// Subscribes to connection and message events.
    #[must_use]
    pub fn subscribe(&self, handler: impl Fn(&ClientEvent) + Send + Sync + 'static) -> Subscription {
        self.pool.subscribe(handler)
    }

    /// Returns the environment connectivity handle.
    #[must_use]
    pub fn connectivity(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            tx: self.connectivity_tx.clone(),
        }
    }

    /// Returns the metrics collector.
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Returns `true` if at least one connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.pool.has_open()
    }

    /// Returns the number of messages waiting in the offline queue.
    ///
    /// # Errors
    ///
    /// Propagates queue storage failures.
    pub async fn queue_size(&self) -> Result<usize> {
        self.queue.size().await
    }

    /// Waits until at least one connection is open, with a bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`] if the bound elapses first.
    pub async fn wait_until_connected(&self, wait: Duration) -> Result<()> {
        let notify = Arc::new(Notify::new());
        let opened = Arc::clone(&notify);
        let _sub = self.pool.subscribe(move |event| {
            if let ClientEvent::StateChanged {
                state: ConnectionState::Open,
                ..
            } = event
            {
                opened.notify_one();
            }
        });

        // Checked after subscribing so an Open edge cannot slip between the
        // check and the wait.
        let outcome = timeout(wait, async {
            while !self.pool.has_open() {
                notify.notified().await;
            }
        })
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::connection_timeout(wait.as_millis() as u64)),
        }
    }

    /// Stops the client: disposes every connection and the sync trigger.
    ///
    /// Queued messages stay persisted for the next session. Idempotent;
    /// the client cannot be restarted.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((task, subscription)) = self.running.lock().take() {
            task.abort();
            drop(subscription);
        }
        self.pool.shutdown();
        info!(url = %self.url, "Client stopped");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Client - Internals
// ============================================================================

impl Client {
    /// Runs one queue sync pass through the pool's fail-fast send.
    async fn run_sync(pool: &Arc<ConnectionPool>, queue: &Arc<OfflineQueue>) -> Result<SyncOutcome> {
        let pool = Arc::clone(pool);
        queue
            .sync(move |envelope| {
                let pool = Arc::clone(&pool);
                async move { pool.send_fail_fast(envelope).await.map(|_| ()) }
            })
            .await
    }

    /// Waits for sync triggers: a connection reaching Open, or the
    /// environment flipping back online.
    async fn sync_trigger_loop(
        pool: Arc<ConnectionPool>,
        queue: Arc<OfflineQueue>,
        notify: Arc<Notify>,
        mut connectivity_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                () = notify.notified() => {}
                changed = connectivity_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*connectivity_rx.borrow_and_update() {
                        debug!("Environment reported offline");
                        continue;
                    }
                    debug!("Environment reported online");
                }
            }

            if !pool.has_open() {
                continue;
            }
            match Self::run_sync(&pool, &queue).await {
                Ok(SyncOutcome::Completed(report)) if !report.dropped.is_empty() => {
                    warn!(
                        dropped = report.dropped.len(),
                        "Messages dropped during queue sync"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Queue sync failed"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    use crate::config::ConnectionConfig;
    use crate::protocol::TYPE_PING;
    use crate::transport::BackoffPolicy;

    /// Echo server that can start on a predetermined port, so tests can
    /// simulate a server coming up after the client.
    struct EchoServer {
        received_rx: mpsc::UnboundedReceiver<Envelope>,
        handle: JoinHandle<()>,
    }

    impl EchoServer {
        async fn bind(port: u16) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", port)).await.expect("bind");
            let (received_tx, received_rx) = mpsc::unbounded_channel();

            let handle = tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let received_tx = received_tx.clone();
                    tokio::spawn(async move {
                        let Ok(ws) = accept_async(stream).await else {
                            return;
                        };
                        let (mut sink, mut stream) = ws.split();
                        while let Some(Ok(message)) = stream.next().await {
                            if let Message::Text(text) = message
                                && let Ok(envelope) =
                                    serde_json::from_str::<Envelope>(text.as_str())
                            {
                                if envelope.message_type == TYPE_PING {
                                    let pong = Envelope::pong(envelope.id);
                                    let json = serde_json::to_string(&pong).expect("pong");
                                    if sink.send(Message::Text(json.into())).await.is_err() {
                                        return;
                                    }
                                } else {
                                    let _ = received_tx.send(envelope);
                                }
                            }
                        }
                    });
                }
            });

            Self {
                received_rx,
                handle,
            }
        }
    }

    impl Drop for EchoServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    fn test_pool_config() -> PoolConfig {
        PoolConfig::new().with_connections(1, 2).with_connection_config(
            ConnectionConfig::new()
                .with_connect_timeout(Duration::from_secs(2))
                .with_heartbeat_interval(Duration::from_secs(60))
                .with_max_reconnect_attempts(1000)
                .with_backoff(BackoffPolicy::Fixed(Duration::from_millis(25))),
        )
    }

    fn test_client(port: u16) -> Client {
        let url: Url = format!("ws://127.0.0.1:{port}").parse().expect("url");
        Client::builder(url)
            .with_pool_config(test_pool_config())
            .build()
            .expect("client")
    }

    #[tokio::test]
    async fn test_send_delivered_when_connected() {
        let port = free_port();
        let mut server = EchoServer::bind(port).await;
        let client = test_client(port);

        client.start().expect("start");
        client
            .wait_until_connected(Duration::from_secs(2))
            .await
            .expect("connected");

        let disposition = client
            .send(Envelope::new("command.dispatch", serde_json::json!({"n": 1})))
            .await
            .expect("send");
        assert!(matches!(disposition, SendDisposition::Delivered { .. }));

        let received = tokio::time::timeout(Duration::from_secs(2), server.received_rx.recv())
            .await
            .expect("in time")
            .expect("open");
        assert_eq!(received.message_type, "command.dispatch");
        client.stop();
    }

    #[tokio::test]
    async fn test_wait_until_connected_observes_late_server() {
        let port = free_port();
        let client = test_client(port);
        client.start().expect("start");

        // Nothing listening yet: the bounded wait times out.
        let result = client.wait_until_connected(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(Error::ConnectionTimeout { .. })));

        // Server appears; the reconnect loop finds it and the Open event
        // wakes the waiter.
        let _server = EchoServer::bind(port).await;
        client
            .wait_until_connected(Duration::from_secs(5))
            .await
            .expect("connected once the server is up");
        assert!(client.is_connected());
        client.stop();
    }

    #[tokio::test]
    async fn test_send_queued_when_offline() {
        let port = free_port();
        let client = test_client(port);
        client.start().expect("start");

        let disposition = client
            .send(Envelope::new("status.update", serde_json::json!(null)))
            .await
            .expect("send");
        assert_eq!(disposition, SendDisposition::Queued);
        assert_eq!(client.queue_size().await.expect("size"), 1);
        client.stop();
    }

    #[tokio::test]
    async fn test_fail_fast_surfaces_error() {
        let port = free_port();
        let url: Url = format!("ws://127.0.0.1:{port}").parse().expect("url");
        let client = Client::builder(url)
            .with_pool_config(test_pool_config())
            .with_fallback(FallbackPreference::FailFast)
            .build()
            .expect("client");
        client.start().expect("start");

        let result = client
            .send(Envelope::new("t", serde_json::json!(null)))
            .await;
        assert!(matches!(result, Err(Error::PoolExhausted)));
        assert_eq!(client.queue_size().await.expect("size"), 0);
        client.stop();
    }

    #[tokio::test]
    async fn test_invalid_message_not_queued() {
        let port = free_port();
        let client = test_client(port);
        client.start().expect("start");

        let bad = Envelope::new("ping", serde_json::json!(null));
        assert!(matches!(
            client.send(bad).await,
            Err(Error::InvalidMessage { .. })
        ));
        assert_eq!(client.queue_size().await.expect("size"), 0);
        client.stop();
    }

    #[tokio::test]
    async fn test_queued_messages_flush_when_server_appears() {
        let port = free_port();
        let client = test_client(port);
        client.start().expect("start");

        // Offline: both messages queue.
        for n in 0..2 {
            let disposition = client
                .send(Envelope::new("tick", serde_json::json!({ "n": n })))
                .await
                .expect("send");
            assert_eq!(disposition, SendDisposition::Queued);
        }
        assert_eq!(client.queue_size().await.expect("size"), 2);

        // Server comes up; the reconnect loop finds it and the Open event
        // triggers an automatic sync.
        let mut server = EchoServer::bind(port).await;
        for _ in 0..2 {
            let received =
                tokio::time::timeout(Duration::from_secs(5), server.received_rx.recv())
                    .await
                    .expect("flushed in time")
                    .expect("open");
            assert_eq!(received.message_type, "tick");
        }
        assert_eq!(client.queue_size().await.expect("size"), 0);
        client.stop();
    }

    #[tokio::test]
    async fn test_connectivity_edge_triggers_sync() {
        let port = free_port();
        let mut server = EchoServer::bind(port).await;
        let client = test_client(port);
        client.start().expect("start");
        client
            .wait_until_connected(Duration::from_secs(2))
            .await
            .expect("connected");

        // Seed the queue directly via a failed-path enqueue is not possible
        // while connected, so go through sync_now bookkeeping instead:
        // queue a message by reporting offline first.
        let connectivity = client.connectivity();
        connectivity.set_online(false);
        client
            .queue
            .enqueue(Envelope::new("late", serde_json::json!(null)))
            .await
            .expect("enqueue");

        connectivity.set_online(true);
        let received = tokio::time::timeout(Duration::from_secs(2), server.received_rx.recv())
            .await
            .expect("synced in time")
            .expect("open");
        assert_eq!(received.message_type, "late");
        client.stop();
    }

    #[tokio::test]
    async fn test_sync_now_reports() {
        let port = free_port();
        let mut server = EchoServer::bind(port).await;
        let client = test_client(port);
        client.start().expect("start");
        client
            .wait_until_connected(Duration::from_secs(2))
            .await
            .expect("connected");

        client
            .queue
            .enqueue(Envelope::new("manual", serde_json::json!(null)))
            .await
            .expect("enqueue");

        let outcome = client.sync_now().await.expect("sync");
        match outcome {
            SyncOutcome::Completed(report) => assert_eq!(report.delivered, 1),
            SyncOutcome::AlreadyRunning => panic!("no concurrent sync"),
        }
        server.received_rx.recv().await.expect("delivered");
        client.stop();
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let port = free_port();
        let _server = EchoServer::bind(port).await;
        let client = test_client(port);
        client.start().expect("start");
        assert!(matches!(client.start(), Err(Error::Lifecycle { .. })));
        client.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let port = free_port();
        let _server = EchoServer::bind(port).await;
        let client = test_client(port);
        client.start().expect("start");

        client.stop();
        client.stop();
        assert!(!client.is_connected());
        assert!(matches!(client.start(), Err(Error::Lifecycle { .. })));
    }

    #[tokio::test]
    async fn test_metrics_observe_traffic() {
        let port = free_port();
        let mut server = EchoServer::bind(port).await;
        let client = test_client(port);
        client.start().expect("start");
        client
            .wait_until_connected(Duration::from_secs(2))
            .await
            .expect("connected");

        client
            .send(Envelope::new("m", serde_json::json!(null)))
            .await
            .expect("send");
        server.received_rx.recv().await.expect("delivered");

        let snap = client.metrics().snapshot();
        assert!(snap.connections >= 1);
        assert_eq!(snap.messages_sent, 1);
        client.stop();
    }
}
