//! Per-connection lifecycle management.
//!
//! A [`ConnectionManager`] owns exactly one transport connection: dialing,
//! heartbeat, reconnection with backoff, and teardown. All timers live
//! inside a single supervisor task, so cancelling that task cancels every
//! pending timer — there is no path that leaks a heartbeat interval or a
//! backoff sleep past `dispose()`.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──► supervisor task
//!                  │ dial (bounded by connect_timeout)
//!                  ▼
//!               io loop ── heartbeat ping/pong, sends, incoming events
//!                  │
//!        ┌─────────┴──────────┐
//!   manual close        unexpected loss
//!        │                    │ backoff (bounded by max_reconnect_attempts)
//!        ▼                    ▼
//!     Closed             redial ──► io loop ...
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant as TokioInstant, MissedTickBehavior, interval_at, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventBus, Subscription};
use crate::identifiers::ConnectionId;
use crate::metrics::{Direction, MetricsCollector};
use crate::protocol::close::normal_close_frame;
use crate::protocol::envelope::now_millis;
use crate::protocol::{CloseReason, Envelope, TYPE_PING, TYPE_PONG};

use super::state::{ConnectionSnapshot, ConnectionState, HealthTracker};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Internal commands for the supervisor task.
enum Command {
    /// Write an envelope and acknowledge the outcome.
    Send {
        envelope: Envelope,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Manual close: never reconnects.
    Close,
    /// Final teardown.
    Dispose,
}

/// Why the io loop returned control to the supervisor.
enum IoExit {
    /// Application-initiated close or dispose.
    Manual,
    /// Peer closed cleanly (1000/1001); no reconnect.
    PeerClean(u16),
    /// Unexpected loss; reconnect path.
    Lost(CloseReason),
}

// ============================================================================
// Shared
// ============================================================================

struct Shared {
    id: ConnectionId,
    url: Url,
    config: ConnectionConfig,
    snapshot: RwLock<ConnectionSnapshot>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventBus<ClientEvent>,
    metrics: Arc<MetricsCollector>,
    in_flight: AtomicUsize,
    disposed: AtomicBool,
    exhausted: AtomicBool,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns the full lifecycle of one transport connection.
///
/// The mutable connection record is exclusive to this manager; other
/// components read [`ConnectionSnapshot`]s only.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// ConnectionManager - Construction
// ============================================================================

impl ConnectionManager {
    /// Creates a manager with its own event bus.
    #[must_use]
    pub fn new(url: Url, config: ConnectionConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self::with_bus(url, config, metrics, EventBus::new())
    }

    /// Creates a manager publishing onto a shared event bus.
    ///
    /// Used by the pool so all member connections surface events in one place.
    #[must_use]
    pub fn with_bus(
        url: Url,
        config: ConnectionConfig,
        metrics: Arc<MetricsCollector>,
        events: EventBus<ClientEvent>,
    ) -> Self {
        let id = ConnectionId::generate();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Idle);

        let snapshot = ConnectionSnapshot {
            id,
            url: url.to_string(),
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            last_pong_at: None,
            health_score: 1.0,
            in_flight: 0,
        };

        Self {
            shared: Arc::new(Shared {
                id,
                url,
                config,
                snapshot: RwLock::new(snapshot),
                state_tx,
                events,
                metrics,
                in_flight: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
                exhausted: AtomicBool::new(false),
            }),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            task: Mutex::new(None),
        }
    }
}

// ============================================================================
// ConnectionManager - Public API
// ============================================================================

impl ConnectionManager {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot.read().state
    }

    /// Returns a read-only snapshot for the pool and UI layers.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let mut snap = self.shared.snapshot.read().clone();
        snap.in_flight = self.shared.in_flight.load(Ordering::Relaxed);
        snap
    }

    /// Starts the connection lifecycle.
    ///
    /// Returns immediately; progress is observable via [`Self::state`],
    /// [`Self::wait_until_open`] and the event bus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if already started or disposed.
    pub fn connect(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(Error::lifecycle("connection manager is disposed"));
        }
        let command_rx = self
            .command_rx
            .lock()
            .take()
            .ok_or_else(|| Error::lifecycle("connect() already called"))?;

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(Self::supervise(shared, command_rx));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Waits until the connection is open, with a bound.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the bound elapses first
    /// - [`Error::ReconnectExhausted`] if the attempt cap was hit
    /// - [`Error::ConnectionClosed`] if the connection closed otherwise
    pub async fn wait_until_open(&self, wait: Duration) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let mut state_rx = self.shared.state_tx.subscribe();
        let outcome = timeout(wait, async move {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Open => return Ok(()),
                    ConnectionState::Closed => {
                        return Err(if shared.exhausted.load(Ordering::SeqCst) {
                            Error::reconnect_exhausted(
                                shared.snapshot.read().reconnect_attempts,
                            )
                        } else {
                            Error::ConnectionClosed
                        });
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(Error::ConnectionClosed);
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::connection_timeout(wait.as_millis() as u64)),
        }
    }

    /// Sends an application message on this connection.
    ///
    /// Fails immediately when the connection is not open — there is no
    /// silent queuing at this layer; the caller decides whether to queue.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMessage`] if schema validation fails (never retried)
    /// - [`Error::SendFailed`] if the connection is not open
    /// - [`Error::ConnectionClosed`] if the connection drops mid-send
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        envelope.validate()?;

        if !self.state().is_open() {
            return Err(Error::send_failed(format!(
                "connection is {}, not open",
                self.state()
            )));
        }

        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Send {
                envelope,
                ack: ack_tx,
            })
            .is_err()
        {
            self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ConnectionClosed);
        }

        ack_rx.await?
    }

    /// Closes the connection intentionally.
    ///
    /// A manual close never triggers reconnection, regardless of the
    /// auto-reconnect setting; the distinction is carried as close code 1000.
    pub fn close(&self) {
        // Never started: there is no supervisor to deliver to. Closed is
        // terminal, so a later connect() must not dial; taking the receiver
        // and marking disposed keeps it that way.
        if self.command_rx.lock().take().is_some() {
            self.shared.disposed.store(true, Ordering::SeqCst);
            Self::set_state(&self.shared, ConnectionState::Closed);
            return;
        }
        if self.command_tx.send(Command::Close).is_err() {
            // Supervisor already gone; just settle the terminal state.
            Self::set_state(&self.shared, ConnectionState::Closed);
        }
    }

    /// Tears the connection down.
    ///
    /// Idempotent and safe from any state. Cancels every pending timer
    /// (heartbeat interval, pong deadline, reconnect backoff) by ending the
    /// supervisor task that owns them, and closes the transport with an
    /// intentional-shutdown code.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(connection_id = %self.shared.id, "Disposing connection");
        if self.command_rx.lock().is_some() || self.command_tx.send(Command::Dispose).is_err() {
            Self::set_state(&self.shared, ConnectionState::Closed);
        }
    }

    /// Subscribes to this connection's events.
    #[must_use]
    pub fn subscribe(&self, handler: impl Fn(&ClientEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.events.subscribe(handler)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// ConnectionManager - Supervisor
// ============================================================================

impl ConnectionManager {
    /// Owns the full connection lifecycle: dial, io loop, reconnect, teardown.
    async fn supervise(shared: Arc<Shared>, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        let mut attempts: u32 = 0;

        'lifecycle: loop {
            Self::set_state(&shared, ConnectionState::Connecting);

            // The dial races the command channel so close/dispose cancels
            // an in-progress handshake instead of waiting out the timeout.
            let dial_fut = timeout(
                shared.config.connect_timeout,
                connect_async(shared.url.as_str()),
            );
            tokio::pin!(dial_fut);
            let dial = loop {
                tokio::select! {
                    dial = &mut dial_fut => break dial,

                    command = command_rx.recv() => match command {
                        Some(Command::Send { ack, .. }) => {
                            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                            let _ = ack.send(Err(Error::send_failed(
                                "connection is connecting, not open",
                            )));
                        }
                        Some(Command::Close) | Some(Command::Dispose) | None => {
                            Self::set_state(&shared, ConnectionState::Closed);
                            break 'lifecycle;
                        }
                    },
                }
            };

            match dial {
                Ok(Ok((ws_stream, _response))) => {
                    attempts = 0;
                    shared.snapshot.write().reconnect_attempts = 0;
                    shared.metrics.record_connect();
                    Self::set_state(&shared, ConnectionState::Open);
                    info!(connection_id = %shared.id, url = %shared.url, "Connection open");

                    let exit = Self::run_io(&shared, ws_stream, &mut command_rx).await;
                    shared.metrics.record_disconnect();

                    match exit {
                        IoExit::Manual => {
                            Self::set_state(&shared, ConnectionState::Closed);
                            break 'lifecycle;
                        }
                        IoExit::PeerClean(code) => {
                            debug!(connection_id = %shared.id, code, "Peer closed cleanly");
                            Self::set_state(&shared, ConnectionState::Closed);
                            break 'lifecycle;
                        }
                        IoExit::Lost(reason) => {
                            shared.metrics.record_error();
                            warn!(connection_id = %shared.id, reason = %reason, "Connection lost");
                            let error = match reason {
                                CloseReason::HeartbeatTimeout => Error::heartbeat_timeout(
                                    shared.config.heartbeat_timeout.as_millis() as u64,
                                ),
                                other => Error::connection_failed(other.to_string()),
                            };
                            shared.events.emit(&ClientEvent::ConnectionError {
                                connection: shared.id,
                                error: Arc::new(error),
                            });
                            if !shared.config.auto_reconnect {
                                Self::set_state(&shared, ConnectionState::Closed);
                                break 'lifecycle;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    shared.metrics.record_error();
                    debug!(connection_id = %shared.id, error = %e, "Dial failed");
                    shared.events.emit(&ClientEvent::ConnectionError {
                        connection: shared.id,
                        error: Arc::new(Error::connection_failed(e.to_string())),
                    });
                    if !shared.config.auto_reconnect {
                        Self::set_state(&shared, ConnectionState::Closed);
                        break 'lifecycle;
                    }
                }
                Err(_) => {
                    shared.metrics.record_error();
                    let timeout_ms = shared.config.connect_timeout.as_millis() as u64;
                    debug!(connection_id = %shared.id, timeout_ms, "Dial timed out");
                    shared.events.emit(&ClientEvent::ConnectionError {
                        connection: shared.id,
                        error: Arc::new(Error::connection_timeout(timeout_ms)),
                    });
                    if !shared.config.auto_reconnect {
                        Self::set_state(&shared, ConnectionState::Closed);
                        break 'lifecycle;
                    }
                }
            }

            // Reconnect path, bounded by the attempt cap.
            if attempts >= shared.config.max_reconnect_attempts {
                warn!(
                    connection_id = %shared.id,
                    attempts,
                    "Reconnect attempts exhausted"
                );
                shared.exhausted.store(true, Ordering::SeqCst);
                shared.events.emit(&ClientEvent::ReconnectExhausted {
                    connection: shared.id,
                    attempts,
                });
                Self::set_state(&shared, ConnectionState::Closed);
                break 'lifecycle;
            }
            attempts += 1;
            shared.snapshot.write().reconnect_attempts = attempts;
            shared.metrics.record_reconnect_attempt();
            Self::set_state(&shared, ConnectionState::Reconnecting);

            let delay = shared.config.backoff.delay(attempts);
            debug!(
                connection_id = %shared.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            // Backoff sleep, interruptible by close/dispose. Sends submitted
            // during backoff fail fast.
            let deadline = TokioInstant::now() + delay;
            loop {
                tokio::select! {
                    () = sleep_until(deadline) => break,

                    command = command_rx.recv() => match command {
                        Some(Command::Send { ack, .. }) => {
                            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                            let _ = ack.send(Err(Error::send_failed(
                                "connection is reconnecting, not open",
                            )));
                        }
                        Some(Command::Close) | Some(Command::Dispose) | None => {
                            Self::set_state(&shared, ConnectionState::Closed);
                            break 'lifecycle;
                        }
                    },
                }
            }
        }

        Self::drain_commands(&shared, &mut command_rx);
        debug!(connection_id = %shared.id, "Supervisor terminated");
    }

    /// Io loop while the connection is open.
    ///
    /// Every timer used here (heartbeat interval, pong deadline) is local to
    /// this function and cancelled by returning.
    async fn run_io(
        shared: &Arc<Shared>,
        ws_stream: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> IoExit {
        let (mut sink, mut stream) = ws_stream.split();

        let heartbeat_period = shared.config.heartbeat_interval;
        let mut heartbeat = interval_at(TokioInstant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut health = HealthTracker::new();
        let mut pong_deadline: Option<TokioInstant> = None;
        let mut ping_sent_at: Option<Instant> = None;

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(exit) = Self::handle_text(
                            shared,
                            text.as_str(),
                            &mut sink,
                            &mut pong_deadline,
                            &mut ping_sent_at,
                            &mut health,
                        )
                        .await
                        {
                            return exit;
                        }
                    }

                    Some(Ok(Message::Close(frame))) => {
                        let reason = CloseReason::from_frame(frame.as_ref());
                        debug!(connection_id = %shared.id, reason = %reason, "Close frame received");
                        return match reason {
                            CloseReason::PeerClean { code } => IoExit::PeerClean(code),
                            other => IoExit::Lost(other),
                        };
                    }

                    // Binary and transport-level ping/pong frames are not part
                    // of the protocol; the heartbeat rides in envelopes.
                    Some(Ok(_)) => {}

                    Some(Err(e)) => {
                        return IoExit::Lost(CloseReason::TransportLost {
                            detail: e.to_string(),
                        });
                    }

                    None => {
                        return IoExit::Lost(CloseReason::TransportLost {
                            detail: "stream ended".to_string(),
                        });
                    }
                },

                _ = heartbeat.tick() => {
                    trace!(connection_id = %shared.id, "Sending heartbeat ping");
                    if let Err(e) = Self::write_envelope(&mut sink, &Envelope::ping()).await {
                        return IoExit::Lost(CloseReason::TransportLost {
                            detail: e.to_string(),
                        });
                    }
                    // One outstanding deadline at a time; a late pong for an
                    // earlier ping still proves liveness.
                    if pong_deadline.is_none() {
                        pong_deadline = Some(TokioInstant::now() + shared.config.heartbeat_timeout);
                        ping_sent_at = Some(Instant::now());
                    }
                }

                () = async {
                    match pong_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let timeout_ms = shared.config.heartbeat_timeout.as_millis() as u64;
                    warn!(connection_id = %shared.id, timeout_ms, "Heartbeat timeout");
                    let _ = sink.close().await;
                    return IoExit::Lost(CloseReason::HeartbeatTimeout);
                }

                command = command_rx.recv() => match command {
                    Some(Command::Send { envelope, ack }) => {
                        let outcome = Self::write_envelope(&mut sink, &envelope).await;
                        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                        health.record_send(outcome.is_ok());
                        shared.snapshot.write().health_score = health.score();

                        match outcome {
                            Ok(()) => {
                                shared.metrics.record_message(Direction::Outbound);
                                let _ = ack.send(Ok(()));
                            }
                            Err(e) => {
                                let detail = e.to_string();
                                let _ = ack.send(Err(e));
                                return IoExit::Lost(CloseReason::TransportLost { detail });
                            }
                        }
                    }

                    Some(Command::Close) => {
                        Self::set_state(shared, ConnectionState::Closing);
                        let _ = sink.send(Message::Close(Some(normal_close_frame()))).await;
                        let _ = sink.close().await;
                        return IoExit::Manual;
                    }

                    Some(Command::Dispose) | None => {
                        let _ = sink.send(Message::Close(Some(normal_close_frame()))).await;
                        let _ = sink.close().await;
                        return IoExit::Manual;
                    }
                },
            }
        }
    }

    /// Handles an incoming text frame: control messages are consumed here,
    /// application messages go to the event bus.
    async fn handle_text(
        shared: &Arc<Shared>,
        text: &str,
        sink: &mut WsSink,
        pong_deadline: &mut Option<TokioInstant>,
        ping_sent_at: &mut Option<Instant>,
        health: &mut HealthTracker,
    ) -> Option<IoExit> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection_id = %shared.id, error = %e, "Unparseable frame dropped");
                return None;
            }
        };

        match envelope.message_type.as_str() {
            TYPE_PONG => {
                *pong_deadline = None;
                if let Some(sent_at) = ping_sent_at.take() {
                    health.record_rtt(sent_at.elapsed().as_secs_f64() * 1000.0);
                }
                let mut snap = shared.snapshot.write();
                snap.last_pong_at = Some(now_millis());
                snap.health_score = health.score();
                trace!(connection_id = %shared.id, "Pong received");
            }

            TYPE_PING => {
                let pong = Envelope::pong(envelope.id);
                if let Err(e) = Self::write_envelope(sink, &pong).await {
                    return Some(IoExit::Lost(CloseReason::TransportLost {
                        detail: e.to_string(),
                    }));
                }
            }

            _ => {
                shared.metrics.record_message(Direction::Inbound);
                shared.events.emit(&ClientEvent::Message {
                    connection: shared.id,
                    envelope,
                });
            }
        }

        None
    }

    /// Serializes and writes one envelope.
    async fn write_envelope(sink: &mut WsSink, envelope: &Envelope) -> Result<()> {
        let json = serde_json::to_string(envelope)?;
        sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Fails all commands still queued after the supervisor exits.
    fn drain_commands(shared: &Arc<Shared>, command_rx: &mut mpsc::UnboundedReceiver<Command>) {
        let mut failed = 0usize;
        while let Ok(command) = command_rx.try_recv() {
            if let Command::Send { ack, .. } = command {
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = ack.send(Err(Error::ConnectionClosed));
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(connection_id = %shared.id, count = failed, "Failed pending sends on shutdown");
        }
    }

    /// Updates the snapshot state and notifies observers.
    fn set_state(shared: &Arc<Shared>, state: ConnectionState) {
        {
            let mut snap = shared.snapshot.write();
            if snap.state == state {
                return;
            }
            snap.state = state;
        }
        let _ = shared.state_tx.send(state);
        debug!(connection_id = %shared.id, state = %state, "State changed");
        shared.events.emit(&ClientEvent::StateChanged {
            connection: shared.id,
            state,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
