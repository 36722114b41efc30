//! A single push-channel connection with a bounded, fixed-delay reconnect policy.
//!
//! State machine:
//!
//! ```text
//! Idle ──open()──▶ Connecting ──handshake ok──▶ Open
//!                     │                          │
//!              handshake failed        peer closed / close()
//!                     ▼                          ▼
//!                  Closed ◀──────────────── Closing
//!                     │
//!       policy allows: after `interval_ms`, back to Connecting
//! ```
//!
//! `attempt` counts reconnects scheduled since the last successful open and
//! never exceeds `max_attempts`. Once the budget is spent the connection stays
//! `Closed` until someone calls [`Connection::open`] again.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crewnexus_shared::{ConnectionError, Decoded, Outgoing, SendError};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, watch};

use crate::timers::TimerArena;

mod transport;

pub use transport::{Connector, FrameSink, FrameStream, Session, TungsteniteConnector};

/// Lifecycle state of a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

/// Reconnect behaviour: fixed delay, bounded attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub reconnect: bool,
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect: true,
            interval_ms: 3000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub fn never() -> Self {
        Self {
            reconnect: false,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Whether another reconnect may be scheduled after `attempt` of them.
    pub fn allows(&self, attempt: u32) -> bool {
        self.reconnect && attempt < self.max_attempts
    }
}

/// One inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub text: String,
    /// The structured value, when the text parsed as JSON.
    pub json: Option<Value>,
    pub received_at: DateTime<Utc>,
}

impl Frame {
    pub fn parse(text: String) -> Self {
        let json = serde_json::from_str(&text).ok();
        Self {
            text,
            json,
            received_at: Utc::now(),
        }
    }

    /// Decode into `T`, falling back to the raw text unchanged.
    pub fn decode<T: DeserializeOwned>(&self) -> Decoded<T> {
        match &self.json {
            Some(json) => match T::deserialize(json) {
                Ok(value) => Decoded::Value(value),
                Err(e) => {
                    tracing::debug!("Frame does not match expected shape: {}", e);
                    Decoded::Raw(self.text.clone())
                }
            },
            None => Decoded::Raw(self.text.clone()),
        }
    }
}

#[derive(Default)]
struct Status {
    attempt: u32,
    error: Option<ConnectionError>,
    /// Bumped on every open and close; events from older sessions are ignored.
    generation: u64,
    outgoing: Option<UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

struct Shared {
    address: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    latest: watch::Sender<Option<Frame>>,
    status: Mutex<Status>,
    timers: TimerArena,
}

/// A managed push connection to a single address.
///
/// Dropping the connection closes it.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create an idle connection. Nothing happens until [`open`](Self::open).
    pub fn new(address: impl Into<String>, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        let address = address.into();
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (latest, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                timers: TimerArena::new(format!("ws {address}")),
                address,
                policy,
                connector,
                state,
                latest,
                status: Mutex::new(Status::default()),
            }),
        }
    }

    /// Create a connection and start its handshake.
    pub fn connect(address: impl Into<String>, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        let connection = Self::new(address, policy, connector);
        connection.open();
        connection
    }

    /// Start a handshake. No-op while `Connecting` or `Open`.
    pub fn open(&self) {
        self.shared.open();
    }

    /// Send a payload. Only takes effect while `Open`.
    pub fn send(&self, payload: impl Into<Outgoing>) -> Result<(), SendError> {
        let text = payload.into().into_wire()?;
        let status = self.shared.status.lock();
        match (&status.outgoing, *self.shared.state.borrow()) {
            (Some(outgoing), ConnectionState::Open) => outgoing
                .unbounded_send(text)
                .map_err(|_| SendError::NotConnected),
            (_, state) => {
                tracing::warn!(
                    "Dropping send to {}: not connected ({:?})",
                    self.shared.address,
                    state
                );
                Err(SendError::NotConnected)
            }
        }
    }

    /// Serialize `value` as JSON and send it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        self.send(Outgoing::json(value)?)
    }

    /// Tear the connection down: cancel any pending reconnect, go through
    /// `Closing` to `Closed` and release the socket. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.shared.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn attempt(&self) -> u32 {
        self.shared.status.lock().attempt
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.shared.status.lock().error.clone()
    }

    /// The most recent inbound frame.
    pub fn latest(&self) -> Option<Frame> {
        self.shared.latest.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Receiver for inbound frames. Newest value wins; there is no buffering.
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.shared.latest.subscribe()
    }

    /// Reconnect timers currently scheduled.
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.pending()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .field("attempt", &self.attempt())
            .finish()
    }
}

impl Shared {
    fn open(self: &Arc<Self>) {
        self.start(None);
    }

    /// Start a session. With `expected`, only if no open or close happened
    /// since that generation was current.
    fn start(self: &Arc<Self>, expected: Option<u64>) {
        let mut status = self.status.lock();
        if expected.is_some_and(|generation| generation != status.generation) {
            return;
        }
        let current = *self.state.borrow();
        if current.is_connecting() || current.is_connected() {
            tracing::debug!("open() on {} ignored: already {:?}", self.address, current);
            return;
        }

        // A manual open supersedes a scheduled reconnect
        self.timers.cancel_all();

        status.generation += 1;
        let generation = status.generation;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        status.shutdown = Some(shutdown_tx);
        self.state.send_replace(ConnectionState::Connecting);
        drop(status);

        tracing::info!("Connecting to {}", self.address);
        tokio::spawn(run_session(self.clone(), generation, shutdown_rx));
    }

    fn close(&self) {
        let mut status = self.status.lock();
        // Also invalidates a reconnect timer that already left the arena
        status.generation += 1;
        let cancelled = self.timers.cancel_all();
        let current = *self.state.borrow();
        if matches!(current, ConnectionState::Idle | ConnectionState::Closed) && status.shutdown.is_none() {
            if cancelled > 0 {
                tracing::info!("Cancelled pending reconnect to {}", self.address);
            }
            return;
        }

        self.state.send_replace(ConnectionState::Closing);
        if let Some(shutdown) = status.shutdown.take() {
            let _ = shutdown.send(());
        }
        status.outgoing = None;
        self.state.send_replace(ConnectionState::Closed);
        tracing::info!("Closed connection to {}", self.address);
    }

    fn on_open(&self, generation: u64, outgoing: UnboundedSender<String>) -> bool {
        let mut status = self.status.lock();
        if status.generation != generation {
            return false;
        }
        status.attempt = 0;
        status.error = None;
        status.outgoing = Some(outgoing);
        self.state.send_replace(ConnectionState::Open);
        tracing::info!("WebSocket connected to {}", self.address);
        true
    }

    fn on_message(&self, generation: u64, text: String) {
        if self.status.lock().generation != generation {
            return;
        }
        let frame = Frame::parse(text);
        if frame.json.is_none() {
            tracing::debug!("Non-JSON frame from {}, delivering raw text", self.address);
        }
        self.latest.send_replace(Some(frame));
    }

    fn on_error(&self, generation: u64, error: ConnectionError) {
        let mut status = self.status.lock();
        if status.generation != generation {
            return;
        }
        tracing::error!("WebSocket error for {}: {}", self.address, error);
        status.error = Some(error);
    }

    /// Handshake failed or the peer went away.
    fn on_closed(self: &Arc<Self>, generation: u64, error: Option<ConnectionError>) {
        let mut status = self.status.lock();
        if status.generation != generation {
            return;
        }
        match error {
            Some(error) => {
                tracing::error!("Handshake with {} failed: {}", self.address, error);
                status.error = Some(error);
            }
            None => {
                tracing::info!("WebSocket to {} closed by peer", self.address);
                self.state.send_replace(ConnectionState::Closing);
            }
        }
        status.outgoing = None;
        status.shutdown = None;
        self.state.send_replace(ConnectionState::Closed);
        self.schedule_reconnect(&mut status);
    }

    fn schedule_reconnect(self: &Arc<Self>, status: &mut Status) {
        if !self.policy.allows(status.attempt) {
            if self.policy.reconnect {
                tracing::warn!(
                    "Giving up on {} after {} reconnect attempt(s)",
                    self.address,
                    status.attempt
                );
            }
            return;
        }

        status.attempt += 1;
        let generation = status.generation;
        let weak: Weak<Self> = Arc::downgrade(self);
        tracing::info!(
            "Reconnecting to {} in {}ms (attempt {}/{})",
            self.address,
            self.policy.interval_ms,
            status.attempt,
            self.policy.max_attempts
        );
        self.timers.schedule_once(self.policy.interval(), move || async move {
            if let Some(shared) = weak.upgrade() {
                shared.reopen(generation);
            }
        });
    }

    fn reopen(self: &Arc<Self>, generation: u64) {
        self.start(Some(generation));
    }
}

async fn run_session(shared: Arc<Shared>, generation: u64, mut shutdown: oneshot::Receiver<()>) {
    let handshake = tokio::select! {
        result = shared.connector.connect(&shared.address) => result,
        _ = &mut shutdown => {
            tracing::debug!("Handshake with {} abandoned", shared.address);
            return;
        }
    };

    let Session { mut sink, mut stream } = match handshake {
        Ok(session) => session,
        Err(error) => {
            shared.on_closed(generation, Some(error));
            return;
        }
    };

    let (outgoing, mut queued) = unbounded::<String>();
    if !shared.on_open(generation, outgoing) {
        let _ = sink.close().await;
        return;
    }

    let closed_by_peer = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(text)) => shared.on_message(generation, text),
                Some(Err(error)) => shared.on_error(generation, error),
                None => break true,
            },
            Some(text) = queued.next() => {
                if let Err(error) = sink.send(text).await {
                    shared.on_error(generation, error);
                }
            }
            _ = &mut shutdown => break false,
        }
    };

    if closed_by_peer {
        shared.on_closed(generation, None);
    } else {
        let _ = sink.close().await;
    }
}
