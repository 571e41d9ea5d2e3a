//! Publisher / subscriber connection wrapper.
//!
//! A [`Connection`] owns exactly one socket, fixed to one [`SocketMode`] for
//! its whole life.  It moves through three states:
//!
//! ```text
//! Unbound ──connect()/bind()──► Active ──close()──► Closed
//!    │                                                ▲
//!    └──────────────────────close()───────────────────┘
//! ```
//!
//! Construction does no network I/O.  It validates the options, resolves
//! CURVE keys (from explicit overrides or the key store) and applies them to
//! the socket.
//!
//! # Mode mismatches
//!
//! `send` on a subscriber and `subscribe` / `add_listener` on a publisher are
//! silent no-ops: they log a warning and return `Ok`.  The mode check runs
//! before any argument validation, so a wrong-mode call never fails and never
//! touches the socket, whatever its arguments.
//!
//! # Inbound delivery (for beginners)
//!
//! libzmq sockets are blocking, so a subscriber with a listener runs a small
//! dedicated thread that polls the socket in 10 ms slices and forwards raw frames
//! over a bounded Tokio channel.  A Tokio task on the other end decodes each
//! message and calls the handler:
//!
//! ```text
//! [recv thread] --frames--> mpsc(256) --> [dispatch task] --> handler(Result)
//! ```
//!
//! Frames are handled strictly in arrival order.  A decode failure reaches the
//! handler as `Err(TransportError::Deserialization(_))`.  A panicking handler
//! is logged and delivery continues with the next message.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;
use zmq_pubsub_core::domain::keys::validate_z85_key;
use zmq_pubsub_core::{
    decode_frames, encode_frames, ChannelName, ChannelPostfix, ConnectionOptions, CurveKeyPair,
    CurveOptions, SocketMode,
};

use crate::application::demo_publisher::Publish;
use crate::application::registry::MessageHandler;
use crate::error::{SocketError, TransportError};
use crate::infrastructure::socket::{CurveSettings, PubSubSocket, SocketFactory};
use crate::infrastructure::storage::keystore::KeyStore;

/// How long one receive poll holds the socket lock.  Bounds how long
/// `close()` can wait for the receive thread to let go of the socket.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pause after a receive error other than "closed".
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Messages buffered between the receive thread and the dispatch task.
const INBOUND_QUEUE_DEPTH: usize = 256;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created; not yet connected or bound.
    Unbound,
    /// `connect()` or `bind()` succeeded.
    Active,
    /// `close()` was called.  Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Unbound => "unbound",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        })
    }
}

type SharedSocket = Arc<Mutex<Box<dyn PubSubSocket>>>;

/// Locks the socket.  A handler panic never happens while the lock is held,
/// so a poisoned lock still guards a consistent socket.
fn lock(socket: &SharedSocket) -> MutexGuard<'_, Box<dyn PubSubSocket>> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
enum Attach {
    Connect,
    Bind,
}

impl Attach {
    fn operation(self) -> &'static str {
        match self {
            Attach::Connect => "connect",
            Attach::Bind => "bind",
        }
    }
}

/// One publisher or subscriber socket.
pub struct Connection {
    id: Uuid,
    mode: SocketMode,
    endpoint: String,
    postfix: ChannelPostfix,
    state: ConnectionState,
    socket: SharedSocket,
    /// Cleared by `close()`; stops the receive thread.
    running: Arc<AtomicBool>,
    listening: bool,
    span: Span,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("endpoint", &self.endpoint)
            .field("postfix", &self.postfix)
            .field("state", &self.state)
            .field("listening", &self.listening)
            .finish()
    }
}

impl Connection {
    /// Creates a connection and configures its socket.  No network I/O.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Configuration`] for a blank address, a CURVE client
    ///   without `server_key`, or a malformed key override.
    /// - [`TransportError::KeyStore`] when keys must come from the key store
    ///   and it fails (including a relative `curve.path`).
    /// - [`TransportError::Socket`] when the socket cannot be created or
    ///   configured.
    pub fn new(options: &ConnectionOptions, factory: &dyn SocketFactory) -> Result<Self, TransportError> {
        options
            .validate()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        let mode = options.mode();
        let curve = options.curve.as_ref().map(curve_settings).transpose()?;

        let mut socket = factory.create(mode)?;
        if let Some(settings) = &curve {
            socket.configure_curve(settings)?;
        }

        let id = Uuid::new_v4();
        let span = info_span!(
            "connection",
            connection_id = %id,
            mode = %mode,
            endpoint = %options.address,
        );
        span.in_scope(|| debug!(curve = curve.is_some(), "connection created"));

        Ok(Self {
            id,
            mode,
            endpoint: options.address.clone(),
            postfix: options.postfix(),
            state: ConnectionState::Unbound,
            socket: Arc::new(Mutex::new(socket)),
            running: Arc::new(AtomicBool::new(true)),
            listening: false,
            span,
        })
    }

    /// Replaces the span all of this connection's events are logged in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn postfix(&self) -> &ChannelPostfix {
        &self.postfix
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Connects to the endpoint.  `Unbound → Active`.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidState`] unless the connection is `Unbound`;
    /// [`TransportError::Connect`] if the socket rejects the endpoint.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.attach(Attach::Connect).await
    }

    /// Binds the endpoint.  `Unbound → Active`.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::connect`].
    pub async fn bind(&mut self) -> Result<(), TransportError> {
        self.attach(Attach::Bind).await
    }

    async fn attach(&mut self, how: Attach) -> Result<(), TransportError> {
        if self.state != ConnectionState::Unbound {
            return Err(TransportError::InvalidState {
                operation: how.operation(),
                state: self.state,
            });
        }

        let socket = Arc::clone(&self.socket);
        let endpoint = self.endpoint.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut socket = lock(&socket);
            match how {
                Attach::Connect => socket.connect(&endpoint),
                Attach::Bind => socket.bind(&endpoint),
            }
        })
        .instrument(self.span.clone())
        .await
        .unwrap_or_else(|e| Err(SocketError::Other(format!("{} task failed: {e}", how.operation()))));

        let _entered = self.span.enter();
        match result {
            Ok(()) => {
                self.state = ConnectionState::Active;
                match how {
                    Attach::Bind => info!("{} bound on: {}", self.mode, self.endpoint),
                    Attach::Connect => info!("{} connected to: {}", self.mode, self.endpoint),
                }
                Ok(())
            }
            Err(source) => {
                warn!("{} failed: {source}", how.operation());
                Err(TransportError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                })
            }
        }
    }

    /// Subscribes to `channel` (registers the filter `channel + postfix`).
    ///
    /// Allowed before `connect()`.  No-op on a publisher.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidChannel`] for an empty channel or one
    /// containing the postfix; [`TransportError::InvalidState`] once closed.
    pub fn subscribe(&mut self, channel: &str) -> Result<&mut Self, TransportError> {
        let span = self.span.clone();
        let _entered = span.enter();

        if self.mode != SocketMode::Subscriber {
            warn!(channel, "subscribe ignored: connection is a {}", self.mode);
            return Ok(self);
        }
        if self.state == ConnectionState::Closed {
            return Err(TransportError::InvalidState {
                operation: "subscribe",
                state: self.state,
            });
        }

        let channel = ChannelName::new(channel, &self.postfix)?;
        lock(&self.socket).subscribe(channel.topic(&self.postfix).as_bytes())?;
        info!("Subscribed on channel: {channel}");
        Ok(self)
    }

    /// Starts delivering inbound messages to `handler`.  No-op on a
    /// publisher.
    ///
    /// Must be called from within a Tokio runtime.  One listener per
    /// connection.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ListenerAttached`] if a listener is already set.
    /// - [`TransportError::InvalidState`] once closed.
    /// - [`TransportError::NoRuntime`] outside a Tokio runtime.
    /// - [`TransportError::Spawn`] if the receive thread cannot start.
    pub fn add_listener(&mut self, handler: MessageHandler) -> Result<&mut Self, TransportError> {
        let span = self.span.clone();
        let _entered = span.enter();

        if self.mode != SocketMode::Subscriber {
            warn!("add_listener ignored: connection is a {}", self.mode);
            return Ok(self);
        }
        if self.state == ConnectionState::Closed {
            return Err(TransportError::InvalidState {
                operation: "add_listener",
                state: self.state,
            });
        }
        if self.listening {
            return Err(TransportError::ListenerAttached);
        }
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let socket = Arc::clone(&self.socket);
        let running = Arc::clone(&self.running);
        let thread_span = self.span.clone();
        std::thread::Builder::new()
            .name("zmq-recv".to_string())
            .spawn(move || thread_span.in_scope(|| receive_loop(socket, tx, running)))
            .map_err(TransportError::Spawn)?;

        runtime.spawn(dispatch_loop(rx, self.postfix.clone(), handler).instrument(self.span.clone()));

        self.listening = true;
        debug!("listener attached");
        Ok(self)
    }

    /// Publishes `payload` on `channel` as one atomic two-part message.
    ///
    /// No-op on a subscriber.  Fire-and-forget: there is no acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidMessage`] for an empty or invalid channel or
    ///   a `null` payload.  Nothing is sent.
    /// - [`TransportError::InvalidState`] unless the connection is `Active`.
    /// - [`TransportError::Socket`] if the socket rejects the message.
    pub fn send<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> Result<(), TransportError> {
        let _entered = self.span.enter();

        if self.mode != SocketMode::Publisher {
            warn!(channel, "send ignored: connection is a {}", self.mode);
            return Ok(());
        }

        let frames = encode_frames(channel, payload, &self.postfix).map_err(TransportError::InvalidMessage)?;
        if self.state != ConnectionState::Active {
            return Err(TransportError::InvalidState {
                operation: "send",
                state: self.state,
            });
        }

        lock(&self.socket).send_frames(&frames)?;
        debug!(channel, bytes = frames[1].len(), "message sent");
        Ok(())
    }

    /// Releases the socket and stops the listener.  Safe in any state;
    /// closing a closed connection does nothing.
    ///
    /// The connection is `Closed` afterwards even if the socket reported an
    /// error while closing.
    ///
    /// # Errors
    ///
    /// [`TransportError::Socket`] if the socket reported a close failure.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let span = self.span.clone();
        let _entered = span.enter();

        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.running.store(false, Ordering::Relaxed);
        self.state = ConnectionState::Closed;

        let result = lock(&self.socket).close();
        match result {
            Ok(()) => {
                info!("{} closed", self.mode);
                Ok(())
            }
            Err(e) => {
                warn!("close failed: {e}");
                Err(TransportError::Socket(e))
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            let _ = self.close();
        }
    }
}

impl Publish for Connection {
    fn publish(&self, channel: &str, payload: &Value) -> Result<(), TransportError> {
        self.send(channel, payload)
    }
}

// ── CURVE setup ───────────────────────────────────────────────────────────────

fn curve_settings(curve: &CurveOptions) -> Result<CurveSettings, TransportError> {
    // Resolving first makes a relative path fail even when both keys are
    // given explicitly.
    let store = KeyStore::open(curve.path.as_deref())?;

    if curve.server {
        return Ok(CurveSettings::Server {
            key_pair: own_key_pair(curve, &store)?,
        });
    }

    let server_key = curve.server_key.clone().ok_or_else(|| {
        TransportError::Configuration("curve.server_key is required unless curve.server is true".into())
    })?;
    validate_z85_key("server", &server_key).map_err(|e| TransportError::Configuration(e.to_string()))?;

    Ok(CurveSettings::Client {
        server_key,
        key_pair: own_key_pair(curve, &store)?,
    })
}

/// Explicit overrides win individually; the key store fills the gaps and is
/// not touched when both are given.
fn own_key_pair(curve: &CurveOptions, store: &KeyStore) -> Result<CurveKeyPair, TransportError> {
    let (public_key, secret_key) = match (&curve.public_key, &curve.secret_key) {
        (Some(public_key), Some(secret_key)) => (public_key.clone(), secret_key.clone()),
        (public_key, secret_key) => {
            let stored = store.load_or_create_key_pair()?;
            (
                public_key.clone().unwrap_or_else(|| stored.public_key().to_string()),
                secret_key.clone().unwrap_or_else(|| stored.secret_key().to_string()),
            )
        }
    };
    CurveKeyPair::new(public_key, secret_key)
        .map_err(|e| TransportError::Configuration(format!("invalid curve key: {e}")))
}

// ── Receive path ──────────────────────────────────────────────────────────────

/// Runs on the connection's receive thread until `running` is cleared, the
/// socket is closed, or the dispatch task goes away.
fn receive_loop(socket: SharedSocket, tx: mpsc::Sender<Vec<Vec<u8>>>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        let received = lock(&socket).recv_frames(RECV_POLL_INTERVAL);
        match received {
            Ok(Some(frames)) => {
                if tx.blocking_send(frames).is_err() {
                    break;
                }
            }
            Ok(None) => continue,
            Err(SocketError::Closed) => break,
            Err(e) => {
                error!("receive error: {e}");
                std::thread::sleep(RECV_ERROR_BACKOFF);
            }
        }
    }
    debug!("receive loop stopped");
}

async fn dispatch_loop(mut rx: mpsc::Receiver<Vec<Vec<u8>>>, postfix: ChannelPostfix, handler: MessageHandler) {
    while let Some(frames) = rx.recv().await {
        let result = decode_frames(&frames, &postfix)
            .map(|message| message.payload)
            .map_err(TransportError::Deserialization);
        if let Err(e) = &result {
            warn!("{e}");
        }
        if catch_unwind(AssertUnwindSafe(|| handler(result))).is_err() {
            error!("message handler panicked; delivery continues");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
