//! Channel multiplexer: one subscriber connection per registered channel.
//!
//! A [`ChannelServer`] is built from a [`HandlerRegistry`] and the shared
//! connection options.  On [`ChannelServer::listen`] it creates one dedicated
//! subscriber [`Connection`] per registered channel and starts all of them
//! concurrently.  Each one connects, subscribes to its channel and attaches
//! its handler.
//!
//! # Slots
//!
//! Connections live in an indexed collection of [`ChannelSlot`]s owned by the
//! server.  A slot records the channel, its connection, its handler and the
//! outcome of its startup, so failure accounting and shutdown can be checked
//! independently:
//!
//! ```text
//! slots[0]  "test"   Connection(sub, inproc://bus)  Ready
//! slots[1]  "test2"  Connection(sub, inproc://bus)  Failed
//! ```
//!
//! # Failure isolation
//!
//! Channels are independent.  A channel whose connection cannot be created,
//! connected or subscribed reports its error through the ready callback and
//! stays down; its siblings are unaffected.  There is no retry.
//! [`ChannelServer::close`] attempts every slot even if some fail to close.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, info_span, warn, Span};
use zmq_pubsub_core::{ChannelOptions, ConnectionOptions, CurveOptions, SocketMode, SocketOptions};

use crate::application::registry::{HandlerRegistry, MessageHandler};
use crate::error::{SocketError, TransportError};
use crate::infrastructure::connection::Connection;
use crate::infrastructure::socket::SocketFactory;
use crate::infrastructure::storage::keystore::KeyStore;

/// Options shared by every channel connection of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub address: String,
    pub curve: Option<CurveOptions>,
    pub channel: Option<ChannelOptions>,
}

impl ServerOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            curve: None,
            channel: None,
        }
    }

    pub fn with_curve(mut self, curve: CurveOptions) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.channel = Some(ChannelOptions {
            postfix: Some(postfix.into()),
        });
        self
    }

    /// Subscriber options for one channel connection.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            address: self.address.clone(),
            socket: SocketOptions {
                kind: SocketMode::Subscriber,
            },
            curve: self.curve.clone(),
            channel: self.channel.clone(),
        }
    }
}

/// Index of a slot in [`ChannelServer::slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Startup outcome of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Ready,
    Failed,
}

/// One channel and the connection dedicated to it.
pub struct ChannelSlot {
    channel: String,
    connection: Connection,
    handler: MessageHandler,
    status: SlotStatus,
}

impl ChannelSlot {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }
}

impl std::fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("channel", &self.channel)
            .field("connection", &self.connection)
            .field("status", &self.status)
            .finish()
    }
}

/// Result of [`ChannelServer::close`].
#[derive(Debug, Default)]
pub struct CloseReport {
    /// Number of connections a close was attempted on.
    pub attempted: usize,
    /// Channels whose connection reported an error while closing.
    pub failures: Vec<(String, TransportError)>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Serves every channel of a [`HandlerRegistry`].
pub struct ChannelServer {
    options: ConnectionOptions,
    registry: HandlerRegistry,
    factory: Arc<dyn SocketFactory>,
    slots: Vec<ChannelSlot>,
    listening: bool,
    span: Span,
}

impl ChannelServer {
    /// Creates a server.  No sockets are created until [`listen`].
    ///
    /// # Errors
    ///
    /// [`TransportError::Configuration`] for a blank address or a CURVE client
    /// setup without `server_key`; [`TransportError::KeyStore`] for a relative
    /// key path.
    ///
    /// [`listen`]: ChannelServer::listen
    pub fn new(
        options: ServerOptions,
        registry: HandlerRegistry,
        factory: Arc<dyn SocketFactory>,
    ) -> Result<Self, TransportError> {
        let options = options.connection_options();
        options
            .validate()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;
        if let Some(curve) = &options.curve {
            KeyStore::resolve(curve.path.as_deref())?;
            if !curve.server && curve.server_key.is_none() {
                return Err(TransportError::Configuration(
                    "curve.server_key is required unless curve.server is true".into(),
                ));
            }
        }

        let span = info_span!("channel_server", endpoint = %options.address);
        Ok(Self {
            options,
            registry,
            factory,
            slots: Vec::new(),
            listening: false,
            span,
        })
    }

    /// Replaces the span this server and its connections log in.  Takes
    /// effect for connections created by a later `listen()`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Starts every registered channel.
    ///
    /// `ready` is called exactly once per registered channel, in channel-name
    /// order, with `Ok(())` or that channel's startup error.  Channel failures
    /// do not fail `listen` itself.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`TransportError::AlreadyListening`] on a second call.
    pub async fn listen<F>(&mut self, mut ready: F) -> Result<(), TransportError>
    where
        F: FnMut(&str, Result<(), TransportError>),
    {
        if self.listening {
            return Err(TransportError::AlreadyListening);
        }
        self.listening = true;

        let mut outcomes: Vec<(String, Result<(), TransportError>)> = Vec::new();
        for (channel, created) in self.create_connections().await {
            let Some(handler) = self.registry.get(&channel) else {
                continue;
            };
            match created {
                Ok(connection) => {
                    let span = info_span!(
                        parent: &self.span,
                        "channel",
                        channel = %channel,
                        connection_id = %connection.id(),
                    );
                    self.slots.push(ChannelSlot {
                        connection: connection.with_span(span),
                        handler: Arc::clone(handler),
                        status: SlotStatus::Pending,
                        channel,
                    });
                }
                Err(e) => outcomes.push((channel, Err(e))),
            }
        }

        let results = join_all(self.slots.iter_mut().map(start_slot)).await;
        for (slot, result) in self.slots.iter_mut().zip(results) {
            slot.status = if result.is_ok() {
                SlotStatus::Ready
            } else {
                SlotStatus::Failed
            };
            outcomes.push((slot.channel.clone(), result));
        }

        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        let _entered = self.span.enter();
        for (channel, result) in outcomes {
            match &result {
                Ok(()) => info!(channel = %channel, "channel ready"),
                Err(e) => warn!(channel = %channel, "channel failed to start: {e}"),
            }
            ready(&channel, result);
        }
        Ok(())
    }

    /// Creates one connection per registered channel, in channel-name order.
    ///
    /// Construction may load or generate CURVE keys, which blocks on file
    /// I/O and on another process's key store lock, so it runs on the
    /// blocking pool.
    async fn create_connections(&self) -> Vec<(String, Result<Connection, TransportError>)> {
        let channels: Vec<String> = self.registry.channels().map(str::to_string).collect();
        let options = self.options.clone();
        let factory = Arc::clone(&self.factory);
        let span = self.span.clone();

        let task = tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                channels
                    .into_iter()
                    .map(|channel| {
                        let created = Connection::new(&options, &*factory);
                        (channel, created)
                    })
                    .collect::<Vec<_>>()
            })
        });
        match task.await {
            Ok(created) => created,
            Err(e) => self
                .registry
                .channels()
                .map(|channel| {
                    let error = SocketError::Other(format!("connection setup task failed: {e}"));
                    (channel.to_string(), Err(TransportError::Socket(error)))
                })
                .collect(),
        }
    }

    /// Closes every tracked connection, best-effort.
    pub fn close(&mut self) -> CloseReport {
        let _entered = self.span.enter();
        let mut report = CloseReport::default();
        for slot in &mut self.slots {
            report.attempted += 1;
            if let Err(e) = slot.connection.close() {
                warn!(channel = %slot.channel, "failed to close channel connection: {e}");
                report.failures.push((slot.channel.clone(), e));
            }
        }
        info!(
            attempted = report.attempted,
            failed = report.failures.len(),
            "channel server closed"
        );
        report
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Number of connections created by `listen()`.
    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[ChannelSlot] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&ChannelSlot> {
        self.slots.get(id.0)
    }

    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> {
        (0..self.slots.len()).map(SlotId)
    }

    /// Slot serving `channel`, if one was created.
    pub fn slot_for(&self, channel: &str) -> Option<SlotId> {
        self.slots.iter().position(|slot| slot.channel == channel).map(SlotId)
    }
}

async fn start_slot(slot: &mut ChannelSlot) -> Result<(), TransportError> {
    slot.connection.connect().await?;
    slot.connection.subscribe(&slot.channel)?;
    slot.connection.add_listener(Arc::clone(&slot.handler))?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
