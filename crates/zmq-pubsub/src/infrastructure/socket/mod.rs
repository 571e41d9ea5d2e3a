//! Socket abstraction for the pub/sub transport.
//!
//! [`PubSubSocket`] is the raw socket primitive every [`Connection`] owns:
//! connect/bind, topic subscription, atomic multipart send, and a
//! poll-with-timeout receive.  [`SocketFactory`] creates sockets of a given
//! mode.
//!
//! # Implementations
//!
//! - **`zmq_socket`** – the production backend (libzmq PUB/SUB sockets).
//! - **`mock`** – an in-memory network that routes frames between mock
//!   sockets by prefix filter, so the multiplexer can be tested end-to-end
//!   without libzmq or timing-dependent subscription propagation.
//!
//! [`Connection`]: crate::infrastructure::connection::Connection

use std::time::Duration;

use zmq_pubsub_core::{CurveKeyPair, SocketMode};

use crate::error::SocketError;

pub mod mock;
pub mod zmq_socket;

/// CURVE role and keys applied to a socket before it is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurveSettings {
    /// The socket acts as the CURVE server with its own long-term key pair.
    Server { key_pair: CurveKeyPair },
    /// The socket authenticates against the server's public key.
    Client {
        server_key: String,
        key_pair: CurveKeyPair,
    },
}

/// One pub/sub socket, fixed to one [`SocketMode`].
pub trait PubSubSocket: Send {
    /// The mode this socket was created with.
    fn mode(&self) -> SocketMode;

    /// Applies CURVE security options.  Must be called before connect/bind.
    fn configure_curve(&mut self, settings: &CurveSettings) -> Result<(), SocketError>;

    fn connect(&mut self, endpoint: &str) -> Result<(), SocketError>;

    fn bind(&mut self, endpoint: &str) -> Result<(), SocketError>;

    /// Registers a prefix filter (subscriber sockets only).
    fn subscribe(&mut self, topic: &[u8]) -> Result<(), SocketError>;

    /// Sends all frames as one atomic multipart message.
    fn send_frames(&mut self, frames: &[Vec<u8>]) -> Result<(), SocketError>;

    /// Waits up to `timeout` for one multipart message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv_frames(&mut self, timeout: Duration) -> Result<Option<Vec<Vec<u8>>>, SocketError>;

    /// Releases the underlying resource.  Further calls fail with
    /// [`SocketError::Closed`].
    fn close(&mut self) -> Result<(), SocketError>;
}

/// Creates sockets.  Shared by every connection a process opens.
#[cfg_attr(test, mockall::automock)]
pub trait SocketFactory: Send + Sync {
    fn create(&self, mode: SocketMode) -> Result<Box<dyn PubSubSocket>, SocketError>;
}
