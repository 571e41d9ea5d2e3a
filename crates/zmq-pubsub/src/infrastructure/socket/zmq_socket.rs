//! libzmq-backed PUB/SUB sockets.
//!
//! All sockets created by one [`ZmqSocketFactory`] share a single
//! `zmq::Context`, which is what makes `inproc://` endpoints work between a
//! publisher and the subscriber connections of the same process.
//!
//! # Blocking calls
//!
//! libzmq's API is synchronous.  `connect`, `bind` and `send` return quickly
//! (a PUB socket never blocks on send; it drops at the high-water mark), and
//! `recv_frames` uses `zmq_poll` with a bounded timeout so the receive thread
//! can notice shutdown.

use std::time::Duration;

use zmq_pubsub_core::SocketMode;

use super::{CurveSettings, PubSubSocket, SocketFactory};
use crate::error::SocketError;

/// Creates libzmq sockets from one shared context.
#[derive(Clone)]
pub struct ZmqSocketFactory {
    context: zmq::Context,
}

impl ZmqSocketFactory {
    pub fn new() -> Self {
        Self {
            context: zmq::Context::new(),
        }
    }

    /// Wraps an existing context (e.g. one shared with other ZeroMQ users in
    /// the process).
    pub fn with_context(context: zmq::Context) -> Self {
        Self { context }
    }

    /// Whether the linked libzmq was built with CURVE support.
    pub fn curve_supported() -> bool {
        zmq::has("curve").unwrap_or(false)
    }
}

impl Default for ZmqSocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketFactory for ZmqSocketFactory {
    fn create(&self, mode: SocketMode) -> Result<Box<dyn PubSubSocket>, SocketError> {
        let kind = match mode {
            SocketMode::Publisher => zmq::PUB,
            SocketMode::Subscriber => zmq::SUB,
        };
        let socket = self.context.socket(kind)?;
        // Pending messages must not hold up close().
        socket.set_linger(0)?;
        Ok(Box::new(ZmqSocket {
            mode,
            socket: Some(socket),
        }))
    }
}

/// A libzmq socket.  `None` once closed.
pub struct ZmqSocket {
    mode: SocketMode,
    socket: Option<zmq::Socket>,
}

impl ZmqSocket {
    fn socket(&self) -> Result<&zmq::Socket, SocketError> {
        self.socket.as_ref().ok_or(SocketError::Closed)
    }
}

impl PubSubSocket for ZmqSocket {
    fn mode(&self) -> SocketMode {
        self.mode
    }

    fn configure_curve(&mut self, settings: &CurveSettings) -> Result<(), SocketError> {
        let socket = self.socket()?;
        let key_pair = match settings {
            CurveSettings::Server { key_pair } => {
                socket.set_curve_server(true)?;
                key_pair
            }
            CurveSettings::Client {
                server_key,
                key_pair,
            } => {
                socket.set_curve_serverkey(server_key.as_bytes())?;
                key_pair
            }
        };
        // libzmq accepts 40-character Z85 text for all CURVE key options.
        socket.set_curve_publickey(key_pair.public_key().as_bytes())?;
        socket.set_curve_secretkey(key_pair.secret_key().as_bytes())?;
        Ok(())
    }

    fn connect(&mut self, endpoint: &str) -> Result<(), SocketError> {
        self.socket()?.connect(endpoint)?;
        Ok(())
    }

    fn bind(&mut self, endpoint: &str) -> Result<(), SocketError> {
        self.socket()?.bind(endpoint)?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &[u8]) -> Result<(), SocketError> {
        self.socket()?.set_subscribe(topic)?;
        Ok(())
    }

    fn send_frames(&mut self, frames: &[Vec<u8>]) -> Result<(), SocketError> {
        self.socket()?
            .send_multipart(frames.iter().map(Vec::as_slice), 0)?;
        Ok(())
    }

    fn recv_frames(&mut self, timeout: Duration) -> Result<Option<Vec<Vec<u8>>>, SocketError> {
        let socket = self.socket()?;
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        if socket.poll(zmq::POLLIN, timeout_ms)? == 0 {
            return Ok(None);
        }
        Ok(Some(socket.recv_multipart(0)?))
    }

    fn close(&mut self) -> Result<(), SocketError> {
        // Dropping the handle calls zmq_close; linger was set to 0 at creation.
        self.socket.take().ok_or(SocketError::Closed).map(drop)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_creates_socket_with_requested_mode() {
        let factory = ZmqSocketFactory::new();
        let publisher = factory.create(SocketMode::Publisher).unwrap();
        let subscriber = factory.create(SocketMode::Subscriber).unwrap();
        assert_eq!(publisher.mode(), SocketMode::Publisher);
        assert_eq!(subscriber.mode(), SocketMode::Subscriber);
    }

    #[test]
    fn test_closed_socket_rejects_operations() {
        // Arrange
        let factory = ZmqSocketFactory::new();
        let mut socket = factory.create(SocketMode::Publisher).unwrap();

        // Act
        socket.close().unwrap();

        // Assert
        assert!(matches!(socket.bind("inproc://closed"), Err(SocketError::Closed)));
        assert!(matches!(socket.close(), Err(SocketError::Closed)));
    }

    #[test]
    fn test_recv_times_out_with_none_when_nothing_published() {
        let factory = ZmqSocketFactory::new();
        let mut publisher = factory.create(SocketMode::Publisher).unwrap();
        publisher.bind("inproc://zmq-socket-timeout").unwrap();
        let mut subscriber = factory.create(SocketMode::Subscriber).unwrap();
        subscriber.connect("inproc://zmq-socket-timeout").unwrap();
        subscriber.subscribe(b"quiet@").unwrap();

        let received = subscriber.recv_frames(Duration::from_millis(20)).unwrap();

        assert!(received.is_none());
    }

    #[test]
    fn test_bind_to_invalid_endpoint_fails() {
        let factory = ZmqSocketFactory::new();
        let mut socket = factory.create(SocketMode::Publisher).unwrap();
        assert!(matches!(
            socket.bind("not-a-transport://nowhere"),
            Err(SocketError::Zmq(_))
        ));
    }
}
