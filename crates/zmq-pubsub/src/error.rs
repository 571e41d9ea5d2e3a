//! Error types shared by every layer of the crate.
//!
//! | kind                  | variant                                   | raised by            |
//! |-----------------------|-------------------------------------------|----------------------|
//! | configuration         | [`TransportError::Configuration`], [`KeyStoreError::RelativePath`] | construction |
//! | connection            | [`TransportError::Connect`]               | `connect` / `bind`   |
//! | invalid message       | [`TransportError::InvalidMessage`]        | `send`               |
//! | deserialization       | [`TransportError::Deserialization`]       | inbound dispatch     |
//! | file system           | [`KeyStoreError::Io`]                     | key store            |
//!
//! None of these are retried internally.

use std::path::PathBuf;

use thiserror::Error;
use zmq_pubsub_core::{ChannelError, FrameError};

use crate::infrastructure::connection::ConnectionState;

/// Error type for socket backend operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The ZeroMQ library reported an error.
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    /// The socket has already been closed.
    #[error("socket is closed")]
    Closed,

    /// Any other backend failure (used by the in-memory mock network and for
    /// failed blocking tasks).
    #[error("{0}")]
    Other(String),
}

/// Error type for key store operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The configured key directory is not an absolute path.
    #[error("invalid curve keys path {path:?} - must be absolute")]
    RelativePath { path: PathBuf },

    /// A file system operation failed.
    #[error("I/O error accessing key store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key file exists but its content is not a usable key.
    #[error("key file {path} is invalid: {reason}")]
    InvalidKey { path: PathBuf, reason: String },

    /// Another process held the initialization lock past the wait deadline.
    #[error("key store {path} is locked by another process (remove {path}/.keys.lock if it is stale)")]
    Locked { path: PathBuf },

    /// The key generator failed.
    #[error("key generation failed: {0}")]
    Generate(String),
}

/// Error type for connection and multiplexer operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A required option is missing or inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The key store could not provide a key pair.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// `connect` or `bind` failed.
    #[error("failed to attach to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: SocketError,
    },

    /// `send` was called with a missing channel or payload.  Nothing was
    /// transmitted.
    #[error("invalid message: {0}")]
    InvalidMessage(#[source] FrameError),

    /// An inbound message could not be decoded.
    #[error("failed to decode inbound message: {0}")]
    Deserialization(#[source] FrameError),

    /// A channel name failed validation against the connection's postfix.
    #[error("invalid channel: {0}")]
    InvalidChannel(#[from] ChannelError),

    /// The operation is not allowed in the connection's current state.
    #[error("cannot {operation} while connection is {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// A listener is already attached to this subscriber.
    #[error("a listener is already attached to this connection")]
    ListenerAttached,

    /// `listen` was called on a server that is already listening.
    #[error("server is already listening")]
    AlreadyListening,

    /// Listener dispatch needs a Tokio runtime.
    #[error("no Tokio runtime available to dispatch inbound messages")]
    NoRuntime,

    /// The receive thread could not be spawned.
    #[error("failed to spawn receive thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A socket operation other than connect/bind failed.
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
}

impl TransportError {
    /// `true` for the error kinds that are fatal at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TransportError::Configuration(_)
                | TransportError::KeyStore(KeyStoreError::RelativePath { .. })
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_is_a_configuration_error() {
        let err = TransportError::from(KeyStoreError::RelativePath {
            path: PathBuf::from("curve"),
        });
        assert!(err.is_configuration());
    }

    #[test]
    fn test_io_error_is_not_a_configuration_error() {
        let err = TransportError::from(KeyStoreError::Io {
            path: PathBuf::from("/keys"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_invalid_state_message_names_operation_and_state() {
        let err = TransportError::InvalidState {
            operation: "send",
            state: ConnectionState::Closed,
        };
        assert_eq!(err.to_string(), "cannot send while connection is closed");
    }

    #[test]
    fn test_connect_error_mentions_endpoint() {
        let err = TransportError::Connect {
            endpoint: "tcp://10.0.0.1:5555".into(),
            source: SocketError::Other("refused".into()),
        };
        assert!(err.to_string().contains("tcp://10.0.0.1:5555"));
    }
}
