//! zmq-pubsub library entry point.
//!
//! A channel-addressed publish/subscribe transport over ZeroMQ:
//!
//! ```text
//! Connection (PUB) ──send("test", payload)──►  ["test@", JSON]
//!                                                    │
//!                     ChannelServer ──── one SUB Connection per channel
//!                                                    │
//!                                       handler("test")(Ok(payload))
//! ```
//!
//! # Layers
//!
//! - `application/`    Handler registry and the periodic demo publisher.
//! - `infrastructure/` Sockets, connections, the channel server, the CURVE
//!   key store and configuration storage.
//! - `error`           Error types shared by both layers.
//!
//! Pure types (channel names, options, the frame codec) live in
//! `zmq_pubsub_core`.
//!
//! The binary in `main.rs` and the integration tests in `tests/` share this
//! module tree.

pub mod application;
pub mod error;
pub mod infrastructure;

pub use application::registry::{HandlerRegistry, HandlerResult, MessageHandler, RegistryError};
pub use error::{KeyStoreError, SocketError, TransportError};
pub use infrastructure::connection::{Connection, ConnectionState};
pub use infrastructure::server::{ChannelServer, CloseReport, ServerOptions};
pub use infrastructure::storage::keystore::KeyStore;
