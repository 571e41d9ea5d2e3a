//! Infrastructure layer.
//!
//! Contains the adapters that talk to the outside world:
//!
//! - **`socket`** – the pub/sub socket abstraction with its libzmq backend
//!   and an in-memory mock network.
//! - **`connection`** – [`Connection`](connection::Connection), one socket
//!   fixed to publisher or subscriber mode.
//! - **`server`** – [`ChannelServer`](server::ChannelServer), the
//!   one-connection-per-channel multiplexer.
//! - **`storage`** – the CURVE key store and the TOML configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `zmq_pubsub_core`, but MUST NOT be imported by the `application` layer.

pub mod connection;
pub mod server;
pub mod socket;
pub mod storage;
