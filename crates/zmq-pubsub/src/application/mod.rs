//! Application layer.
//!
//! Code here decides *what* travels over the transport, not *how*:
//!
//! - **`registry`** – the explicit channel → handler map a channel server is
//!   built from.  Registration replaces any kind of handler discovery: a
//!   channel is served if and only if `register_handler` was called for it.
//!
//! - **`demo_publisher`** – the periodic producer that drives the demo
//!   binary.  It depends only on the [`Publish`](demo_publisher::Publish)
//!   trait, so it can be tested without sockets.
//!
//! **Dependency rule**: this layer depends on `zmq_pubsub_core` and the shared
//! error types only.  The infrastructure layer depends on it, never the other
//! way round.

pub mod demo_publisher;
pub mod registry;
