//! # zmq-pubsub-core
//!
//! Shared library for zmq-pubsub containing the channel naming rules, the
//! connection option types, CURVE key types, and the two-part frame codec.
//!
//! This crate has zero dependencies on sockets or the file system.  Everything
//! in here can be unit-tested without a network.
//!
//! # Architecture overview (for beginners)
//!
//! zmq-pubsub is a *channel-addressed* publish/subscribe transport.  A
//! publisher sends a message "on a channel" (a plain string such as `"test"`)
//! and every subscriber that registered a handler for that channel receives
//! the decoded payload.
//!
//! This crate (`zmq-pubsub-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure types: [`ChannelName`] / [`ChannelPostfix`] (how a
//!   channel name becomes a wire-level topic filter), [`ConnectionOptions`]
//!   (what a caller configures), and [`CurveKeyPair`].
//!
//! - **`protocol`** – How a message travels over the wire: a two-part message
//!   whose first part is `<channel><postfix>` and whose second part is the
//!   JSON-encoded payload.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `zmq_pubsub_core::ChannelName` instead of the full module path.
pub use domain::channel::{ChannelError, ChannelName, ChannelPostfix, DEFAULT_CHANNEL_POSTFIX};
pub use domain::keys::{CurveKeyPair, KeyError, Z85_KEY_LEN};
pub use domain::options::{
    ChannelOptions, ConnectionOptions, CurveOptions, OptionsError, SocketMode, SocketOptions,
};
pub use protocol::frame::{decode_frames, encode_frames, FrameError, InboundMessage};
