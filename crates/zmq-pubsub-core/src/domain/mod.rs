//! Domain layer: pure types with no I/O.
//!
//! # What belongs in the domain layer?
//!
//! - Channel naming rules (name + postfix = topic filter)
//! - Connection option structures (deserializable from config files)
//! - Key pair value types
//!
//! # What does NOT belong here?
//!
//! - Any socket, thread, or `tokio` type
//! - File system access (the key store lives in the application crate)

pub mod channel;
pub mod keys;
pub mod options;
