//! Channel → handler registry.
//!
//! Handlers are registered explicitly with
//! [`HandlerRegistry::register_handler`] before the registry is handed to a
//! [`ChannelServer`].  After that the registry is read-only: the server walks
//! it once during `listen()` and opens one subscriber connection per entry.
//!
//! # Handler signature (for beginners)
//!
//! A [`MessageHandler`] receives a [`HandlerResult`]:
//!
//! - `Ok(value)` – the decoded JSON payload of one inbound message.
//! - `Err(TransportError::Deserialization(_))` – a message arrived on the
//!   channel but could not be decoded.  Decode failures are delivered here
//!   rather than dropped so the handler can decide what to do.
//!
//! Handlers are plain closures wrapped in an `Arc` so one handler value can be
//! shared with the dispatch task of its connection.
//!
//! [`ChannelServer`]: crate::infrastructure::server::ChannelServer

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use zmq_pubsub_core::FrameError;

use crate::error::TransportError;

/// What a handler receives for each inbound message.
pub type HandlerResult = Result<Value, TransportError>;

/// A channel handler.
pub type MessageHandler = Arc<dyn Fn(HandlerResult) + Send + Sync>;

/// Error type for handler registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("channel name must not be empty")]
    EmptyChannel,

    #[error("a handler is already registered for channel {0:?}")]
    Duplicate(String),
}

/// Ordered map of channel name to handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, MessageHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("channels", &self.channels().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `channel`.
    ///
    /// Postfix validation happens later, against the server's configured
    /// postfix, when the channel's connection subscribes.
    ///
    /// # Errors
    ///
    /// [`RegistryError::EmptyChannel`] or [`RegistryError::Duplicate`].
    pub fn register_handler<F>(&mut self, channel: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(HandlerResult) + Send + Sync + 'static,
    {
        if channel.is_empty() {
            return Err(RegistryError::EmptyChannel);
        }
        if self.handlers.contains_key(channel) {
            return Err(RegistryError::Duplicate(channel.to_string()));
        }
        self.handlers.insert(channel.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Registers a handler that receives the payload converted to `T`.  A
    /// payload that does not fit `T` reaches the handler as a
    /// [`TransportError::Deserialization`].
    pub fn register_typed<T, F>(&mut self, channel: &str, handler: F) -> Result<(), RegistryError>
    where
        T: DeserializeOwned,
        F: Fn(Result<T, TransportError>) + Send + Sync + 'static,
    {
        self.register_handler(channel, move |result: HandlerResult| {
            handler(result.and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| TransportError::Deserialization(FrameError::Deserialize(e)))
            }))
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered channel names in sorted order.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn get(&self, channel: &str) -> Option<&MessageHandler> {
        self.handlers.get(channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MessageHandler)> {
        self.handlers.iter().map(|(channel, handler)| (channel.as_str(), handler))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
