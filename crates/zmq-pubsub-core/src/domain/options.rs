//! Connection option types.
//!
//! [`ConnectionOptions`] mirrors the option table every connection is built
//! from:
//!
//! | option                                  | field                         |
//! |-----------------------------------------|-------------------------------|
//! | `address`                               | [`ConnectionOptions::address`] |
//! | `socket.type`                           | [`SocketOptions::kind`]        |
//! | `curve.server`                          | [`CurveOptions::server`]       |
//! | `curve.serverKey / publicKey / secretKey` | [`CurveOptions`] key overrides |
//! | `curve.path`                            | [`CurveOptions::path`]         |
//! | `channel.postfix`                       | [`ChannelOptions::postfix`]    |
//!
//! All types derive `Deserialize`, so the same structure can be embedded in a
//! TOML configuration file.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::channel::ChannelPostfix;

/// Error type for option validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// `address` is empty.
    #[error("missing required option: address")]
    MissingAddress,
}

/// Which side of the pub/sub pattern a socket plays.  Fixed for the lifetime
/// of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketMode {
    #[serde(rename = "pub")]
    Publisher,
    #[serde(rename = "sub")]
    Subscriber,
}

impl fmt::Display for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketMode::Publisher => f.write_str("Publisher"),
            SocketMode::Subscriber => f.write_str("Subscriber"),
        }
    }
}

/// The `socket` option group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    #[serde(rename = "type")]
    pub kind: SocketMode,
}

/// The `curve` option group.  Its presence enables CURVE security.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveOptions {
    /// Act as the CURVE server (the side that owns the long-term identity
    /// clients pin with `server_key`).
    #[serde(default)]
    pub server: bool,
    /// Public key of the remote CURVE server.  Required when `server` is false.
    #[serde(default, alias = "serverKey", skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
    /// Explicit own public key; falls back to the key store.
    #[serde(default, alias = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Explicit own secret key; falls back to the key store.
    #[serde(default, alias = "secretKey", skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// Absolute key store directory.  Defaults to `<cwd>/curve`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// The `channel` option group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postfix: Option<String>,
}

/// Everything needed to construct one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Endpoint string, e.g. `tcp://127.0.0.1:5555` or `inproc://bus`.
    pub address: String,
    pub socket: SocketOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<CurveOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelOptions>,
}

impl ConnectionOptions {
    /// Options for a plain (non-CURVE) socket of the given mode.
    pub fn new(address: impl Into<String>, mode: SocketMode) -> Self {
        Self {
            address: address.into(),
            socket: SocketOptions { kind: mode },
            curve: None,
            channel: None,
        }
    }

    pub fn publisher(address: impl Into<String>) -> Self {
        Self::new(address, SocketMode::Publisher)
    }

    pub fn subscriber(address: impl Into<String>) -> Self {
        Self::new(address, SocketMode::Subscriber)
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

    pub fn mode(&self) -> SocketMode {
        self.socket.kind
    }

    /// The configured postfix, or the default `"@"`.
    pub fn postfix(&self) -> ChannelPostfix {
        ChannelPostfix::from_option(
            self.channel
                .as_ref()
                .and_then(|channel| channel.postfix.as_deref()),
        )
    }

    /// Checks required options.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::MissingAddress`] when `address` is blank.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.address.trim().is_empty() {
            return Err(OptionsError::MissingAddress);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
