//! Channel names and the postfix that turns them into wire-level topics.
//!
//! # Why a postfix? (for beginners)
//!
//! ZeroMQ SUB sockets filter by *prefix*: a subscription to `"test"` would also
//! receive messages published on `"test2"`, because `"test2"` starts with
//! `"test"`.  Appending a delimiter that channel names may not contain fixes
//! this:
//!
//! ```text
//! channel "test"  → topic "test@"
//! channel "test2" → topic "test2@"
//!
//! "test2@".starts_with("test@") == false   ← no accidental overlap
//! ```
//!
//! Publisher and subscriber must agree on the postfix.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The postfix used when none is configured.
pub const DEFAULT_CHANNEL_POSTFIX: &str = "@";

/// Error type for channel name validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel name is the empty string.
    #[error("channel name must not be empty")]
    Empty,

    /// The channel name contains the postfix delimiter, which would make the
    /// topic filter ambiguous.
    #[error("channel name {channel:?} must not contain the postfix {postfix:?}")]
    ContainsPostfix { channel: String, postfix: String },
}

/// Delimiter appended to every channel name on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ChannelPostfix(String);

impl ChannelPostfix {
    /// Creates a postfix, falling back to [`DEFAULT_CHANNEL_POSTFIX`] for an
    /// empty string.
    pub fn new(postfix: impl Into<String>) -> Self {
        let postfix = postfix.into();
        if postfix.is_empty() {
            Self::default()
        } else {
            Self(postfix)
        }
    }

    /// Resolves an optional configured postfix.
    pub fn from_option(postfix: Option<&str>) -> Self {
        postfix.map(Self::new).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelPostfix {
    fn default() -> Self {
        Self(DEFAULT_CHANNEL_POSTFIX.to_string())
    }
}

impl From<String> for ChannelPostfix {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<ChannelPostfix> for String {
    fn from(value: ChannelPostfix) -> Self {
        value.0
    }
}

impl fmt::Display for ChannelPostfix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated channel name.
///
/// Validation is relative to a postfix: `"a@b"` is a valid name when the
/// postfix is `"#"` but not when it is `"@"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    /// Validates `name` against `postfix`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Empty`] for `""` and
    /// [`ChannelError::ContainsPostfix`] when the name contains the delimiter.
    pub fn new(name: &str, postfix: &ChannelPostfix) -> Result<Self, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::Empty);
        }
        if name.contains(postfix.as_str()) {
            return Err(ChannelError::ContainsPostfix {
                channel: name.to_string(),
                postfix: postfix.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the wire-level topic: `<name><postfix>`.
    pub fn topic(&self, postfix: &ChannelPostfix) -> String {
        let mut topic = String::with_capacity(self.0.len() + postfix.as_str().len());
        topic.push_str(&self.0);
        topic.push_str(postfix.as_str());
        topic
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
