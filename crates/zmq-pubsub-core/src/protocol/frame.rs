//! Two-part frame codec.
//!
//! Wire format (one ZeroMQ multipart message):
//! ```text
//! part 0: UTF-8  "<channel><postfix>"     e.g. "test@"
//! part 1: UTF-8  JSON-encoded payload     e.g. {"msg":"a"}
//! ```
//!
//! Part 0 doubles as the SUB-side topic filter.  Both parts are sent as one
//! atomic multipart message, so a subscriber never observes one without the
//! other.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::domain::channel::{ChannelError, ChannelName, ChannelPostfix};

/// Number of parts in every message.
pub const PART_COUNT: usize = 2;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The channel name is empty or contains the postfix.
    #[error("invalid channel: {0}")]
    Channel(#[from] ChannelError),

    /// The payload serialized to JSON `null`, which counts as "no payload".
    #[error("payload must not be null")]
    NullPayload,

    /// The payload could not be serialized to JSON.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The multipart message did not have exactly two parts.
    #[error("expected {expected} message parts, got {actual}")]
    PartCount { expected: usize, actual: usize },

    /// A part was not valid UTF-8.
    #[error("message part {part} is not valid UTF-8")]
    NonUtf8 { part: usize },

    /// The topic part does not end with the expected postfix.
    #[error("topic {topic:?} does not end with postfix {postfix:?}")]
    MissingPostfix { topic: String, postfix: String },

    /// The payload part is not valid JSON (or not the requested type).
    #[error("failed to deserialize payload: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Channel name with the postfix stripped.
    pub channel: String,
    /// Decoded JSON payload.
    pub payload: serde_json::Value,
}

impl InboundMessage {
    /// Converts the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Deserialize`] if the JSON does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        serde_json::from_value(self.payload.clone()).map_err(FrameError::Deserialize)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `payload` for `channel` as `[channel + postfix, JSON bytes]`.
///
/// Performs no I/O; every validation failure is reported before anything could
/// be transmitted.
///
/// # Errors
///
/// - [`FrameError::Channel`] for an empty channel or one containing the postfix.
/// - [`FrameError::NullPayload`] when the payload serializes to `null`.
/// - [`FrameError::Serialize`] when serde_json rejects the payload.
///
/// # Examples
///
/// ```rust
/// use zmq_pubsub_core::{encode_frames, ChannelPostfix};
///
/// let frames = encode_frames("test", &"hello", &ChannelPostfix::default()).unwrap();
/// assert_eq!(frames[0], b"test@");
/// assert_eq!(frames[1], b"\"hello\"");
/// ```
pub fn encode_frames<T: Serialize + ?Sized>(
    channel: &str,
    payload: &T,
    postfix: &ChannelPostfix,
) -> Result<[Vec<u8>; PART_COUNT], FrameError> {
    let channel = ChannelName::new(channel, postfix)?;
    let body = serde_json::to_vec(payload).map_err(FrameError::Serialize)?;
    if body == b"null" {
        return Err(FrameError::NullPayload);
    }
    Ok([channel.topic(postfix).into_bytes(), body])
}

/// Decodes a received multipart message.
///
/// # Errors
///
/// Returns [`FrameError`] when the part count, encoding, postfix or JSON is
/// wrong.
pub fn decode_frames<P: AsRef<[u8]>>(
    parts: &[P],
    postfix: &ChannelPostfix,
) -> Result<InboundMessage, FrameError> {
    let [topic, body] = parts else {
        return Err(FrameError::PartCount {
            expected: PART_COUNT,
            actual: parts.len(),
        });
    };

    let topic = std::str::from_utf8(topic.as_ref()).map_err(|_| FrameError::NonUtf8 { part: 0 })?;
    let channel = topic
        .strip_suffix(postfix.as_str())
        .ok_or_else(|| FrameError::MissingPostfix {
            topic: topic.to_string(),
            postfix: postfix.to_string(),
        })?;

    let body = std::str::from_utf8(body.as_ref()).map_err(|_| FrameError::NonUtf8 { part: 1 })?;
    let payload = serde_json::from_str(body).map_err(FrameError::Deserialize)?;

    Ok(InboundMessage {
        channel: channel.to_string(),
        payload,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
