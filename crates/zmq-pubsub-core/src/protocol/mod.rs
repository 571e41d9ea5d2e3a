//! Protocol module containing the two-part frame codec.

pub mod frame;

pub use frame::{decode_frames, encode_frames, FrameError, InboundMessage, PART_COUNT};
