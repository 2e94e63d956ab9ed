//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the multiplexer's binary framing:
//! - 12-byte header encoding/decoding
//! - Frame constructors and the stateless `encode`/`decode` codec
//! - Frame buffer for accumulating partial reads
//!
//! It knows nothing about sessions or streams.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, decode, encode, Decoded, Frame};
pub use frame_buffer::{FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
pub use wire_format::{
    flags, go_away, FrameType, Header, HEADER_SIZE, PROTOCOL_VERSION, SESSION_STREAM_ID,
};
