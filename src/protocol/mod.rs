//! Protocol module - wire format, receive buffering and framing.
//!
//! This module implements the TCP message protocol:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Fixed-capacity receive buffer with compaction
//! - Frame reader that reassembles messages from partial reads

mod frame_buffer;
mod frame_reader;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use frame_reader::{FrameError, FrameReader, ReadOutcome};
pub use wire_format::{
    decode_length, encode_frame, encode_length, frame_length, is_valid_length, max_payload_size,
    DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
