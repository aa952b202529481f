//! Wire format encoding and decoding.
//!
//! A TCP message is a 4-byte length prefix followed by the payload:
//! ```text
//! ┌──────────┬──────────────────┐
//! │ Length   │ Payload          │
//! │ 4 bytes  │ `length` bytes   │
//! │ uint32 BE│                  │
//! └──────────┴──────────────────┘
//! ```
//!
//! UDP datagrams carry the raw payload with no prefix.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default receive buffer capacity per connection.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;

/// Largest payload that fits a default-sized receive buffer.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = DEFAULT_BUFFER_CAPACITY - LENGTH_PREFIX_SIZE;

/// Largest payload a receive buffer of `capacity` bytes can reassemble.
#[inline]
pub fn max_payload_size(capacity: usize) -> usize {
    capacity.saturating_sub(LENGTH_PREFIX_SIZE)
}

/// Encode a payload length as a big-endian prefix.
///
/// # Example
///
/// ```
/// use sockwire::protocol::encode_length;
///
/// assert_eq!(encode_length(5), [0, 0, 0, 5]);
/// ```
#[inline]
pub fn encode_length(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

/// Decode a big-endian length prefix.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Whether a decoded length can start a frame in a buffer of `capacity` bytes.
///
/// Zero is never valid: the receiver treats it like an oversized length and
/// resynchronizes past it.
#[inline]
pub fn is_valid_length(len: u32, capacity: usize) -> bool {
    len != 0 && (len as usize) <= max_payload_size(capacity)
}

/// Length prefix value for a payload of `len` bytes.
///
/// Fails with `MessageTooLarge` if `len` does not fit the 32-bit prefix.
pub fn frame_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::MessageTooLarge {
        len,
        max: u32::MAX as usize,
    })
}

/// Build a complete frame (prefix + payload) in one buffer.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let len = frame_length(payload.len())?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}
