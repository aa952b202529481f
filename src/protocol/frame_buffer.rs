//! Fixed-capacity receive buffer for accumulating partial reads.
//!
//! The buffer is a single allocation with two cursors:
//!
//! ```text
//! 0          pos               len                capacity
//! ├──────────┼─────────────────┼──────────────────┤
//! │ consumed │ unread data     │ free tail        │
//! ```
//!
//! Socket reads land in the free tail. Consumed bytes at the front are
//! reclaimed by [`FrameBuffer::compact`], which callers run before each read
//! to maximize the contiguous tail.

use std::collections::TryReserveError;

use super::wire_format::{decode_length, DEFAULT_BUFFER_CAPACITY, LENGTH_PREFIX_SIZE};
use crate::error::{Error, Result};

/// Bounded byte buffer with read/write cursors.
///
/// Invariant: `pos <= len <= capacity`.
pub struct FrameBuffer {
    data: Box<[u8]>,
    /// Next unread byte.
    pos: usize,
    /// End of valid data.
    len: usize,
}

impl FrameBuffer {
    /// Create a buffer with the default capacity (8 KB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a buffer with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            len: 0,
        }
    }

    /// Create a buffer, reporting allocation failure instead of aborting.
    pub fn try_with_capacity(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_: TryReserveError| Error::AllocFailed(capacity))?;
        data.resize(capacity, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            pos: 0,
            len: 0,
        })
    }

    /// Copy bytes into the free tail.
    ///
    /// Fails without modifying the buffer if the tail is too small; compact
    /// first to reclaim consumed space.
    pub fn append(&mut self, src: &[u8]) -> Result<()> {
        let available = self.remaining();
        if src.len() > available {
            return Err(Error::BufferFull {
                needed: src.len(),
                available,
            });
        }
        self.data[self.len..self.len + src.len()].copy_from_slice(src);
        self.len += src.len();
        self.check_invariant();
        Ok(())
    }

    /// Shift unread bytes to the front and reset `pos` to zero.
    pub fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.data.copy_within(self.pos..self.len, 0);
        self.len -= self.pos;
        self.pos = 0;
        self.check_invariant();
    }

    /// Decode the length prefix at the read cursor, if 4 bytes are buffered.
    pub fn peek_header(&self) -> Option<u32> {
        if self.unread_len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        decode_length(self.unread())
    }

    /// Advance the read cursor by `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the unread byte count.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.unread_len(),
            "consume({}) past end of buffered data ({} unread)",
            n,
            self.unread_len()
        );
        self.pos += n;
        if self.pos == self.len {
            self.pos = 0;
            self.len = 0;
        }
        self.check_invariant();
    }

    /// Unread bytes, `[pos, len)`.
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..self.len]
    }

    /// Number of unread bytes.
    #[inline]
    pub fn unread_len(&self) -> usize {
        self.len - self.pos
    }

    /// Free bytes at the tail, `[len, capacity)`.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    /// Mutable view of the free tail, for reading from a socket in place.
    ///
    /// Follow with [`commit`](Self::commit) to publish what was written.
    #[inline]
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` bytes written into [`tail_mut`](Self::tail_mut) as valid.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the free tail.
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.remaining(), "commit({}) past capacity", n);
        self.len += n;
        self.check_invariant();
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Read cursor position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if there are no unread bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == self.len
    }

    /// Drop all buffered data.
    pub fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }

    #[inline]
    fn check_invariant(&self) {
        debug_assert!(self.pos <= self.len && self.len <= self.data.len());
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("pos", &self.pos)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
