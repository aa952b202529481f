//! Framing parser: turns a non-blocking byte stream into whole messages.
//!
//! Each call to [`FrameReader::read_frame`] yields at most one message. The
//! reader pulls bytes from the source only when the buffered data does not
//! already hold a complete frame. Only [`ReadOutcome::NoData`] means the
//! source was read until it would block; a caller that stops earlier must
//! come back to the source without waiting for new readiness.
//!
//! # Resynchronization
//!
//! A decoded length of zero, or one that could never fit the buffer, is
//! treated as a misaligned header rather than a fatal peer error: the reader
//! skips exactly one byte and looks for a plausible header again.
//!
//! # Partial frames
//!
//! When the source would block, the reader returns `NoData` right away
//! unless a valid length has already been decoded. With a frame in flight it
//! backs off and retries according to its [`RetryPolicy`], and only reports
//! `NoData` once that budget is spent. Buffered bytes are kept either way.

use std::io::{ErrorKind, Read};

use bytes::Bytes;
use thiserror::Error;

use super::frame_buffer::FrameBuffer;
use super::wire_format::{is_valid_length, max_payload_size, LENGTH_PREFIX_SIZE};
use crate::config::RetryPolicy;
use crate::error::Result;

/// Connection-fatal parser failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Could not allocate the payload copy.
    #[error("allocation of {0} bytes failed")]
    AllocFailed(usize),

    /// The socket reported an error other than would-block.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Result of one [`FrameReader::read_frame`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete message payload.
    Message(Bytes),
    /// No complete message yet and the source has nothing more right now.
    NoData,
    /// The source reached end of stream.
    Closed,
    /// Unrecoverable failure; the connection must be dropped.
    Failed(FrameError),
}

/// Per-connection framing state: the receive buffer plus resync bookkeeping.
#[derive(Debug)]
pub struct FrameReader {
    buffer: FrameBuffer,
    retry: RetryPolicy,
    /// Bytes discarded while resynchronizing, over the reader's lifetime.
    skipped: u64,
    /// Currently skipping over a bad header.
    resyncing: bool,
}

impl FrameReader {
    /// Create a reader around an existing buffer.
    pub fn new(buffer: FrameBuffer, retry: RetryPolicy) -> Self {
        Self {
            buffer,
            retry,
            skipped: 0,
            resyncing: false,
        }
    }

    /// Create a reader with a freshly allocated buffer.
    pub fn with_capacity(capacity: usize, retry: RetryPolicy) -> Result<Self> {
        Ok(Self::new(FrameBuffer::try_with_capacity(capacity)?, retry))
    }

    /// Read the next complete message from `src`.
    pub fn read_frame<R: Read + ?Sized>(&mut self, src: &mut R) -> ReadOutcome {
        let capacity = self.buffer.capacity();
        let mut stalls = 0u32;

        loop {
            let mut have_len = false;

            if let Some(len) = self.buffer.peek_header() {
                if !is_valid_length(len, capacity) {
                    self.skip_byte(len);
                    continue;
                }
                have_len = true;
                if self.resyncing {
                    tracing::debug!(skipped = self.skipped, "frame alignment recovered");
                    self.resyncing = false;
                }

                let frame_len = LENGTH_PREFIX_SIZE + len as usize;
                if self.buffer.unread_len() >= frame_len {
                    let body = &self.buffer.unread()[LENGTH_PREFIX_SIZE..frame_len];
                    return match copy_payload(body) {
                        Ok(payload) => {
                            self.buffer.consume(frame_len);
                            ReadOutcome::Message(payload)
                        }
                        Err(e) => ReadOutcome::Failed(e),
                    };
                }
            }

            self.buffer.compact();
            if self.buffer.remaining() == 0 {
                // A full buffer always holds a valid frame or a header to skip.
                debug_assert!(false, "receive buffer full without a complete frame");
                return ReadOutcome::NoData;
            }

            match src.read(self.buffer.tail_mut()) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(n) => {
                    self.buffer.commit(n);
                    stalls = 0;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !have_len || stalls >= self.retry.max_attempts {
                        return ReadOutcome::NoData;
                    }
                    stalls += 1;
                    self.retry.wait();
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return ReadOutcome::Failed(FrameError::Socket(e)),
            }
        }
    }

    fn skip_byte(&mut self, len: u32) {
        if !self.resyncing {
            tracing::warn!(
                length = len,
                max = max_payload_size(self.buffer.capacity()),
                "invalid frame length, resynchronizing"
            );
            self.resyncing = true;
        }
        self.buffer.consume(1);
        self.skipped += 1;
    }

    /// The underlying receive buffer.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Total bytes discarded by resynchronization.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Largest payload this reader accepts.
    pub fn max_payload(&self) -> usize {
        max_payload_size(self.buffer.capacity())
    }
}

/// Copy a payload out of the receive buffer with a fallible allocation.
fn copy_payload(body: &[u8]) -> std::result::Result<Bytes, FrameError> {
    let mut out = Vec::new();
    out.try_reserve_exact(body.len())
        .map_err(|_| FrameError::AllocFailed(body.len()))?;
    out.extend_from_slice(body);
    Ok(Bytes::from(out))
}


#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedReader, Step};
    use super::*;
    use crate::protocol::{encode_frame, encode_length, DEFAULT_BUFFER_CAPACITY};

    fn reader() -> FrameReader {
        FrameReader::new(FrameBuffer::new(), RetryPolicy::immediate(3))
    }

    fn expect_message(outcome: ReadOutcome) -> Bytes {
        match outcome {
            ReadOutcome::Message(payload) => payload,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_single_complete_frame() {
        let mut frames = reader();
        let mut src = ScriptedReader::chunked(&encode_frame(b"hello").unwrap(), 64);

        let payload = expect_message(frames.read_frame(&mut src));
        assert_eq!(&payload[..], b"hello");
        assert!(frames.buffer().is_empty());
        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut frames = reader();
        let mut bytes = Vec::new();
        for word in [&b"first"[..], b"second", b"third"] {
            bytes.extend_from_slice(&encode_frame(word).unwrap());
        }
        let mut src = ScriptedReader::chunked(&bytes, bytes.len());

        assert_eq!(&expect_message(frames.read_frame(&mut src))[..], b"first");
        assert_eq!(&expect_message(frames.read_frame(&mut src))[..], b"second");
        assert_eq!(&expect_message(frames.read_frame(&mut src))[..], b"third");
        // Only the first call touched the socket.
        assert_eq!(src.reads, 1);
        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));
    }

    #[test]
    fn test_roundtrip_for_every_chunk_size() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(300).collect();
        let encoded = encode_frame(&payload).unwrap();

        for chunk in 1..=encoded.len() {
            let mut frames = reader();
            let mut src = ScriptedReader::chunked(&encoded, chunk);
            let got = expect_message(frames.read_frame(&mut src));
            assert_eq!(&got[..], &payload[..], "chunk size {}", chunk);
            assert!(frames.buffer().is_empty());
        }
    }

    #[test]
    fn test_roundtrip_across_would_block_pauses() {
        let payload = b"split across several readiness notifications";
        let encoded = encode_frame(payload).unwrap();
        let mut frames = FrameReader::new(FrameBuffer::new(), RetryPolicy::immediate(0));

        // Header arrives in two pieces, body in three, with stalls in between.
        let mut src = ScriptedReader::new(vec![
            Step::Data(encoded[..2].to_vec()),
            Step::WouldBlock,
        ]);
        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));

        for piece in [&encoded[2..10], &encoded[10..30], &encoded[30..]] {
            src.push(Step::Data(piece.to_vec()));
            src.push(Step::WouldBlock);
            if let ReadOutcome::Message(got) = frames.read_frame(&mut src) {
                assert_eq!(&got[..], payload);
                return;
            }
        }
        panic!("message was never reassembled");
    }

    #[test]
    fn test_maximum_payload_fits() {
        let capacity = 64;
        let payload = vec![0xAB; capacity - LENGTH_PREFIX_SIZE];
        let mut frames =
            FrameReader::new(FrameBuffer::with_capacity(capacity), RetryPolicy::immediate(3));
        let mut src = ScriptedReader::chunked(&encode_frame(&payload).unwrap(), 7);

        let got = expect_message(frames.read_frame(&mut src));
        assert_eq!(got.len(), capacity - LENGTH_PREFIX_SIZE);
    }

    #[test]
    fn test_no_data_leaves_cursors_unchanged() {
        let mut frames = reader();
        let mut src = ScriptedReader::new(vec![Step::Data(vec![0, 0, 0])]);

        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));
        let (pos, unread) = (frames.buffer().position(), frames.buffer().unread().to_vec());
        assert_eq!(unread, vec![0, 0, 0]);

        for _ in 0..3 {
            assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));
            assert_eq!(frames.buffer().position(), pos);
            assert_eq!(frames.buffer().unread(), &unread[..]);
        }
    }

    #[test]
    fn test_oversized_header_resyncs_to_next_message() {
        let mut bytes = encode_length(999_999).to_vec();
        bytes.extend_from_slice(&encode_frame(b"hello").unwrap());
        let mut frames = reader();
        let mut src = ScriptedReader::chunked(&bytes, bytes.len());

        let payload = expect_message(frames.read_frame(&mut src));
        assert_eq!(&payload[..], b"hello");
        assert_eq!(payload.len(), 5);
        assert_eq!(frames.skipped_bytes(), 4);
    }

    #[test]
    fn test_resync_consumes_corrupt_bytes_one_at_a_time() {
        // 0xFF bytes decode to lengths far above capacity at every offset.
        let mut bytes = vec![0xFF; 4];
        bytes.extend_from_slice(&encode_frame(b"ok").unwrap());
        let mut frames = reader();
        let mut src = ScriptedReader::chunked(&bytes, 1);

        let payload = expect_message(frames.read_frame(&mut src));
        assert_eq!(&payload[..], b"ok");
        assert_eq!(frames.skipped_bytes(), 4);
        assert!(frames.buffer().is_empty());
    }

    #[test]
    fn test_zero_length_header_is_skipped() {
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(&encode_frame(b"after").unwrap());
        let mut frames = reader();
        let mut src = ScriptedReader::chunked(&bytes, bytes.len());

        let payload = expect_message(frames.read_frame(&mut src));
        assert_eq!(&payload[..], b"after");
        assert_eq!(frames.skipped_bytes(), 4);
    }

    #[test]
    fn test_length_just_over_capacity_is_invalid() {
        let capacity = 32;
        let mut bytes = encode_length((capacity - LENGTH_PREFIX_SIZE + 1) as u32).to_vec();
        bytes.extend_from_slice(&encode_frame(b"x").unwrap());
        let mut frames =
            FrameReader::new(FrameBuffer::with_capacity(capacity), RetryPolicy::immediate(3));
        let mut src = ScriptedReader::chunked(&bytes, bytes.len());

        assert_eq!(&expect_message(frames.read_frame(&mut src))[..], b"x");
        assert_eq!(frames.skipped_bytes(), 4);
    }

    #[test]
    fn test_partial_body_retries_until_rest_arrives() {
        let encoded = encode_frame(b"patience").unwrap();
        let mut frames = FrameReader::new(FrameBuffer::new(), RetryPolicy::immediate(5));
        let mut src = ScriptedReader::new(vec![
            Step::Data(encoded[..6].to_vec()),
            Step::WouldBlock,
            Step::WouldBlock,
            Step::Data(encoded[6..].to_vec()),
        ]);

        let payload = expect_message(frames.read_frame(&mut src));
        assert_eq!(&payload[..], b"patience");
    }

    #[test]
    fn test_partial_body_gives_up_after_retry_budget() {
        let encoded = encode_frame(b"too slow").unwrap();
        let mut frames = FrameReader::new(FrameBuffer::new(), RetryPolicy::immediate(2));
        let mut src = ScriptedReader::new(vec![Step::Data(encoded[..6].to_vec())]);

        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));
        // One data read, then the initial stall plus two retries.
        assert_eq!(src.reads, 4);
        assert_eq!(frames.buffer().unread(), &encoded[..6]);

        src.push(Step::Data(encoded[6..].to_vec()));
        assert_eq!(&expect_message(frames.read_frame(&mut src))[..], b"too slow");
    }

    #[test]
    fn test_missing_header_returns_immediately() {
        let mut frames = FrameReader::new(FrameBuffer::new(), RetryPolicy::immediate(50));
        let mut src = ScriptedReader::new(vec![Step::Data(vec![0, 0])]);

        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::NoData));
        assert_eq!(src.reads, 2);
    }

    #[test]
    fn test_eof_reports_closed() {
        let mut frames = reader();
        let mut src = ScriptedReader::new(vec![Step::Eof]);
        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::Closed));
    }

    #[test]
    fn test_eof_mid_frame_reports_closed() {
        let encoded = encode_frame(b"cut off").unwrap();
        let mut frames = reader();
        let mut src = ScriptedReader::new(vec![Step::Data(encoded[..7].to_vec()), Step::Eof]);
        assert!(matches!(frames.read_frame(&mut src), ReadOutcome::Closed));
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let mut frames = reader();
        let mut src = ScriptedReader::new(vec![
            Step::Interrupted,
            Step::Data(encode_frame(b"again").unwrap().to_vec()),
        ]);
        assert_eq!(&expect_message(frames.read_frame(&mut src))[..], b"again");
    }

    #[test]
    fn test_socket_error_is_fatal() {
        let mut frames = reader();
        let mut src = ScriptedReader::new(vec![Step::Error(std::io::ErrorKind::ConnectionReset)]);
        match frames.read_frame(&mut src) {
            ReadOutcome::Failed(FrameError::Socket(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset)
            }
            other => panic!("expected socket failure, got {:?}", other),
        }
    }

    #[test]
    fn test_max_payload_accessor() {
        assert_eq!(reader().max_payload(), DEFAULT_BUFFER_CAPACITY - LENGTH_PREFIX_SIZE);
    }
}
