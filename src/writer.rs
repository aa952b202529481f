//! Outbound path: framing and writing messages on non-blocking sockets.
//!
//! TCP messages go out as one length-prefixed frame. The prefix and payload
//! are handed to the kernel together through scatter/gather I/O
//! (`write_vectored`), and a partial write resumes from the first unsent
//! byte:
//!
//! ```text
//! written = 2
//! ┌────┬────┬────┬────┬───────────────┐
//! │ 00 │ 00 │ 00 │ 05 │ h e l l o     │
//! └────┴────┴────┴────┴───────────────┘
//!            ▲ next slices: header[2..], payload
//! ```
//!
//! A socket that would block is retried according to the [`RetryPolicy`].
//! UDP messages go out as a single datagram.

use std::io::{self, IoSlice, Write};
use std::net::SocketAddr;

use mio::net::UdpSocket;
use tracing::{trace, warn};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::protocol::{encode_length, frame_length, LENGTH_PREFIX_SIZE};
use crate::transport::{Endpoint, Mode, Protocol, SocketKind};

/// Send `payload` over `endpoint` in `mode`.
///
/// `mode` must match both the endpoint's mode and its socket kind: TCP sends
/// need a connected stream and UDP sends need a datagram socket. `dest` is
/// required for UDP and ignored for TCP.
pub fn send(
    endpoint: &Endpoint,
    payload: &[u8],
    mode: Mode,
    dest: Option<SocketAddr>,
    retry: &RetryPolicy,
) -> Result<()> {
    check_mode(endpoint, mode)?;
    match mode.protocol {
        Protocol::Tcp => {
            let Some(stream) = endpoint.as_stream() else {
                return Err(mismatch(endpoint, mode));
            };
            let mut sink = stream;
            write_message(&mut sink, payload, retry)
        }
        Protocol::Udp => {
            let Some(socket) = endpoint.as_datagram() else {
                return Err(mismatch(endpoint, mode));
            };
            let dest = dest.ok_or(Error::MissingDestination)?;
            send_datagram(socket, payload, dest, retry)
        }
    }
}

fn check_mode(endpoint: &Endpoint, requested: Mode) -> Result<()> {
    let kind_fits = matches!(
        (requested.protocol, endpoint.kind()),
        (Protocol::Tcp, SocketKind::Stream) | (Protocol::Udp, SocketKind::Datagram)
    );
    if kind_fits && endpoint.mode() == requested {
        Ok(())
    } else {
        Err(mismatch(endpoint, requested))
    }
}

fn mismatch(endpoint: &Endpoint, requested: Mode) -> Error {
    Error::ModeMismatch {
        requested,
        actual: endpoint.mode(),
        kind: endpoint.kind(),
    }
}

/// Write one length-prefixed frame to `writer`, completing partial writes.
///
/// Empty payloads are rejected since a zero length prefix is never accepted
/// by a receiver.
///
/// A failure after part of the frame reached the socket returns
/// [`Error::SendAborted`]: the stream is then out of sync with the peer and
/// must be shut down by the caller.
pub fn write_message<W: Write + ?Sized>(
    writer: &mut W,
    payload: &[u8],
    retry: &RetryPolicy,
) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::EmptyMessage);
    }
    let len = frame_length(payload.len())?;

    let header = encode_length(len);
    let total = LENGTH_PREFIX_SIZE + payload.len();
    let mut written = 0;
    let mut stalls = 0;

    while written < total {
        let slices = remaining_slices(&header, payload, written);
        let err = match writer.write_vectored(&slices) {
            Ok(0) => io::Error::new(io::ErrorKind::WriteZero, "write_vectored returned 0"),
            Ok(n) => {
                written += n;
                stalls = 0;
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && stalls < retry.max_attempts => {
                stalls += 1;
                retry.wait();
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => e,
        };

        if written == 0 {
            return Err(err.into());
        }
        warn!(written, total, error = %err, "frame cut short, stream out of sync");
        return Err(Error::SendAborted { written, total });
    }

    trace!(len = payload.len(), "frame written");
    Ok(())
}

/// IoSlices covering the frame bytes after the first `skip`.
fn remaining_slices<'a>(
    header: &'a [u8; LENGTH_PREFIX_SIZE],
    payload: &'a [u8],
    skip: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);
    if skip < LENGTH_PREFIX_SIZE {
        slices.push(IoSlice::new(&header[skip..]));
        slices.push(IoSlice::new(payload));
    } else {
        slices.push(IoSlice::new(&payload[skip - LENGTH_PREFIX_SIZE..]));
    }
    slices
}

/// Send `payload` as one datagram to `dest`.
pub(crate) fn send_datagram(
    socket: &UdpSocket,
    payload: &[u8],
    dest: SocketAddr,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut stalls = 0;
    loop {
        match socket.send_to(payload, dest) {
            Ok(n) if n == payload.len() => {
                trace!(len = n, %dest, "datagram sent");
                return Ok(());
            }
            Ok(n) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("datagram truncated: sent {} of {} bytes", n, payload.len()),
                )
                .into());
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if stalls >= retry.max_attempts {
                    return Err(e.into());
                }
                stalls += 1;
                retry.wait();
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}
