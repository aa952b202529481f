//! Error types for sockwire.

use std::net::SocketAddr;

use thiserror::Error;

use crate::event::ConnectionId;
use crate::transport::{IpVersion, Mode, SocketKind};

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The address string is not a valid IP address.
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// The address does not belong to the requested IP version.
    #[error("Address {address} is not an {expected} address")]
    AddressFamily {
        /// Address that was supplied.
        address: String,
        /// IP version requested by the mode.
        expected: IpVersion,
    },

    /// The requested send mode does not match the endpoint's socket.
    #[error("Cannot send in {requested} mode on a {kind} socket opened as {actual}")]
    ModeMismatch {
        /// Mode requested by the caller.
        requested: Mode,
        /// Mode the endpoint was opened with.
        actual: Mode,
        /// Kind of the underlying socket.
        kind: SocketKind,
    },

    /// UDP sends need an explicit destination.
    #[error("UDP send requires a destination address")]
    MissingDestination,

    /// A zero-length TCP message cannot be framed.
    #[error("Cannot send an empty TCP message")]
    EmptyMessage,

    /// Payload exceeds the framing limit.
    #[error("Message size {len} exceeds maximum {max}")]
    MessageTooLarge {
        /// Payload length.
        len: usize,
        /// Maximum accepted payload length.
        max: usize,
    },

    /// A frame was cut short after part of it reached the socket.
    ///
    /// The stream can no longer be framed and the connection is closed.
    #[error("Send aborted after {written} of {total} frame bytes")]
    SendAborted {
        /// Frame bytes handed to the kernel.
        written: usize,
        /// Full frame length including the prefix.
        total: usize,
    },

    /// Not enough tail space left in a receive buffer.
    #[error("Receive buffer full: need {needed} bytes, {available} available")]
    BufferFull {
        /// Bytes the caller tried to append.
        needed: usize,
        /// Free bytes at the tail.
        available: usize,
    },

    /// Memory allocation failed.
    #[error("Allocation of {0} bytes failed")]
    AllocFailed(usize),

    /// No live connection has this id.
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The peer closed the connection.
    #[error("Connection to {0} closed")]
    ConnectionClosed(SocketAddr),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Domain-name resolution failed.
    #[error("Failed to resolve {0}")]
    Resolve(String),
}

/// Result type alias using sockwire's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
