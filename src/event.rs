//! Events produced by a poll pass.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use mio::Token;

/// Stable identifier of a socket owned by a server or client.
///
/// Ids are assigned on accept and never reused by the same server, so an id
/// held past a disconnect simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// The role's own socket: a server's listening/datagram socket or a
    /// client's socket.
    pub const LOCAL: ConnectionId = ConnectionId(0);

    pub(crate) fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub fn as_usize(self) -> usize {
        self.0
    }

    pub(crate) fn token(self) -> Token {
        Token(self.0)
    }

    pub(crate) fn from_token(token: Token) -> Self {
        Self(token.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something that happened on a socket during a poll pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A TCP peer was accepted.
    Connection {
        /// Id of the new connection.
        id: ConnectionId,
        /// Peer address.
        addr: SocketAddr,
    },
    /// A complete message (TCP) or datagram (UDP) arrived.
    DataReceived {
        /// Connection that received it, or [`ConnectionId::LOCAL`] for
        /// datagrams and client sockets.
        id: ConnectionId,
        /// Sender address.
        addr: SocketAddr,
        /// Message payload; its length is the message length.
        payload: Bytes,
    },
    /// A TCP peer closed or failed and was removed.
    Disconnection {
        /// Id of the removed connection.
        id: ConnectionId,
        /// Peer address.
        addr: SocketAddr,
    },
}

impl Event {
    /// Socket the event belongs to.
    pub fn id(&self) -> ConnectionId {
        match self {
            Event::Connection { id, .. }
            | Event::DataReceived { id, .. }
            | Event::Disconnection { id, .. } => *id,
        }
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        match self {
            Event::Connection { addr, .. }
            | Event::DataReceived { addr, .. }
            | Event::Disconnection { addr, .. } => *addr,
        }
    }

    /// Payload of a `DataReceived` event.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Event::DataReceived { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let event = Event::DataReceived {
            id: ConnectionId::new(3),
            addr,
            payload: Bytes::from_static(b"hello"),
        };

        assert_eq!(event.id(), ConnectionId::new(3));
        assert_eq!(event.addr(), addr);
        assert_eq!(event.payload().map(|p| p.len()), Some(5));

        let gone = Event::Disconnection {
            id: ConnectionId::new(3),
            addr,
        };
        assert!(gone.payload().is_none());
    }

    #[test]
    fn test_token_roundtrip() {
        let id = ConnectionId::new(42);
        assert_eq!(ConnectionId::from_token(id.token()), id);
        assert_eq!(ConnectionId::LOCAL.token(), Token(0));
        assert_eq!(id.to_string(), "#42");
    }
}
