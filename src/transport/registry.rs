//! Accepted TCP connections and their receive state.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;

use mio::{Interest, Registry};
use tracing::{debug, trace};

use super::endpoint::Endpoint;
use super::mode::Mode;
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::event::ConnectionId;
use crate::protocol::{FrameReader, ReadOutcome};

/// An accepted TCP peer with its framing state.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    endpoint: Endpoint,
    reader: FrameReader,
}

impl Connection {
    /// Connection id.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.endpoint
            .peer_addr()
            .unwrap_or_else(|| self.endpoint.local_addr())
    }

    /// Mode inherited from the listener.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.endpoint.mode()
    }

    /// Underlying socket.
    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bytes discarded while resynchronizing on this connection.
    #[inline]
    pub fn skipped_bytes(&self) -> u64 {
        self.reader.skipped_bytes()
    }

    /// Run the framing state machine once against the socket.
    pub(crate) fn read_frame(&mut self) -> ReadOutcome {
        match self.endpoint.as_stream() {
            Some(stream) => {
                let mut src = stream;
                self.reader.read_frame(&mut src)
            }
            None => ReadOutcome::Failed(
                io::Error::new(io::ErrorKind::InvalidInput, "connection has no stream").into(),
            ),
        }
    }
}

/// Result of one [`ConnectionRegistry::accept`] attempt.
#[derive(Debug)]
pub enum AcceptOutcome<'a> {
    /// A peer was accepted and registered.
    Accepted(&'a Connection),
    /// A peer was taken off the queue but could not be set up. Its stream
    /// has been dropped; other pending peers are unaffected.
    Rejected {
        /// Peer address.
        addr: SocketAddr,
        /// Why setup failed.
        error: Error,
    },
    /// No peer is waiting.
    Empty,
}

/// Ordered collection of live connections.
///
/// Removal swaps the last connection into the vacated slot, so order is not
/// stable across removals. `registered` mirrors the ids currently registered
/// with the readiness poller.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
    registered: HashSet<ConnectionId>,
    next_id: usize,
    buffer_capacity: usize,
    retry: RetryPolicy,
}

impl ConnectionRegistry {
    /// Create an empty registry; new connections get buffers of
    /// `buffer_capacity` bytes.
    pub fn new(buffer_capacity: usize, retry: RetryPolicy) -> Self {
        Self {
            connections: Vec::new(),
            registered: HashSet::new(),
            // 0 is ConnectionId::LOCAL
            next_id: 1,
            buffer_capacity,
            retry,
        }
    }

    /// Accept one pending peer from `listener` and register it for
    /// readability.
    ///
    /// Errors are reserved for the listener itself. A failure to set up one
    /// accepted peer is reported as [`AcceptOutcome::Rejected`].
    pub fn accept(
        &mut self,
        listener: &Endpoint,
        registry: &Registry,
    ) -> Result<AcceptOutcome<'_>> {
        let Some(tcp) = listener.as_listener() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "accept requires a TCP listener",
            )
            .into());
        };

        let (stream, peer) = loop {
            match tcp.accept() {
                Ok(pair) => break pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(AcceptOutcome::Empty)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        // On failure the stream is dropped, which closes it.
        match self.admit(stream, peer, listener.mode(), registry) {
            Ok(()) => Ok(self
                .connections
                .last()
                .map_or(AcceptOutcome::Empty, AcceptOutcome::Accepted)),
            Err(error) => Ok(AcceptOutcome::Rejected { addr: peer, error }),
        }
    }

    fn admit(
        &mut self,
        stream: mio::net::TcpStream,
        peer: SocketAddr,
        mode: Mode,
        registry: &Registry,
    ) -> Result<()> {
        let reader = FrameReader::with_capacity(self.buffer_capacity, self.retry)?;
        let mut endpoint = Endpoint::accepted(stream, peer, mode)?;
        let id = ConnectionId::new(self.next_id);
        registry.register(&mut endpoint, id.token(), Interest::READABLE)?;
        self.next_id += 1;
        self.registered.insert(id);

        trace!(%id, %peer, "registered connection");
        self.connections.push(Connection {
            id,
            endpoint,
            reader,
        });
        Ok(())
    }

    /// Remove the connection at `index`, deregistering it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize, registry: &Registry) -> Connection {
        let mut conn = self.connections.swap_remove(index);
        if let Err(e) = registry.deregister(&mut conn.endpoint) {
            debug!(id = %conn.id, error = %e, "deregister failed");
        }
        self.registered.remove(&conn.id);
        conn
    }

    /// Remove the connection with `id`, if present.
    pub fn remove_by_id(&mut self, id: ConnectionId, registry: &Registry) -> Option<Connection> {
        let index = self.position(id)?;
        Some(self.remove(index, registry))
    }

    /// Index of the connection with `id`.
    pub fn position(&self, id: ConnectionId) -> Option<usize> {
        self.connections.iter().position(|c| c.id == id)
    }

    /// Look up a connection.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Look up a connection mutably.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn get_index_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.connections.get_mut(index)
    }

    /// Iterate connections in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Ids of all live connections.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().map(|c| c.id)
    }

    /// Whether `id` is registered with the poller.
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registered.contains(&id)
    }

    /// Number of live connections.
    #[inline]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use mio::Poll;

    fn listener() -> Endpoint {
        Endpoint::listen("127.0.0.1:0".parse().unwrap(), Mode::TCP_V4).unwrap()
    }

    /// Accept one peer, retrying until the kernel has queued it.
    fn accept_one(
        connections: &mut ConnectionRegistry,
        listener: &Endpoint,
        poll: &Poll,
    ) -> ConnectionId {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let AcceptOutcome::Accepted(conn) =
                connections.accept(listener, poll.registry()).unwrap()
            {
                return conn.id();
            }
            assert!(Instant::now() < deadline, "peer never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_accept_assigns_increasing_ids() {
        let poll = Poll::new().unwrap();
        let listener = listener();
        let mut connections = ConnectionRegistry::new(64, RetryPolicy::default());

        let _a = std::net::TcpStream::connect(listener.local_addr()).unwrap();
        let _b = std::net::TcpStream::connect(listener.local_addr()).unwrap();

        let first = accept_one(&mut connections, &listener, &poll);
        let second = accept_one(&mut connections, &listener, &poll);

        assert_eq!(first.as_usize(), 1);
        assert_eq!(second.as_usize(), 2);
        assert_eq!(connections.len(), 2);
        assert!(connections.is_registered(first));
        assert_eq!(connections.get(second).unwrap().mode(), Mode::TCP_V4);
    }

    #[test]
    fn test_accept_without_peer() {
        let poll = Poll::new().unwrap();
        let listener = listener();
        let mut connections = ConnectionRegistry::new(64, RetryPolicy::default());

        assert!(matches!(
            connections.accept(&listener, poll.registry()).unwrap(),
            AcceptOutcome::Empty
        ));
        assert!(connections.is_empty());
    }

    #[test]
    fn test_failed_setup_rejects_peer_and_continues() {
        use std::io::Read;

        let poll = Poll::new().unwrap();
        let listener = listener();
        // No buffer of this size can be allocated.
        let mut connections = ConnectionRegistry::new(usize::MAX, RetryPolicy::default());

        let mut a = std::net::TcpStream::connect(listener.local_addr()).unwrap();
        let mut b = std::net::TcpStream::connect(listener.local_addr()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut rejected = Vec::new();
        while rejected.len() < 2 {
            match connections.accept(&listener, poll.registry()).unwrap() {
                AcceptOutcome::Rejected { addr, error } => {
                    assert!(matches!(error, Error::AllocFailed(_)));
                    rejected.push(addr);
                }
                AcceptOutcome::Accepted(conn) => panic!("unexpected accept: {:?}", conn),
                AcceptOutcome::Empty => {
                    assert!(Instant::now() < deadline, "peers never arrived");
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }

        assert!(rejected.contains(&a.local_addr().unwrap()));
        assert!(rejected.contains(&b.local_addr().unwrap()));
        assert!(connections.is_empty());

        for peer in [&mut a, &mut b] {
            peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut buf = [0u8; 1];
            assert_eq!(peer.read(&mut buf).unwrap(), 0);
        }
    }

    #[test]
    fn test_remove_swaps_last_into_slot() {
        let poll = Poll::new().unwrap();
        let listener = listener();
        let mut connections = ConnectionRegistry::new(64, RetryPolicy::default());

        let _peers: Vec<_> = (0..3)
            .map(|_| std::net::TcpStream::connect(listener.local_addr()).unwrap())
            .collect();
        let ids: Vec<_> = (0..3)
            .map(|_| accept_one(&mut connections, &listener, &poll))
            .collect();

        let removed = connections.remove(0, poll.registry());
        assert_eq!(removed.id(), ids[0]);
        assert!(!connections.is_registered(ids[0]));

        let order: Vec<_> = connections.ids().collect();
        assert_eq!(order, vec![ids[2], ids[1]]);
        assert_eq!(connections.position(ids[1]), Some(1));
    }

    #[test]
    fn test_remove_by_id() {
        let poll = Poll::new().unwrap();
        let listener = listener();
        let mut connections = ConnectionRegistry::new(64, RetryPolicy::default());

        let _peer = std::net::TcpStream::connect(listener.local_addr()).unwrap();
        let id = accept_one(&mut connections, &listener, &poll);
        assert_eq!(connections.get_mut(id).map(|c| c.skipped_bytes()), Some(0));

        assert!(connections.remove_by_id(id, poll.registry()).is_some());
        assert!(connections.remove_by_id(id, poll.registry()).is_none());
        assert!(connections.get(id).is_none());
    }

    #[test]
    fn test_accept_rejects_non_listener() {
        let poll = Poll::new().unwrap();
        let udp = Endpoint::listen("127.0.0.1:0".parse().unwrap(), Mode::UDP_V4).unwrap();
        let mut connections = ConnectionRegistry::new(64, RetryPolicy::default());

        assert!(connections.accept(&udp, poll.registry()).is_err());
    }
}
