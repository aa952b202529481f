//! Server builder and poll loop.
//!
//! A [`Server`] owns one listening socket (TCP) or one datagram socket (UDP)
//! plus, for TCP, every accepted connection. All sockets are registered with a
//! single readiness poller and nothing runs in the background: the caller
//! drives the server by calling [`Server::poll`] repeatedly and handling the
//! returned events.
//!
//! # Example
//!
//! ```no_run
//! use sockwire::{Event, Mode, Server};
//!
//! fn main() -> sockwire::Result<()> {
//!     let mut server = Server::bind("127.0.0.1", 25565, Mode::TCP_V4)?;
//!     loop {
//!         for event in server.poll() {
//!             if let Event::DataReceived { id, payload, .. } = event {
//!                 server.send(id, &payload)?;
//!             }
//!         }
//!     }
//! }
//! ```

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use mio::{Events, Interest, Poll};
use tracing::{debug, info, trace, warn};

use crate::config::{RetryPolicy, SocketConfig};
use crate::error::{Error, Result};
use crate::event::{ConnectionId, Event};
use crate::protocol::ReadOutcome;
use crate::transport::{
    AcceptOutcome, Connection, ConnectionRegistry, Endpoint, Mode, Protocol,
};
use crate::writer;

/// Builder for configuring and binding a [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: SocketConfig,
}

impl ServerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-connection receive buffer capacity.
    ///
    /// The largest accepted message is `capacity - 4` bytes.
    /// Default: 8192
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Set how long a poll pass waits for readiness.
    /// Default: 20ms
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Set the readiness event capacity per pass.
    /// Default: 256
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Set how many frames one connection may yield per pass.
    /// Default: 1
    pub fn max_frames_per_pass(mut self, frames: usize) -> Self {
        self.config.max_frames_per_pass = frames;
        self
    }

    /// Set the retry policy for partial frames and full send buffers.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Bind to `address:port` and start listening.
    pub fn bind(self, address: &str, port: u16, mode: Mode) -> Result<Server> {
        let addr = mode.socket_addr(address, port)?;
        Server::open(addr, mode, self.config)
    }
}

/// Listening endpoint plus its accepted connections.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: Endpoint,
    connections: ConnectionRegistry,
    config: SocketConfig,
    /// Receive buffer for datagrams.
    scratch: Vec<u8>,
    /// The datagram socket may still hold unread datagrams.
    datagram_backlog: bool,
    /// The last accept failed at the listener; retry without new readiness.
    accept_backlog: bool,
    /// Connections that hit the per-pass frame limit before draining.
    carry_over: HashSet<ConnectionId>,
}

impl Server {
    /// Create a builder for configuring a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind with the default configuration.
    pub fn bind(address: &str, port: u16, mode: Mode) -> Result<Self> {
        ServerBuilder::new().bind(address, port, mode)
    }

    fn open(addr: SocketAddr, mode: Mode, config: SocketConfig) -> Result<Self> {
        config.validate()?;

        let poll = Poll::new()?;
        let mut listener = Endpoint::listen(addr, mode)?;
        poll.registry().register(
            &mut listener,
            ConnectionId::LOCAL.token(),
            Interest::READABLE,
        )?;

        let scratch = match mode.protocol {
            // One spare byte exposes datagrams longer than the limit.
            Protocol::Udp => datagram_buffer(config.max_datagram() + 1)?,
            Protocol::Tcp => Vec::new(),
        };

        info!(addr = %listener.local_addr(), %mode, "server listening");
        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            connections: ConnectionRegistry::new(config.buffer_capacity, config.retry),
            listener,
            config,
            scratch,
            datagram_backlog: false,
            accept_backlog: false,
            carry_over: HashSet::new(),
        })
    }

    /// Run one poll pass and return what happened, in order.
    ///
    /// Waits up to the configured poll timeout for readiness. TCP passes
    /// accept every pending peer, then read up to `max_frames_per_pass`
    /// messages from each readable connection. A connection cut off by that
    /// limit is read again on the next pass, which then does not wait. UDP
    /// passes receive at most one datagram. Failures of the readiness wait
    /// itself are logged and yield an empty batch.
    pub fn poll(&mut self) -> Vec<Event> {
        let mut batch = Vec::new();

        let timeout = if self.datagram_backlog || !self.carry_over.is_empty() {
            Duration::ZERO
        } else {
            self.config.poll_timeout
        };
        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() != ErrorKind::Interrupted {
                warn!(error = %e, "readiness poll failed");
            }
            return batch;
        }

        let mut listener_ready = self.datagram_backlog || self.accept_backlog;
        let mut ready: HashSet<ConnectionId> = self.carry_over.drain().collect();
        for event in self.events.iter() {
            let id = ConnectionId::from_token(event.token());
            if id == ConnectionId::LOCAL {
                listener_ready = true;
            } else {
                ready.insert(id);
            }
        }

        if listener_ready {
            match self.listener.mode().protocol {
                Protocol::Tcp => self.accept_pending(&mut batch),
                Protocol::Udp => self.receive_datagram(&mut batch),
            }
        }
        if !ready.is_empty() {
            self.read_connections(&ready, &mut batch);
        }

        batch
    }

    fn accept_pending(&mut self, batch: &mut Vec<Event>) {
        self.accept_backlog = false;
        loop {
            match self.connections.accept(&self.listener, self.poll.registry()) {
                Ok(AcceptOutcome::Accepted(conn)) => {
                    debug!(id = %conn.id(), addr = %conn.addr(), "accepted connection");
                    batch.push(Event::Connection {
                        id: conn.id(),
                        addr: conn.addr(),
                    });
                }
                Ok(AcceptOutcome::Rejected { addr, error }) => {
                    warn!(%addr, %error, "rejected connection");
                }
                Ok(AcceptOutcome::Empty) => return,
                Err(e) => {
                    // Pending peers stay queued; try again next pass.
                    warn!(error = %e, "accept failed");
                    self.accept_backlog = true;
                    return;
                }
            }
        }
    }

    fn receive_datagram(&mut self, batch: &mut Vec<Event>) {
        let Some(socket) = self.listener.as_datagram() else {
            return;
        };
        match socket.recv_from(&mut self.scratch) {
            Ok((n, addr)) => {
                self.datagram_backlog = true;
                if n == 0 {
                    trace!(%addr, "ignoring empty datagram");
                    return;
                }
                let max = self.config.max_datagram();
                if n > max {
                    warn!(%addr, max, "dropping oversized datagram");
                    return;
                }
                trace!(len = n, %addr, "datagram received");
                batch.push(Event::DataReceived {
                    id: ConnectionId::LOCAL,
                    addr,
                    payload: Bytes::copy_from_slice(&self.scratch[..n]),
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.datagram_backlog = false,
            Err(e) if e.kind() == ErrorKind::Interrupted => self.datagram_backlog = true,
            Err(e) => {
                warn!(error = %e, "datagram receive failed");
                self.datagram_backlog = false;
            }
        }
    }

    fn read_connections(&mut self, ready: &HashSet<ConnectionId>, batch: &mut Vec<Event>) {
        let mut index = 0;
        while let Some(conn) = self.connections.get_index_mut(index) {
            if !ready.contains(&conn.id()) {
                index += 1;
                continue;
            }

            let (id, addr) = (conn.id(), conn.addr());
            let mut frames = 0;
            let closed = loop {
                if frames == self.config.max_frames_per_pass {
                    self.carry_over.insert(id);
                    break false;
                }
                match conn.read_frame() {
                    ReadOutcome::Message(payload) => {
                        trace!(%id, len = payload.len(), "message received");
                        batch.push(Event::DataReceived { id, addr, payload });
                        frames += 1;
                    }
                    ReadOutcome::NoData => break false,
                    ReadOutcome::Closed => {
                        debug!(%id, %addr, "peer closed connection");
                        break true;
                    }
                    ReadOutcome::Failed(e) => {
                        warn!(%id, %addr, error = %e, "dropping connection");
                        break true;
                    }
                }
            };

            if closed {
                batch.push(Event::Disconnection { id, addr });
                // The last connection now occupies `index`; examine it next.
                self.connections.remove(index, self.poll.registry());
            } else {
                index += 1;
            }
        }
    }

    /// Send one framed message to connection `id`.
    ///
    /// If the frame is cut short after part of it was written, the connection
    /// is shut down and removed without an event, and
    /// [`Error::SendAborted`] is returned.
    pub fn send(&mut self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        let conn = self
            .connections
            .get(id)
            .ok_or(Error::UnknownConnection(id))?;
        let max = self.config.max_payload();
        if payload.len() > max {
            return Err(Error::MessageTooLarge {
                len: payload.len(),
                max,
            });
        }
        let result = writer::send(
            conn.endpoint(),
            payload,
            conn.mode(),
            None,
            &self.config.retry,
        );
        if let Err(Error::SendAborted { .. }) = result {
            if let Some(conn) = self.connections.remove_by_id(id, self.poll.registry()) {
                conn.endpoint().shutdown();
                warn!(%id, addr = %conn.addr(), "connection closed after aborted send");
            }
            self.carry_over.remove(&id);
        }
        result
    }

    /// Send one datagram from the server socket to `dest` (UDP servers).
    ///
    /// Datagrams longer than the receive limit are rejected, since a peer
    /// using the same configuration would drop them.
    pub fn send_to(&self, dest: SocketAddr, payload: &[u8]) -> Result<()> {
        if !self.listener.mode().is_tcp() {
            let max = self.config.max_datagram();
            if payload.len() > max {
                return Err(Error::MessageTooLarge {
                    len: payload.len(),
                    max,
                });
            }
        }
        writer::send(
            &self.listener,
            payload,
            self.listener.mode(),
            Some(dest),
            &self.config.retry,
        )
    }

    /// Send `payload` to every connection except `skip`.
    ///
    /// Returns the number of connections reached. Failed sends are logged
    /// and skipped.
    pub fn broadcast(&mut self, payload: &[u8], skip: Option<ConnectionId>) -> usize {
        let ids: Vec<_> = self.connections.ids().collect();
        let mut reached = 0;
        for id in ids {
            if Some(id) == skip {
                continue;
            }
            match self.send(id, payload) {
                Ok(()) => reached += 1,
                Err(e) => warn!(%id, error = %e, "broadcast send failed"),
            }
        }
        reached
    }

    /// Close and remove connection `id`. No event is emitted.
    ///
    /// Returns `false` if the id is unknown.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.carry_over.remove(&id);
        match self.connections.remove_by_id(id, self.poll.registry()) {
            Some(conn) => {
                conn.endpoint().shutdown();
                debug!(%id, addr = %conn.addr(), "disconnected");
                true
            }
            None => false,
        }
    }

    /// Live connections in registry order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Look up a live connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Mode the server was bound in.
    pub fn mode(&self) -> Mode {
        self.listener.mode()
    }

    /// The listening or datagram socket.
    pub fn endpoint(&self) -> &Endpoint {
        &self.listener
    }

    /// Active configuration.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Close every connection and the listening socket.
    pub fn close(mut self) {
        let registry = self.poll.registry();
        while !self.connections.is_empty() {
            let conn = self.connections.remove(0, registry);
            conn.endpoint().shutdown();
        }
        info!(addr = %self.listener.local_addr(), "server closed");
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("connections", &self.connections.len())
            .field("datagram_backlog", &self.datagram_backlog)
            .field("accept_backlog", &self.accept_backlog)
            .field("carry_over", &self.carry_over.len())
            .finish()
    }
}

/// Zeroed datagram receive buffer, reporting allocation failure.
pub(crate) fn datagram_buffer(size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| Error::AllocFailed(size))?;
    buf.resize(size, 0);
    Ok(buf)
}
