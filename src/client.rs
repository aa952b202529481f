//! Client builder and poll loop.
//!
//! A [`Client`] owns a single socket towards a server. TCP clients connect
//! on creation and receive length-prefixed messages; UDP clients bind an
//! ephemeral port and exchange datagrams with the server address.
//!
//! # Example
//!
//! ```no_run
//! use sockwire::{Client, Event, Mode};
//!
//! fn main() -> sockwire::Result<()> {
//!     let mut client = Client::connect("127.0.0.1", 25565, Mode::TCP_V4)?;
//!     client.send(b"hello")?;
//!
//!     while !client.is_closed() {
//!         for event in client.poll() {
//!             if let Event::DataReceived { payload, .. } = event {
//!                 println!("{}", String::from_utf8_lossy(&payload));
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use mio::{Events, Interest, Poll};
use tracing::{debug, info, trace, warn};

use crate::config::{RetryPolicy, SocketConfig};
use crate::error::{Error, Result};
use crate::event::{ConnectionId, Event};
use crate::protocol::{FrameReader, ReadOutcome};
use crate::server::datagram_buffer;
use crate::transport::{Endpoint, Mode, Protocol};
use crate::writer;

/// Builder for configuring and connecting a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: SocketConfig,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the receive buffer capacity.
    /// Default: 8192
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    /// Set how long each readiness wait lasts.
    /// Default: 20ms
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Set the TCP connect timeout.
    /// Default: 5s
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the maximum readiness waits per poll pass.
    /// Default: 64
    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.config.max_client_rounds = rounds;
        self
    }

    /// Set how many messages one round may read before polling again.
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

    /// Open the client socket towards `address:port`.
    pub fn connect(self, address: &str, port: u16, mode: Mode) -> Result<Client> {
        let addr = mode.socket_addr(address, port)?;
        Client::open(addr, mode, self.config)
    }
}

/// Single-socket client.
pub struct Client {
    poll: Poll,
    events: Events,
    endpoint: Endpoint,
    server_addr: SocketAddr,
    config: SocketConfig,
    /// Framing state (TCP).
    reader: Option<FrameReader>,
    /// Datagram receive buffer (UDP).
    scratch: Vec<u8>,
    /// The last round stopped at the frame limit with input possibly left.
    pending: bool,
    closed: bool,
}

impl Client {
    /// Create a builder for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with the default configuration.
    pub fn connect(address: &str, port: u16, mode: Mode) -> Result<Self> {
        ClientBuilder::new().connect(address, port, mode)
    }

    fn open(server_addr: SocketAddr, mode: Mode, config: SocketConfig) -> Result<Self> {
        config.validate()?;

        let poll = Poll::new()?;
        let mut endpoint = Endpoint::connect(server_addr, mode, config.connect_timeout)?;
        poll.registry().register(
            &mut endpoint,
            ConnectionId::LOCAL.token(),
            Interest::READABLE,
        )?;

        let (reader, scratch) = match mode.protocol {
            Protocol::Tcp => (
                Some(FrameReader::with_capacity(config.buffer_capacity, config.retry)?),
                Vec::new(),
            ),
            // One spare byte exposes datagrams longer than the limit.
            Protocol::Udp => (None, datagram_buffer(config.max_datagram() + 1)?),
        };

        info!(server = %server_addr, local = %endpoint.local_addr(), %mode, "client ready");
        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            endpoint,
            server_addr,
            config,
            reader,
            scratch,
            pending: false,
            closed: false,
        })
    }

    /// Run one poll pass and return what happened, in order.
    ///
    /// Each round waits for readiness and reads up to `max_frames_per_pass`
    /// messages, repeating up to the configured number of rounds while input
    /// keeps arriving. A round cut off by the frame limit makes the next one
    /// skip the wait. A TCP peer close yields one `Disconnection` and closes
    /// the client; later passes return nothing.
    pub fn poll(&mut self) -> Vec<Event> {
        let mut batch = Vec::new();

        for _ in 0..self.config.max_client_rounds {
            if self.closed {
                break;
            }
            let timeout = if self.pending {
                Duration::ZERO
            } else {
                self.config.poll_timeout
            };
            if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
                if e.kind() != ErrorKind::Interrupted {
                    warn!(error = %e, "readiness poll failed");
                }
                break;
            }
            if self.events.is_empty() && !self.pending {
                break;
            }

            match self.endpoint.mode().protocol {
                Protocol::Tcp => self.read_stream(&mut batch),
                Protocol::Udp => self.read_datagrams(&mut batch),
            }
        }

        batch
    }

    fn read_stream(&mut self, batch: &mut Vec<Event>) {
        let (Some(reader), Some(stream)) = (self.reader.as_mut(), self.endpoint.as_stream()) else {
            return;
        };
        let addr = self.server_addr;
        self.pending = false;

        let mut frames = 0;
        let closed = loop {
            if frames == self.config.max_frames_per_pass {
                self.pending = true;
                break false;
            }
            let mut src = stream;
            match reader.read_frame(&mut src) {
                ReadOutcome::Message(payload) => {
                    trace!(len = payload.len(), "message received");
                    batch.push(Event::DataReceived {
                        id: ConnectionId::LOCAL,
                        addr,
                        payload,
                    });
                    frames += 1;
                }
                ReadOutcome::NoData => break false,
                ReadOutcome::Closed => {
                    debug!(%addr, "server closed connection");
                    break true;
                }
                ReadOutcome::Failed(e) => {
                    warn!(%addr, error = %e, "connection failed");
                    break true;
                }
            }
        };

        if closed {
            batch.push(Event::Disconnection {
                id: ConnectionId::LOCAL,
                addr,
            });
            self.shut_down();
        }
    }

    fn read_datagrams(&mut self, batch: &mut Vec<Event>) {
        let Some(socket) = self.endpoint.as_datagram() else {
            return;
        };
        let max = self.config.max_datagram();
        self.pending = false;

        let mut frames = 0;
        loop {
            if frames == self.config.max_frames_per_pass {
                self.pending = true;
                return;
            }
            match socket.recv_from(&mut self.scratch) {
                Ok((0, _)) => {}
                Ok((n, addr)) if n > max => {
                    warn!(%addr, max, "dropping oversized datagram");
                }
                Ok((n, addr)) => {
                    trace!(len = n, %addr, "datagram received");
                    batch.push(Event::DataReceived {
                        id: ConnectionId::LOCAL,
                        addr,
                        payload: Bytes::copy_from_slice(&self.scratch[..n]),
                    });
                    frames += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "datagram receive failed");
                    return;
                }
            }
        }
    }

    fn shut_down(&mut self) {
        self.closed = true;
        self.endpoint.shutdown();
        if let Err(e) = self.poll.registry().deregister(&mut self.endpoint) {
            debug!(error = %e, "deregister failed");
        }
    }

    /// Send one message to the server.
    ///
    /// TCP messages are framed and limited to the buffer's max payload; UDP
    /// messages go out as one datagram no longer than the datagram limit. A
    /// TCP frame cut short after partly going out closes the client and
    /// returns [`Error::SendAborted`].
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed(self.server_addr));
        }
        let mode = self.endpoint.mode();
        let max = match mode.protocol {
            Protocol::Tcp => self.config.max_payload(),
            Protocol::Udp => self.config.max_datagram(),
        };
        if payload.len() > max {
            return Err(Error::MessageTooLarge {
                len: payload.len(),
                max,
            });
        }
        let result = writer::send(
            &self.endpoint,
            payload,
            mode,
            Some(self.server_addr),
            &self.config.retry,
        );
        if let Err(Error::SendAborted { .. }) = result {
            warn!(server = %self.server_addr, "closing client after aborted send");
            self.shut_down();
        }
        result
    }

    /// Whether the server closed the connection.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Server address.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Local bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Mode the client was opened in.
    pub fn mode(&self) -> Mode {
        self.endpoint.mode()
    }

    /// The client socket.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Close the socket.
    pub fn close(mut self) {
        if !self.closed {
            self.shut_down();
        }
        info!(server = %self.server_addr, "client closed");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("server_addr", &self.server_addr)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn poll_until<F>(client: &mut Client, mut done: F) -> Vec<Event>
    where
        F: FnMut(&[Event]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(client.poll());
            if done(&seen) {
                break;
            }
        }
        seen
    }

    #[test]
    fn test_builder_overrides() {
        let builder = Client::builder()
            .buffer_capacity(512)
            .connect_timeout(Duration::from_millis(200))
            .max_rounds(4);

        assert_eq!(builder.config.buffer_capacity, 512);
        assert_eq!(builder.config.connect_timeout, Duration::from_millis(200));
        assert_eq!(builder.config.max_client_rounds, 4);
    }

    #[test]
    fn test_tcp_send_and_receive() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = Client::connect("127.0.0.1", port, Mode::TCP_V4).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        client.send(b"hi").unwrap();
        let mut frame = [0u8; 6];
        peer.read_exact(&mut frame).unwrap();
        assert_eq!(frame, [0, 0, 0, 2, b'h', b'i']);

        peer.write_all(&[0, 0, 0, 3, b'a', b'b', b'c']).unwrap();
        let events = poll_until(&mut client, |e| !e.is_empty());
        assert_eq!(events[0].payload().map(|p| &p[..]), Some(&b"abc"[..]));
        assert_eq!(events[0].id(), ConnectionId::LOCAL);
    }

    #[test]
    fn test_tcp_peer_close_emits_single_disconnection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = Client::connect("127.0.0.1", port, Mode::TCP_V4).unwrap();
        let (peer, _) = listener.accept().unwrap();
        drop(peer);

        let events = poll_until(&mut client, |e| !e.is_empty());
        assert!(matches!(events.as_slice(), [Event::Disconnection { .. }]));
        assert!(client.is_closed());
        assert!(client.poll().is_empty());
        assert!(matches!(
            client.send(b"late"),
            Err(Error::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_udp_roundtrip() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = peer.local_addr().unwrap().port();

        let mut client = Client::connect("127.0.0.1", port, Mode::UDP_V4).unwrap();
        client.send(b"ping").unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        peer.send_to(b"pong", from).unwrap();

        let events = poll_until(&mut client, |e| !e.is_empty());
        match &events[0] {
            Event::DataReceived { addr, payload, .. } => {
                assert_eq!(*addr, peer.local_addr().unwrap());
                assert_eq!(&payload[..], b"pong");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_tcp_send_rejects_oversized() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = Client::builder()
            .buffer_capacity(8)
            .connect("127.0.0.1", port, Mode::TCP_V4)
            .unwrap();

        assert!(matches!(
            client.send(&[1u8; 5]),
            Err(Error::MessageTooLarge { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_udp_send_rejects_oversized() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = peer.local_addr().unwrap().port();
        let mut client = Client::builder()
            .buffer_capacity(8)
            .connect("127.0.0.1", port, Mode::UDP_V4)
            .unwrap();

        assert!(matches!(
            client.send(&[1u8; 8]),
            Err(Error::MessageTooLarge { len: 8, max: 7 })
        ));
        assert!(client.send(&[1u8; 7]).is_ok());
    }

    #[test]
    fn test_udp_drops_oversized_datagram() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = peer.local_addr().unwrap().port();
        let mut client = Client::builder()
            .buffer_capacity(8)
            .connect("127.0.0.1", port, Mode::UDP_V4)
            .unwrap();

        let dest = ("127.0.0.1", client.local_addr().port());
        peer.send_to(&[9u8; 12], dest).unwrap();
        peer.send_to(b"tiny", dest).unwrap();

        let events = poll_until(&mut client, |e| !e.is_empty());
        let payloads: Vec<_> = events.iter().filter_map(|e| e.payload()).collect();
        assert_eq!(payloads, vec![&b"tiny"[..]]);
    }

    #[test]
    fn test_frame_limit_bounds_each_round() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = Client::builder()
            .max_rounds(2)
            .max_frames_per_pass(1)
            .poll_timeout(Duration::from_secs(5))
            .connect("127.0.0.1", port, Mode::TCP_V4)
            .unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut bytes = Vec::new();
        for i in 0..6u8 {
            bytes.extend_from_slice(&[0, 0, 0, 1, i]);
        }
        peer.write_all(&bytes).unwrap();

        // Buffered frames are picked up without waiting for new readiness.
        let started = Instant::now();
        let mut seen = Vec::new();
        while seen.len() < 6 {
            let events = client.poll();
            assert!(events.len() <= 2);
            seen.extend(events.iter().filter_map(|e| e.payload().map(|p| p[0])));
        }
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_aborted_send_closes_client() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = Client::builder()
            .retry(RetryPolicy::immediate(0))
            .connect("127.0.0.1", port, Mode::TCP_V4)
            .unwrap();
        // Accepted but never read.
        let (_peer, _) = listener.accept().unwrap();

        let payload = vec![3u8; 8000];
        let err = (0..100_000)
            .find_map(|_| client.send(&payload).err())
            .expect("send buffer never filled");

        assert!(matches!(err, Error::SendAborted { total: 8004, .. }));
        assert!(client.is_closed());
        assert!(matches!(
            client.send(b"more"),
            Err(Error::ConnectionClosed(_))
        ));
    }
}
