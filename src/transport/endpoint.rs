//! Non-blocking sockets owned by a server or client.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use tracing::debug;

use super::mode::{IpVersion, Mode, Protocol};
use crate::error::Result;

/// Kind of socket behind an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// Listening TCP socket.
    Listener,
    /// Connected TCP stream.
    Stream,
    /// UDP socket.
    Datagram,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SocketKind::Listener => "listener",
            SocketKind::Stream => "stream",
            SocketKind::Datagram => "datagram",
        })
    }
}

enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// A non-blocking socket together with the mode it was opened in.
///
/// The peer address is the connected peer for streams and the server address
/// for a client's datagram socket.
pub struct Endpoint {
    socket: Socket,
    mode: Mode,
    local_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
}

impl Endpoint {
    /// Bind a listening TCP socket or a UDP socket to `addr`.
    pub(crate) fn listen(addr: SocketAddr, mode: Mode) -> Result<Self> {
        let socket = match mode.protocol {
            Protocol::Tcp => Socket::Listener(TcpListener::bind(addr)?),
            Protocol::Udp => Socket::Datagram(UdpSocket::bind(addr)?),
        };
        let local_addr = match &socket {
            Socket::Listener(l) => l.local_addr()?,
            Socket::Datagram(s) => s.local_addr()?,
            Socket::Stream(s) => s.local_addr()?,
        };
        debug!(%local_addr, %mode, "bound endpoint");
        Ok(Self {
            socket,
            mode,
            local_addr,
            peer_addr: None,
        })
    }

    /// Open a client socket towards `server`.
    ///
    /// TCP connects with a bounded wait; UDP binds an ephemeral port on the
    /// unspecified address of the same family.
    pub(crate) fn connect(server: SocketAddr, mode: Mode, timeout: Duration) -> Result<Self> {
        let socket = match mode.protocol {
            Protocol::Tcp => {
                let stream = std::net::TcpStream::connect_timeout(&server, timeout)?;
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                Socket::Stream(TcpStream::from_std(stream))
            }
            Protocol::Udp => {
                let unspecified = match mode.ip_version {
                    IpVersion::V4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                    IpVersion::V6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
                };
                Socket::Datagram(UdpSocket::bind(unspecified)?)
            }
        };
        let local_addr = match &socket {
            Socket::Stream(s) => s.local_addr()?,
            Socket::Datagram(s) => s.local_addr()?,
            Socket::Listener(l) => l.local_addr()?,
        };
        debug!(%local_addr, %server, %mode, "opened client endpoint");
        Ok(Self {
            socket,
            mode,
            local_addr,
            peer_addr: Some(server),
        })
    }

    /// Wrap a stream returned by `accept`.
    pub(crate) fn accepted(stream: TcpStream, peer: SocketAddr, mode: Mode) -> Result<Self> {
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        Ok(Self {
            socket: Socket::Stream(stream),
            mode,
            local_addr,
            peer_addr: Some(peer),
        })
    }

    /// Mode the endpoint was opened with.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Kind of the underlying socket.
    pub fn kind(&self) -> SocketKind {
        match self.socket {
            Socket::Listener(_) => SocketKind::Listener,
            Socket::Stream(_) => SocketKind::Stream,
            Socket::Datagram(_) => SocketKind::Datagram,
        }
    }

    /// Local bound address.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer address, if any.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(crate) fn as_listener(&self) -> Option<&TcpListener> {
        match &self.socket {
            Socket::Listener(l) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn as_stream(&self) -> Option<&TcpStream> {
        match &self.socket {
            Socket::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_datagram(&self) -> Option<&UdpSocket> {
        match &self.socket {
            Socket::Datagram(s) => Some(s),
            _ => None,
        }
    }

    /// Shut down both halves of a stream. No-op for other kinds.
    pub(crate) fn shutdown(&self) {
        if let Socket::Stream(s) = &self.socket {
            if let Err(e) = s.shutdown(std::net::Shutdown::Both) {
                debug!(error = %e, "stream shutdown failed");
            }
        }
    }

    fn source(&mut self) -> &mut dyn Source {
        match &mut self.socket {
            Socket::Listener(l) => l,
            Socket::Stream(s) => s,
            Socket::Datagram(s) => s,
        }
    }
}

impl Source for Endpoint {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.source().register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.source().reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.source().deregister(registry)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.kind())
            .field("mode", &self.mode)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
