//! Protocol and address-family selection.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stream sockets with length-prefixed framing.
    Tcp,
    /// Datagram sockets, one message per datagram.
    Udp,
}

/// Address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

impl IpVersion {
    /// Address family of `ip`.
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

/// Protocol × address family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Address family.
    pub ip_version: IpVersion,
}

impl Mode {
    /// TCP over IPv4.
    pub const TCP_V4: Mode = Mode::new(Protocol::Tcp, IpVersion::V4);
    /// TCP over IPv6.
    pub const TCP_V6: Mode = Mode::new(Protocol::Tcp, IpVersion::V6);
    /// UDP over IPv4.
    pub const UDP_V4: Mode = Mode::new(Protocol::Udp, IpVersion::V4);
    /// UDP over IPv6.
    pub const UDP_V6: Mode = Mode::new(Protocol::Udp, IpVersion::V6);

    /// Create a mode.
    pub const fn new(protocol: Protocol, ip_version: IpVersion) -> Self {
        Self {
            protocol,
            ip_version,
        }
    }

    /// Whether this is a TCP mode.
    #[inline]
    pub fn is_tcp(&self) -> bool {
        self.protocol == Protocol::Tcp
    }

    /// Parse `address` and pair it with `port`, checking the address family.
    pub fn socket_addr(&self, address: &str, port: u16) -> Result<SocketAddr> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        if IpVersion::of(&ip) != self.ip_version {
            return Err(Error::AddressFamily {
                address: address.to_string(),
                expected: self.ip_version,
            });
        }
        Ok(SocketAddr::new(ip, port))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        })
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IpVersion::V4 => "IPv4",
            IpVersion::V6 => "IPv6",
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.ip_version)
    }
}
