//! Host name resolution.
//!
//! Uses the system resolver through [`ToSocketAddrs`]. Literal IP addresses
//! resolve to themselves without a lookup.

use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

use crate::error::{Error, Result};

/// Resolve `name` to its first address.
pub fn resolve_host(name: &str) -> Result<IpAddr> {
    let mut addrs = (name, 0).to_socket_addrs().map_err(|e| {
        debug!(name, error = %e, "lookup failed");
        Error::Resolve(name.to_string())
    })?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::Resolve(name.to_string()))
}

/// Resolve `name` and format the address as text, e.g. `"127.0.0.1"`.
pub fn resolve_host_string(name: &str) -> Result<String> {
    resolve_host(name).map(|ip| ip.to_string())
}
