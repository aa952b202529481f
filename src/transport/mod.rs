//! Transport module - sockets, modes and connection bookkeeping.
//!
//! Provides:
//! - Protocol and address-family selection
//! - Non-blocking TCP/UDP endpoints registered with the readiness poller
//! - The registry of accepted TCP connections

mod endpoint;
mod mode;
mod registry;

pub use endpoint::{Endpoint, SocketKind};
pub use mode::{IpVersion, Mode, Protocol};
pub use registry::{AcceptOutcome, Connection, ConnectionRegistry};
