//! # sockwire
//!
//! Non-blocking TCP and UDP sockets driven by an explicit poll loop, with
//! length-prefixed message framing over TCP.
//!
//! ## Architecture
//!
//! - **Server**: one listening (TCP) or datagram (UDP) socket plus accepted
//!   connections, all multiplexed on a single readiness poller
//! - **Client**: one socket towards a server
//! - **Framing** (TCP): every message is a 4-byte big-endian length followed
//!   by the payload; UDP messages are single datagrams
//!
//! Nothing runs in the background. Callers invoke `poll()` repeatedly and
//! handle the returned [`Event`]s in order.
//!
//! ## Example
//!
//! ```no_run
//! use sockwire::{Client, Event, Mode, Server};
//!
//! fn main() -> sockwire::Result<()> {
//!     let mut server = Server::bind("127.0.0.1", 0, Mode::TCP_V4)?;
//!     let port = server.local_addr().port();
//!     let mut client = Client::connect("127.0.0.1", port, Mode::TCP_V4)?;
//!     client.send(b"hello")?;
//!
//!     loop {
//!         for event in server.poll() {
//!             if let Event::DataReceived { payload, .. } = event {
//!                 assert_eq!(&payload[..], b"hello");
//!                 return Ok(());
//!             }
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod resolve;
pub mod transport;
pub mod writer;

mod client;
mod server;

pub use client::{Client, ClientBuilder};
pub use config::{RetryPolicy, SocketConfig};
pub use error::{Error, Result};
pub use event::{ConnectionId, Event};
pub use resolve::{resolve_host, resolve_host_string};
pub use server::{Server, ServerBuilder};
pub use transport::{Connection, IpVersion, Mode, Protocol};
