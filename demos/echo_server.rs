//! Chat server - relays messages between clients.
//!
//! In TCP mode every message is forwarded to all other connected clients.
//! In UDP mode each datagram is echoed back to its sender.
//!
//! # Running
//!
//! ```text
//! cargo run --example echo_server                # TCP over IPv4
//! cargo run --example echo_server -- --udp --ipv6
//! ```

use sockwire::{Event, IpVersion, Mode, Protocol, Server};
use tracing::{info, warn};

/// Port shared with the chat client demo.
const PORT: u16 = 25565;

/// Parse `--udp` and `--ipv6` flags into a mode.
fn mode_from_args() -> Mode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let protocol = if args.iter().any(|a| a == "--udp") {
        Protocol::Udp
    } else {
        Protocol::Tcp
    };
    let ip_version = if args.iter().any(|a| a == "--ipv6") {
        IpVersion::V6
    } else {
        IpVersion::V4
    };
    Mode::new(protocol, ip_version)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sockwire=info".parse()?),
        )
        .init();

    let mode = mode_from_args();
    let address = match mode.ip_version {
        IpVersion::V4 => "127.0.0.1",
        IpVersion::V6 => "::1",
    };

    let mut server = Server::bind(address, PORT, mode)?;
    info!("Listening on {} ({})", server.local_addr(), mode);

    loop {
        for event in server.poll() {
            match event {
                Event::Connection { addr, .. } => println!("Connection from {}", addr),
                Event::DataReceived { id, addr, payload } => {
                    if payload.is_empty() {
                        continue;
                    }
                    println!(
                        "Data received from {}: {}",
                        addr,
                        String::from_utf8_lossy(&payload)
                    );
                    if mode.is_tcp() {
                        server.broadcast(&payload, Some(id));
                    } else if let Err(e) = server.send_to(addr, &payload) {
                        warn!("Echo to {} failed: {}", addr, e);
                    }
                }
                Event::Disconnection { addr, .. } => println!("Disconnection from {}", addr),
            }
        }
    }
}
