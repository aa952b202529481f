//! Chat client - sends stdin lines to the chat server and prints replies.
//!
//! Stdin is read on a tokio task and handed to the poll loop over a
//! channel. Type `!quit` to leave.
//!
//! # Running
//!
//! ```text
//! cargo run --example echo_server
//! cargo run --example chat_client -- --name alice
//! cargo run --example chat_client -- --udp --ipv6 --name bob
//! ```

use sockwire::{Client, Event, IpVersion, Mode, Protocol};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Port shared with the echo server demo.
const PORT: u16 = 25565;

const QUIT: &str = "!quit";

struct Args {
    mode: Mode,
    name: String,
}

fn parse_args() -> Args {
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
    let name = args
        .iter()
        .position(|a| a == "--name")
        .and_then(|i| args.get(i + 1).cloned())
        .unwrap_or_else(|| "anonymous".to_string());
    Args {
        mode: Mode::new(protocol, ip_version),
        name,
    }
}

/// Poll for replies and forward typed lines until quit or disconnect.
fn run_chat(mut client: Client, name: String, mut lines: mpsc::Receiver<String>) {
    loop {
        loop {
            match lines.try_recv() {
                Ok(line) if line == QUIT => {
                    client.close();
                    return;
                }
                Ok(line) if line.is_empty() => {}
                Ok(line) => {
                    let message = format!("{} : {}", name, line);
                    if let Err(e) = client.send(message.as_bytes()) {
                        warn!("Send failed: {}", e);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    client.close();
                    return;
                }
            }
        }

        for event in client.poll() {
            match event {
                Event::DataReceived { payload, .. } => {
                    println!("{}", String::from_utf8_lossy(&payload));
                }
                Event::Disconnection { addr, .. } => {
                    println!("Server {} closed the connection", addr);
                }
                Event::Connection { .. } => {}
            }
        }
        if client.is_closed() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sockwire=info".parse()?),
        )
        .init();

    let Args { mode, name } = parse_args();
    let address = match mode.ip_version {
        IpVersion::V4 => "127.0.0.1",
        IpVersion::V6 => "::1",
    };

    let client = Client::connect(address, PORT, mode)?;
    info!("Connected to {} as {} ({})", client.server_addr(), name, mode);

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            let quit = line.trim() == QUIT;
            if tx.send(line.trim().to_string()).await.is_err() || quit {
                break;
            }
        }
    });

    tokio::task::spawn_blocking(move || run_chat(client, name, rx)).await?;

    // A pending stdin read would otherwise hold up runtime shutdown.
    std::process::exit(0)
}
