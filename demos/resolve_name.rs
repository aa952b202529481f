//! Resolve a host name and print the first address.
//!
//! ```text
//! cargo run --example resolve_name -- example.com
//! ```

use sockwire::resolve_host_string;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost".to_string());

    let ip = resolve_host_string(&name)?;
    println!("{} -> {}", name, ip);
    Ok(())
}
