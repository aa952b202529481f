//! Runtime configuration shared by servers and clients.
//!
//! Every field has a default, so a JSON document only needs the values it
//! overrides. Durations are written as whole milliseconds.
//!
//! # Example
//!
//! ```
//! use sockwire::SocketConfig;
//! use std::time::Duration;
//!
//! let config = SocketConfig::from_json(r#"{"buffer_capacity": 4096, "poll_timeout": 5}"#).unwrap();
//! assert_eq!(config.buffer_capacity, 4096);
//! assert_eq!(config.poll_timeout, Duration::from_millis(5));
//! assert_eq!(config.max_payload(), 4092);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{max_payload_size, DEFAULT_BUFFER_CAPACITY, LENGTH_PREFIX_SIZE};

/// Default readiness wait per poll pass.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Default number of readiness events fetched per pass.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default timeout for establishing a client TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of poll rounds a client pass may run.
pub const DEFAULT_MAX_CLIENT_ROUNDS: usize = 64;

/// Default number of frames read from one connection per pass.
pub const DEFAULT_MAX_FRAMES_PER_PASS: usize = 1;

/// Default sleep between retries while a frame is half received or half sent.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Default retry budget while a frame is half received or half sent.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 100;

/// Bounded backoff applied when a non-blocking socket would block mid-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Sleep between attempts.
    #[serde(with = "millis")]
    pub backoff: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    /// Retry immediately, without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(Duration::ZERO, max_attempts)
    }

    /// Sleep for one backoff step, if any.
    pub(crate) fn wait(&self) {
        if !self.backoff.is_zero() {
            std::thread::sleep(self.backoff);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BACKOFF, DEFAULT_RETRY_ATTEMPTS)
    }
}

/// Configuration for a [`Server`](crate::Server) or [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Per-connection receive buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Maximum wait for readiness in one poll pass.
    #[serde(with = "millis")]
    pub poll_timeout: Duration,
    /// Readiness events fetched per pass.
    pub event_capacity: usize,
    /// Timeout for the client's TCP connect.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Upper bound on poll rounds in one client pass.
    pub max_client_rounds: usize,
    /// Frames read from one readable stream before moving on. Unread input
    /// is picked up by the next pass.
    pub max_frames_per_pass: usize,
    /// Backoff used for partial frames, on both read and write.
    pub retry: RetryPolicy,
}

impl SocketConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity <= LENGTH_PREFIX_SIZE {
            return Err(Error::Config(format!(
                "buffer_capacity must exceed {} bytes, got {}",
                LENGTH_PREFIX_SIZE, self.buffer_capacity
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".to_string()));
        }
        if self.max_client_rounds == 0 {
            return Err(Error::Config(
                "max_client_rounds must be positive".to_string(),
            ));
        }
        if self.max_frames_per_pass == 0 {
            return Err(Error::Config(
                "max_frames_per_pass must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest TCP payload a buffer of this capacity can hold.
    pub fn max_payload(&self) -> usize {
        max_payload_size(self.buffer_capacity)
    }

    /// Largest UDP datagram delivered to the application.
    pub fn max_datagram(&self) -> usize {
        self.buffer_capacity - 1
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_client_rounds: DEFAULT_MAX_CLIENT_ROUNDS,
            max_frames_per_pass: DEFAULT_MAX_FRAMES_PER_PASS,
            retry: RetryPolicy::default(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
