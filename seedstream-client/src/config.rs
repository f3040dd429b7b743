use std::time::Duration;

use crate::error::{ClientError, Result};

/// Default SeedLink port.
pub const DEFAULT_PORT: u16 = 18000;

/// Configuration for a [`SlConnection`](crate::SlConnection).
#[derive(Clone, Debug)]
pub struct ConnConfig {
    /// Server address as `host:port`.
    pub address: String,
    /// Timeout for the initial TCP connection. Default: 10 seconds.
    pub connect_timeout: Duration,
    /// Timeout for negotiation reply lines. Default: 30 seconds.
    pub read_timeout: Duration,
    /// Disconnect when no data arrives for this long while streaming.
    /// Zero disables the check. Default: 600 seconds.
    pub network_timeout: Duration,
    /// Delay between reconnect attempts. Default: 30 seconds.
    pub reconnect_delay: Duration,
    /// Send `INFO ID` heartbeats this often while streaming. Zero disables.
    /// Default: disabled.
    pub keepalive: Duration,
    /// Dial-up mode: request buffered data with `FETCH`, expect the server
    /// to finish with the `END` sentinel.
    pub dialup: bool,
    /// Ask the server to suppress per-command acknowledgements.
    pub batch: bool,
    /// Resume from stored sequence numbers after reconnect. Default: true.
    pub resume: bool,
    /// Server-side time window; overrides per-stream resume points.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            network_timeout: Duration::from_secs(600),
            reconnect_delay: Duration::from_secs(30),
            keepalive: Duration::ZERO,
            dialup: false,
            batch: false,
            resume: true,
            start_time: None,
            end_time: None,
        }
    }
}

impl ConnConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration before any connection attempt.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(ClientError::Config("empty server address".into()));
        }
        if self.end_time.is_some() && self.start_time.is_none() {
            return Err(ClientError::Config(
                "end time given without a start time".into(),
            ));
        }
        Ok(())
    }
}
