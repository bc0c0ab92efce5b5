//! # Client Configuration
//!
//! Plain data with sensible defaults, a builder for code, and serde support
//! for loading from JSON.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Generous enough for benchmark-style bursts of tens of thousands of
/// commands, while still bounding memory when the server stalls.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100_000;

/// Main configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Endpoint
    // -------------------------------------------------------------------------
    /// Server host name or IP. A value starting with `/` is a Unix socket path.
    pub host: String,

    /// Server TCP port (ignored for Unix sockets).
    pub port: u16,

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------
    /// Connect timeout in milliseconds; 0 waits indefinitely.
    pub connect_timeout_ms: u64,

    /// What to do after the connection drops or a connect attempt fails.
    pub reconnect: ReconnectPolicy,

    /// How long `end()` waits for in-flight replies, in milliseconds.
    pub drain_timeout_ms: u64,

    /// Disable Nagle's algorithm on TCP connections.
    pub nodelay: bool,

    // -------------------------------------------------------------------------
    // Pipeline
    // -------------------------------------------------------------------------
    /// Upper bound on outstanding requests before submissions are rejected.
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout_ms: 5_000,
            reconnect: ReconnectPolicy::None,
            drain_timeout_ms: 5_000,
            nodelay: true,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ClientResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(json).map_err(|err| ClientError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that would otherwise fail late inside the driver.
    pub fn validate(&self) -> ClientResult<()> {
        if self.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if !self.host.starts_with('/') && self.port == 0 {
            return Err(ClientError::Config("port must be non-zero".to_string()));
        }
        if self.max_pending_requests == 0 {
            return Err(ClientError::Config(
                "max_pending_requests must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        if self.host.starts_with('/') {
            Endpoint::Unix(PathBuf::from(&self.host))
        } else {
            Endpoint::Tcp {
                host: self.host.clone(),
                port: self.port,
            }
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Reconnection strategy after a dropped connection or failed connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Give up: the client goes to `Closed`.
    #[default]
    None,

    /// Retry after the same delay each time.
    Fixed {
        delay_ms: u64,
        /// `None` retries forever.
        max_attempts: Option<u32>,
    },

    /// Retry with a doubling delay, capped at `max_ms`.
    Backoff {
        initial_ms: u64,
        max_ms: u64,
        /// `None` retries forever.
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Policy selected by `reconnect: true`.
    pub fn default_backoff() -> Self {
        ReconnectPolicy::Backoff {
            initial_ms: 100,
            max_ms: 5_000,
            max_attempts: None,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` to stop.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::None => None,
            ReconnectPolicy::Fixed {
                delay_ms,
                max_attempts,
            } => within(attempt, max_attempts).then(|| Duration::from_millis(delay_ms)),
            ReconnectPolicy::Backoff {
                initial_ms,
                max_ms,
                max_attempts,
            } => {
                if !within(attempt, max_attempts) {
                    return None;
                }
                let shift = attempt.saturating_sub(1).min(32);
                let delay = initial_ms.saturating_mul(1u64 << shift).min(max_ms);
                Some(Duration::from_millis(delay))
            }
        }
    }
}

fn within(attempt: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.map_or(true, |max| attempt <= max)
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Connect to a Unix domain socket instead of TCP.
    pub fn unix_socket(mut self, path: impl Into<String>) -> Self {
        self.config.host = path.into();
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// `true` selects the default backoff policy, `false` disables reconnects.
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect = if enabled {
            ReconnectPolicy::default_backoff()
        } else {
            ReconnectPolicy::None
        };
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Set the drain timeout used by `end()` (in milliseconds)
    pub fn drain_timeout_ms(mut self, ms: u64) -> Self {
        self.config.drain_timeout_ms = ms;
        self
    }

    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    pub fn max_pending_requests(mut self, limit: usize) -> Self {
        self.config.max_pending_requests = limit;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
