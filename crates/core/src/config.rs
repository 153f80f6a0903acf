//! Server/client configuration (§10.3 ambient stack).
//!
//! Builder-style structs, deserializable from an optional TOML/env layer on the server binary side
//! (§10.3), matching the teacher's pattern of plain `serde`-derived configuration structs built in
//! code or loaded via [`config`](https://docs.rs/config)-style layering rather than a bespoke CLI.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server-side tunables (§4.8, §4.6, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the WebSocket listener to.
    pub bind_address: String,
    /// Capacity of a single request's inbound queue (§9 resolved open question).
    pub inbound_queue_capacity: usize,
    /// Capacity of a connection's outbound channel, shared by every in-flight request's writes.
    pub outbound_channel_capacity: usize,
    /// How long the transport handshake may take before the connection is abandoned.
    pub accept_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_owned(),
            inbound_queue_capacity: 64,
            outbound_channel_capacity: 64,
            accept_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    #[must_use]
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Set the per-request inbound queue capacity.
    #[must_use]
    pub fn inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity;
        self
    }

    /// Set the per-connection outbound channel capacity.
    #[must_use]
    pub fn outbound_channel_capacity(mut self, capacity: usize) -> Self {
        self.outbound_channel_capacity = capacity;
        self
    }

    /// Set the handshake accept timeout.
    #[must_use]
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }
}

/// Exponential backoff with jitter, as used by the reconnect scheduler (§4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Base delay, in milliseconds.
    pub base_ms: u64,
    /// Multiplied into `base_ms * attempts`.
    pub backoff_factor: f64,
    /// Lower bound of the jitter range, in milliseconds. May be negative.
    pub min_jitter_ms: i64,
    /// Upper bound of the jitter range, in milliseconds. Must be `>= min_jitter_ms`.
    pub max_jitter_ms: i64,
    /// Maximum number of reconnect attempts before giving up.
    pub retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_ms: 1000, backoff_factor: 1.0, min_jitter_ms: 0, max_jitter_ms: 0, retries: 5 }
    }
}

impl ReconnectPolicy {
    /// The delay before the `attempt`-th reconnect (1-based), per §4.9's formula:
    /// `delay = base * backoffFactor * attempts + |jitter|`.
    pub fn delay_for(&self, attempt: u32, jitter_ms: i64) -> Duration {
        let scaled = self.base_ms as f64 * self.backoff_factor * attempt as f64;
        let delay_ms = scaled + jitter_ms.unsigned_abs() as f64;
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// Sample a jitter value uniformly from `[min_jitter_ms, max_jitter_ms]`.
    pub fn sample_jitter(&self) -> i64 {
        if self.max_jitter_ms <= self.min_jitter_ms {
            return self.min_jitter_ms;
        }
        let span = (self.max_jitter_ms - self.min_jitter_ms) as u64;
        self.min_jitter_ms + fastrand::u64(0..=span) as i64
    }
}

/// Client-side tunables (§4.9, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The `ws://`/`wss://` URL to connect to.
    pub url: String,
    /// How long a single connect attempt may take before it's considered failed.
    pub connect_timeout: Duration,
    /// Reconnect backoff parameters.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Start from the defaults with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_formula_matches_spec() {
        let policy = ReconnectPolicy { base_ms: 1000, backoff_factor: 1.0, retries: 3, ..Default::default() };
        assert_eq!(policy.delay_for(1, 0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2, 0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3, 0), Duration::from_millis(3000));
    }

    #[test]
    fn jitter_is_added_as_absolute_value() {
        let policy = ReconnectPolicy { base_ms: 1000, backoff_factor: 1.0, ..Default::default() };
        assert_eq!(policy.delay_for(1, -50), Duration::from_millis(1050));
        assert_eq!(policy.delay_for(1, 50), Duration::from_millis(1050));
    }

    #[test]
    fn sample_jitter_falls_back_to_min_when_range_empty() {
        let policy = ReconnectPolicy { min_jitter_ms: 5, max_jitter_ms: 5, ..Default::default() };
        assert_eq!(policy.sample_jitter(), 5);
    }
}
