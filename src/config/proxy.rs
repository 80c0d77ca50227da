//! Relay configuration types
//!
//! Defines the configuration of a single relay and the file root.

use crate::error::RelayError;
use crate::helper::{
    duration_from_secs, DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_TIMEOUT_SECS,
    DEFAULT_RESOLVE_INTERVAL_SECS, MAX_DATAGRAM_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::SocketConfig;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Relays to run, one `[[proxy]]` table each
    #[serde(rename = "proxy", default)]
    pub proxies: Vec<ProxyConfig>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_datagram_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_resolve_interval() -> u64 {
    DEFAULT_RESOLVE_INTERVAL_SECS
}

/// Configuration of one relay. Immutable once the relay is built.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Local address to listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Local port to listen on (0 lets the OS pick)
    #[serde(default)]
    pub bind_port: u16,

    /// Upstream host name or IP literal
    pub upstream_host: String,

    /// Upstream port
    pub upstream_port: u16,

    /// Largest datagram read from either side; longer ones are truncated
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,

    /// Idle timeout for client flows in seconds (0 disables eviction)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Upstream re-resolution interval in seconds (0 disables it)
    #[serde(default = "default_resolve_interval")]
    pub resolve_interval: u64,

    /// Log every packet, payload included
    #[serde(default)]
    pub debug: bool,

    /// Listening socket tuning
    #[serde(default)]
    pub socket: SocketConfig,
}

impl ProxyConfig {
    /// Create a relay config with default tuning
    pub fn new(
        bind_address: impl Into<String>,
        bind_port: u16,
        upstream_host: impl Into<String>,
        upstream_port: u16,
    ) -> Self {
        ProxyConfig {
            bind_address: bind_address.into(),
            bind_port,
            upstream_host: upstream_host.into(),
            upstream_port,
            max_datagram_size: default_max_datagram_size(),
            idle_timeout: default_idle_timeout(),
            resolve_interval: default_resolve_interval(),
            debug: false,
            socket: SocketConfig::default(),
        }
    }

    /// `bind_address:bind_port`, bracketing IPv6 literals
    pub fn bind_addr(&self) -> String {
        join_host_port(&self.bind_address, self.bind_port)
    }

    /// `upstream_host:upstream_port`, bracketing IPv6 literals
    pub fn upstream_target(&self) -> String {
        join_host_port(&self.upstream_host, self.upstream_port)
    }

    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        duration_from_secs(self.idle_timeout)
    }

    /// Re-resolution interval as a duration
    pub fn resolve_interval(&self) -> Duration {
        duration_from_secs(self.resolve_interval)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.upstream_host.trim().is_empty() {
            return Err(RelayError::Config("upstream_host must not be empty".to_string()));
        }
        if self.upstream_port == 0 {
            return Err(RelayError::Config("upstream_port must not be 0".to_string()));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(RelayError::Config(format!(
                "max_datagram_size must be within 1..={}, got {}",
                MAX_DATAGRAM_SIZE, self.max_datagram_size
            )));
        }
        Ok(())
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
