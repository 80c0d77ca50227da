//! Configuration module for Udprelay
//!
//! This module provides configuration types and parsing for the relays.

mod proxy;
mod socket;

pub use proxy::{Config, ProxyConfig};
pub use socket::SocketConfig;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
///
/// Every relay entry is validated; the first invalid one fails the parse.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).with_context(|| "Failed to parse configuration")?;

    for (idx, proxy) in config.proxies.iter().enumerate() {
        proxy
            .validate()
            .with_context(|| format!("Invalid relay #{} ({})", idx, proxy.bind_addr()))?;
    }

    Ok(config)
}
