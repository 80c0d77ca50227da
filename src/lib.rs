//! # Udprelay - UDP relay with per-client flows
//!
//! Udprelay listens on one UDP socket and relays every client to a single
//! upstream destination. Each client address gets its own outbound socket,
//! so upstream sees one distinct source per client and replies find their
//! way back to the right sender.
//!
//! ## Features
//!
//! - **Per-client flows**: one ephemeral socket per client, created on the
//!   first datagram and reused until it fails or goes idle
//! - **Idle eviction**: flows without traffic for the idle timeout are closed
//! - **Upstream re-resolution**: the upstream host is looked up again
//!   periodically and new sends follow address changes
//! - **Backpressure**: replies are handed to the listener one at a time
//! - **Byte-exact passthrough**: payloads are never inspected or rewritten
//!
//! ## Usage
//!
//! ```rust,ignore
//! use udprelay::{ProxyConfig, UdpProxy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let proxy = UdpProxy::new(ProxyConfig::new("0.0.0.0", 9999, "10.0.0.1", 8000));
//!     proxy.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     proxy.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod relay;

// Re-export commonly used items
pub use config::{load_config, Config, ProxyConfig};
pub use error::RelayError;
pub use relay::{Resolver, SystemResolver, UdpProxy, UpstreamAddr};

/// Version of the Udprelay library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
