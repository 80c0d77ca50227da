//! Upstream address handling
//!
//! Holds the cached upstream address shared by the dispatcher and every flow,
//! and the periodic task that re-resolves it.

use crate::error::RelayError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of upstream addresses.
///
/// The relay never talks to DNS itself; it only consumes whatever the
/// resolver returns. Swap the implementation to plug in a custom lookup.
#[async_trait]
pub trait Resolver: Send + Sync + Debug {
    /// Resolve `host:port` to every candidate socket address, in preference
    /// order
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system's lookup
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        // ToSocketAddrs blocks, keep it off the reactor
        let host = host.to_string();
        tokio::task::spawn_blocking(move || {
            let addrs: Vec<SocketAddr> = (host.as_str(), port).to_socket_addrs()?.collect();
            if addrs.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No addresses found for: {}:{}", host, port),
                ));
            }
            Ok(addrs)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Resolver task failed: {}", e)))?
    }
}

/// First candidate a socket bound to `local_ip` can send to.
///
/// Flow sockets are bound to the listener's IP, so only addresses of the
/// same family are usable.
pub(crate) fn select_reachable(local_ip: IpAddr, candidates: &[SocketAddr]) -> Option<SocketAddr> {
    candidates
        .iter()
        .find(|addr| addr.is_ipv4() == local_ip.is_ipv4())
        .copied()
}

/// Cached upstream address
///
/// Cloning is cheap and every clone observes the same value. Reads and
/// replacements go through a lock, so a reader always sees either the old or
/// the new address.
#[derive(Debug, Clone)]
pub struct UpstreamAddr {
    /// Host as configured
    host: String,
    /// Port as configured
    port: u16,
    /// IP the flow sockets bind to; decides the usable address family
    local_ip: IpAddr,
    /// Current resolved address
    current: Arc<RwLock<SocketAddr>>,
}

impl UpstreamAddr {
    /// Create a holder seeded with an already resolved address. Later
    /// resolutions keep to the family of `resolved`.
    pub fn new(host: impl Into<String>, port: u16, resolved: SocketAddr) -> Self {
        let local_ip = match resolved {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        UpstreamAddr {
            host: host.into(),
            port,
            local_ip,
            current: Arc::new(RwLock::new(resolved)),
        }
    }

    /// Resolve `host:port` once, keeping the first address reachable from
    /// sockets bound to `local_ip`
    pub async fn resolve(
        resolver: &dyn Resolver,
        host: &str,
        port: u16,
        local_ip: IpAddr,
    ) -> Result<Self, RelayError> {
        let resolve_error = |reason: String| RelayError::Resolve {
            target: format!("{}:{}", host, port),
            reason,
        };
        let candidates = resolver
            .resolve(host, port)
            .await
            .map_err(|e| resolve_error(e.to_string()))?;
        let resolved = select_reachable(local_ip, &candidates).ok_or_else(|| {
            resolve_error(format!(
                "no address reachable from {} among {:?}",
                local_ip, candidates
            ))
        })?;

        let mut upstream = UpstreamAddr::new(host, port, resolved);
        upstream.local_ip = local_ip;
        Ok(upstream)
    }

    /// Configured host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configured port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address to use for the next send
    pub async fn get(&self) -> SocketAddr {
        *self.current.read().await
    }

    /// Pick the candidate this upstream can use, if any
    pub fn pick(&self, candidates: &[SocketAddr]) -> Option<SocketAddr> {
        select_reachable(self.local_ip, candidates)
    }

    /// Replace the cached address if its textual form differs.
    ///
    /// Returns whether a replacement happened.
    pub async fn replace_if_changed(&self, resolved: SocketAddr) -> bool {
        let mut current = self.current.write().await;
        if current.to_string() == resolved.to_string() {
            return false;
        }
        *current = resolved;
        true
    }
}

/// Periodically re-resolve the upstream until `shutdown` fires.
///
/// Failures keep the previous address until the next cycle.
pub(crate) async fn run_resolver(
    upstream: UpstreamAddr,
    resolver: Arc<dyn Resolver>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match resolver.resolve(upstream.host(), upstream.port()).await {
            Ok(candidates) => match upstream.pick(&candidates) {
                Some(resolved) => {
                    if upstream.replace_if_changed(resolved).await {
                        info!(upstream = %resolved, "upstream address changed");
                    }
                }
                None => {
                    warn!(candidates = ?candidates, "no reachable upstream address, keeping current");
                }
            },
            Err(e) => {
                warn!(host = upstream.host(), port = upstream.port(), "resolve error: {}", e);
            }
        }
    }
    debug!("upstream resolver stopped");
}
