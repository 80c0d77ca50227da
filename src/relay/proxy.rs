//! Relay lifecycle
//!
//! [`UdpProxy`] binds the listening socket, spawns the relay tasks and tears
//! everything down again on [`UdpProxy::close`].

use super::dispatcher::run_dispatcher;
use super::listener::{bind_listener, run_reader, run_writer};
use super::reaper::run_reaper;
use super::table::ConnectionTable;
use super::upstream::{run_resolver, Resolver, SystemResolver, UpstreamAddr};
use super::{RelayContext, HANDOFF_CAPACITY};
use crate::config::ProxyConfig;
use crate::error::RelayError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument, Span};

#[derive(Debug)]
enum ProxyState {
    Created,
    Started {
        local_addr: SocketAddr,
        upstream: UpstreamAddr,
    },
    Closed,
}

/// A UDP relay forwarding every client to one upstream
///
/// # Example
///
/// ```rust,ignore
/// use udprelay::{ProxyConfig, UdpProxy};
///
/// let proxy = UdpProxy::new(ProxyConfig::new("0.0.0.0", 9999, "10.0.0.1", 8000));
/// let local = proxy.start().await?;
/// // ...
/// proxy.close().await;
/// ```
#[derive(Debug)]
pub struct UdpProxy {
    config: ProxyConfig,
    idle_timeout: Duration,
    resolve_interval: Duration,
    resolver: Arc<dyn Resolver>,
    /// Parent of every record the relay emits
    span: Span,
    table: ConnectionTable,
    shutdown: CancellationToken,
    /// Listener, dispatcher and flow tasks
    tasks: TaskTracker,
    state: Mutex<ProxyState>,
}

impl UdpProxy {
    /// Create a relay from its configuration. Nothing is bound until
    /// [`start`](Self::start).
    pub fn new(config: ProxyConfig) -> Self {
        let span = info_span!(
            "udp_proxy",
            bind = %config.bind_addr(),
            upstream = %config.upstream_target()
        );
        UdpProxy {
            idle_timeout: config.idle_timeout(),
            resolve_interval: config.resolve_interval(),
            config,
            resolver: Arc::new(SystemResolver),
            span,
            table: ConnectionTable::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            state: Mutex::new(ProxyState::Created),
        }
    }

    /// Use a custom upstream resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Emit all records under `span` instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Override the idle timeout with sub-second precision
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Override the re-resolution interval with sub-second precision
    pub fn with_resolve_interval(mut self, interval: Duration) -> Self {
        self.resolve_interval = interval;
        self
    }

    /// Configuration this relay was built from
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the listening socket and spawn the relay tasks.
    ///
    /// Resolves the upstream before binding, so a failure of either leaves
    /// nothing behind. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, RelayError> {
        let mut state = self.state.lock().await;
        match &*state {
            ProxyState::Created => {}
            ProxyState::Started { local_addr, .. } => {
                return Err(RelayError::AlreadyStarted(*local_addr))
            }
            ProxyState::Closed => return Err(RelayError::Closed),
        }

        let (local_addr, upstream) = self.spawn_tasks().instrument(self.span.clone()).await?;
        *state = ProxyState::Started {
            local_addr,
            upstream,
        };
        Ok(local_addr)
    }

    async fn spawn_tasks(&self) -> Result<(SocketAddr, UpstreamAddr), RelayError> {
        info!("starting udp proxy");
        self.config.validate()?;

        let bind_addr = resolve_bind_addr(&self.config.bind_addr()).await.map_err(|e| {
            error!("error resolving bind address: {}", e);
            e
        })?;

        let upstream = UpstreamAddr::resolve(
            self.resolver.as_ref(),
            &self.config.upstream_host,
            self.config.upstream_port,
            bind_addr.ip(),
        )
        .await
        .map_err(|e| {
            error!("error resolving upstream address: {}", e);
            e
        })?;

        let socket = bind_listener(bind_addr, &self.config.socket).map_err(|source| {
            error!("error listening on bind port: {}", source);
            RelayError::Bind {
                addr: bind_addr.to_string(),
                source,
            }
        })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (inbound_tx, inbound_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (egress_tx, egress_rx) = mpsc::channel(HANDOFF_CAPACITY);

        let ctx = Arc::new(RelayContext {
            table: self.table.clone(),
            upstream: upstream.clone(),
            egress: egress_tx,
            flow_bind_ip: local_addr.ip(),
            max_datagram_size: self.config.max_datagram_size,
            idle_timeout: self.idle_timeout,
            debug: self.config.debug,
            shutdown: self.shutdown.clone(),
            tasks: self.tasks.clone(),
            span: self.span.clone(),
        });

        if !self.idle_timeout.is_zero() {
            tokio::spawn(
                run_reaper(self.table.clone(), self.idle_timeout, self.shutdown.clone())
                    .instrument(self.span.clone()),
            );
        } else {
            warn!("be warned that running without timeout to clients may be dangerous");
        }

        if !self.resolve_interval.is_zero() {
            tokio::spawn(
                run_resolver(
                    upstream.clone(),
                    self.resolver.clone(),
                    self.resolve_interval,
                    self.shutdown.clone(),
                )
                .instrument(self.span.clone()),
            );
        } else {
            warn!("not refreshing upstream addr");
        }

        self.tasks.spawn(
            run_writer(socket.clone(), egress_rx, self.config.debug, self.shutdown.clone())
                .instrument(self.span.clone()),
        );
        self.tasks
            .spawn(run_dispatcher(ctx, inbound_rx).instrument(self.span.clone()));
        self.tasks.spawn(
            run_reader(
                socket,
                inbound_tx,
                self.config.max_datagram_size,
                self.shutdown.clone(),
            )
            .instrument(self.span.clone()),
        );

        info!(local = %local_addr, "udp proxy started");
        Ok((local_addr, upstream))
    }

    /// Close every flow, then the listening socket.
    ///
    /// Returns once the listener, dispatcher and flow tasks have exited. The
    /// reaper only notices at the end of its current sleep. Closing twice is
    /// a no-op.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, ProxyState::Closed) {
            return;
        }
        *state = ProxyState::Closed;

        async {
            warn!("closing proxy");
            let flows = self.table.close_all().await;
            self.shutdown.cancel();
            self.tasks.close();
            self.tasks.wait().await;
            // flows opened while shutdown was in progress
            let late = self.table.close_all().await;
            info!(flows = flows + late, "udp proxy closed");
        }
        .instrument(self.span.clone())
        .await
    }

    /// Bound address, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ProxyState::Started { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    /// Upstream address sends currently go to, once started
    pub async fn upstream_addr(&self) -> Option<SocketAddr> {
        let upstream = match &*self.state.lock().await {
            ProxyState::Started { upstream, .. } => upstream.clone(),
            _ => return None,
        };
        Some(upstream.get().await)
    }

    /// Number of active flows
    pub async fn flow_count(&self) -> usize {
        self.table.len().await
    }

    /// Whether [`close`](Self::close) has been called
    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, ProxyState::Closed)
    }
}

impl Drop for UdpProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn resolve_bind_addr(addr: &str) -> Result<SocketAddr, RelayError> {
    let bind_error = |source| RelayError::Bind {
        addr: addr.to_string(),
        source,
    };
    tokio::net::lookup_host(addr)
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "bind address resolved to nothing",
            ))
        })
}
