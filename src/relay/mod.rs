//! UDP relay engine
//!
//! Relays datagrams between many clients and a single upstream. Each client
//! address gets its own flow: a dedicated outbound socket plus a task reading
//! upstream replies from it.
//!
//! ```text
//! client -> listener reader -> dispatcher -> flow socket -> upstream
//! upstream -> flow socket -> outbound relay -> listener writer -> client
//! ```
//!
//! Handoffs between tasks use channels of capacity one, so a slow writer
//! back-pressures the flows feeding it instead of buffering without bound.

mod dispatcher;
mod flow;
mod listener;
mod packet;
mod proxy;
mod reaper;
mod table;
mod upstream;

pub use proxy::UdpProxy;
pub use upstream::{Resolver, SystemResolver, UpstreamAddr};

use packet::Packet;
use std::net::IpAddr;
use std::time::Duration;
use table::ConnectionTable;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Span;

/// Capacity of the channels between relay tasks
const HANDOFF_CAPACITY: usize = 1;

/// State shared by the dispatcher and every flow of one relay
#[derive(Debug)]
pub(crate) struct RelayContext {
    pub table: ConnectionTable,
    pub upstream: UpstreamAddr,
    /// Replies waiting for the listener writer
    pub egress: mpsc::Sender<Packet>,
    /// Local address flow sockets bind to, with an OS-assigned port
    pub flow_bind_ip: IpAddr,
    pub max_datagram_size: usize,
    pub idle_timeout: Duration,
    pub debug: bool,
    pub shutdown: CancellationToken,
    pub tasks: TaskTracker,
    pub span: Span,
}

#[cfg(test)]
pub(crate) fn test_context(
    upstream: std::net::SocketAddr,
    idle_timeout: Duration,
) -> (std::sync::Arc<RelayContext>, mpsc::Receiver<Packet>) {
    let (egress, egress_rx) = mpsc::channel(HANDOFF_CAPACITY);
    let ctx = RelayContext {
        table: ConnectionTable::new(),
        upstream: UpstreamAddr::new(upstream.ip().to_string(), upstream.port(), upstream),
        egress,
        flow_bind_ip: IpAddr::from([127, 0, 0, 1]),
        max_datagram_size: crate::helper::DEFAULT_BUFFER_SIZE,
        idle_timeout,
        debug: true,
        shutdown: CancellationToken::new(),
        tasks: TaskTracker::new(),
        span: Span::none(),
    };
    (std::sync::Arc::new(ctx), egress_rx)
}
