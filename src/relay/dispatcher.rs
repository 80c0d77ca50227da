//! Dispatcher
//!
//! Single consumer of inbound client datagrams. Creates or reuses the
//! client's flow and forwards the payload to the current upstream address.
//! All sends go through this one task, so each client's datagrams reach
//! upstream in arrival order.

use super::flow::OutboundRelay;
use super::packet::Packet;
use super::table::FlowHandle;
use super::RelayContext;
use crate::helper::payload_preview;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Consume inbound datagrams until shutdown or until the listener goes away
pub(crate) async fn run_dispatcher(ctx: Arc<RelayContext>, mut inbound: mpsc::Receiver<Packet>) {
    loop {
        let packet = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            packet = inbound.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        dispatch(&ctx, packet).await;
    }
    debug!("dispatcher stopped");
}

/// Route one inbound datagram
pub(crate) async fn dispatch(ctx: &Arc<RelayContext>, packet: Packet) {
    if ctx.debug {
        debug!(
            client = %packet.addr,
            size = packet.len(),
            packet = %payload_preview(&packet.data),
            "packet received"
        );
    }

    match ctx.table.lookup(&packet.addr).await {
        Some(flow) => forward(ctx, packet, flow).await,
        None => open_flow(ctx, packet).await,
    }
}

async fn forward(ctx: &Arc<RelayContext>, packet: Packet, flow: FlowHandle) {
    if !send_upstream(ctx, &packet, flow.id, &flow.socket).await {
        return;
    }

    // The reply path refreshes unconditionally; here only refresh when the
    // last refresh is older than a quarter of the timeout.
    if !ctx.idle_timeout.is_zero() && flow.last_activity.elapsed() > ctx.idle_timeout / 4 {
        ctx.table.touch(&packet.addr).await;
    }
}

async fn open_flow(ctx: &Arc<RelayContext>, packet: Packet) {
    if ctx.shutdown.is_cancelled() {
        return;
    }

    let socket = match UdpSocket::bind(SocketAddr::new(ctx.flow_bind_ip, 0)).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            error!(client = %packet.addr, "failed to allocate flow socket: {}", e);
            return;
        }
    };
    debug!(
        client = %packet.addr,
        local = ?socket.local_addr().ok(),
        "new client connection"
    );

    let closer = ctx.shutdown.child_token();
    let id = ctx.table.insert(packet.addr, socket.clone(), closer.clone()).await;

    send_upstream(ctx, &packet, id, &socket).await;
    OutboundRelay::new(packet.addr, id, socket, closer, ctx.clone()).spawn();
}

/// Send to the upstream address cached right now. A failed send tears the
/// flow down; returns whether the send succeeded.
async fn send_upstream(
    ctx: &RelayContext,
    packet: &Packet,
    flow_id: u64,
    socket: &UdpSocket,
) -> bool {
    let upstream = ctx.upstream.get().await;
    match socket.send_to(&packet.data, upstream).await {
        Ok(_) => true,
        Err(e) => {
            warn!(client = %packet.addr, upstream = %upstream, "send to upstream failed: {}", e);
            ctx.table.remove(&packet.addr, flow_id).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::test_context;
    use bytes::Bytes;
    use std::time::Duration;

    async fn upstream_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn test_first_packet_opens_flow() {
        let upstream = upstream_socket().await;
        let (ctx, _egress) = test_context(upstream.local_addr().unwrap(), Duration::from_secs(60));
        let client: SocketAddr = "1.2.3.4:5000".parse().unwrap();

        dispatch(&ctx, Packet::new(client, Bytes::from_static(b"PING"))).await;

        let flow = ctx.table.lookup(&client).await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = upstream.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"PING");
        assert_eq!(from, flow.socket.local_addr().unwrap());
        ctx.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_same_client_reuses_flow() {
        let upstream = upstream_socket().await;
        let (ctx, _egress) = test_context(upstream.local_addr().unwrap(), Duration::from_secs(60));
        let client: SocketAddr = "1.2.3.4:5000".parse().unwrap();

        dispatch(&ctx, Packet::new(client, Bytes::from_static(b"one"))).await;
        dispatch(&ctx, Packet::new(client, Bytes::from_static(b"two"))).await;

        let mut buf = [0u8; 16];
        let (len, first_from) = upstream.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"one");
        let (len, second_from) = upstream.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"two");
        assert_eq!(first_from, second_from);
        assert_eq!(ctx.table.len().await, 1);
        ctx.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_distinct_clients_get_distinct_flows() {
        let upstream = upstream_socket().await;
        let (ctx, _egress) = test_context(upstream.local_addr().unwrap(), Duration::from_secs(60));

        dispatch(&ctx, Packet::new("1.2.3.4:5000".parse().unwrap(), Bytes::from_static(b"a"))).await;
        dispatch(&ctx, Packet::new("1.2.3.4:5001".parse().unwrap(), Bytes::from_static(b"b"))).await;

        let mut buf = [0u8; 16];
        let (_, first_from) = upstream.recv_from(&mut buf).await.unwrap();
        let (_, second_from) = upstream.recv_from(&mut buf).await.unwrap();
        assert_ne!(first_from, second_from);
        assert_eq!(ctx.table.len().await, 2);
        ctx.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_no_flow_after_shutdown() {
        let upstream = upstream_socket().await;
        let (ctx, _egress) = test_context(upstream.local_addr().unwrap(), Duration::from_secs(60));
        ctx.shutdown.cancel();

        dispatch(&ctx, Packet::new("1.2.3.4:5000".parse().unwrap(), Bytes::from_static(b"a"))).await;
        assert_eq!(ctx.table.len().await, 0);
    }

    #[tokio::test]
    async fn test_reply_is_handed_to_egress() {
        let upstream = upstream_socket().await;
        let (ctx, mut egress) = test_context(upstream.local_addr().unwrap(), Duration::from_secs(60));
        let client: SocketAddr = "1.2.3.4:5000".parse().unwrap();

        dispatch(&ctx, Packet::new(client, Bytes::from_static(b"PING"))).await;

        let mut buf = [0u8; 16];
        let (len, from) = upstream.recv_from(&mut buf).await.unwrap();
        upstream.send_to(b"PONG", from).await.unwrap();
        assert_eq!(&buf[..len], b"PING");

        let reply = tokio::time::timeout(Duration::from_secs(1), egress.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.addr, client);
        assert_eq!(&reply.data[..], b"PONG");
        ctx.shutdown.cancel();
    }
}
