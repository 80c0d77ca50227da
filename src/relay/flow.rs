//! Outbound relay
//!
//! One task per flow reads upstream replies from the flow's socket and hands
//! them to the listener for delivery to the client.

use super::packet::Packet;
use super::RelayContext;
use crate::helper::payload_preview;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// Reader side of a single flow
pub(crate) struct OutboundRelay {
    /// Client the flow serves
    client: SocketAddr,
    /// Table id of the flow
    id: u64,
    /// The flow's outbound socket
    socket: Arc<UdpSocket>,
    /// Cancelled when the flow is removed from the table
    closer: CancellationToken,
    ctx: Arc<RelayContext>,
}

impl OutboundRelay {
    pub fn new(
        client: SocketAddr,
        id: u64,
        socket: Arc<UdpSocket>,
        closer: CancellationToken,
        ctx: Arc<RelayContext>,
    ) -> Self {
        OutboundRelay {
            client,
            id,
            socket,
            closer,
            ctx,
        }
    }

    /// Spawn the relay loop on the relay's task tracker
    pub fn spawn(self) {
        let span = info_span!(parent: &self.ctx.span, "flow", client = %self.client, id = self.id);
        let tasks = self.ctx.tasks.clone();
        tasks.spawn(self.run().instrument(span));
    }

    async fn run(self) {
        let mut buf = vec![0u8; self.ctx.max_datagram_size];

        loop {
            let result = tokio::select! {
                _ = self.closer.cancelled() => {
                    debug!("flow closed");
                    return;
                }
                result = self.socket.recv_from(&mut buf) => result,
            };

            let len = match result {
                Ok((len, _)) => len,
                Err(e) => {
                    debug!("upstream read error: {}", e);
                    break;
                }
            };

            self.ctx.table.touch(&self.client).await;

            let packet = Packet::copy_from(self.client, &buf[..len]);
            if self.ctx.debug {
                debug!(
                    size = len,
                    data = %payload_preview(&packet.data),
                    "received data from upstream"
                );
            }

            // Blocks while the listener is busy writing
            let sent = tokio::select! {
                _ = self.closer.cancelled() => {
                    debug!("flow closed");
                    return;
                }
                sent = self.ctx.egress.send(packet) => sent,
            };
            if sent.is_err() {
                debug!("egress closed");
                break;
            }
        }

        if self.ctx.table.remove(&self.client, self.id).await {
            debug!("flow removed");
        }
    }
}
