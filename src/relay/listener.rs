//! Listener
//!
//! Owns the bound socket. One task reads client datagrams and hands them to
//! the dispatcher, another writes relayed replies back to clients. The two
//! directions share the socket without further locking.

use super::packet::Packet;
use crate::config::SocketConfig;
use crate::helper::{payload_preview, read_error_backoff, READ_ERROR_MAX_DELAY};
use backoff::backoff::Backoff;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Bind the listening socket, applying `opts` before the bind
pub(crate) fn bind_listener(addr: SocketAddr, opts: &SocketConfig) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    if opts.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if let Some(size) = opts.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = opts.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

/// Read client datagrams until shutdown.
///
/// Read errors never stop the loop; consecutive errors are spaced out by an
/// exponential backoff that resets on the next successful read.
pub(crate) async fn run_reader(
    socket: Arc<UdpSocket>,
    inbound: mpsc::Sender<Packet>,
    max_datagram_size: usize,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; max_datagram_size];
    let mut backoff = read_error_backoff();

    while !shutdown.is_cancelled() {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = socket.recv_from(&mut buf) => result,
        };

        match result {
            Ok((len, src)) => {
                backoff.reset();
                let packet = Packet::copy_from(src, &buf[..len]);
                let sent = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = inbound.send(packet) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.next_backoff().unwrap_or(READ_ERROR_MAX_DELAY);
                error!(retry_in = ?delay, "listener read error: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    debug!("listener reader stopped");
}

/// Write relayed replies back to their clients until shutdown
pub(crate) async fn run_writer(
    socket: Arc<UdpSocket>,
    mut egress: mpsc::Receiver<Packet>,
    debug: bool,
    shutdown: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => break,
            packet = egress.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        if debug {
            debug!(
                client = %packet.addr,
                size = packet.len(),
                data = %payload_preview(&packet.data),
                "forwarded data from upstream"
            );
        }
        if let Err(e) = socket.send_to(&packet.data, packet.addr).await {
            warn!(client = %packet.addr, "write to client failed: {}", e);
        }
    }
    debug!("listener writer stopped");
}
