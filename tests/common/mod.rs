//! Test utilities and mocks for Udprelay
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use udprelay::{ProxyConfig, Resolver, UdpProxy};

/// How long tests wait for a datagram before giving up
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A datagram observed by a test upstream
#[derive(Debug, Clone)]
pub struct Received {
    /// Source address as seen by the upstream
    pub from: SocketAddr,
    /// Payload
    pub data: Vec<u8>,
}

/// Bind a UDP socket on an ephemeral loopback port
pub async fn loopback_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

/// Upstream that records every datagram and optionally answers with
/// `reply_prefix` followed by the request
pub async fn spawn_upstream(
    reply_prefix: Option<&'static [u8]>,
) -> (SocketAddr, mpsc::UnboundedReceiver<Received>) {
    let socket = loopback_socket().await;
    let addr = socket.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(_) => break,
            };
            let data = buf[..len].to_vec();
            if let Some(prefix) = reply_prefix {
                let mut reply = prefix.to_vec();
                reply.extend_from_slice(&data);
                let _ = socket.send_to(&reply, from).await;
            }
            if tx.send(Received { from, data }).is_err() {
                break;
            }
        }
    });

    (addr, rx)
}

/// Upstream that echoes every datagram back unchanged
pub async fn spawn_echo_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<Received>) {
    spawn_upstream(Some(b"")).await
}

/// Wait for the next datagram seen by a test upstream
pub async fn next_received(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("upstream received nothing")
        .expect("upstream task stopped")
}

/// Receive one datagram on `socket`
pub async fn recv_datagram(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 65535];
    let (len, from) = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("no datagram received")
        .unwrap();
    buf.truncate(len);
    (buf, from)
}

/// Relay on loopback forwarding to `upstream`, with short timers
pub fn local_proxy(upstream: SocketAddr) -> UdpProxy {
    UdpProxy::new(
        ProxyConfigBuilder::new()
            .upstream(&upstream.ip().to_string(), upstream.port())
            .build(),
    )
}

/// Resolver whose answer can be switched while the relay runs
#[derive(Debug, Clone)]
pub struct SwitchResolver {
    answer: Arc<Mutex<Vec<SocketAddr>>>,
}

impl SwitchResolver {
    /// Resolve to `addr` until switched
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_candidates(vec![addr])
    }

    /// Resolve to several candidates, in order, until switched
    pub fn with_candidates(addrs: Vec<SocketAddr>) -> Self {
        SwitchResolver {
            answer: Arc::new(Mutex::new(addrs)),
        }
    }

    /// Change the address returned from now on
    pub fn switch_to(&self, addr: SocketAddr) {
        *self.answer.lock().unwrap() = vec![addr];
    }
}

#[async_trait]
impl Resolver for SwitchResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(self.answer.lock().unwrap().clone())
    }
}

/// Test configuration builder
pub struct ProxyConfigBuilder {
    upstream_host: String,
    upstream_port: u16,
    max_datagram_size: usize,
    debug: bool,
}

impl Default for ProxyConfigBuilder {
    fn default() -> Self {
        ProxyConfigBuilder {
            upstream_host: "127.0.0.1".to_string(),
            upstream_port: 9,
            max_datagram_size: 4096,
            debug: true,
        }
    }
}

impl ProxyConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set upstream host and port
    pub fn upstream(mut self, host: &str, port: u16) -> Self {
        self.upstream_host = host.to_string();
        self.upstream_port = port;
        self
    }

    /// Set the maximum datagram size
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Toggle per-packet debug records
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Build the configuration, bound to an ephemeral loopback port
    pub fn build(self) -> ProxyConfig {
        let mut config =
            ProxyConfig::new("127.0.0.1", 0, self.upstream_host, self.upstream_port);
        config.max_datagram_size = self.max_datagram_size;
        config.debug = self.debug;
        config
    }
}
