//! Datagrams moving between relay tasks

use bytes::Bytes;
use std::net::SocketAddr;

/// A datagram tagged with the client it came from or goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Packet {
    /// Client address
    pub addr: SocketAddr,
    /// Payload, passed through untouched
    pub data: Bytes,
}

impl Packet {
    pub fn new(addr: SocketAddr, data: Bytes) -> Self {
        Packet { addr, data }
    }

    /// Copy a received datagram out of a reusable buffer
    pub fn copy_from(addr: SocketAddr, buf: &[u8]) -> Self {
        Packet::new(addr, Bytes::copy_from_slice(buf))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}
