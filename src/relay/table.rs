//! Connection table
//!
//! Maps each client address to the flow serving it. Lookups share a read
//! lock; every mutation takes the write lock for a short critical section.
//!
//! Removing an entry and closing its socket happen together under the write
//! lock, so whichever task removes a flow is the only one that closes it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A tracked flow
#[derive(Debug)]
struct FlowEntry {
    /// Unique for the lifetime of the table
    id: u64,
    /// Outbound socket talking to upstream
    socket: Arc<UdpSocket>,
    /// Last time traffic was seen in either direction
    last_activity: Instant,
    /// Cancelled exactly once, by whoever removes the entry
    closer: CancellationToken,
}

impl FlowEntry {
    fn close(self) {
        self.closer.cancel();
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > idle_timeout
    }
}

/// Snapshot of a flow returned by [`ConnectionTable::lookup`]
#[derive(Debug, Clone)]
pub(crate) struct FlowHandle {
    pub id: u64,
    pub socket: Arc<UdpSocket>,
    pub last_activity: Instant,
}

/// Concurrency-safe map from client address to flow
#[derive(Debug, Clone, Default)]
pub(crate) struct ConnectionTable {
    flows: Arc<RwLock<HashMap<SocketAddr, FlowEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the flow serving `client`
    pub async fn lookup(&self, client: &SocketAddr) -> Option<FlowHandle> {
        self.flows.read().await.get(client).map(|entry| FlowHandle {
            id: entry.id,
            socket: entry.socket.clone(),
            last_activity: entry.last_activity,
        })
    }

    /// Track a new flow for `client` and return its id.
    ///
    /// A flow already tracked under the same client is closed so that at
    /// most one outbound socket exists per client.
    pub async fn insert(
        &self,
        client: SocketAddr,
        socket: Arc<UdpSocket>,
        closer: CancellationToken,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = FlowEntry {
            id,
            socket,
            last_activity: Instant::now(),
            closer,
        };
        if let Some(previous) = self.flows.write().await.insert(client, entry) {
            previous.close();
        }
        id
    }

    /// Refresh the activity time of `client`'s flow.
    ///
    /// No-op if the flow is already gone; returns whether it was found.
    pub async fn touch(&self, client: &SocketAddr) -> bool {
        match self.flows.write().await.get_mut(client) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove and close flow `id` of `client`.
    ///
    /// Returns false if the entry is gone or now belongs to a newer flow.
    pub async fn remove(&self, client: &SocketAddr, id: u64) -> bool {
        let mut flows = self.flows.write().await;
        match flows.get(client) {
            Some(entry) if entry.id == id => {}
            _ => return false,
        }
        if let Some(entry) = flows.remove(client) {
            entry.close();
        }
        true
    }

    /// Flows idle for longer than `idle_timeout` at `now`
    pub async fn idle_candidates(
        &self,
        now: Instant,
        idle_timeout: Duration,
    ) -> Vec<(SocketAddr, u64)> {
        self.flows
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.is_idle(now, idle_timeout))
            .map(|(client, entry)| (*client, entry.id))
            .collect()
    }

    /// Remove and close the given candidates.
    ///
    /// Candidates that were replaced or saw activity since the snapshot are
    /// kept. Returns the clients actually evicted.
    pub async fn evict(
        &self,
        candidates: &[(SocketAddr, u64)],
        now: Instant,
        idle_timeout: Duration,
    ) -> Vec<SocketAddr> {
        let mut flows = self.flows.write().await;
        let mut evicted = Vec::with_capacity(candidates.len());
        for (client, id) in candidates {
            let still_idle = matches!(
                flows.get(client),
                Some(entry) if entry.id == *id && entry.is_idle(now, idle_timeout)
            );
            if !still_idle {
                continue;
            }
            if let Some(entry) = flows.remove(client) {
                entry.close();
                evicted.push(*client);
            }
        }
        evicted
    }

    /// Remove and close every flow, returning how many there were
    pub async fn close_all(&self) -> usize {
        let mut flows = self.flows.write().await;
        let count = flows.len();
        for (_, entry) in flows.drain() {
            entry.close();
        }
        count
    }

    /// Number of tracked flows
    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }
}
