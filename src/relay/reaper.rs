//! Idle flow reaper
//!
//! Sweeps the connection table once per idle timeout and closes flows that
//! saw no traffic for longer than that.

use super::table::ConnectionTable;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run one sweep at `now`, returning how many flows were evicted.
///
/// Candidates are collected under the read lock and removed in a separate
/// write-locked pass.
pub(crate) async fn sweep(table: &ConnectionTable, now: Instant, idle_timeout: Duration) -> usize {
    let candidates = table.idle_candidates(now, idle_timeout).await;
    if candidates.is_empty() {
        return 0;
    }

    let evicted = table.evict(&candidates, now, idle_timeout).await;
    for client in &evicted {
        debug!(client = %client, "client timeout");
    }
    evicted.len()
}

/// Reap idle flows until `shutdown` fires.
///
/// Shutdown is only observed between sleeps, so one more sweep may run
/// after the relay is closed.
pub(crate) async fn run_reaper(
    table: ConnectionTable,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        tokio::time::sleep(idle_timeout).await;
        sweep(&table, Instant::now(), idle_timeout).await;
    }
    debug!("idle reaper stopped");
}
