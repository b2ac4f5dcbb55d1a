//! Connection identity and in-flight tracking.
//!
//! # Responsibilities
//! - Give every accepted connection (one transaction) a unique id for logs
//! - Count transactions still running so the binary can drain after stop
//!
//! Stopping the listener never waits on this tracker; draining is opt-in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::observability::metrics;

/// Relaxed is enough: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection and the transaction it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts live transactions.
///
/// Cloning shares the same counter.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    in_flight: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            in_flight: Arc::new(tx),
        }
    }

    /// Record a transaction as started. The returned guard ends it on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.in_flight.send_modify(|count| *count += 1);
        metrics::record_in_flight(*self.in_flight.borrow());
        ConnectionGuard {
            in_flight: Arc::clone(&self.in_flight),
            id,
        }
    }

    pub fn in_flight(&self) -> u64 {
        *self.in_flight.borrow()
    }

    /// Wait until no transaction is running, or `timeout` elapses.
    ///
    /// Returns true if the tracker drained in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.in_flight.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0))
            .await
            .map(|changed| changed.is_ok())
            .unwrap_or(false)
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one transaction as live for as long as it is held.
#[derive(Debug)]
pub struct ConnectionGuard {
    in_flight: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
        metrics::record_in_flight(*self.in_flight.borrow());
        tracing::trace!(connection_id = %self.id, "Transaction finished");
    }
}
