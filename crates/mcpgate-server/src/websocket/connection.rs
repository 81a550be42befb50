//! Per-connection context and connection accounting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use mcpgate_core::ConnectionId;
use mcpgate_core::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use metrics::{counter, gauge};

/// What the accept boundary learned about one client connection.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Subprotocol selected for this connection.
    pub protocol: String,
    /// Remote address, when the listener records it.
    pub peer: Option<SocketAddr>,
    /// `Origin` request header, if sent.
    pub origin: Option<String>,
    /// When the upgrade was accepted.
    pub accepted_at: Instant,
}

impl ConnectionContext {
    /// Context for a freshly accepted connection.
    pub fn new(protocol: String, peer: Option<SocketAddr>, origin: Option<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            protocol,
            peer,
            origin,
            accepted_at: Instant::now(),
        }
    }
}

/// Counts connections currently being relayed.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicUsize,
}

impl ConnectionTracker {
    /// Create a tracker with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections currently open.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        let _ = self.active.fetch_add(1, Ordering::Relaxed);
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }
}

/// Keeps one connection counted as active.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.tracker.active.fetch_sub(1, Ordering::Relaxed);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
