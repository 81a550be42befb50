//! Connection identifiers.
//!
//! Each accepted client connection gets a [`ConnectionId`] so that the
//! handshake, dial, and relay log lines for one proxied session can be
//! correlated. IDs are UUID v7 (time-ordered) with a `conn_` prefix.

use std::fmt;

use uuid::Uuid;

/// Identifier of one proxied client connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
