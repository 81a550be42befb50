//! Listener, upstream, and relay settings.

use std::collections::BTreeMap;
use std::time::Duration;

use mcpgate_core::constants::{DEFAULT_PROXY_PATH, DEFAULT_SUBPROTOCOL};
use serde::{Deserialize, Serialize};

/// Inbound HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path that accepts proxied WebSocket upgrades.
    pub path: String,
    /// Largest accepted WebSocket message in bytes, on both legs.
    pub max_message_size: usize,
    /// How long graceful shutdown waits for open connections, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            path: DEFAULT_PROXY_PATH.to_string(),
            max_message_size: 16 * 1024 * 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One upstream MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamServer {
    /// Stable identifier used in logs.
    pub id: String,
    /// Display name.
    pub name: String,
    /// `ws://` or `wss://` URL of the upstream.
    pub address: String,
    /// Subprotocol requested when a connection negotiated none.
    pub protocol: String,
}

impl Default for UpstreamServer {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "default".to_string(),
            address: String::new(),
            protocol: DEFAULT_SUBPROTOCOL.to_string(),
        }
    }
}

impl UpstreamServer {
    /// Default entry pointing at `address`.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Per-connection relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Upstream dial (TCP + TLS + handshake) timeout in milliseconds.
    pub dial_timeout_ms: u64,
    /// Close a session when no frame is received on a leg for this long.
    /// `0` disables the idle deadline.
    pub idle_timeout_ms: u64,
    /// Upper bound on sending close frames during teardown, in milliseconds.
    pub close_timeout_ms: u64,
    /// Extra headers sent on every upstream handshake.
    pub headers: BTreeMap<String, String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 10_000,
            idle_timeout_ms: 0,
            close_timeout_ms: 2_000,
            headers: BTreeMap::new(),
        }
    }
}

impl RelaySettings {
    /// Dial timeout as a [`Duration`].
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Idle deadline, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Close timeout as a [`Duration`].
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
