//! Server configuration.

use std::time::Duration;

use mcpgate_core::constants::DEFAULT_PROXY_PATH;
use mcpgate_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the gateway's HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path accepting `WebSocket` upgrades.
    pub path: String,
    /// Max client `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Upper bound on graceful shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: DEFAULT_PROXY_PATH.into(),
            max_message_size: 16 * 1024 * 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Listener configuration from loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            path: normalize_path(&settings.path),
            max_message_size: settings.max_message_size,
            shutdown_timeout_ms: settings.shutdown_timeout_ms,
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Graceful shutdown bound as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        DEFAULT_PROXY_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
