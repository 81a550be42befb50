//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their compiled default.

mod server;

pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the gateway.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "servers": [{ "id": "local", "address": "ws://127.0.0.1:7000/mcp" }],
///   "relay": { "dialTimeoutMs": 5000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Inbound listener settings.
    pub server: ServerSettings,
    /// Configured upstream MCP servers. The first one is proxied to.
    pub servers: Vec<UpstreamServer>,
    /// Per-connection relay settings.
    pub relay: RelaySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl GatewaySettings {
    /// The upstream every connection is relayed to: the first configured
    /// server.
    pub fn default_server(&self) -> Result<&UpstreamServer> {
        self.servers.first().ok_or(SettingsError::NoUpstream)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `"info"`,
    /// `"mcpgate_relay=debug"`).
    pub level: String,
    /// Emit one JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
