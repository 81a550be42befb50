//! Package-level constants.

use std::time::Duration;

/// Current version of the gateway (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "mcpgate";

/// Subprotocol requested when the client offers none.
pub const DEFAULT_SUBPROTOCOL: &str = "mcp";

/// Upstream dial timeout when none is configured.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP path that accepts proxied WebSocket upgrades.
pub const DEFAULT_PROXY_PATH: &str = "/mcp";
