//! # mcpgate-settings
//!
//! Configuration for the MCP gateway, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: the first existing candidate of `$MCPGATE_CONFIG`,
//!    `configs/config.json`, `configs/config.example.json` (deep-merged over
//!    defaults)
//! 3. **Environment variables**: `MCPGATE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mcpgate_settings::load_settings;
//!
//! let (settings, source) = load_settings().unwrap();
//! let upstream = settings.default_server().unwrap();
//! println!("proxying to {} (config: {source:?})", upstream.address);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{config_candidates, deep_merge, load_settings, load_settings_from_path};
pub use types::*;
