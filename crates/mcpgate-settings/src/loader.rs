//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. Deep-merge the first existing config file over the defaults
//! 3. Apply `MCPGATE_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{GatewaySettings, UpstreamServer};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MCPGATE_CONFIG";

/// Config file candidates in lookup order.
///
/// `env_path` (the value of [`CONFIG_ENV`]) comes first when set, followed by
/// `configs/config.json` and `configs/config.example.json` relative to the
/// working directory.
pub fn config_candidates(env_path: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);
    if let Some(path) = env_path.filter(|p| !p.is_empty()) {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(Path::new("configs").join("config.json"));
    candidates.push(Path::new("configs").join("config.example.json"));
    candidates
}

/// Load settings from the first existing candidate, with env overrides.
///
/// Returns the settings and the file they came from, or `None` when no
/// candidate exists and compiled defaults were used.
pub fn load_settings() -> Result<(GatewaySettings, Option<PathBuf>)> {
    let env_path = std::env::var(CONFIG_ENV).ok();
    let candidates = config_candidates(env_path.as_deref());

    let source = candidates.into_iter().find(|p| p.is_file());
    let merged = match &source {
        Some(path) => {
            debug!(?path, "loading settings from file");
            merge_file(path)?
        }
        None => {
            debug!("no config file found, using defaults");
            serde_json::to_value(GatewaySettings::default())?
        }
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok((settings, source))
}

/// Load settings from an explicit path with env overrides.
///
/// Unlike [`load_settings`], a missing file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    if !path.exists() {
        return Err(SettingsError::NotFound(path.to_path_buf()));
    }
    let mut settings: GatewaySettings = serde_json::from_value(merge_file(path)?)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<Value> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;
    let content = std::fs::read_to_string(path)?;
    let user: Value = serde_json::from_str(&content)?;
    Ok(deep_merge(defaults, user))
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `MCPGATE_*` environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_overrides_from<F>(settings: &mut GatewaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("MCPGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("MCPGATE_PORT") {
        match parse_u16_range(&v, 1, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "MCPGATE_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("MCPGATE_UPSTREAM_URL") {
        match settings.servers.first_mut() {
            Some(first) => first.address = v,
            None => settings.servers.push(UpstreamServer::with_address(v)),
        }
    }
    if let Some(v) = read("MCPGATE_DIAL_TIMEOUT_MS") {
        match parse_u64_range(&v, 100, 600_000) {
            Some(ms) => settings.relay.dial_timeout_ms = ms,
            None => warn!(key = "MCPGATE_DIAL_TIMEOUT_MS", value = %v, "invalid timeout env var, ignoring"),
        }
    }
    if let Some(v) = read("MCPGATE_IDLE_TIMEOUT_MS") {
        match parse_u64_range(&v, 0, 86_400_000) {
            Some(ms) => settings.relay.idle_timeout_ms = ms,
            None => warn!(key = "MCPGATE_IDLE_TIMEOUT_MS", value = %v, "invalid timeout env var, ignoring"),
        }
    }
    if let Some(v) = read("MCPGATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("MCPGATE_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => warn!(key = "MCPGATE_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within an inclusive range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
