//! Metric names shared by the relay and the HTTP server.
//!
//! Recording goes through the `metrics` facade; the binary installs the
//! Prometheus recorder that `/metrics` renders.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Currently open client connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Failed upstream dials (counter).
pub const UPSTREAM_DIAL_FAILURES_TOTAL: &str = "upstream_dial_failures_total";
/// Finished relay sessions (counter, labels: outcome).
pub const RELAY_SESSIONS_TOTAL: &str = "relay_sessions_total";
/// Frames forwarded (counter, labels: direction).
pub const RELAY_FRAMES_TOTAL: &str = "relay_frames_total";
/// Relay session duration (histogram).
pub const RELAY_SESSION_DURATION_SECONDS: &str = "relay_session_duration_seconds";
