//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Client connections currently being relayed.
    pub connections: usize,
    /// Upstream URL connections are relayed to.
    pub upstream: String,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, upstream: &str) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        upstream: upstream.to_string(),
    }
}
