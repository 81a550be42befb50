//! # mcpgate-server
//!
//! Axum HTTP + `WebSocket` front end for the MCP gateway.
//!
//! - `GET /mcp`: `WebSocket` upgrade with subprotocol negotiation; each
//!   accepted connection is relayed to the upstream by a
//!   [`Gateway`](mcpgate_relay::Gateway)
//! - `GET /health`: liveness and active connection count
//! - `GET /metrics`: Prometheus text format
//! - Graceful shutdown via `CancellationToken`; every connection's token is a
//!   child of the shutdown token

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, GatewayServer};
pub use shutdown::ShutdownCoordinator;
