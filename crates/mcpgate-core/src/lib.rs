//! # mcpgate-core
//!
//! Shared vocabulary for the MCP gateway crates.
//!
//! - **Frames**: [`Frame`] is a payload tagged with a [`FrameKind`]; pumps are
//!   identified by [`Direction`]
//! - **Subprotocol policy**: [`subprotocol::select_subprotocol`] picks the
//!   protocol spoken on one proxied connection
//! - **IDs**: [`ConnectionId`] newtype for per-connection log correlation
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests
//! - **Metrics**: metric names shared across crates

#![deny(unsafe_code)]

pub mod constants;
pub mod frame;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod subprotocol;

pub use frame::{Direction, Frame, FrameKind};
pub use ids::ConnectionId;
