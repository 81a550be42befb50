//! `WebSocket` accept boundary.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `handler` | Upgrade, subprotocol selection, handoff to the gateway |
//! | `connection` | Per-connection context and the active connection count |

pub mod connection;
pub mod handler;
