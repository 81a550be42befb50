//! # mcpgate-relay
//!
//! Connection-scoped relay between one WebSocket client and one upstream MCP
//! server.
//!
//! - **Upstream sessions**: [`UpstreamSessionFactory`] validates the upstream
//!   address once and dials a fresh connection per client, carrying the
//!   client's negotiated subprotocol
//! - **Frame codec**: [`FrameSocket`] turns any WebSocket message stream into a
//!   [`Frame`](mcpgate_core::Frame) stream and sink
//! - **Relay**: [`Relay::run`] pumps frames both ways until either leg ends, an
//!   error occurs, or the cancellation token fires, then closes both legs once
//! - **Gateway**: [`Gateway::handle_connection`] wires the three together for
//!   one accepted client

#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use codec::{ClientTransport, FrameSocket, FrameTransport, UpstreamTransport, WireMessage};
pub use error::{
    CodecError, ConfigurationError, DialError, GatewayError, PumpError, RelayError, TransportError,
};
pub use gateway::{Gateway, SessionState};
pub use relay::{Relay, RelayOptions};
pub use upstream::{SessionConfig, UpstreamOptions, UpstreamSession, UpstreamSessionFactory};
