//! Relay error types.
//!
//! Failures are local to one proxied connection: a [`DialError`] or
//! [`RelayError`] ends that connection only. [`ConfigurationError`] is the
//! one startup-fatal error.

use std::io;
use std::time::Duration;

use mcpgate_core::{Direction, FrameKind};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;

/// Invalid upstream configuration, detected when building the factory.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// No upstream address configured.
    #[error("upstream address is empty")]
    MissingAddress,

    /// The address does not parse as a URL or has no host.
    #[error("invalid upstream address {address:?}: {reason}")]
    InvalidAddress {
        /// The configured address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Scheme other than `ws` or `wss`.
    #[error("unsupported upstream scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),

    /// An extra handshake header has an invalid name or value.
    #[error("invalid upstream header {name:?}: {reason}")]
    InvalidHeader {
        /// Header name as configured.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Failure to establish the upstream leg for one connection.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// TCP, TLS, or WebSocket handshake failure (including rejection).
    #[error("dial {url}: {source}")]
    Connect {
        /// Upstream URL.
        url: String,
        /// Underlying handshake error.
        #[source]
        source: tungstenite::Error,
    },

    /// The dial did not finish within the configured timeout.
    #[error("dial {url}: timed out after {timeout:?}")]
    Timeout {
        /// Upstream URL.
        url: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The connection's cancellation token fired while dialing.
    #[error("dial {url}: cancelled")]
    Cancelled {
        /// Upstream URL.
        url: String,
    },

    /// The handshake request could not be built.
    #[error("dial {url}: invalid request: {message}")]
    Request {
        /// Upstream URL.
        url: String,
        /// Error description.
        message: String,
    },
}

/// Frame could not be converted to or from a wire message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Text frame payload is not valid UTF-8.
    #[error("text frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The target message type cannot carry this frame kind.
    #[error("cannot encode {0} frame")]
    UnsupportedKind(FrameKind),
}

/// Receive or send failure on one leg.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Upstream (tungstenite) error.
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),

    /// Client (axum) WebSocket error.
    #[error("client socket: {0}")]
    Client(#[from] axum::Error),

    /// Frame conversion failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No frame arrived within the idle deadline.
    #[error("no frame received for {0:?}")]
    Idle(Duration),
}

impl TransportError {
    /// Whether the error means the peer went away rather than something
    /// broke: closed connection, reset without closing handshake, or EOF.
    pub fn is_normal_close(&self) -> bool {
        match self {
            Self::WebSocket(e) => is_normal_tungstenite(e),
            Self::Client(e) => is_normal_client(e),
            Self::Codec(_) | Self::Idle(_) => false,
        }
    }
}

fn is_normal_tungstenite(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(io) => is_normal_io(io),
        _ => false,
    }
}

fn is_normal_io(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}

// axum boxes the tungstenite error; find it in the source chain.
fn is_normal_client(err: &axum::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(ws) = inner.downcast_ref::<tungstenite::Error>() {
            return is_normal_tungstenite(ws);
        }
        if let Some(io) = inner.downcast_ref::<io::Error>() {
            return is_normal_io(io);
        }
        source = inner.source();
    }
    false
}

/// Why a single pump stopped.
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    /// The source leg ended (close frame or stream end).
    #[error("end of stream")]
    EndOfStream,

    /// Receiving from the source leg failed.
    #[error("receive: {0}")]
    Receive(#[source] TransportError),

    /// Sending to the destination leg failed.
    #[error("send: {0}")]
    Send(#[source] TransportError),
}

impl PumpError {
    /// End of stream or a transport error that [`TransportError::is_normal_close`].
    pub fn is_normal_close(&self) -> bool {
        match self {
            Self::EndOfStream => true,
            Self::Receive(e) | Self::Send(e) => e.is_normal_close(),
        }
    }
}

/// Abnormal end of a relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The governing cancellation token fired first.
    #[error("relay cancelled")]
    Cancelled,

    /// A pump stopped for a reason other than a normal close.
    #[error("{direction} {source}")]
    Pump {
        /// Which pump failed.
        direction: Direction,
        /// What failed.
        source: PumpError,
    },

    /// A pump task panicked.
    #[error("{direction} pump task failed: {message}")]
    TaskFailed {
        /// Which pump.
        direction: Direction,
        /// Join error description.
        message: String,
    },
}

/// Any error surfaced by the gateway for one connection or at startup.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid upstream configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Upstream dial failed.
    #[error(transparent)]
    Dial(#[from] DialError),

    /// Relay ended abnormally.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl GatewayError {
    /// Classification string for logs and metric labels.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Dial(DialError::Timeout { .. }) => "dial_timeout",
            Self::Dial(DialError::Cancelled { .. }) | Self::Relay(RelayError::Cancelled) => {
                "cancelled"
            }
            Self::Dial(_) => "dial",
            Self::Relay(RelayError::Pump { .. }) => "relay",
            Self::Relay(RelayError::TaskFailed { .. }) => "task_failed",
        }
    }
}
