//! Relay frames and pump directions.
//!
//! A [`Frame`] is the unit a pump moves from one leg to the other: an opaque
//! payload plus the kind tag it arrived with. The relay never looks inside
//! the payload, so the same bytes and the same tag leave on the other leg.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Discriminator carried alongside every frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
    /// Any other data opcode, kept as the raw opcode value.
    Other(u8),
}

impl FrameKind {
    /// Short label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(op) => write!(f, "other({op:#x})"),
            kind => f.write_str(kind.as_str()),
        }
    }
}

/// One discrete message moving through the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Kind tag observed on receipt.
    pub kind: FrameKind,
    /// Payload bytes, forwarded untouched.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from a kind and payload.
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Text frame. The payload is the UTF-8 encoding of `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Text, Bytes::from(text.into()))
    }

    /// Binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Binary, payload)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Which way a pump copies frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frames received from the client, sent to the upstream.
    ClientToUpstream,
    /// Frames received from the upstream, sent to the client.
    UpstreamToClient,
}

impl Direction {
    /// Label used in error messages and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientToUpstream => "client->upstream",
            Self::UpstreamToClient => "upstream->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
