//! Conversion between WebSocket messages and relay [`Frame`]s.
//!
//! Two message types meet in the gateway: `axum`'s on the client leg and
//! `tungstenite`'s on the upstream leg. [`WireMessage`] gives both the same
//! pure decode/encode pair, and [`FrameSocket`] wraps a socket of either kind
//! into a `Stream + Sink` of frames so the relay never sees a message type.
//!
//! Decoding rules:
//! - text and binary messages become frames of the same kind, payload untouched
//! - ping/pong are answered by the WebSocket implementation and skipped here
//! - a close message ends the stream

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use bytes::Bytes;
use futures::{Sink, Stream};
use mcpgate_core::{Frame, FrameKind};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{CodecError, TransportError};

/// What one received message means to the relay.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A data frame to forward.
    Frame(Frame),
    /// Ping or pong, handled by the transport.
    Control,
    /// Close handshake started; no more frames.
    Close,
}

/// A WebSocket message type the relay can carry frames in.
pub trait WireMessage: Sized {
    /// Classify a received message.
    fn decode(self) -> Result<Decoded, CodecError>;

    /// Build the message that carries `frame` with the same kind and bytes.
    fn encode(frame: Frame) -> Result<Self, CodecError>;
}

impl WireMessage for tungstenite::Message {
    fn decode(self) -> Result<Decoded, CodecError> {
        Ok(match self {
            Self::Text(text) => Decoded::Frame(Frame::new(FrameKind::Text, Bytes::from(text))),
            Self::Binary(data) => Decoded::Frame(Frame::binary(data)),
            Self::Ping(_) | Self::Pong(_) => Decoded::Control,
            Self::Close(_) => Decoded::Close,
            Self::Frame(raw) => {
                let opcode = u8::from(raw.header().opcode);
                Decoded::Frame(Frame::new(FrameKind::Other(opcode), raw.into_payload()))
            }
        })
    }

    fn encode(frame: Frame) -> Result<Self, CodecError> {
        match frame.kind {
            FrameKind::Text => Ok(Self::Text(Utf8Bytes::try_from(frame.payload)?)),
            FrameKind::Binary => Ok(Self::Binary(frame.payload)),
            kind @ FrameKind::Other(_) => Err(CodecError::UnsupportedKind(kind)),
        }
    }
}

impl WireMessage for ClientMessage {
    fn decode(self) -> Result<Decoded, CodecError> {
        Ok(match self {
            Self::Text(text) => Decoded::Frame(Frame::new(
                FrameKind::Text,
                Bytes::copy_from_slice(text.as_str().as_bytes()),
            )),
            Self::Binary(data) => Decoded::Frame(Frame::binary(data)),
            Self::Ping(_) | Self::Pong(_) => Decoded::Control,
            Self::Close(_) => Decoded::Close,
        })
    }

    fn encode(frame: Frame) -> Result<Self, CodecError> {
        match frame.kind {
            FrameKind::Text => {
                let text = std::str::from_utf8(&frame.payload)?;
                Ok(Self::Text(text.into()))
            }
            FrameKind::Binary => Ok(Self::Binary(frame.payload)),
            kind @ FrameKind::Other(_) => Err(CodecError::UnsupportedKind(kind)),
        }
    }
}

/// Anything the relay can pump frames through.
pub trait FrameTransport:
    Stream<Item = Result<Frame, TransportError>>
    + Sink<Frame, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> FrameTransport for T where
    T: Stream<Item = Result<Frame, TransportError>>
        + Sink<Frame, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}

/// Frame adapter over a WebSocket of message type `M`.
pub struct FrameSocket<S, M> {
    inner: S,
    _message: PhantomData<fn() -> M>,
}

/// The raw upstream connection produced by a dial.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upstream leg as seen by the relay.
pub type UpstreamTransport = FrameSocket<UpstreamStream, tungstenite::Message>;

/// Client leg as seen by the relay.
pub type ClientTransport = FrameSocket<WebSocket, ClientMessage>;

impl<S, M> FrameSocket<S, M> {
    /// Wrap a socket.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _message: PhantomData,
        }
    }
}

impl<S, M, E> Stream for FrameSocket<S, M>
where
    S: Stream<Item = Result<M, E>> + Unpin,
    M: WireMessage,
    E: Into<TransportError>,
{
    type Item = Result<Frame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(received) = ready!(Pin::new(&mut self.inner).poll_next(cx)) else {
                return Poll::Ready(None);
            };
            let decoded = received
                .map_err(Into::into)
                .and_then(|msg| msg.decode().map_err(TransportError::from));
            match decoded {
                Ok(Decoded::Frame(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(Decoded::Control) => {}
                Ok(Decoded::Close) => return Poll::Ready(None),
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
        }
    }
}

impl<S, M> Sink<Frame> for FrameSocket<S, M>
where
    S: Sink<M> + Unpin,
    S::Error: Into<TransportError>,
    M: WireMessage,
{
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        let msg = M::encode(frame)?;
        Pin::new(&mut self.inner).start_send(msg).map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(Into::into)
    }
}
