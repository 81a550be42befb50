//! In-memory legs for relay and gateway tests.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use mcpgate_core::Frame;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::error::TransportError;

/// Channel-backed leg that counts close attempts.
pub(crate) struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    outgoing: mpsc::UnboundedSender<Frame>,
    closes: Arc<AtomicUsize>,
    stall_close: Arc<AtomicBool>,
}

/// The far side of a [`MockTransport`].
pub(crate) struct MockPeer {
    pub to_relay: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    pub from_relay: mpsc::UnboundedReceiver<Frame>,
    closes: Arc<AtomicUsize>,
    stall_close: Arc<AtomicBool>,
}

impl MockPeer {
    /// How many times the relay started closing this leg.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// End the leg's incoming stream, as a peer that went away would.
    pub fn end_stream(&mut self) {
        let (detached, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.to_relay, detached));
    }

    /// Make closing this leg hang until the caller gives up.
    pub fn stall_close(&self) {
        self.stall_close.store(true, Ordering::SeqCst);
    }
}

pub(crate) fn mock_pair() -> (MockTransport, MockPeer) {
    let (to_relay, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_relay) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    let stall_close = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            incoming,
            outgoing,
            closes: Arc::clone(&closes),
            stall_close: Arc::clone(&stall_close),
        },
        MockPeer {
            to_relay,
            from_relay,
            closes,
            stall_close,
        },
    )
}

impl Stream for MockTransport {
    type Item = Result<Frame, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().incoming.poll_recv(cx)
    }
}

impl Sink<Frame> for MockTransport {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        self.outgoing.send(frame).map_err(|_| {
            let broken = io::Error::from(io::ErrorKind::BrokenPipe);
            TransportError::WebSocket(tungstenite::Error::Io(broken))
        })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        if self.stall_close.load(Ordering::SeqCst) {
            // Never woken: only a caller-side timeout ends the close.
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}
