//! Bidirectional frame relay.
//!
//! [`Relay::run`] owns one client leg and one upstream leg. It splits both,
//! spawns a pump per direction, and waits for the first of:
//!
//! - a pump finishing (end of stream, receive error, or send error)
//! - the cancellation token firing
//!
//! Whichever comes first aborts both pumps and closes both legs through a
//! single close gate. The gate is also armed in a drop guard, so a caller
//! that drops the `run` future before teardown still gets both legs closed.
//! Once teardown starts, the close runs in its own task and finishes even if
//! `run` is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use mcpgate_core::metrics::RELAY_FRAMES_TOTAL;
use mcpgate_core::{Direction, Frame};
use metrics::counter;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::FrameTransport;
use crate::error::{PumpError, RelayError, TransportError};

/// Default bound on sending close frames during teardown.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay tuning.
#[derive(Clone, Copy, Debug)]
pub struct RelayOptions {
    /// Fail a pump when its source leg is silent this long. `None` waits
    /// forever.
    pub idle_timeout: Option<Duration>,
    /// Bound on closing each leg.
    pub close_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Runs the two pumps for one proxied connection pair.
#[derive(Clone, Debug, Default)]
pub struct Relay {
    options: RelayOptions,
}

/// Write half of a leg as the pumps and the close gate see it.
trait FrameSink: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}

impl<T> FrameSink for T where T: Sink<Frame, Error = TransportError> + Send + Unpin + 'static {}

/// Result of one pump.
#[derive(Debug)]
struct PumpExit {
    direction: Direction,
    frames: u64,
    reason: PumpError,
}

impl Relay {
    /// Create a relay with the given options.
    pub fn new(options: RelayOptions) -> Self {
        Self { options }
    }

    /// The relay's options.
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Relay frames between `client` and `upstream` until one side ends,
    /// fails, or `cancel` fires. Both legs are closed exactly once before
    /// this returns.
    ///
    /// End of stream and errors that mean the peer went away return
    /// `Ok(())`. Cancellation returns [`RelayError::Cancelled`]; any other
    /// pump failure returns [`RelayError::Pump`] tagged with its direction.
    pub async fn run<C, U>(
        &self,
        cancel: &CancellationToken,
        client: C,
        upstream: U,
    ) -> Result<(), RelayError>
    where
        C: FrameTransport,
        U: FrameTransport,
    {
        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();
        let client_tx = Arc::new(Mutex::new(client_tx));
        let upstream_tx = Arc::new(Mutex::new(upstream_tx));

        let gate = Arc::new(CloseGate::new(
            Arc::clone(&client_tx),
            Arc::clone(&upstream_tx),
            self.options.close_timeout,
        ));

        let idle = self.options.idle_timeout;
        let mut pumps = Pumps {
            client_to_upstream: tokio::spawn(pump(
                Direction::ClientToUpstream,
                client_rx,
                upstream_tx,
                idle,
            )),
            upstream_to_client: tokio::spawn(pump(
                Direction::UpstreamToClient,
                upstream_rx,
                client_tx,
                idle,
            )),
            gate: Some(Arc::clone(&gate)),
        };

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                debug!("relay cancelled");
                Err(RelayError::Cancelled)
            }
            joined = &mut pumps.client_to_upstream => finish(Direction::ClientToUpstream, joined),
            joined = &mut pumps.upstream_to_client => finish(Direction::UpstreamToClient, joined),
        };

        // The other pump's result is not awaited.
        pumps.abort();
        // Detached: dropping `run` from here on cannot interrupt the close.
        let closing = tokio::spawn(async move { gate.close().await });
        pumps.disarm();
        if let Err(e) = closing.await {
            warn!(error = %e, "closing legs failed");
        }
        outcome
    }
}

fn finish(direction: Direction, joined: Result<PumpExit, JoinError>) -> Result<(), RelayError> {
    match joined {
        Ok(exit) => {
            debug!(
                direction = %exit.direction,
                frames = exit.frames,
                reason = %exit.reason,
                "pump finished"
            );
            if exit.reason.is_normal_close() {
                Ok(())
            } else {
                Err(RelayError::Pump {
                    direction: exit.direction,
                    source: exit.reason,
                })
            }
        }
        Err(e) => Err(RelayError::TaskFailed {
            direction,
            message: e.to_string(),
        }),
    }
}

/// Copy frames from `source` to `sink` until something stops the loop.
async fn pump<R, W>(
    direction: Direction,
    mut source: R,
    sink: Arc<Mutex<W>>,
    idle: Option<Duration>,
) -> PumpExit
where
    R: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
    W: FrameSink,
{
    let mut frames = 0_u64;
    let reason = loop {
        let received = match idle {
            Some(limit) => match tokio::time::timeout(limit, source.next()).await {
                Ok(received) => received,
                Err(_) => break PumpError::Receive(TransportError::Idle(limit)),
            },
            None => source.next().await,
        };
        let frame = match received {
            None => break PumpError::EndOfStream,
            Some(Err(e)) => break PumpError::Receive(e),
            Some(Ok(frame)) => frame,
        };

        trace!(%direction, kind = %frame.kind, len = frame.len(), "forwarding frame");
        if let Err(e) = sink.lock().await.send(frame).await {
            break PumpError::Send(e);
        }
        frames += 1;
        counter!(RELAY_FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    };

    PumpExit {
        direction,
        frames,
        reason,
    }
}

/// Closes both write halves, once, no matter how many paths ask.
struct CloseGate<A, B> {
    done: OnceCell<()>,
    client: Arc<Mutex<A>>,
    upstream: Arc<Mutex<B>>,
    timeout: Duration,
}

impl<A, B> CloseGate<A, B>
where
    A: FrameSink,
    B: FrameSink,
{
    fn new(client: Arc<Mutex<A>>, upstream: Arc<Mutex<B>>, timeout: Duration) -> Self {
        Self {
            done: OnceCell::new(),
            client,
            upstream,
            timeout,
        }
    }

    async fn close(&self) {
        let _ = self
            .done
            .get_or_init(|| async {
                tokio::join!(
                    close_leg("client", &self.client, self.timeout),
                    close_leg("upstream", &self.upstream, self.timeout),
                );
            })
            .await;
    }
}

async fn close_leg<W: FrameSink>(leg: &'static str, sink: &Mutex<W>, timeout: Duration) {
    let closing = async { sink.lock().await.close().await };
    match tokio::time::timeout(timeout, closing).await {
        Ok(Ok(())) => debug!(leg, "leg closed"),
        Ok(Err(e)) if e.is_normal_close() => debug!(leg, "leg already closed"),
        Ok(Err(e)) => debug!(leg, error = %e, "closing leg failed"),
        Err(_) => warn!(leg, ?timeout, "closing leg timed out"),
    }
}

/// Pump tasks plus the gate to fire if `run` is dropped before teardown.
struct Pumps<A, B>
where
    A: FrameSink,
    B: FrameSink,
{
    client_to_upstream: JoinHandle<PumpExit>,
    upstream_to_client: JoinHandle<PumpExit>,
    gate: Option<Arc<CloseGate<A, B>>>,
}

impl<A, B> Pumps<A, B>
where
    A: FrameSink,
    B: FrameSink,
{
    fn abort(&self) {
        self.client_to_upstream.abort();
        self.upstream_to_client.abort();
    }

    fn disarm(&mut self) {
        self.gate = None;
    }
}

impl<A, B> Drop for Pumps<A, B>
where
    A: FrameSink,
    B: FrameSink,
{
    fn drop(&mut self) {
        self.abort();
        let Some(gate) = self.gate.take() else {
            return;
        };
        // Dropped mid-relay: close from a detached task.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let _ = runtime.spawn(async move { gate.close().await });
        }
    }
}
