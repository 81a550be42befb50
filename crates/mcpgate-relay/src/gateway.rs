//! Per-connection orchestration: dial the upstream, relay, report.

use std::fmt;
use std::time::Instant;

use futures::SinkExt;
use mcpgate_core::metrics::{
    RELAY_SESSION_DURATION_SECONDS, RELAY_SESSIONS_TOTAL, UPSTREAM_DIAL_FAILURES_TOTAL,
};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::codec::FrameTransport;
use crate::error::{DialError, GatewayError, RelayError};
use crate::relay::Relay;
use crate::upstream::UpstreamSessionFactory;

/// Lifecycle of one proxied connection.
///
/// `Dialing → Relaying → ClosedClean | ClosedError | ClosedCancelled`, or
/// straight from `Dialing` to a closed state when the dial fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Upstream dial in progress.
    Dialing,
    /// Both pumps running.
    Relaying,
    /// A leg ended normally.
    ClosedClean,
    /// Dial or relay failure.
    ClosedError,
    /// The connection's cancellation token fired.
    ClosedCancelled,
}

impl SessionState {
    /// Label used in logs and the `outcome` metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dialing => "dialing",
            Self::Relaying => "relaying",
            Self::ClosedClean => "closed_clean",
            Self::ClosedError => "closed_error",
            Self::ClosedCancelled => "closed_cancelled",
        }
    }

    /// Whether the session is over.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            Self::ClosedClean | Self::ClosedError | Self::ClosedCancelled
        )
    }

    /// Closed state for a relay outcome.
    pub fn from_relay(outcome: &Result<(), RelayError>) -> Self {
        match outcome {
            Ok(()) => Self::ClosedClean,
            Err(RelayError::Cancelled) => Self::ClosedCancelled,
            Err(_) => Self::ClosedError,
        }
    }

    /// Closed state for a failed dial.
    pub fn from_dial(err: &DialError) -> Self {
        match err {
            DialError::Cancelled { .. } => Self::ClosedCancelled,
            _ => Self::ClosedError,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The upstream factory and relay that every accepted connection goes
/// through.
#[derive(Clone, Debug)]
pub struct Gateway {
    factory: UpstreamSessionFactory,
    relay: Relay,
}

impl Gateway {
    /// Combine a factory and a relay.
    pub fn new(factory: UpstreamSessionFactory, relay: Relay) -> Self {
        Self { factory, relay }
    }

    /// The relay.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Upstream URL every connection is relayed to.
    pub fn upstream(&self) -> &str {
        self.factory.target().as_str()
    }

    /// Serve one accepted client connection until it ends.
    ///
    /// Dials the upstream with `negotiated` as the subprotocol, then relays
    /// until either leg closes or `cancel` fires. A failed dial closes the
    /// client leg and returns the [`DialError`]. Errors are logged here and
    /// never written into the client stream.
    #[instrument(skip_all, fields(protocol = %negotiated, upstream = %self.upstream()))]
    pub async fn handle_connection<C>(
        &self,
        cancel: &CancellationToken,
        mut client: C,
        negotiated: &str,
    ) -> Result<(), GatewayError>
    where
        C: FrameTransport,
    {
        let started = Instant::now();
        debug!(state = %SessionState::Dialing, "dialing upstream");

        let session = match self.factory.open_session(cancel, negotiated).await {
            Ok(session) => session,
            Err(e) => {
                let state = SessionState::from_dial(&e);
                counter!(UPSTREAM_DIAL_FAILURES_TOTAL).increment(1);
                counter!(RELAY_SESSIONS_TOTAL, "outcome" => state.as_str()).increment(1);
                let err = GatewayError::from(e);
                warn!(%state, kind = err.error_kind(), error = %err, "upstream dial failed");
                self.close_client(&mut client).await;
                return Err(err);
            }
        };

        info!(
            state = %SessionState::Relaying,
            accepted = session.protocol.as_deref().unwrap_or(""),
            "relay started"
        );
        let outcome = self
            .relay
            .run(cancel, client, session.into_transport())
            .await;

        let state = SessionState::from_relay(&outcome);
        counter!(RELAY_SESSIONS_TOTAL, "outcome" => state.as_str()).increment(1);
        histogram!(RELAY_SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match &outcome {
            Ok(()) | Err(RelayError::Cancelled) => info!(%state, "relay closed"),
            Err(e) => warn!(%state, error = %e, "relay closed with error"),
        }
        outcome.map_err(GatewayError::from)
    }

    async fn close_client<C: FrameTransport>(&self, client: &mut C) {
        let timeout = self.relay.options().close_timeout;
        match tokio::time::timeout(timeout, client.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "closing client failed"),
            Err(_) => debug!(?timeout, "closing client timed out"),
        }
    }
}
