//! `WebSocket` upgrade handler.
//!
//! Selects the subprotocol from the client's offers, echoes it in the
//! handshake, and hands the upgraded socket to the gateway under a child of
//! the shutdown token.

use std::net::SocketAddr;

use axum::Extension;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use mcpgate_core::subprotocol::select_subprotocol;
use mcpgate_relay::{ClientTransport, FrameSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ConnectionContext;
use crate::server::AppState;

/// GET on the proxy path: upgrade and relay.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let offered = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok());
    let protocol = select_subprotocol(offered);
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);

    let ctx = ConnectionContext::new(protocol, peer, origin);
    let cancel = state.shutdown.child_token();
    let max_message_size = state.max_message_size;

    ws.protocols([ctx.protocol.clone()])
        .max_message_size(max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, state, ctx, cancel))
}

/// Relay one upgraded client connection until it ends.
#[instrument(
    skip_all,
    fields(
        conn_id = %ctx.id,
        protocol = %ctx.protocol,
        peer = ?ctx.peer,
        origin = ctx.origin.as_deref().unwrap_or(""),
    )
)]
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) {
    let _active = state.connections.track();
    info!("client connected");

    let client: ClientTransport = FrameSocket::new(socket);
    if let Err(e) = state
        .gateway
        .handle_connection(&cancel, client, &ctx.protocol)
        .await
    {
        // Already logged with full detail by the gateway.
        debug!(kind = e.error_kind(), "connection ended with error");
    }

    info!(
        duration_ms = ctx.accepted_at.elapsed().as_millis(),
        "client disconnected"
    );
}
