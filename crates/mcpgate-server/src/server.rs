//! `GatewayServer`: Axum HTTP + `WebSocket` front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use mcpgate_relay::Gateway;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ConnectionTracker;
use crate::websocket::handler::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relays every accepted connection to the upstream.
    pub gateway: Arc<Gateway>,
    /// Shutdown coordinator; connection tokens are its children.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Active connection count.
    pub connections: Arc<ConnectionTracker>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Max client message size in bytes.
    pub max_message_size: usize,
}

/// The gateway's HTTP server.
pub struct GatewayServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<ConnectionTracker>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl GatewayServer {
    /// Create a new server relaying through `gateway`.
    pub fn new(config: ServerConfig, gateway: Gateway) -> Self {
        Self {
            config,
            gateway: Arc::new(gateway),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connections: Arc::new(ConnectionTracker::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            shutdown: Arc::clone(&self.shutdown),
            connections: Arc::clone(&self.connections),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    /// The task completes once [`ShutdownCoordinator::shutdown`] is called and
    /// in-flight HTTP requests finish.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let service = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        info!(
            %addr,
            path = %self.config.path,
            upstream = %self.gateway.upstream(),
            "gateway listening"
        );

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
            info!("server stopped");
        });

        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the connection tracker.
    pub fn connections(&self) -> &Arc<ConnectionTracker> {
        &self.connections
    }

    /// Get the gateway.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.active(),
        state.gateway.upstream(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
