//! Upstream session factory.
//!
//! The factory validates the upstream address once at startup and keeps an
//! immutable [`SessionConfig`] template. Every client connection gets its own
//! copy of the template with the subprotocol that connection negotiated, and
//! its own dial. Nothing is shared between dials, so concurrent
//! [`open_session`](UpstreamSessionFactory::open_session) calls need no
//! locking.

use std::time::Duration;

use mcpgate_core::constants::{DEFAULT_DIAL_TIMEOUT, DEFAULT_SUBPROTOCOL};
use mcpgate_core::subprotocol;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{ProtocolError, SubProtocolError};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::{Position, Url};

use crate::codec::{FrameSocket, UpstreamStream, UpstreamTransport};
use crate::error::{ConfigurationError, DialError};

/// Options applied to every upstream session.
#[derive(Clone, Debug)]
pub struct UpstreamOptions {
    /// Subprotocol requested when a connection negotiated none.
    pub subprotocol: String,
    /// Bound on TCP connect, TLS, and the WebSocket handshake together.
    pub dial_timeout: Duration,
    /// Extra handshake headers as `(name, value)`.
    pub headers: Vec<(String, String)>,
    /// Largest accepted upstream message in bytes (`None` keeps the
    /// tungstenite default).
    pub max_message_size: Option<usize>,
}

impl Default for UpstreamOptions {
    fn default() -> Self {
        Self {
            subprotocol: DEFAULT_SUBPROTOCOL.to_string(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            headers: Vec::new(),
            max_message_size: None,
        }
    }
}

/// Connection configuration for one upstream session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Upstream URL.
    pub target: Url,
    /// `Origin` header value derived from the target.
    pub origin: String,
    /// Requested subprotocol.
    pub subprotocol: String,
    /// Dial timeout.
    pub dial_timeout: Duration,
    /// Extra handshake headers.
    pub headers: HeaderMap,
    /// Largest accepted message in bytes.
    pub max_message_size: Option<usize>,
}

impl SessionConfig {
    /// Handshake request. `with_protocol` controls whether the
    /// `Sec-WebSocket-Protocol` header is sent.
    fn request(&self, with_protocol: bool) -> Result<Request, DialError> {
        let invalid = |message: String| DialError::Request {
            url: self.target.to_string(),
            message,
        };

        let mut request = self
            .target
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        let origin = HeaderValue::from_str(&self.origin).map_err(|e| invalid(e.to_string()))?;

        let headers = request.headers_mut();
        let _ = headers.insert(header::ORIGIN, origin);
        if with_protocol {
            let protocol =
                HeaderValue::from_str(&self.subprotocol).map_err(|e| invalid(e.to_string()))?;
            let _ = headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
        }
        for (name, value) in &self.headers {
            let _ = headers.insert(name.clone(), value.clone());
        }
        Ok(request)
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if self.max_message_size.is_some() {
            config.max_message_size = self.max_message_size;
            config.max_frame_size = self.max_message_size;
        }
        config
    }
}

/// A dialed upstream connection.
#[derive(Debug)]
pub struct UpstreamSession {
    /// The live WebSocket stream.
    pub stream: UpstreamStream,
    /// Subprotocol the upstream accepted, if it sent one.
    pub protocol: Option<String>,
}

impl UpstreamSession {
    /// Wrap the stream for the relay.
    pub fn into_transport(self) -> UpstreamTransport {
        FrameSocket::new(self.stream)
    }
}

/// Produces one configured, dialed upstream session per client connection.
#[derive(Clone, Debug)]
pub struct UpstreamSessionFactory {
    template: SessionConfig,
}

impl UpstreamSessionFactory {
    /// Validate `address` and build the session template.
    ///
    /// The address must be a `ws://` or `wss://` URL with a host. The origin
    /// sent upstream is the same host and port under `http`/`https`.
    pub fn new(address: &str, options: UpstreamOptions) -> Result<Self, ConfigurationError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigurationError::MissingAddress);
        }

        let target = Url::parse(address).map_err(|e| ConfigurationError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        let origin_scheme = match target.scheme() {
            "ws" => "http",
            "wss" => "https",
            other => return Err(ConfigurationError::UnsupportedScheme(other.to_string())),
        };
        if target.host_str().is_none_or(str::is_empty) {
            return Err(ConfigurationError::InvalidAddress {
                address: address.to_string(),
                reason: "missing host".to_string(),
            });
        }
        let origin = format!(
            "{origin_scheme}://{}",
            &target[Position::BeforeHost..Position::AfterPort]
        );

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let invalid = |reason: String| ConfigurationError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            let _ = headers.insert(header_name, header_value);
        }

        Ok(Self {
            template: SessionConfig {
                target,
                origin,
                subprotocol: subprotocol::or_default(&options.subprotocol).to_string(),
                dial_timeout: options.dial_timeout,
                headers,
                max_message_size: options.max_message_size,
            },
        })
    }

    /// The upstream URL.
    pub fn target(&self) -> &Url {
        &self.template.target
    }

    /// The immutable template.
    pub fn template(&self) -> &SessionConfig {
        &self.template
    }

    /// Independent copy of the template carrying `negotiated` as its
    /// subprotocol. A blank `negotiated` keeps the template's subprotocol
    /// (`"mcp"` unless configured otherwise).
    pub fn session_config(&self, negotiated: &str) -> SessionConfig {
        let mut config = self.template.clone();
        let negotiated = negotiated.trim();
        if !negotiated.is_empty() {
            negotiated.clone_into(&mut config.subprotocol);
        }
        config
    }

    /// Dial the upstream for one client connection.
    ///
    /// An upstream that answers the handshake without choosing a subprotocol
    /// is dialed once more without offering one; its session carries
    /// `protocol: None`. The retry shares the same deadline.
    ///
    /// Gives up with [`DialError::Timeout`] after the dial timeout and with
    /// [`DialError::Cancelled`] as soon as `cancel` fires.
    pub async fn open_session(
        &self,
        cancel: &CancellationToken,
        negotiated: &str,
    ) -> Result<UpstreamSession, DialError> {
        let config = self.session_config(negotiated);
        let url = config.target.to_string();
        let request = config.request(true)?;
        let fallback = config.request(false)?;

        debug!(%url, protocol = %config.subprotocol, "dialing upstream");
        let dial = async {
            let ws_config = Some(config.websocket_config());
            match tokio_tungstenite::connect_async_with_config(request, ws_config, false).await {
                Err(e) if is_missing_subprotocol(&e) => {
                    debug!(
                        url = %config.target,
                        "upstream chose no subprotocol, redialing without one"
                    );
                    let ws_config = Some(config.websocket_config());
                    tokio_tungstenite::connect_async_with_config(fallback, ws_config, false).await
                }
                other => other,
            }
        };

        let dialed = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DialError::Cancelled { url }),
            result = tokio::time::timeout(config.dial_timeout, dial) => result,
        };

        let (stream, response) = match dialed {
            Err(_) => {
                return Err(DialError::Timeout {
                    url,
                    timeout: config.dial_timeout,
                });
            }
            Ok(Err(source)) => return Err(DialError::Connect { url, source }),
            Ok(Ok(pair)) => pair,
        };

        let protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        debug!(%url, accepted = ?protocol, "upstream handshake complete");
        Ok(UpstreamSession { stream, protocol })
    }
}

/// The upstream completed the handshake but did not echo a subprotocol.
fn is_missing_subprotocol(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(
            SubProtocolError::NoSubProtocol
        ))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::{SinkExt, StreamExt};
    use mcpgate_core::Frame;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response,
    };

    fn factory(address: &str) -> UpstreamSessionFactory {
        UpstreamSessionFactory::new(address, UpstreamOptions::default()).unwrap()
    }

    #[test]
    fn rejects_empty_address() {
        assert_matches!(
            UpstreamSessionFactory::new("  ", UpstreamOptions::default()),
            Err(ConfigurationError::MissingAddress)
        );
    }

    #[test]
    fn rejects_unparseable_address() {
        assert_matches!(
            UpstreamSessionFactory::new("not a url", UpstreamOptions::default()),
            Err(ConfigurationError::InvalidAddress { .. })
        );
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        assert_matches!(
            UpstreamSessionFactory::new("http://localhost:8080", UpstreamOptions::default()),
            Err(ConfigurationError::UnsupportedScheme(s)) if s == "http"
        );
    }

    #[test]
    fn rejects_invalid_header() {
        let options = UpstreamOptions {
            headers: vec![("bad header".into(), "v".into())],
            ..UpstreamOptions::default()
        };
        assert_matches!(
            UpstreamSessionFactory::new("ws://localhost:1", options),
            Err(ConfigurationError::InvalidHeader { name, .. }) if name == "bad header"
        );
    }

    #[test]
    fn origin_follows_scheme() {
        assert_eq!(factory("ws://localhost:7000/mcp").template().origin, "http://localhost:7000");
        assert_eq!(factory("wss://mcp.example.com/ws").template().origin, "https://mcp.example.com");
    }

    #[test]
    fn session_config_overrides_subprotocol_only() {
        let factory = factory("ws://localhost:7000/mcp");
        let config = factory.session_config("custom");
        assert_eq!(config.subprotocol, "custom");
        assert_eq!(config.target.as_str(), "ws://localhost:7000/mcp");
        assert_eq!(factory.template().subprotocol, "mcp");
    }

    #[test]
    fn session_config_defaults_blank_subprotocol() {
        let factory = factory("ws://localhost:7000");
        assert_eq!(factory.session_config("").subprotocol, "mcp");
    }

    #[test]
    fn blank_subprotocol_keeps_configured_default() {
        let options = UpstreamOptions {
            subprotocol: "mcp.v2".into(),
            ..UpstreamOptions::default()
        };
        let factory = UpstreamSessionFactory::new("ws://localhost:7000", options).unwrap();
        assert_eq!(factory.session_config("  ").subprotocol, "mcp.v2");
        assert_eq!(factory.session_config("mcp").subprotocol, "mcp");
    }

    #[test]
    fn request_carries_origin_protocol_and_headers() {
        let options = UpstreamOptions {
            headers: vec![("X-Gateway".into(), "mcpgate".into())],
            ..UpstreamOptions::default()
        };
        let factory = UpstreamSessionFactory::new("ws://127.0.0.1:9/mcp", options).unwrap();
        let request = factory.session_config("mcp").request(true).unwrap();
        let headers = request.headers();
        assert_eq!(headers[header::ORIGIN], "http://127.0.0.1:9");
        assert_eq!(headers[header::SEC_WEBSOCKET_PROTOCOL], "mcp");
        assert_eq!(headers["x-gateway"], "mcpgate");

        let bare = factory.session_config("mcp").request(false).unwrap();
        assert!(!bare.headers().contains_key(header::SEC_WEBSOCKET_PROTOCOL));
        assert_eq!(bare.headers()["x-gateway"], "mcpgate");
    }

    #[test]
    fn only_missing_subprotocol_triggers_redial() {
        let missing = tungstenite::Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(
            SubProtocolError::NoSubProtocol,
        ));
        assert!(is_missing_subprotocol(&missing));
        let other = tungstenite::Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(
            SubProtocolError::InvalidSubProtocol,
        ));
        assert!(!is_missing_subprotocol(&other));
        assert!(!is_missing_subprotocol(&tungstenite::Error::ConnectionClosed));
    }

    async fn refused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/mcp")
    }

    #[tokio::test]
    async fn refused_dial_is_connect_error() {
        let factory = factory(&refused_address().await);
        let result = factory.open_session(&CancellationToken::new(), "mcp").await;
        assert_matches!(result, Err(DialError::Connect { .. }));
    }

    #[tokio::test]
    async fn cancelled_dial() {
        let factory = factory(&refused_address().await);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = factory.open_session(&cancel, "mcp").await;
        assert_matches!(result, Err(DialError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        // Accepts TCP but never answers the handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let options = UpstreamOptions {
            dial_timeout: Duration::from_millis(200),
            ..UpstreamOptions::default()
        };
        let factory = UpstreamSessionFactory::new(&format!("ws://{addr}"), options).unwrap();
        let result = factory.open_session(&CancellationToken::new(), "mcp").await;
        assert_matches!(
            result,
            Err(DialError::Timeout { timeout, .. }) if timeout == Duration::from_millis(200)
        );
    }

    #[tokio::test]
    async fn dial_negotiates_requested_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<(String, String)>();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let callback = |req: &ServerRequest, mut resp: Response| {
                let protocol = req.headers()[header::SEC_WEBSOCKET_PROTOCOL].clone();
                let origin = req.headers()[header::ORIGIN].to_str().unwrap().to_string();
                let _ = seen_tx.send((protocol.to_str().unwrap().to_string(), origin));
                let _ = resp.headers_mut().insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
                Ok::<_, ErrorResponse>(resp)
            };
            let _ws = tokio_tungstenite::accept_hdr_async(socket, callback).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let factory = factory(&format!("ws://{addr}/mcp"));
        let session = factory.open_session(&CancellationToken::new(), "custom").await.unwrap();
        assert_eq!(session.protocol.as_deref(), Some("custom"));

        let (protocol, origin) = seen_rx.await.unwrap();
        assert_eq!(protocol, "custom");
        assert_eq!(origin, format!("http://{addr}"));
    }

    #[tokio::test]
    async fn upstream_without_subprotocol_is_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let _conn = tokio::spawn(async move {
                    // Plain accept: never answers with a subprotocol.
                    let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() && ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let factory = factory(&format!("ws://{addr}/mcp"));
        let session = factory.open_session(&CancellationToken::new(), "mcp").await.unwrap();
        assert_eq!(session.protocol, None);

        let mut transport = session.into_transport();
        transport.send(Frame::text("hello")).await.unwrap();
        assert_eq!(transport.next().await.unwrap().unwrap(), Frame::text("hello"));
    }
}
