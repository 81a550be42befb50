//! End-to-end integration tests: real WebSocket client, gateway, and a real
//! echo upstream.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};

use mcpgate_relay::{Gateway, Relay, UpstreamOptions, UpstreamSessionFactory};
use mcpgate_server::config::ServerConfig;
use mcpgate_server::server::GatewayServer;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Subprotocol the echo upstream refuses to accept.
const REJECTED_PROTOCOL: &str = "reject";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct EchoUpstream {
    url: String,
    /// One message per upstream connection that ended.
    closed: mpsc::UnboundedReceiver<()>,
}

/// Boot an upstream that echoes text and binary frames and answers with the
/// requested subprotocol.
async fn boot_upstream() -> EchoUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed) = mpsc::unbounded_channel();

    let _server = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let closed_tx = closed_tx.clone();
            let _conn = tokio::spawn(async move {
                let callback = |req: &Request, mut resp: Response| {
                    let Some(protocol) = req.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned() else {
                        return Ok(resp);
                    };
                    if protocol == REJECTED_PROTOCOL {
                        let mut refusal = ErrorResponse::new(Some("protocol refused".into()));
                        *refusal.status_mut() = StatusCode::FORBIDDEN;
                        return Err(refusal);
                    }
                    let _ = resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                        break;
                    }
                }
                let _ = closed_tx.send(());
            });
        }
    });

    EchoUpstream {
        url: format!("ws://{addr}/mcp"),
        closed,
    }
}

/// Boot an echo upstream that ignores subprotocols entirely.
async fn boot_plain_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let _conn = tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    format!("ws://{addr}/mcp")
}

/// Boot a gateway in front of `upstream` and return its address.
async fn boot_gateway(upstream: &str) -> (std::net::SocketAddr, Arc<GatewayServer>) {
    let factory = UpstreamSessionFactory::new(upstream, UpstreamOptions::default()).unwrap();
    let gateway = Gateway::new(factory, Relay::default());
    let server = Arc::new(GatewayServer::new(ServerConfig::default(), gateway));
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

async fn connect(addr: std::net::SocketAddr, protocol: Option<&str>) -> (WsStream, Option<String>) {
    let mut request = format!("ws://{addr}/mcp").into_client_request().unwrap();
    if let Some(protocol) = protocol {
        let _ = request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(protocol).unwrap());
    }
    let (ws, resp) = timeout(TIMEOUT, connect_async(request))
        .await
        .unwrap()
        .unwrap();
    let accepted = resp
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .map(|v| v.to_str().unwrap().to_owned());
    (ws, accepted)
}

/// Next data frame, skipping control frames.
async fn recv(ws: &mut WsStream) -> Option<Message> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            Some(Ok(msg)) if msg.is_text() || msg.is_binary() => return Some(msg),
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn echoes_json_rpc_text() {
    let upstream = boot_upstream().await;
    let (addr, _server) = boot_gateway(&upstream.url).await;
    let (mut ws, _) = connect(addr, Some("mcp")).await;

    let ping = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    ws.send(Message::text(ping)).await.unwrap();
    assert_eq!(recv(&mut ws).await, Some(Message::text(ping)));
}

#[tokio::test]
async fn negotiated_protocol_is_echoed() {
    let upstream = boot_upstream().await;
    let (addr, _server) = boot_gateway(&upstream.url).await;

    let (_ws, accepted) = connect(addr, Some("other, mcp")).await;
    assert_eq!(accepted.as_deref(), Some("mcp"));

    let (_ws, accepted) = connect(addr, Some("custom-v2")).await;
    assert_eq!(accepted.as_deref(), Some("custom-v2"));

    let (mut ws, accepted) = connect(addr, None).await;
    assert_eq!(accepted, None);
    ws.send(Message::text("still relayed")).await.unwrap();
    assert_eq!(recv(&mut ws).await, Some(Message::text("still relayed")));
}

#[tokio::test]
async fn relays_to_upstream_that_ignores_subprotocols() {
    let upstream = boot_plain_upstream().await;
    let (addr, _server) = boot_gateway(&upstream).await;
    let (mut ws, accepted) = connect(addr, Some("mcp")).await;
    assert_eq!(accepted.as_deref(), Some("mcp"));

    let ping = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    ws.send(Message::text(ping)).await.unwrap();
    assert_eq!(recv(&mut ws).await, Some(Message::text(ping)));
}

#[tokio::test]
async fn binary_frames_keep_their_bytes() {
    let upstream = boot_upstream().await;
    let (addr, _server) = boot_gateway(&upstream.url).await;
    let (mut ws, _) = connect(addr, Some("mcp")).await;

    let blob: Vec<u8> = (0..=255).collect();
    ws.send(Message::binary(blob.clone())).await.unwrap();
    assert_eq!(recv(&mut ws).await, Some(Message::binary(blob)));
}

#[tokio::test]
async fn frames_arrive_in_order() {
    let upstream = boot_upstream().await;
    let (addr, _server) = boot_gateway(&upstream.url).await;
    let (mut ws, _) = connect(addr, Some("mcp")).await;

    for i in 0..50 {
        ws.send(Message::text(format!(r#"{{"jsonrpc":"2.0","id":{i}}}"#)))
            .await
            .unwrap();
    }
    for i in 0..50 {
        let msg = recv(&mut ws).await.unwrap();
        let parsed: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(parsed["id"], i);
    }
}

#[tokio::test]
async fn failed_dial_does_not_affect_other_connections() {
    let upstream = boot_upstream().await;
    let (addr, _server) = boot_gateway(&upstream.url).await;

    let (mut healthy, _) = connect(addr, Some("mcp")).await;
    let (mut refused, accepted) = connect(addr, Some(REJECTED_PROTOCOL)).await;
    assert_eq!(accepted.as_deref(), Some(REJECTED_PROTOCOL));

    // The gateway closes the client once the upstream refuses the dial.
    assert_eq!(recv(&mut refused).await, None);

    healthy.send(Message::text("after failure")).await.unwrap();
    assert_eq!(recv(&mut healthy).await, Some(Message::text("after failure")));
}

#[tokio::test]
async fn unreachable_upstream_closes_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("ws://{}/mcp", listener.local_addr().unwrap());
    drop(listener);

    let (addr, server) = boot_gateway(&dead).await;
    let (mut ws, _) = connect(addr, Some("mcp")).await;
    assert_eq!(recv(&mut ws).await, None);

    // Give the handler a moment to drop its connection guard.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connections().active(), 0);
}

#[tokio::test]
async fn client_close_closes_upstream() {
    let mut upstream = boot_upstream().await;
    let (addr, server) = boot_gateway(&upstream.url).await;
    let (mut ws, _) = connect(addr, Some("mcp")).await;

    ws.send(Message::text("hello")).await.unwrap();
    assert_eq!(recv(&mut ws).await, Some(Message::text("hello")));
    assert_eq!(server.connections().active(), 1);

    ws.close(None).await.unwrap();
    timeout(TIMEOUT, upstream.closed.recv()).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connections().active(), 0);
}

#[tokio::test]
async fn shutdown_tears_down_active_relays() {
    let mut upstream = boot_upstream().await;
    let (addr, server) = boot_gateway(&upstream.url).await;
    let (mut ws, _) = connect(addr, Some("mcp")).await;

    ws.send(Message::text("hello")).await.unwrap();
    assert_eq!(recv(&mut ws).await, Some(Message::text("hello")));

    server.shutdown().shutdown();

    assert_eq!(recv(&mut ws).await, None);
    timeout(TIMEOUT, upstream.closed.recv()).await.unwrap().unwrap();
}

#[tokio::test]
async fn health_reports_active_connections() {
    let upstream = boot_upstream().await;
    let (addr, _server) = boot_gateway(&upstream.url).await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["upstream"], upstream.url.as_str());

    let (mut ws, _) = connect(addr, Some("mcp")).await;
    ws.send(Message::text("hello")).await.unwrap();
    let _ = recv(&mut ws).await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connections"], 1);
}
