//! WebSocket signaling server implementation
//!
//! One task per admitted channel. Admission rejections for malformed ids and
//! full sessions are answered with plain HTTP error responses from the
//! handshake callback, before the upgrade completes; token mismatches close
//! the upgraded channel with a distinct policy code.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use snatcher_core::{
    generate_join_token, generate_session_id, validate_session_id, AdmissionError, Config,
};

use crate::lifecycle;
use crate::messages::{classify, ClientKind, CloseReason, ServerMessage};
use crate::registry::Registry;
use crate::session::{PeerHandle, OUTBOUND_QUEUE_DEPTH};

/// Signal server state
pub struct SignalServer {
    registry: Registry,
    config: Arc<Config>,
}

impl SignalServer {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Registry::new(config.session.max_peers),
            config: Arc::new(config),
        }
    }

    /// Shared registry handle (for monitoring and tests)
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start the signal server on the given address
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal server listening on {}", addr);
        self.serve_with_listener(listener).await
    }

    /// Serve connections from an already-bound listener
    pub async fn serve_with_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        // Start the session lifecycle sweep
        tokio::spawn(lifecycle::run(
            self.registry.clone(),
            self.config.session.clone(),
        ));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let registry = self.registry.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, registry, config).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Registry,
    config: Arc<Config>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Peek at the request line to route plain HTTP away from the WebSocket
    // handshake (both start with GET).
    let head = peek_request_head(&stream).await?;

    let is_upgrade = head.starts_with("GET /ws/");
    if !is_upgrade && (head.starts_with("GET ") || head.starts_with("POST ")) {
        return handle_http_request(stream, &registry, &config).await;
    }

    handle_websocket(stream, peer_addr, registry, config).await
}

/// Peek enough of the request line to route the connection
///
/// The first TCP segment can be shorter than the `GET /ws/` prefix, so a
/// single peek would misroute a fragmented upgrade request. Retry briefly
/// until the routing prefix or a line terminator is visible; a client that
/// stalls mid-line falls through to the WebSocket handshake, which fails
/// the connection on its own terms.
async fn peek_request_head(stream: &TcpStream) -> Result<String, std::io::Error> {
    const ROUTE_PREFIX_LEN: usize = "GET /ws/".len();

    let mut peek_buf = [0u8; 256];
    let mut n = 0;
    for _ in 0..50 {
        n = stream.peek(&mut peek_buf).await?;
        if n >= ROUTE_PREFIX_LEN || peek_buf[..n].contains(&b'\n') || n == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    Ok(String::from_utf8_lossy(&peek_buf[..n]).into_owned())
}

/// Handle a plain HTTP request (health checks and the session issuer)
async fn handle_http_request(
    mut stream: TcpStream,
    registry: &Registry,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::io::AsyncWriteExt;

    let mut buf = vec![0u8; 2048];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let mut request_line = request.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path);

    let (status, body) = match (method, path) {
        ("GET", "/health") => (
            "200 OK",
            json!({
                "status": "healthy",
                "active_sessions": registry.session_count(),
                "total_connections": registry.total_peer_count(),
            })
            .to_string(),
        ),
        ("GET", "/stats") => (
            "200 OK",
            json!({
                "sessions": registry.session_count(),
                "peers": registry.total_peer_count(),
            })
            .to_string(),
        ),
        ("POST", "/api/create-session") => create_session(registry, config),
        _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Issuer contract: mint a session id + join token pair and register it
fn create_session(registry: &Registry, config: &Config) -> (&'static str, String) {
    let session_id = generate_session_id();
    let join_token = generate_join_token();

    if !registry.create(&session_id, &join_token) {
        // Ids carry 128 bits of entropy; a collision means something is wrong
        error!("Failed to create session: id collision on {}", session_id);
        return (
            "500 Internal Server Error",
            r#"{"error":"Failed to create session"}"#.to_string(),
        );
    }

    let session_url = format!(
        "{}/session/{}?token={}",
        config.server.base_url.trim_end_matches('/'),
        session_id,
        join_token
    );
    info!("Session created: {}", session_id);

    (
        "200 OK",
        json!({
            "session_id": session_id,
            "session_url": session_url,
            "join_token": join_token,
        })
        .to_string(),
    )
}

/// Admit and pump one signaling channel
async fn handle_websocket(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Registry,
    config: Arc<Config>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // The handshake callback sees the request URI, so malformed ids and full
    // sessions are refused with an HTTP error before the upgrade completes.
    let mut route: Option<(String, Option<String>)> = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let uri = req.uri();
        let session_id = match uri.path().strip_prefix("/ws/") {
            Some(rest) if !rest.is_empty() && !rest.contains('/') => rest.to_string(),
            _ => return Err(http_reject(StatusCode::NOT_FOUND, "Not found")),
        };

        if !validate_session_id(&session_id) {
            return Err(http_reject(
                StatusCode::BAD_REQUEST,
                CloseReason::InvalidSessionId.reason(),
            ));
        }

        if registry.is_full(&session_id) {
            warn!("Session {} full, connection rejected", session_id);
            return Err(http_reject(
                StatusCode::FORBIDDEN,
                CloseReason::SessionFull.reason(),
            ));
        }

        let token = query_param(uri.query(), "token");
        route = Some((session_id, token));
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback).await?;
    let Some((session_id, token)) = route else {
        return Ok(());
    };
    debug!("New connection from {} for session {}", peer_addr, session_id);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // The writer task is the sink's only owner; every outbound message goes
    // through the peer's bounded queue, so relays from other tasks and direct
    // replies cannot interleave mid-frame, and a stalled reader caps out at
    // the queue depth instead of accumulating.
    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let handle = PeerHandle::new(tx);
    let peer_id = handle.id();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    // Token check and capacity re-check under the record's lock. The upgrade
    // already happened, so rejection here is a close frame.
    let (peer_count, others) = match registry.admit(&session_id, token.as_deref(), handle.clone())
    {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!("Admission refused for session {}: {}", session_id, e);
            let reason = match e {
                AdmissionError::Unauthorized => CloseReason::Unauthorized,
                _ => CloseReason::SessionFull,
            };
            handle.send(reason.message());
            drop(handle);
            let _ = writer.await;
            return Ok(());
        }
    };

    let max_peers = registry.max_peers();
    info!(
        "Peer joined session {}. Total: {}/{}",
        session_id, peer_count, max_peers
    );

    // Occupancy update: the new peer first, then every other occupant.
    // Best-effort; a dead channel is handled at its own disconnect.
    let joined = ServerMessage::PeerJoined {
        peer_count,
        max_peers,
    };
    send_to(&handle, &joined);
    for other in &others {
        send_to(other, &joined);
    }

    // Relay loop
    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                handle.send(Message::Pong(data));
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error in session {}: {:?}", session_id, e);
                break;
            }
        };

        // Size policy: signaling payloads are small; anything larger is
        // misuse of the relay as a bulk-data pipe.
        if text.len() > config.session.max_message_bytes {
            warn!("Oversized message dropped in session {}", session_id);
            continue;
        }

        match classify(&text) {
            Ok(ClientKind::Ping) => send_to(&handle, &ServerMessage::Pong),
            Ok(ClientKind::RequestPeerCount) => {
                let peer_count = registry.peer_count(&session_id).unwrap_or(0);
                send_to(
                    &handle,
                    &ServerMessage::PeerJoined {
                        peer_count,
                        max_peers,
                    },
                );
            }
            Ok(ClientKind::Signal) => {
                // Verbatim fan-out to the other occupant(s), original bytes,
                // at most once per recipient.
                for other in registry.peers_except(&session_id, peer_id) {
                    if !other.send(Message::Text(text.clone())) {
                        debug!("Failed to relay message in session {}", session_id);
                    }
                }
            }
            Ok(ClientKind::Unknown(kind)) => {
                warn!("Rejected unknown message type: {}", kind);
            }
            Err(e) => {
                // Protocol violation: fail the read loop and disconnect
                debug!("Malformed message in session {}: {}", session_id, e);
                break;
            }
        }
    }

    // Disconnect handling: idempotent removal, best-effort peer-left fan-out
    if let Some((remaining, peers)) = registry.remove_peer(&session_id, peer_id) {
        info!(
            "Peer left session {}. Remaining: {}",
            session_id, remaining
        );
        let left = ServerMessage::PeerLeft {
            peer_count: remaining,
        };
        for peer in &peers {
            send_to(peer, &left);
        }
    }

    drop(handle);
    let _ = writer.await;

    debug!("Connection closed for session {}", session_id);
    Ok(())
}

/// Serialize and queue a server message; failures are logged and swallowed
fn send_to(peer: &PeerHandle, msg: &ServerMessage) {
    match msg.to_json() {
        Ok(json) => {
            peer.send(Message::Text(json));
        }
        Err(e) => error!("Failed to encode server message: {}", e),
    }
}

/// Build a pre-upgrade HTTP rejection
fn http_reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Extract a query parameter from a raw query string
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = SignalServer::new(Config::default());
        assert_eq!(server.registry().session_count(), 0);
        assert_eq!(server.registry().total_peer_count(), 0);
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("token=abc123&x=1"), "token"),
            Some("abc123".to_string())
        );
        assert_eq!(
            query_param(Some("x=1&token=abc123"), "token"),
            Some("abc123".to_string())
        );
        assert_eq!(query_param(Some("x=1"), "token"), None);
        assert_eq!(query_param(None, "token"), None);
    }

    #[test]
    fn test_http_reject_shape() {
        let response = http_reject(StatusCode::FORBIDDEN, "Session full");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.body().as_deref(), Some("Session full"));
    }
}
