//! [`CockpitServer`] – HTTP + WebSocket server for operator dashboards.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! * `GET /ws` with `Upgrade: websocket` → a STOMP session bridged to the
//!   [`SessionHub`] and the [`Bridge`].
//! * `GET /api/robot/latest` → the canonical state as JSON.
//! * `POST /api/robot/control` → one operator command (same JSON as the
//!   STOMP control destination).
//! * Anything else → `404`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use patrolbot_kernel::Bridge;
use patrolbot_middleware::SessionHub;
use patrolbot_types::PatrolError;
use patrolbot_types::wire::decode_command;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::session::{MAX_FRAME_BYTES, StompSession, message_frame};

/// Default TCP port for the operator server.
pub const DEFAULT_PORT: u16 = 8080;

/// Path of the STOMP-over-WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// Path of the latest-state JSON endpoint.
pub const LATEST_PATH: &str = "/api/robot/latest";

/// Path of the REST command endpoint.
pub const CONTROL_PATH: &str = "/api/robot/control";

/// Largest request head examined for routing.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// How long a client may take to deliver its request head.
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between peeks while the head is still arriving.
const HEAD_POLL: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Operator-facing server: one STOMP session per WebSocket connection.
///
/// # Example
///
/// ```rust,ignore
/// CockpitServer::new(bridge, hub).with_port(8080).run().await?;
/// ```
pub struct CockpitServer {
    bridge: Arc<Bridge>,
    hub: Arc<SessionHub>,
    port: u16,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(bridge: Arc<Bridge>, hub: Arc<SessionHub>) -> Self {
        Self {
            bridge,
            hub,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Return the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener.  Failing to bind is the one startup error the
    /// daemon treats as fatal.
    pub async fn bind(&self) -> Result<TcpListener, PatrolError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| PatrolError::TransportUnavailable(format!("bind error on {addr}: {e}")))
    }

    /// Bind and serve forever.
    pub async fn run(self) -> Result<(), PatrolError> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections on an already-bound `listener`.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, stomp = WS_PATH, "operator server listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = Arc::clone(&self.bridge);
                    let hub = Arc::clone(&self.hub);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, bridge, hub).await {
                            debug!(%peer, error = %e, "client connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

/// What the request line and headers ask for.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    WebSocket,
    Latest,
    Control,
    NotFound,
}

fn classify(request_head: &str) -> Route {
    let mut lines = request_head.lines();
    let target = lines.next().and_then(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(method), Some(path)) => Some((method, path.split('?').next().unwrap_or(path))),
            _ => None,
        }
    });

    let is_upgrade = lines.any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    match target {
        Some(("GET", WS_PATH)) if is_upgrade => Route::WebSocket,
        Some(("GET", LATEST_PATH)) => Route::Latest,
        Some(("POST", CONTROL_PATH)) => Route::Control,
        _ => Route::NotFound,
    }
}

/// Byte offset just past the blank line ending the request head.
fn head_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Peek until the whole request head is buffered, the head cap is hit, the
/// peer closes, or [`HEAD_TIMEOUT`] passes.  Nothing is consumed.
async fn peek_head(stream: &TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    let mut seen = 0;
    let waited = tokio::time::timeout(HEAD_TIMEOUT, async {
        loop {
            seen = stream.peek(&mut buf).await?;
            if seen == 0 || seen == buf.len() || head_end(&buf[..seen]).is_some() {
                return Ok::<(), std::io::Error>(());
            }
            tokio::time::sleep(HEAD_POLL).await;
        }
    })
    .await;
    if let Ok(Err(e)) = waited {
        return Err(e);
    }
    buf.truncate(seen);
    Ok(buf)
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    bridge: Arc<Bridge>,
    hub: Arc<SessionHub>,
) -> Result<(), PatrolError> {
    // Peek so the WebSocket handshaker still sees the whole request.
    let peeked = peek_head(&stream)
        .await
        .map_err(|e| PatrolError::Channel(format!("peek error from {peer}: {e}")))?;
    let head = String::from_utf8_lossy(&peeked).into_owned();

    let route = classify(&head);
    if route == Route::WebSocket {
        return handle_ws(stream, peer, bridge, hub).await;
    }

    // Consume the head so closing the socket does not reset it.
    let head_len = head_end(&peeked).unwrap_or(peeked.len());
    let mut consumed = vec![0u8; head_len];
    stream
        .read_exact(&mut consumed)
        .await
        .map_err(|e| PatrolError::Channel(format!("read error from {peer}: {e}")))?;

    match route {
        Route::WebSocket => Ok(()),
        Route::Latest => {
            let body = serde_json::to_string(&bridge.state())
                .map_err(|e| PatrolError::Serialization(e.to_string()))?;
            respond(stream, "200 OK", "application/json", &body).await
        }
        Route::Control => {
            let len = content_length(&head);
            if len > MAX_FRAME_BYTES {
                let body = error_body("request body too large");
                return respond(stream, "413 Payload Too Large", "application/json", &body).await;
            }
            let mut raw = vec![0u8; len];
            stream
                .read_exact(&mut raw)
                .await
                .map_err(|e| PatrolError::Channel(format!("read error from {peer}: {e}")))?;

            let (status, body) = match decode_command(CONTROL_PATH, &raw)
                .and_then(|cmd| bridge.dispatch_command(cmd))
            {
                Ok(()) => ("202 Accepted", serde_json::json!({ "status": "sent" }).to_string()),
                Err(e @ (PatrolError::MalformedPayload { .. } | PatrolError::InvalidCommand(_))) => {
                    debug!(%peer, error = %e, "rejected REST command");
                    ("400 Bad Request", error_body(&e.to_string()))
                }
                Err(e) => {
                    warn!(%peer, error = %e, "REST command not delivered");
                    ("503 Service Unavailable", error_body(&e.to_string()))
                }
            };
            respond(stream, status, "application/json", &body).await
        }
        Route::NotFound => respond(stream, "404 Not Found", "text/plain", "not found").await,
    }
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

// ---------------------------------------------------------------------------
// Plain HTTP
// ---------------------------------------------------------------------------

async fn respond(
    mut stream: TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), PatrolError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| PatrolError::Channel(format!("HTTP write error: {e}")))
}

// ---------------------------------------------------------------------------
// WebSocket: STOMP session
// ---------------------------------------------------------------------------

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    bridge: Arc<Bridge>,
    hub: Arc<SessionHub>,
) -> Result<(), PatrolError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| PatrolError::Channel(format!("WS handshake from {peer}: {e}")))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (mut session, mut outbox) = StompSession::open(hub, bridge);
    debug!(%peer, session = %session.id(), "websocket session opened");

    loop {
        tokio::select! {
            // ── Downstream: hub → operator ─────────────────────────────────
            delivery = outbox.recv() => {
                let Some(delivery) = delivery else { break };
                let frame = message_frame(&delivery).encode();
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            // ── Upstream: operator → bridge ────────────────────────────────
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%peer, error = %e, "websocket read error");
                        break;
                    }
                    _ => continue,
                };

                let reply = session.handle_text(&text).await;
                let mut write_failed = false;
                for frame in reply.frames {
                    if ws_tx.send(Message::Text(frame.encode().into())).await.is_err() {
                        write_failed = true;
                        break;
                    }
                }
                if write_failed || reply.close {
                    break;
                }
            }
        }
    }

    session.close();
    let _ = ws_tx.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
