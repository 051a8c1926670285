// crates/deskrelay-relay/src/server.rs
// ============================================================================
// Module: Relay HTTP Server
// Description: axum routes for health, catalog, execution, and WebSocket.
// Purpose: Serve the relay over HTTP and a persistent socket.
// Dependencies: axum, futures-util, tokio
// ============================================================================

//! ## Overview
//! - `GET /health`: unauthenticated liveness.
//! - `GET /tools`: bearer-authenticated catalog.
//! - `POST /execute {tool, arguments}`: bearer-authenticated call; the body
//!   is always the normalized contract and the status follows the error kind.
//! - `GET /ws`: WebSocket speaking the session protocol with an auth
//!   handshake as its first message.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use deskrelay_core::CATALOG_VERSION;
use deskrelay_core::ErrorKind;
use deskrelay_core::FailureReport;
use deskrelay_core::protocol::HEALTH_PATH;
use futures_util::SinkExt;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;

use crate::RelayError;
use crate::normalize;
use crate::relay::Relay;
use crate::session::Session;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Catalog route.
pub const TOOLS_PATH: &str = "/tools";
/// Execution route.
pub const EXECUTE_PATH: &str = "/execute";
/// WebSocket route.
pub const WS_PATH: &str = "/ws";

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP and WebSocket server wrapping a [`Relay`].
pub struct RelayServer {
    /// Shared relay.
    relay: Arc<Relay>,
    /// Listen address.
    bind: SocketAddr,
}

impl RelayServer {
    /// Creates a server for `relay` on `bind`.
    #[must_use]
    pub const fn new(relay: Arc<Relay>, bind: SocketAddr) -> Self {
        Self {
            relay,
            bind,
        }
    }

    /// Binds and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when binding or serving fails.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|err| RelayError::Transport(format!("http bind failed: {err}")))?;
        serve_listener(listener, self.relay, shutdown).await
    }
}

/// Serves on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] when the server fails.
pub async fn serve_listener<F>(
    listener: TcpListener,
    relay: Arc<Relay>,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(relay))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| RelayError::Transport(format!("http server failed: {err}")))
}

/// Builds the relay router.
#[must_use]
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(handle_health))
        .route(TOOLS_PATH, get(handle_tools))
        .route(EXECUTE_PATH, post(handle_execute))
        .route(WS_PATH, get(handle_ws))
        .with_state(relay)
}

// ============================================================================
// SECTION: HTTP Handlers
// ============================================================================

/// Execution request body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecuteBody {
    /// Tool name.
    tool: String,
    /// Tool arguments.
    #[serde(default)]
    arguments: Value,
}

/// Handles health probes.
async fn handle_health(State(relay): State<Arc<Relay>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "component": "relay",
        "project_id": relay.project_id(),
        "catalog_version": CATALOG_VERSION,
    }))
}

/// Handles catalog requests.
async fn handle_tools(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if relay.authenticate_header(bearer(&headers)).is_err() {
        return rejected(ErrorKind::Unauthenticated, "unauthenticated");
    }
    (StatusCode::OK, Json(relay.list_tools()))
}

/// Handles tool calls.
async fn handle_execute(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> (StatusCode, Json<Value>) {
    if relay.authenticate_header(bearer(&headers)).is_err() {
        return rejected(ErrorKind::Unauthenticated, "unauthenticated");
    }
    if bytes.len() > relay.max_frame_bytes() {
        let (_, body) = rejected(ErrorKind::InvalidRequest, "request body too large");
        return (StatusCode::PAYLOAD_TOO_LARGE, body);
    }
    let body: ExecuteBody = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(err) => return rejected(ErrorKind::InvalidRequest, &format!("invalid request: {err}")),
    };
    match relay.execute_normalized(&body.tool, body.arguments).await {
        (None, value) => (StatusCode::OK, Json(value)),
        (Some(kind), value) => (status_of(kind), Json(value)),
    }
}

/// Returns the bearer header value, if readable.
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok())
}

/// Builds a normalized rejection; opaque kinds get a generic message.
fn rejected(kind: ErrorKind, message: &str) -> (StatusCode, Json<Value>) {
    let report = FailureReport::new(kind, message);
    (status_of(kind), Json(normalize::failure(kind, &report.error)))
}

/// Returns the HTTP status for an error kind.
fn status_of(kind: ErrorKind) -> StatusCode {
    StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// SECTION: WebSocket
// ============================================================================

/// Upgrades to a WebSocket session.
async fn handle_ws(State(relay): State<Arc<Relay>>, upgrade: WebSocketUpgrade) -> Response {
    let limit = relay.max_frame_bytes();
    upgrade
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| run_socket(socket, relay))
}

/// Drives one WebSocket session until either side closes.
async fn run_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new(&relay);
    while let Some(Ok(message)) = receiver.next().await {
        let bytes = match message {
            Message::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        let reply = session.handle(&bytes).await;
        let Ok(text) = serde_json::to_string(&reply.message) else {
            break;
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            break;
        }
        if reply.close {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }
    }
}
