// crates/deskrelay-gateway/src/server.rs
// ============================================================================
// Module: Gateway HTTP Server
// Description: axum routes for health and tool invocation.
// Purpose: Expose the gateway over HTTP with error-kind status codes.
// Dependencies: axum, tokio
// ============================================================================

//! ## Overview
//! Two routes: `GET /health` and `POST /v1/invoke`. The invoke handler reads
//! the raw body, enforces a size limit, and delegates to
//! [`Gateway::invoke`]. Error responses carry the HTTP status of their
//! [`ErrorKind`]. A malformed body from an unauthenticated caller is reported
//! as unauthenticated so the parser is not an oracle.

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
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use deskrelay_core::CATALOG_VERSION;
use deskrelay_core::ErrorKind;
use deskrelay_core::protocol::GATEWAY_INVOKE_PATH;
use deskrelay_core::protocol::HEALTH_PATH;
use deskrelay_core::protocol::InvokeRequest;
use deskrelay_core::protocol::InvokeResponse;
use serde_json::json;
use tokio::net::TcpListener;

use crate::GatewayError;
use crate::gateway::Gateway;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP server wrapping a [`Gateway`].
pub struct GatewayServer {
    /// Shared gateway.
    gateway: Arc<Gateway>,
    /// Listen address.
    bind: SocketAddr,
}

impl GatewayServer {
    /// Creates a server for `gateway` on `bind`.
    #[must_use]
    pub const fn new(gateway: Arc<Gateway>, bind: SocketAddr) -> Self {
        Self {
            gateway,
            bind,
        }
    }

    /// Binds and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when binding or serving fails.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|err| GatewayError::Transport(format!("http bind failed: {err}")))?;
        serve_listener(listener, self.gateway, shutdown).await
    }
}

/// Serves on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`GatewayError::Transport`] when the server fails.
pub async fn serve_listener<F>(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown: F,
) -> Result<(), GatewayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| GatewayError::Transport(format!("http server failed: {err}")))
}

/// Builds the gateway router.
#[must_use]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(handle_health))
        .route(GATEWAY_INVOKE_PATH, post(handle_invoke))
        .with_state(gateway)
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles health probes.
async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "component": "gateway",
        "catalog_version": CATALOG_VERSION,
    }))
}

/// Handles tool invocations.
async fn handle_invoke(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> impl IntoResponse {
    let auth = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    if bytes.len() > MAX_BODY_BYTES {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(InvokeResponse::error(None, ErrorKind::InvalidRequest, "request body too large")),
        );
    }
    let request: InvokeRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(err) => {
            let kind = if gateway.authenticate(auth).is_err() {
                ErrorKind::Unauthenticated
            } else {
                ErrorKind::InvalidRequest
            };
            return respond(InvokeResponse::error(None, kind, format!("invalid request: {err}")));
        }
    };
    respond(gateway.invoke(auth, request).await)
}

/// Pairs a response with its HTTP status.
fn respond(response: InvokeResponse) -> (StatusCode, Json<InvokeResponse>) {
    (status_for(&response), Json(response))
}

/// Returns the HTTP status for a response.
fn status_for(response: &InvokeResponse) -> StatusCode {
    match response {
        InvokeResponse::Error {
            error_kind, ..
        } => StatusCode::from_u16(error_kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        InvokeResponse::Result { .. } | InvokeResponse::Envelope { .. } => StatusCode::OK,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
