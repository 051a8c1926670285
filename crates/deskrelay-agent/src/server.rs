// crates/deskrelay-agent/src/server.rs
// ============================================================================
// Module: Agent HTTP Server
// Description: axum routes for health and envelope execution.
// Purpose: Accept sealed primitives from the relay inside the guest.
// Dependencies: axum, tokio
// ============================================================================

//! ## Overview
//! `POST /execute-encrypted` accepts `{envelope}` and returns the raw
//! primitive result on success or a failure report with the status of its
//! error kind. `GET /health` is unauthenticated.

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
use deskrelay_core::ErrorKind;
use deskrelay_core::FailureReport;
use deskrelay_core::protocol::AGENT_EXECUTE_PATH;
use deskrelay_core::protocol::AgentExecuteRequest;
use deskrelay_core::protocol::HEALTH_PATH;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;

use crate::AgentError;
use crate::agent::Agent;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 512 * 1024;
/// Agent name reported by the health probe.
pub const AGENT_NAME: &str = "deskrelay-agent";
/// Operating mode reported by the health probe.
pub const AGENT_MODE: &str = "pure_api_service";

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP server wrapping an [`Agent`].
pub struct AgentServer {
    /// Shared agent.
    agent: Arc<Agent>,
    /// Listen address.
    bind: SocketAddr,
}

impl AgentServer {
    /// Creates a server for `agent` on `bind`.
    #[must_use]
    pub const fn new(agent: Arc<Agent>, bind: SocketAddr) -> Self {
        Self {
            agent,
            bind,
        }
    }

    /// Binds and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] when binding or serving fails.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), AgentError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|err| AgentError::Transport(format!("http bind failed: {err}")))?;
        serve_listener(listener, self.agent, shutdown).await
    }
}

/// Serves on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`AgentError::Transport`] when the server fails.
pub async fn serve_listener<F>(
    listener: TcpListener,
    agent: Arc<Agent>,
    shutdown: F,
) -> Result<(), AgentError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(agent))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| AgentError::Transport(format!("http server failed: {err}")))
}

/// Builds the agent router.
#[must_use]
pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(handle_health))
        .route(AGENT_EXECUTE_PATH, post(handle_execute))
        .with_state(agent)
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles health probes.
async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "agent": AGENT_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "mode": AGENT_MODE,
    }))
}

/// Handles envelope execution.
async fn handle_execute(
    State(agent): State<Arc<Agent>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> (StatusCode, Json<Value>) {
    let auth = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    if bytes.len() > MAX_BODY_BYTES {
        let report = FailureReport::new(ErrorKind::InvalidRequest, "request body too large");
        return failure(StatusCode::PAYLOAD_TOO_LARGE, &report);
    }
    let request: AgentExecuteRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(err) => {
            let kind = if agent.authenticate(auth).is_err() {
                ErrorKind::Unauthenticated
            } else {
                ErrorKind::InvalidRequest
            };
            let report = FailureReport::new(kind, format!("invalid request: {err}"));
            return failure(status_of(kind), &report);
        }
    };
    match agent.execute(auth, &request.envelope).await {
        Ok(result) => (StatusCode::OK, Json(result)),
        Err(err) => failure(status_of(err.kind), &err.report()),
    }
}

/// Returns the HTTP status for an error kind.
fn status_of(kind: ErrorKind) -> StatusCode {
    StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serializes a failure report.
fn failure(status: StatusCode, report: &FailureReport) -> (StatusCode, Json<Value>) {
    let body = serde_json::to_value(report).unwrap_or_else(|_| json!({"success": false}));
    (status, Json(body))
}
