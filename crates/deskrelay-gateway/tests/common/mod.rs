// crates/deskrelay-gateway/tests/common/mod.rs
// ============================================================================
// Module: Gateway Test Harness
// Description: Spawns a gateway on an ephemeral port with fixed secrets.
// Purpose: Exercise the HTTP surface end to end.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]
#![allow(clippy::unwrap_used, reason = "Test-only fixtures.")]

use std::sync::Arc;

use deskrelay_core::EnvelopeKey;
use deskrelay_core::KeyId;
use deskrelay_core::audit::InMemoryAuditSink;
use deskrelay_core::security::BearerCredential;
use deskrelay_gateway::DecisionPolicy;
use deskrelay_gateway::Gateway;
use deskrelay_gateway::GatewaySettings;
use deskrelay_gateway::server::serve_listener;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Orchestration-facing token accepted by the harness gateway.
pub const TOKEN: &str = "gateway-test-token";
/// Raw envelope key bytes.
pub const KEY_BYTES: [u8; 32] = [7_u8; 32];
/// Envelope key identifier.
pub const KEY_ID: &str = "test-key";

/// Returns the shared envelope key.
pub fn key() -> EnvelopeKey {
    EnvelopeKey::from_bytes(KeyId::new(KEY_ID), &KEY_BYTES).unwrap()
}

/// Settings with the given ceiling and ledger capacity.
pub fn settings(execution_ceiling_ms: u64, max_in_flight: usize) -> GatewaySettings {
    GatewaySettings {
        credential: BearerCredential::new(TOKEN),
        key: key(),
        policy: DecisionPolicy {
            primitive_timeout_ms: 5_000.min(execution_ceiling_ms),
            execution_ceiling_ms,
        },
        max_in_flight,
    }
}

/// Running gateway.
pub struct Harness {
    /// Base URL.
    pub base: String,
    /// HTTP client.
    pub client: reqwest::Client,
    /// Audit events.
    pub audit: Arc<InMemoryAuditSink>,
    /// Stops the server when dropped.
    _shutdown: oneshot::Sender<()>,
}

impl Harness {
    /// Posts an invocation with an optional bearer token.
    pub async fn invoke(&self, token: Option<&str>, body: &Value) -> (u16, Value) {
        let mut request = self.client.post(format!("{}/v1/invoke", self.base)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

/// Spawns a gateway built by `build` from fresh audit and default settings.
pub async fn spawn_with(
    settings: GatewaySettings,
    build: impl FnOnce(Gateway) -> Gateway,
) -> Harness {
    let audit = Arc::new(InMemoryAuditSink::new());
    let gateway = Arc::new(build(Gateway::new(settings, audit.clone())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(serve_listener(listener, gateway, async move {
        let _ = stopped.await;
    }));
    Harness {
        base,
        client: reqwest::Client::new(),
        audit,
        _shutdown: stop,
    }
}

/// Spawns a gateway with a 300 s ceiling.
pub async fn spawn() -> Harness {
    spawn_with(settings(300_000, 64), |gateway| gateway).await
}
