// crates/deskrelay-relay/tests/common/mod.rs
// ============================================================================
// Module: Relay Test Harness
// Description: Gateway, agent, and relay wired together on loopback ports.
// Purpose: Exercise the full relay path without a display or containers.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]
#![allow(clippy::unwrap_used, reason = "Test-only fixtures.")]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use deskrelay_agent::Agent;
use deskrelay_agent::AgentSettings;
use deskrelay_agent::DesktopDriver;
use deskrelay_agent::DriverError;
use deskrelay_agent::ShellOutput;
use deskrelay_core::EnvelopeKey;
use deskrelay_core::KeyId;
use deskrelay_core::MouseButton;
use deskrelay_core::Point;
use deskrelay_core::ProjectId;
use deskrelay_core::ScrollDirection;
use deskrelay_core::audit::InMemoryAuditSink;
use deskrelay_core::security::BearerCredential;
use deskrelay_gateway::DecisionPolicy;
use deskrelay_gateway::Gateway;
use deskrelay_gateway::GatewaySettings;
use deskrelay_relay::HopSettings;
use deskrelay_relay::Relay;
use deskrelay_relay::RelaySettings;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Token the orchestration layer presents to the relay.
pub const RELAY_TOKEN: &str = "relay-test-token";
/// Token the relay presents to the gateway.
pub const GATEWAY_TOKEN: &str = "gateway-test-token";
/// Token the relay presents to the agent.
pub const AGENT_TOKEN: &str = "agent-test-token";
/// Project served by the stack.
pub const PROJECT: &str = "project-374";
/// Envelope key identifier.
pub const KEY_ID: &str = "test-key";
/// Key shared by gateway and agent.
pub const SHARED_KEY: [u8; 32] = [5_u8; 32];
/// Key that does not match the agent's.
pub const WRONG_KEY: [u8; 32] = [6_u8; 32];

/// OCR output produced by the scripted driver.
pub const OCR_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
5\t1\t1\t1\t1\t1\t10\t20\t80\t18\t88.0\tFile\n";

/// Returns the stack project id.
pub fn project() -> ProjectId {
    ProjectId::new(PROJECT).unwrap()
}

// ============================================================================
// SECTION: Scripted Driver
// ============================================================================

/// Driver that records calls and answers with fixed data.
#[derive(Default)]
pub struct ScriptedDriver {
    /// Recorded calls.
    calls: Mutex<Vec<String>>,
    /// Latency applied to pointer movement.
    latency: Duration,
}

impl ScriptedDriver {
    /// Returns the recorded calls.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Records one call.
    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

#[async_trait]
impl DesktopDriver for ScriptedDriver {
    async fn move_pointer(&self, path: &[Point], _step_delay: Duration) -> Result<(), DriverError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let end = path.last().copied().unwrap_or(Point::new(0, 0));
        self.record(format!("move {},{}", end.x, end.y));
        Ok(())
    }

    async fn click(&self, button: MouseButton, count: u8) -> Result<(), DriverError> {
        self.record(format!("click {} {count}", button.as_str()));
        Ok(())
    }

    async fn pointer_position(&self) -> Result<Point, DriverError> {
        Ok(Point::new(640, 480))
    }

    async fn key_press(&self, keys: &[String]) -> Result<(), DriverError> {
        self.record(format!("key {}", keys.join("+")));
        Ok(())
    }

    async fn type_text(&self, text: &str, _interval: Duration) -> Result<(), DriverError> {
        self.record(format!("type {text}"));
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, clicks: u32) -> Result<(), DriverError> {
        self.record(format!("scroll {} {clicks}", direction.as_str()));
        Ok(())
    }

    async fn capture_png(&self) -> Result<Vec<u8>, DriverError> {
        self.record("capture".to_string());
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn ocr_tsv(&self, _png: &[u8]) -> Result<String, DriverError> {
        Ok(OCR_TSV.to_string())
    }

    async fn ui_elements(&self) -> Result<Option<Vec<Value>>, DriverError> {
        Ok(Some(vec![json!({"name": "Save", "type": "button", "x": 40, "y": 200})]))
    }

    async fn shell(&self, command: &str) -> Result<ShellOutput, DriverError> {
        self.record(format!("shell {command}"));
        Ok(ShellOutput {
            success: true,
            output: "Linux\n".to_string(),
            error: String::new(),
            returncode: 0,
        })
    }
}

// ============================================================================
// SECTION: Stack
// ============================================================================

/// Knobs for one stack.
pub struct StackOptions {
    /// Key the gateway seals with.
    pub gateway_key: [u8; 32],
    /// Envelope timeout chosen by the gateway.
    pub primitive_timeout_ms: u64,
    /// Relay timeout for the agent hop.
    pub agent_hop_timeout_ms: u64,
    /// Driver latency for pointer movement.
    pub driver_latency: Duration,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            gateway_key: SHARED_KEY,
            primitive_timeout_ms: 5_000,
            agent_hop_timeout_ms: 10_000,
            driver_latency: Duration::ZERO,
        }
    }
}

/// Running gateway, agent, and relay.
pub struct Stack {
    /// Relay base URL.
    pub base: String,
    /// Agent base URL.
    pub agent_url: String,
    /// HTTP client.
    pub client: reqwest::Client,
    /// Relay under test.
    pub relay: Arc<Relay>,
    /// Driver behind the agent.
    pub driver: Arc<ScriptedDriver>,
    /// Relay audit events.
    pub audit: Arc<InMemoryAuditSink>,
    /// Stops every server when dropped.
    _stops: Vec<oneshot::Sender<()>>,
}

impl Stack {
    /// Posts a tool call to the relay with an optional token.
    pub async fn execute(&self, token: Option<&str>, tool: &str, arguments: Value) -> (u16, Value) {
        let body = json!({"tool": tool, "arguments": arguments});
        let mut request = self.client.post(format!("{}/execute", self.base)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    /// Returns the relay address without a scheme.
    pub fn authority(&self) -> &str {
        self.base.trim_start_matches("http://")
    }
}

/// Serves `router` on an ephemeral port.
pub async fn serve(router: Router) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stopped.await;
            })
            .await
    });
    (base, stop)
}

/// Relay settings pointing at the given hops.
pub fn relay_settings(gateway_url: &str, agent_url: &str, agent_hop_timeout_ms: u64) -> RelaySettings {
    RelaySettings {
        project_id: project(),
        credential: BearerCredential::new(RELAY_TOKEN),
        gateway: HopSettings {
            base_url: gateway_url.to_string(),
            token: GATEWAY_TOKEN.to_string(),
            timeout_ms: 10_000,
        },
        agent: HopSettings {
            base_url: agent_url.to_string(),
            token: AGENT_TOKEN.to_string(),
            timeout_ms: agent_hop_timeout_ms,
        },
        max_frame_bytes: 1024 * 1024,
    }
}

/// Builds a relay over existing hops.
pub fn relay(gateway_url: &str, agent_url: &str) -> (Arc<Relay>, Arc<InMemoryAuditSink>) {
    let audit = Arc::new(InMemoryAuditSink::new());
    let relay = Relay::new(relay_settings(gateway_url, agent_url, 10_000), audit.clone()).unwrap();
    (Arc::new(relay), audit)
}

/// Spawns the full stack.
pub async fn spawn_stack(options: StackOptions) -> Stack {
    let gateway_settings = GatewaySettings {
        credential: BearerCredential::new(GATEWAY_TOKEN),
        key: EnvelopeKey::from_bytes(KeyId::new(KEY_ID), &options.gateway_key).unwrap(),
        policy: DecisionPolicy {
            primitive_timeout_ms: options.primitive_timeout_ms,
            execution_ceiling_ms: 300_000,
        },
        max_in_flight: 64,
    };
    let gateway = Arc::new(Gateway::new(gateway_settings, Arc::new(InMemoryAuditSink::new())));
    let (gateway_url, gateway_stop) = serve(deskrelay_gateway::router(gateway)).await;

    let driver = Arc::new(ScriptedDriver {
        latency: options.driver_latency,
        ..ScriptedDriver::default()
    });
    let agent_settings = AgentSettings {
        project_id: project(),
        credential: BearerCredential::new(AGENT_TOKEN),
        key: EnvelopeKey::from_bytes(KeyId::new(KEY_ID), &SHARED_KEY).unwrap(),
        max_clock_skew_ms: 1_000,
        replay_cache_capacity: 128,
    };
    let agent = Arc::new(Agent::new(agent_settings, driver.clone(), Arc::new(InMemoryAuditSink::new())));
    let (agent_url, agent_stop) = serve(deskrelay_agent::server::router(agent)).await;

    let audit = Arc::new(InMemoryAuditSink::new());
    let settings = relay_settings(&gateway_url, &agent_url, options.agent_hop_timeout_ms);
    let relay = Arc::new(Relay::new(settings, audit.clone()).unwrap());
    let (base, relay_stop) = serve(deskrelay_relay::server::router(relay.clone())).await;

    Stack {
        base,
        agent_url,
        client: reqwest::Client::new(),
        relay,
        driver,
        audit,
        _stops: vec![gateway_stop, agent_stop, relay_stop],
    }
}

/// Spawns the full stack with default options.
pub async fn spawn() -> Stack {
    spawn_stack(StackOptions::default()).await
}
