// crates/deskrelay-agent/tests/common/mod.rs
// ============================================================================
// Module: Agent Test Harness
// Description: Recording desktop driver and an agent on an ephemeral port.
// Purpose: Exercise envelope checks and execution without a display.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]
#![allow(clippy::unwrap_used, reason = "Test-only fixtures.")]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use deskrelay_agent::Agent;
use deskrelay_agent::AgentSettings;
use deskrelay_agent::DesktopDriver;
use deskrelay_agent::DriverError;
use deskrelay_agent::ShellOutput;
use deskrelay_agent::server::serve_listener;
use deskrelay_core::EnvelopeKey;
use deskrelay_core::EnvelopeSealer;
use deskrelay_core::EnvelopeTarget;
use deskrelay_core::ExecutionEnvelope;
use deskrelay_core::InvocationId;
use deskrelay_core::KeyId;
use deskrelay_core::MouseButton;
use deskrelay_core::Point;
use deskrelay_core::PrimitiveCommand;
use deskrelay_core::ProjectId;
use deskrelay_core::ScrollDirection;
use deskrelay_core::SealRequest;
use deskrelay_core::audit::InMemoryAuditSink;
use deskrelay_core::security::BearerCredential;
use deskrelay_core::unix_millis;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Relay-facing token accepted by the harness agent.
pub const TOKEN: &str = "agent-test-token";
/// Project served by the harness agent.
pub const PROJECT: &str = "project-374";
/// Envelope key identifier.
pub const KEY_ID: &str = "test-key";
/// Raw envelope key bytes.
pub const KEY_BYTES: [u8; 32] = [9_u8; 32];

/// Tesseract-style TSV returned by the fake OCR step.
pub const OCR_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
5\t1\t1\t1\t1\t1\t40\t200\t60\t18\t91.5\tSave\n\
5\t1\t1\t1\t1\t2\t10\t20\t80\t18\t88.0\tFile\n\
5\t1\t1\t1\t1\t3\t300\t20\t40\t18\t12.0\tnoise\n";

/// Returns the shared envelope key.
pub fn key() -> EnvelopeKey {
    EnvelopeKey::from_bytes(KeyId::new(KEY_ID), &KEY_BYTES).unwrap()
}

/// Returns the harness project id.
pub fn project() -> ProjectId {
    ProjectId::new(PROJECT).unwrap()
}

/// Agent settings for the harness.
pub fn settings() -> AgentSettings {
    AgentSettings {
        project_id: project(),
        credential: BearerCredential::new(TOKEN),
        key: key(),
        max_clock_skew_ms: 1_000,
        replay_cache_capacity: 128,
    }
}

// ============================================================================
// SECTION: Recording Driver
// ============================================================================

/// Driver that records calls instead of touching a display.
#[derive(Default)]
pub struct RecordingDriver {
    /// Recorded calls, one string per call.
    calls: Mutex<Vec<String>>,
    /// Artificial latency per call.
    latency: Duration,
    /// Fails every input call when true.
    failing: bool,
    /// Calls currently running.
    active: AtomicUsize,
    /// Highest observed concurrency.
    peak: AtomicUsize,
}

impl RecordingDriver {
    /// Driver that answers immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver that sleeps `latency` in every call.
    pub fn slow(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Driver whose input calls fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Returns the recorded calls.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the highest number of overlapping calls.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Records a call, applying latency and tracking overlap.
    async fn record(&self, call: String) -> Result<(), DriverError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.failing {
            return Err(DriverError::Failed("display gone".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DesktopDriver for RecordingDriver {
    async fn move_pointer(&self, path: &[Point], _step_delay: Duration) -> Result<(), DriverError> {
        let points: Vec<String> = path.iter().map(|p| format!("{},{}", p.x, p.y)).collect();
        self.record(format!("move {}", points.join(" "))).await
    }

    async fn click(&self, button: MouseButton, count: u8) -> Result<(), DriverError> {
        self.record(format!("click {} {count}", button.as_str())).await
    }

    async fn pointer_position(&self) -> Result<Point, DriverError> {
        self.record("position".to_string()).await?;
        Ok(Point::new(512, 384))
    }

    async fn key_press(&self, keys: &[String]) -> Result<(), DriverError> {
        self.record(format!("key {}", keys.join("+"))).await
    }

    async fn type_text(&self, text: &str, interval: Duration) -> Result<(), DriverError> {
        self.record(format!("type {} {text}", interval.as_millis())).await
    }

    async fn scroll(&self, direction: ScrollDirection, clicks: u32) -> Result<(), DriverError> {
        self.record(format!("scroll {} {clicks}", direction.as_str())).await
    }

    async fn capture_png(&self) -> Result<Vec<u8>, DriverError> {
        self.record("capture".to_string()).await?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn ocr_tsv(&self, _png: &[u8]) -> Result<String, DriverError> {
        self.record("ocr".to_string()).await?;
        Ok(OCR_TSV.to_string())
    }

    async fn ui_elements(&self) -> Result<Option<Vec<Value>>, DriverError> {
        self.record("ui".to_string()).await?;
        Ok(None)
    }

    async fn shell(&self, command: &str) -> Result<ShellOutput, DriverError> {
        self.record(format!("shell {command}")).await?;
        Ok(ShellOutput {
            success: true,
            output: "ok\n".to_string(),
            error: String::new(),
            returncode: 0,
        })
    }
}

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// Seal request issued now for the harness project.
pub fn request(invocation_id: &str, timeout_ms: u64) -> SealRequest {
    request_at(invocation_id, project(), unix_millis(), timeout_ms)
}

/// Seal request with explicit target and issue time.
pub fn request_at(invocation_id: &str, project_id: ProjectId, issued_at_ms: u64, timeout_ms: u64) -> SealRequest {
    SealRequest {
        invocation_id: InvocationId::new(invocation_id).unwrap(),
        target: EnvelopeTarget {
            project_id,
        },
        issued_at_ms,
        timeout_ms,
    }
}

/// Seals a command under the harness key.
pub fn seal(request: SealRequest, command: &PrimitiveCommand) -> ExecutionEnvelope {
    EnvelopeSealer::new(key()).seal(request, command).unwrap()
}

/// Seals an arbitrary payload under the harness key.
pub fn seal_value(request: SealRequest, payload: &Value) -> ExecutionEnvelope {
    EnvelopeSealer::new(key()).seal_value(request, payload).unwrap()
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Running agent.
pub struct Harness {
    /// Base URL.
    pub base: String,
    /// HTTP client.
    pub client: reqwest::Client,
    /// Driver behind the agent.
    pub driver: Arc<RecordingDriver>,
    /// Audit events.
    pub audit: Arc<InMemoryAuditSink>,
    /// Stops the server when dropped.
    _shutdown: oneshot::Sender<()>,
}

impl Harness {
    /// Posts an envelope with an optional bearer token.
    pub async fn execute(&self, token: Option<&str>, envelope: &ExecutionEnvelope) -> (u16, Value) {
        self.post(token, &json!({"envelope": envelope})).await
    }

    /// Posts a raw body with an optional bearer token.
    pub async fn post(&self, token: Option<&str>, body: &Value) -> (u16, Value) {
        let mut request = self.client.post(format!("{}/execute-encrypted", self.base)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }
}

/// Spawns an agent over `driver`.
pub async fn spawn_with(driver: RecordingDriver) -> Harness {
    let driver = Arc::new(driver);
    let audit = Arc::new(InMemoryAuditSink::new());
    let agent = Arc::new(Agent::new(settings(), driver.clone(), audit.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(serve_listener(listener, agent, async move {
        let _ = stopped.await;
    }));
    Harness {
        base,
        client: reqwest::Client::new(),
        driver,
        audit,
        _shutdown: stop,
    }
}

/// Spawns an agent over an immediate recording driver.
pub async fn spawn() -> Harness {
    spawn_with(RecordingDriver::new()).await
}
