// crates/deskrelay-agent/src/agent.rs
// ============================================================================
// Module: Agent Executor
// Description: Verifies envelopes and runs their primitive one at a time.
// Purpose: Execute only authentic, fresh, correctly targeted envelopes.
// Dependencies: deskrelay-core, deskrelay-config, tokio
// ============================================================================

//! ## Overview
//! [`Agent::execute`] checks, in order: the agent credential, the envelope
//! target, the acceptance window (`issued_at + timeout + skew`), the AEAD
//! seal, and the replay cache. Every envelope failure is reported as
//! `decryption_failure` with a generic message so callers cannot probe which
//! check failed. A verified primitive then waits for the guest-wide execution
//! lock and runs under the envelope's own timeout; on expiry the handler
//! future is dropped, killing any child process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use deskrelay_config::AgentConfig;
use deskrelay_core::AuditEvent;
use deskrelay_core::EnvelopeKey;
use deskrelay_core::ErrorKind;
use deskrelay_core::ExecutionEnvelope;
use deskrelay_core::FailureReport;
use deskrelay_core::KeyId;
use deskrelay_core::PrimitiveCommand;
use deskrelay_core::ProjectId;
use deskrelay_core::SharedAuditSink;
use deskrelay_core::envelope::open_value;
use deskrelay_core::primitives::is_known_action;
use deskrelay_core::security::AuthError;
use deskrelay_core::security::BearerCredential;
use deskrelay_core::unix_millis;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::AgentError;
use crate::driver::DesktopDriver;
use crate::handlers;
use crate::replay::ReplayCache;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit component name.
const AUDIT_COMPONENT: &str = "agent";

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Resolved agent settings.
pub struct AgentSettings {
    /// Project whose guest this agent serves.
    pub project_id: ProjectId,
    /// Agent credential.
    pub credential: BearerCredential,
    /// Envelope key.
    pub key: EnvelopeKey,
    /// Tolerated clock skew in milliseconds.
    pub max_clock_skew_ms: u64,
    /// Replay cache capacity.
    pub replay_cache_capacity: usize,
}

impl AgentSettings {
    /// Resolves secrets and builds settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] when a secret or the key is invalid.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let token = config
            .auth_token
            .resolve("agent.auth_token")
            .map_err(|err| AgentError::Config(err.to_string()))?;
        let key_material = config
            .envelope_key
            .resolve("agent.envelope_key")
            .map_err(|err| AgentError::Config(err.to_string()))?;
        let key = EnvelopeKey::from_base64(KeyId::new(config.key_id.clone()), key_material.expose())
            .map_err(|err| AgentError::Config(err.to_string()))?;
        Ok(Self {
            project_id: config.project_id.clone(),
            credential: BearerCredential::new(token.expose()),
            key,
            max_clock_skew_ms: config.max_clock_skew_ms,
            replay_cache_capacity: config.replay_cache_capacity,
        })
    }
}

// ============================================================================
// SECTION: Failures
// ============================================================================

/// Classified execution failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    /// Error category.
    pub kind: ErrorKind,
    /// Detail kept for the audit log.
    pub detail: String,
}

impl AgentFailure {
    /// Builds a failure.
    fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds the caller-facing report; opaque kinds get a generic message.
    #[must_use]
    pub fn report(&self) -> FailureReport {
        FailureReport::new(self.kind, self.detail.clone())
    }
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Remote execution agent.
pub struct Agent {
    /// Project this agent serves.
    project_id: ProjectId,
    /// Agent credential.
    credential: BearerCredential,
    /// Envelope key.
    key: EnvelopeKey,
    /// Tolerated clock skew.
    max_clock_skew_ms: u64,
    /// Executed invocation ids.
    replay: ReplayCache,
    /// Desktop access.
    driver: Arc<dyn DesktopDriver>,
    /// Serializes primitives on the guest.
    execution: Mutex<()>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl Agent {
    /// Creates an agent.
    #[must_use]
    pub fn new(settings: AgentSettings, driver: Arc<dyn DesktopDriver>, audit: SharedAuditSink) -> Self {
        Self {
            project_id: settings.project_id,
            credential: settings.credential,
            key: settings.key,
            max_clock_skew_ms: settings.max_clock_skew_ms,
            replay: ReplayCache::new(settings.replay_cache_capacity),
            driver,
            execution: Mutex::new(()),
            audit,
        }
    }

    /// Returns the project this agent serves.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Verifies an `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the header is missing or wrong.
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<(), AuthError> {
        self.credential.verify_header(auth_header)
    }

    /// Verifies and executes one envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AgentFailure`] classified by the error taxonomy.
    pub async fn execute(
        &self,
        auth_header: Option<&str>,
        envelope: &ExecutionEnvelope,
    ) -> Result<Value, AgentFailure> {
        let outcome = self.verify_and_run(auth_header, envelope).await;
        let mut event = AuditEvent::new(AUDIT_COMPONENT, "envelope_executed")
            .with("invocation_id", &envelope.invocation_id)
            .with("success", outcome.is_ok());
        if let Err(failure) = &outcome {
            event = event.with("error_kind", failure.kind).with("detail", &failure.detail);
        }
        self.audit.record(&event);
        outcome
    }

    /// Runs every check, then the primitive.
    async fn verify_and_run(
        &self,
        auth_header: Option<&str>,
        envelope: &ExecutionEnvelope,
    ) -> Result<Value, AgentFailure> {
        self.authenticate(auth_header)
            .map_err(|err| AgentFailure::new(ErrorKind::Unauthenticated, err.to_string()))?;
        let command = self.open(envelope, unix_millis())?;

        let limit = Duration::from_millis(envelope.timeout_ms);
        let run = async {
            let _guard = self.execution.lock().await;
            handlers::execute(self.driver.as_ref(), &command).await
        };
        match tokio::time::timeout(limit, run).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(AgentFailure::new(ErrorKind::ExecutionException, err.to_string())),
            Err(_) => Err(AgentFailure::new(
                ErrorKind::TimedOut,
                format!("{} timed out after {} ms", command.action_name(), envelope.timeout_ms),
            )),
        }
    }

    /// Applies target, freshness, seal, and replay checks.
    fn open(&self, envelope: &ExecutionEnvelope, now_ms: u64) -> Result<PrimitiveCommand, AgentFailure> {
        let rejected = |detail: &str| AgentFailure::new(ErrorKind::DecryptionFailure, detail);
        if envelope.target.project_id != self.project_id {
            return Err(rejected("envelope targets another project"));
        }
        let window_closes = envelope.expires_at_ms().saturating_add(self.max_clock_skew_ms);
        if now_ms > window_closes {
            return Err(rejected("envelope expired"));
        }
        if envelope.issued_at_ms > now_ms.saturating_add(self.max_clock_skew_ms) {
            return Err(rejected("envelope issued in the future"));
        }
        let payload = open_value(&self.key, envelope).map_err(|_| rejected("envelope failed to open"))?;
        if !self.replay.admit(&envelope.invocation_id, window_closes, now_ms) {
            return Err(rejected("envelope replayed"));
        }
        let action = payload.get("action").and_then(Value::as_str).unwrap_or_default().to_string();
        if !is_known_action(&action) {
            return Err(AgentFailure::new(
                ErrorKind::UnsupportedAction,
                format!("unsupported action: {action}"),
            ));
        }
        serde_json::from_value(payload)
            .map_err(|err| AgentFailure::new(ErrorKind::InvalidRequest, format!("malformed {action}: {err}")))
    }
}
