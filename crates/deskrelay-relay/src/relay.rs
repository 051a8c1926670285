// crates/deskrelay-relay/src/relay.rs
// ============================================================================
// Module: Relay Core
// Description: Authentication, validation, forwarding, and normalization.
// Purpose: One transport-independent implementation of the relay contract.
// Dependencies: deskrelay-core, deskrelay-config
// ============================================================================

//! ## Overview
//! [`Relay::execute`] validates arguments, asks the gateway for a decision,
//! and either normalizes the direct result or delivers the returned envelope
//! to the agent. An envelope is forwarded only when it targets this relay's
//! project and carries the invocation id the relay assigned.
//! Security posture: the relay never sees plaintext primitives and holds no
//! envelope key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deskrelay_config::RelayConfig;
use deskrelay_config::SecretRef;
use deskrelay_core::AuditEvent;
use deskrelay_core::ErrorKind;
use deskrelay_core::InvocationId;
use deskrelay_core::ProjectId;
use deskrelay_core::SharedAuditSink;
use deskrelay_core::protocol::InvokeRequest;
use deskrelay_core::protocol::InvokeResponse;
use deskrelay_core::security::AuthError;
use deskrelay_core::security::BearerCredential;
use serde_json::Value;
use serde_json::json;

use crate::RelayError;
use crate::catalog::ToolValidator;
use crate::hops::AgentHop;
use crate::hops::GatewayHop;
use crate::hops::HopSettings;
use crate::normalize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit component name.
const AUDIT_COMPONENT: &str = "relay";

// ============================================================================
// SECTION: Failures
// ============================================================================

/// Classified relay failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFailure {
    /// Error category.
    pub kind: ErrorKind,
    /// Caller-facing message.
    pub message: String,
}

impl RelayFailure {
    /// Builds a failure.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the normalized failure body.
    #[must_use]
    pub fn to_value(&self) -> Value {
        normalize::failure(self.kind, &self.message)
    }
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Resolved relay settings.
pub struct RelaySettings {
    /// Project this relay serves.
    pub project_id: ProjectId,
    /// Orchestration-facing credential.
    pub credential: BearerCredential,
    /// Gateway hop.
    pub gateway: HopSettings,
    /// Agent hop.
    pub agent: HopSettings,
    /// Maximum frame or body size.
    pub max_frame_bytes: usize,
}

impl RelaySettings {
    /// Resolves secrets and builds settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when a secret cannot be resolved.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let resolve = |secret: &SecretRef, field: &str| {
            secret
                .resolve(field)
                .map(|value| value.expose().to_string())
                .map_err(|err| RelayError::Config(err.to_string()))
        };
        let token = resolve(&config.auth_token, "relay.auth_token")?;
        Ok(Self {
            project_id: config.project_id.clone(),
            credential: BearerCredential::new(&token),
            gateway: HopSettings {
                base_url: config.gateway_url.clone(),
                token: resolve(&config.gateway_token, "relay.gateway_token")?,
                timeout_ms: config.gateway_timeout_ms,
            },
            agent: HopSettings {
                base_url: config.agent_url.clone(),
                token: resolve(&config.agent_token, "relay.agent_token")?,
                timeout_ms: config.agent_timeout_ms,
            },
            max_frame_bytes: config.max_frame_bytes,
        })
    }
}

// ============================================================================
// SECTION: Relay
// ============================================================================

/// Thin relay client.
pub struct Relay {
    /// Project this relay serves.
    project_id: ProjectId,
    /// Orchestration-facing credential.
    credential: BearerCredential,
    /// Catalog and compiled schemas.
    validator: ToolValidator,
    /// Gateway hop.
    gateway: GatewayHop,
    /// Agent hop.
    agent: AgentHop,
    /// Maximum frame or body size.
    max_frame_bytes: usize,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl Relay {
    /// Builds a relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when a hop URL or schema is invalid.
    pub fn new(settings: RelaySettings, audit: SharedAuditSink) -> Result<Self, RelayError> {
        Ok(Self {
            project_id: settings.project_id,
            credential: settings.credential,
            validator: ToolValidator::new()?,
            gateway: GatewayHop::new(&settings.gateway)?,
            agent: AgentHop::new(&settings.agent)?,
            max_frame_bytes: settings.max_frame_bytes,
            audit,
        })
    }

    /// Returns the project this relay serves.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Returns the maximum frame or body size.
    #[must_use]
    pub const fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Compares a presented token in constant time.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> bool {
        self.credential.authenticate(token)
    }

    /// Verifies an `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the header is missing or wrong.
    pub fn authenticate_header(&self, auth_header: Option<&str>) -> Result<(), AuthError> {
        self.credential.verify_header(auth_header)
    }

    /// Returns the catalog listing.
    #[must_use]
    pub fn list_tools(&self) -> Value {
        let catalog = self.validator.catalog();
        json!({
            "version": catalog.version,
            "tools": catalog.tools,
        })
    }

    /// Executes a tool and returns the normalized result.
    ///
    /// # Errors
    ///
    /// Returns [`RelayFailure`] when validation, either hop, or the target
    /// check fails.
    pub async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, RelayFailure> {
        let invocation_id = InvocationId::generate();
        let outcome = self.forward(&invocation_id, tool, arguments).await;
        let mut event = AuditEvent::new(AUDIT_COMPONENT, "tool_executed")
            .with("invocation_id", &invocation_id)
            .with("tool", tool)
            .with("success", outcome.is_ok());
        if let Err(failure) = &outcome {
            event = event.with("error_kind", failure.kind);
        }
        self.audit.record(&event);
        outcome
    }

    /// Validates and forwards one call.
    async fn forward(
        &self,
        invocation_id: &InvocationId,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, RelayFailure> {
        let (name, arguments) = self.validator.validate(tool, arguments)?;
        let request = InvokeRequest {
            invocation_id: Some(invocation_id.clone()),
            project_id: self.project_id.clone(),
            tool: name.as_str().to_string(),
            arguments,
        };
        match self.gateway.invoke(&request).await? {
            InvokeResponse::Result {
                result, ..
            } => Ok(normalize::success(name, result)),
            InvokeResponse::Envelope {
                invocation_id: issued,
                envelope,
            } => {
                if envelope.target.project_id != self.project_id
                    || issued != *invocation_id
                    || envelope.invocation_id != *invocation_id
                {
                    return Err(RelayFailure::new(
                        ErrorKind::Internal,
                        "gateway issued an envelope for a different target",
                    ));
                }
                let raw = self.agent.deliver(&envelope).await?;
                Ok(normalize::success(name, raw))
            }
            InvokeResponse::Error {
                error_kind,
                error,
                ..
            } => Err(RelayFailure::new(error_kind, error)),
        }
    }

    /// Executes a tool and returns the normalized body for either outcome.
    pub async fn execute_normalized(&self, tool: &str, arguments: Value) -> (Option<ErrorKind>, Value) {
        match self.execute(tool, arguments).await {
            Ok(value) => (None, value),
            Err(failure) => (Some(failure.kind), failure.to_value()),
        }
    }
}

