// crates/deskrelay-gateway/src/gateway.rs
// ============================================================================
// Module: Gateway Service
// Description: Authenticates, dispatches, and answers tool invocations.
// Purpose: Run direct tools locally and seal primitive tools into envelopes.
// Dependencies: deskrelay-core, deskrelay-config, tokio
// ============================================================================

//! ## Overview
//! [`Gateway::invoke`] drives one [`ToolInvocation`] through its lifecycle:
//! the bearer credential is checked in constant time, the tool is looked up,
//! and the invocation either executes locally under the execution ceiling or
//! is dispatched as an [`ExecutionEnvelope`]. The gateway never contacts the
//! guest. Responses carry data results or ciphertext, never the decision that
//! produced a primitive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use deskrelay_config::GatewayConfig;
use deskrelay_core::AllocationStore;
use deskrelay_core::AuditEvent;
use deskrelay_core::EnvelopeKey;
use deskrelay_core::EnvelopeSealer;
use deskrelay_core::EnvelopeTarget;
use deskrelay_core::ErrorKind;
use deskrelay_core::ExecutionEnvelope;
use deskrelay_core::InvocationId;
use deskrelay_core::InvocationState;
use deskrelay_core::KeyId;
use deskrelay_core::NetworkRole;
use deskrelay_core::Point;
use deskrelay_core::ProjectId;
use deskrelay_core::SealRequest;
use deskrelay_core::SharedAllocationStore;
use deskrelay_core::SharedAuditSink;
use deskrelay_core::ToolExecution;
use deskrelay_core::ToolInvocation;
use deskrelay_core::ToolName;
use deskrelay_core::protocol::InvokeRequest;
use deskrelay_core::protocol::InvokeResponse;
use deskrelay_core::security::AuthError;
use deskrelay_core::security::BearerCredential;
use deskrelay_core::unix_millis;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::GatewayError;
use crate::decision::DecisionError;
use crate::decision::DecisionPolicy;
use crate::decision::JitterSource;
use crate::decision::NoArgs;
use crate::decision::SystemJitter;
use crate::decision::parse_args;
use crate::ledger::InFlightLedger;
use crate::ledger::LedgerError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit component name.
const AUDIT_COMPONENT: &str = "gateway";
/// Projects whose last pointer position is remembered.
const POINTER_MEMORY_LIMIT: usize = 4_096;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Resolved gateway settings.
pub struct GatewaySettings {
    /// Orchestration-facing credential.
    pub credential: BearerCredential,
    /// Envelope sealing key.
    pub key: EnvelopeKey,
    /// Timeout policy.
    pub policy: DecisionPolicy,
    /// Ledger capacity.
    pub max_in_flight: usize,
}

impl GatewaySettings {
    /// Resolves secrets and builds settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when a secret or the key is invalid.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let token = config
            .auth_token
            .resolve("gateway.auth_token")
            .map_err(|err| GatewayError::Config(err.to_string()))?;
        let key_material = config
            .envelope_key
            .resolve("gateway.envelope_key")
            .map_err(|err| GatewayError::Config(err.to_string()))?;
        let key = EnvelopeKey::from_base64(KeyId::new(config.key_id.clone()), key_material.expose())
            .map_err(|err| GatewayError::Config(err.to_string()))?;
        Ok(Self {
            credential: BearerCredential::new(token.expose()),
            key,
            policy: DecisionPolicy {
                primitive_timeout_ms: config.primitive_timeout_ms,
                execution_ceiling_ms: config.execution_ceiling_ms,
            },
            max_in_flight: config.max_in_flight,
        })
    }
}

// ============================================================================
// SECTION: Failures
// ============================================================================

/// Classified invocation failure.
#[derive(Debug)]
struct Failure {
    /// Error category.
    kind: ErrorKind,
    /// Caller-facing message.
    message: String,
}

impl Failure {
    /// Builds a failure.
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<DecisionError> for Failure {
    fn from(error: DecisionError) -> Self {
        Self::new(ErrorKind::InvalidRequest, error.to_string())
    }
}

impl From<LedgerError> for Failure {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Duplicate(_) => Self::new(ErrorKind::InvalidRequest, error.to_string()),
            LedgerError::Full(_) => Self::new(ErrorKind::Unavailable, error.to_string()),
        }
    }
}

/// Successful invocation outcome.
enum Outcome {
    /// Server-side result.
    Result(Value),
    /// Envelope for the agent.
    Envelope(ExecutionEnvelope),
}

/// `wait` arguments.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WaitArgs {
    /// Pause length.
    milliseconds: u64,
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Command relay gateway.
pub struct Gateway {
    /// Orchestration-facing credential.
    credential: BearerCredential,
    /// Envelope sealer.
    sealer: EnvelopeSealer,
    /// Decision and timeout policy.
    policy: DecisionPolicy,
    /// Live envelopes.
    ledger: InFlightLedger,
    /// Last pointer position issued per project.
    pointers: Mutex<HashMap<ProjectId, Point>>,
    /// Trajectory jitter.
    jitter: Arc<dyn JitterSource>,
    /// Allocation table consulted by `describe_sandbox`.
    store: Option<SharedAllocationStore>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl Gateway {
    /// Creates a gateway.
    #[must_use]
    pub fn new(settings: GatewaySettings, audit: SharedAuditSink) -> Self {
        Self {
            credential: settings.credential,
            sealer: EnvelopeSealer::new(settings.key),
            policy: settings.policy,
            ledger: InFlightLedger::new(settings.max_in_flight),
            pointers: Mutex::new(HashMap::new()),
            jitter: Arc::new(SystemJitter::new()),
            store: None,
            audit,
        }
    }

    /// Replaces the trajectory jitter source.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attaches the allocation table for `describe_sandbox`.
    #[must_use]
    pub fn with_store(mut self, store: SharedAllocationStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Returns the credential fingerprint.
    #[must_use]
    pub fn credential_fingerprint(&self) -> &str {
        self.credential.fingerprint()
    }

    /// Verifies an `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the header is missing or wrong.
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<(), AuthError> {
        self.credential.verify_header(auth_header)
    }

    /// Handles one invocation end to end.
    pub async fn invoke(&self, auth_header: Option<&str>, request: InvokeRequest) -> InvokeResponse {
        let invocation_id = request.invocation_id.clone().unwrap_or_else(InvocationId::generate);
        if self.authenticate(auth_header).is_err() {
            self.audit.record(
                &AuditEvent::new(AUDIT_COMPONENT, "invocation_rejected")
                    .with("invocation_id", &invocation_id)
                    .with("error_kind", ErrorKind::Unauthenticated),
            );
            return InvokeResponse::error(Some(invocation_id), ErrorKind::Unauthenticated, "unauthenticated");
        }
        let Some(tool) = ToolName::parse(&request.tool) else {
            self.audit.record(
                &AuditEvent::new(AUDIT_COMPONENT, "invocation_rejected")
                    .with("invocation_id", &invocation_id)
                    .with("tool", &request.tool)
                    .with("error_kind", ErrorKind::UnknownTool),
            );
            return InvokeResponse::error(
                Some(invocation_id),
                ErrorKind::UnknownTool,
                format!("unknown tool: {}", request.tool),
            );
        };

        let mut invocation = ToolInvocation::received(invocation_id.clone(), tool, request.arguments);
        let outcome = self.run(&request.project_id, &mut invocation).await;
        let response = match outcome {
            Ok(Outcome::Result(result)) => InvokeResponse::Result {
                invocation_id,
                result,
            },
            Ok(Outcome::Envelope(envelope)) => InvokeResponse::Envelope {
                invocation_id,
                envelope,
            },
            Err(failure) => {
                let terminal = if failure.kind == ErrorKind::TimedOut {
                    InvocationState::TimedOut
                } else {
                    InvocationState::Failed
                };
                let _ = invocation.advance(terminal);
                InvokeResponse::error(Some(invocation_id), failure.kind, failure.message)
            }
        };
        let mut event = AuditEvent::new(AUDIT_COMPONENT, "invocation_finished")
            .with("invocation_id", &invocation.invocation_id)
            .with("project_id", &request.project_id)
            .with("tool", tool)
            .with("state", invocation.state());
        if let InvokeResponse::Error {
            error_kind, ..
        } = &response
        {
            event = event.with("error_kind", error_kind);
        }
        self.audit.record(&event);
        response
    }

    /// Executes an authenticated invocation.
    async fn run(&self, project_id: &ProjectId, invocation: &mut ToolInvocation) -> Result<Outcome, Failure> {
        advance(invocation, InvocationState::Authorizing)?;
        match invocation.tool.execution() {
            ToolExecution::Direct => {
                advance(invocation, InvocationState::ExecutingLocally)?;
                let ceiling = Duration::from_millis(self.policy.execution_ceiling_ms);
                let result = tokio::time::timeout(ceiling, self.run_direct(project_id, invocation))
                    .await
                    .map_err(|_| {
                        Failure::new(
                            ErrorKind::TimedOut,
                            format!("{} exceeded {} ms", invocation.tool, self.policy.execution_ceiling_ms),
                        )
                    })??;
                advance(invocation, InvocationState::Completed)?;
                Ok(Outcome::Result(result))
            }
            ToolExecution::Primitive => {
                let envelope = self.dispatch(project_id, invocation)?;
                advance(invocation, InvocationState::Dispatched)?;
                Ok(Outcome::Envelope(envelope))
            }
        }
    }

    /// Runs a server-side tool.
    async fn run_direct(&self, project_id: &ProjectId, invocation: &ToolInvocation) -> Result<Value, Failure> {
        match invocation.tool {
            ToolName::Wait => {
                let args: WaitArgs = parse_args(&invocation.arguments)?;
                tokio::time::sleep(Duration::from_millis(args.milliseconds)).await;
                Ok(json!({
                    "success": true,
                    "waited_ms": args.milliseconds,
                    "message": format!("Waited {} ms", args.milliseconds),
                }))
            }
            ToolName::DescribeSandbox => {
                let _: NoArgs = parse_args(&invocation.arguments)?;
                self.describe_sandbox(project_id)
            }
            other => Err(Failure::new(ErrorKind::Internal, format!("{other} is not a direct tool"))),
        }
    }

    /// Builds the logical addressing contract for a project.
    fn describe_sandbox(&self, project_id: &ProjectId) -> Result<Value, Failure> {
        let services: Vec<Value> = NetworkRole::all()
            .into_iter()
            .map(|role| {
                json!({
                    "role": role,
                    "hostname": role.as_str().replace('_', "-"),
                    "logical_address": role.logical_address().to_string(),
                })
            })
            .collect();
        let allocation = match &self.store {
            Some(store) => store
                .load(project_id)
                .map_err(|err| Failure::new(ErrorKind::Unavailable, err.to_string()))?
                .map(|record| {
                    json!({
                        "subnet": record.allocation.subnet,
                        "gateway": record.allocation.gateway.to_string(),
                        "offset": record.allocation.offset,
                        "state": record.state,
                    })
                }),
            None => None,
        };
        Ok(json!({
            "success": true,
            "project_id": project_id,
            "services": services,
            "allocation": allocation,
        }))
    }

    /// Decides and seals the primitive for an invocation.
    fn dispatch(&self, project_id: &ProjectId, invocation: &ToolInvocation) -> Result<ExecutionEnvelope, Failure> {
        let pointer = self.pointer(project_id);
        let plan = self.policy.decide(invocation.tool, &invocation.arguments, pointer, self.jitter.as_ref())?;
        let issued_at_ms = unix_millis();
        let expires_at_ms = issued_at_ms.saturating_add(plan.timeout_ms);
        self.ledger.reserve(&invocation.invocation_id, expires_at_ms, issued_at_ms)?;
        let request = SealRequest {
            invocation_id: invocation.invocation_id.clone(),
            target: EnvelopeTarget {
                project_id: project_id.clone(),
            },
            issued_at_ms,
            timeout_ms: plan.timeout_ms,
        };
        let envelope = match self.sealer.seal(request, &plan.command) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.ledger.release(&invocation.invocation_id);
                return Err(Failure::new(ErrorKind::Internal, err.to_string()));
            }
        };
        if let Some(position) = plan.pointer_after {
            self.remember_pointer(project_id, position);
        }
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "envelope_issued")
                .with("invocation_id", &invocation.invocation_id)
                .with("project_id", project_id)
                .with("tool", invocation.tool)
                .with("key_id", self.sealer.key_id())
                .with("timeout_ms", plan.timeout_ms),
        );
        Ok(envelope)
    }

    /// Returns the last pointer position issued for a project.
    fn pointer(&self, project_id: &ProjectId) -> Option<Point> {
        self.pointers.lock().unwrap_or_else(PoisonError::into_inner).get(project_id).copied()
    }

    /// Records where the pointer will be after an issued primitive.
    fn remember_pointer(&self, project_id: &ProjectId, position: Point) {
        let mut pointers = self.pointers.lock().unwrap_or_else(PoisonError::into_inner);
        if pointers.len() >= POINTER_MEMORY_LIMIT && !pointers.contains_key(project_id) {
            pointers.clear();
        }
        pointers.insert(project_id.clone(), position);
    }
}

/// Advances an invocation, treating illegal transitions as internal failures.
fn advance(invocation: &mut ToolInvocation, next: InvocationState) -> Result<(), Failure> {
    invocation.advance(next).map_err(|err| Failure::new(ErrorKind::Internal, err.to_string()))
}
