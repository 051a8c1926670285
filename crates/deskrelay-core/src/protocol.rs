// crates/deskrelay-core/src/protocol.rs
// ============================================================================
// Module: Deskrelay Wire Protocol
// Description: Request and response bodies exchanged between hops.
// Purpose: Share one definition of the relay, gateway, and agent payloads.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The relay client posts [`InvokeRequest`] bodies to the gateway and receives
//! an [`InvokeResponse`]: a direct result, an envelope to deliver, or a
//! failure. Envelopes are delivered to the agent wrapped in
//! [`AgentExecuteRequest`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::ErrorKind;
use crate::core::ExecutionEnvelope;
use crate::core::FailureReport;
use crate::core::InvocationId;
use crate::core::ProjectId;

// ============================================================================
// SECTION: Paths
// ============================================================================

/// Gateway invocation path.
pub const GATEWAY_INVOKE_PATH: &str = "/v1/invoke";
/// Agent execution path.
pub const AGENT_EXECUTE_PATH: &str = "/execute-encrypted";
/// Liveness path shared by every HTTP surface.
pub const HEALTH_PATH: &str = "/health";

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Tool invocation sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Caller-chosen invocation id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
    /// Project whose sandbox the tool targets.
    pub project_id: ProjectId,
    /// Tool name as supplied by the caller.
    pub tool: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Gateway response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvokeResponse {
    /// Server-side result.
    Result {
        /// Invocation identifier.
        invocation_id: InvocationId,
        /// Result payload.
        result: Value,
    },
    /// Envelope the caller must deliver to the agent.
    Envelope {
        /// Invocation identifier.
        invocation_id: InvocationId,
        /// Sealed primitive.
        envelope: ExecutionEnvelope,
    },
    /// Invocation failed.
    Error {
        /// Invocation identifier when one was assigned.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invocation_id: Option<InvocationId>,
        /// Failure category.
        error_kind: ErrorKind,
        /// Failure message.
        error: String,
    },
}

impl InvokeResponse {
    /// Builds an error response, withholding details for opaque kinds.
    #[must_use]
    pub fn error(invocation_id: Option<InvocationId>, kind: ErrorKind, message: impl Into<String>) -> Self {
        let report = FailureReport::new(kind, message);
        Self::Error {
            invocation_id,
            error_kind: report.error_kind,
            error: report.error,
        }
    }
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Envelope delivery body for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentExecuteRequest {
    /// Envelope exactly as issued by the gateway.
    pub envelope: ExecutionEnvelope,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use serde_json::json;

    use super::*;

    #[test]
    fn responses_are_tagged_by_kind() {
        let response = InvokeResponse::Result {
            invocation_id: InvocationId::new("i").unwrap(),
            result: json!({"success": true}),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["kind"], "result");
        let error = InvokeResponse::error(None, ErrorKind::Unauthenticated, "bad token abc");
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["error_kind"], "unauthenticated");
        assert_eq!(value["error"], "request rejected");
    }

    #[test]
    fn request_defaults_arguments() {
        let request: InvokeRequest =
            serde_json::from_value(json!({"project_id": "p1", "tool": "wait"})).unwrap();
        assert!(request.invocation_id.is_none());
        assert_eq!(request.arguments, Value::Null);
    }
}
