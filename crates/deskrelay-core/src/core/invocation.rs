// crates/deskrelay-core/src/core/invocation.rs
// ============================================================================
// Module: Deskrelay Tool Invocations
// Description: Invocation record and lifecycle state machine.
// Purpose: Enforce legal invocation transitions at every hop.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A tool invocation moves through
//! `Received -> Authorizing -> {ExecutingLocally -> Completed|Failed}` for
//! server-side tools, or `Authorizing -> Dispatched -> Completed|Failed|TimedOut`
//! when an envelope is issued. Terminal states never transition again.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::InvocationId;
use crate::core::tooling::ToolName;

// ============================================================================
// SECTION: State
// ============================================================================

/// Invocation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Request accepted for processing.
    Received,
    /// Credential check in progress.
    Authorizing,
    /// Server-side tool running.
    ExecutingLocally,
    /// Envelope issued to the caller.
    Dispatched,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
    /// Exceeded its timeout ceiling.
    TimedOut,
}

impl InvocationState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Returns true when `next` is a legal successor.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Authorizing | Self::Failed)
                | (Self::Authorizing, Self::ExecutingLocally | Self::Dispatched | Self::Failed)
                | (Self::ExecutingLocally, Self::Completed | Self::Failed | Self::TimedOut)
                | (Self::Dispatched, Self::Completed | Self::Failed | Self::TimedOut)
        )
    }
}

impl InvocationState {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authorizing => "authorizing",
            Self::ExecutingLocally => "executing_locally",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal invocation transition from {from} to {to}")]
pub struct InvocationTransitionError {
    /// Current state.
    pub from: InvocationState,
    /// Requested state.
    pub to: InvocationState,
}

// ============================================================================
// SECTION: Invocation
// ============================================================================

/// One tool invocation tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Invocation identifier.
    pub invocation_id: InvocationId,
    /// Requested tool.
    pub tool: ToolName,
    /// Tool arguments.
    pub arguments: Value,
    /// Current state.
    state: InvocationState,
}

impl ToolInvocation {
    /// Creates a received invocation.
    #[must_use]
    pub const fn received(invocation_id: InvocationId, tool: ToolName, arguments: Value) -> Self {
        Self {
            invocation_id,
            tool,
            arguments,
            state: InvocationState::Received,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> InvocationState {
        self.state
    }

    /// Advances to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationTransitionError`] when the transition is not legal.
    pub fn advance(&mut self, next: InvocationState) -> Result<(), InvocationTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(InvocationTransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
