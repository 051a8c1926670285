// crates/deskrelay-core/src/core/errors.rs
// ============================================================================
// Module: Deskrelay Error Taxonomy
// Description: Stable failure categories shared by every hop.
// Purpose: Let the orchestration layer branch on failure kind, not message text.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`ErrorKind`] is the small, stable set of failure categories surfaced on
//! the wire. Component error enums map into it at their boundary, and
//! [`FailureReport`] is the JSON body every hop returns on failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Error Kinds
// ============================================================================

/// Stable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid credential.
    Unauthenticated,
    /// Request failed validation.
    InvalidRequest,
    /// Tool name not present in the catalog.
    UnknownTool,
    /// No free subnet offset within the probe budget.
    AllocationConflict,
    /// Envelope could not be opened or was not acceptable.
    DecryptionFailure,
    /// Envelope carried an unknown primitive.
    UnsupportedAction,
    /// Primitive or tool ran but failed.
    ExecutionException,
    /// A hop exceeded its timeout ceiling.
    TimedOut,
    /// A downstream component was unreachable.
    Unavailable,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidRequest => "invalid_request",
            Self::UnknownTool => "unknown_tool",
            Self::AllocationConflict => "allocation_conflict",
            Self::DecryptionFailure => "decryption_failure",
            Self::UnsupportedAction => "unsupported_action",
            Self::ExecutionException => "execution_exception",
            Self::TimedOut => "timed_out",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// Returns the HTTP status code used for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::InvalidRequest | Self::DecryptionFailure | Self::UnsupportedAction => 400,
            Self::UnknownTool => 404,
            Self::AllocationConflict => 409,
            Self::ExecutionException | Self::Internal => 500,
            Self::Unavailable => 502,
            Self::TimedOut => 504,
        }
    }

    /// Returns true when details must be withheld from the caller.
    #[must_use]
    pub const fn is_opaque(self) -> bool {
        matches!(self, Self::Unauthenticated | Self::DecryptionFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Failure Report
// ============================================================================

/// Generic message returned for opaque failures.
pub const GENERIC_REJECTION: &str = "request rejected";

/// Failure body returned by every hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Always false.
    pub success: bool,
    /// Failure category.
    pub error_kind: ErrorKind,
    /// Human-readable error text.
    pub error: String,
}

impl FailureReport {
    /// Builds a report, replacing the message for opaque kinds.
    #[must_use]
    pub fn new(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        let error = if error_kind.is_opaque() { GENERIC_REJECTION.to_string() } else { message.into() };
        Self {
            success: false,
            error_kind,
            error,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
