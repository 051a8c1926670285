// crates/deskrelay-gateway/src/lib.rs
// ============================================================================
// Module: Deskrelay Gateway
// Description: Trusted command relay gateway.
// Purpose: Decide how tools become primitives and issue sealed envelopes.
// Dependencies: deskrelay-core, deskrelay-config, axum, ring, tokio
// ============================================================================

//! ## Overview
//! The gateway is the only component that knows how a tool is composed from
//! guest primitives. It authenticates the orchestration layer, runs the
//! server-side tools itself, and answers every other tool with an
//! AES-256-GCM envelope that only the target project's agent can open.
//!
//! Security posture: requests are untrusted; the gateway never contacts the
//! guest and never returns decision logic in plaintext.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod decision;
pub mod gateway;
pub mod ledger;
pub mod server;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use decision::DecisionError;
pub use decision::DecisionPolicy;
pub use decision::FixedJitter;
pub use decision::JitterSource;
pub use decision::SystemJitter;
pub use gateway::Gateway;
pub use gateway::GatewaySettings;
pub use ledger::InFlightLedger;
pub use server::GatewayServer;
pub use server::router;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway startup and transport errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration or secret failure.
    #[error("gateway config error: {0}")]
    Config(String),
    /// Listener or server failure.
    #[error("gateway transport error: {0}")]
    Transport(String),
}
