// crates/deskrelay-relay/src/lib.rs
// ============================================================================
// Module: Deskrelay Relay
// Description: Thin relay client between the orchestration layer and a sandbox.
// Purpose: Validate, forward, and normalize tool calls over three transports.
// Dependencies: deskrelay-core, deskrelay-config, axum, reqwest, jsonschema
// ============================================================================

//! ## Overview
//! The relay is the only surface the orchestration layer talks to. It holds
//! no decision logic and no envelope key: it validates arguments against the
//! tool catalog, asks the gateway what to do, carries any returned envelope
//! unmodified to the guest agent, and maps every result into the
//! `{success, output, message, ...}` contract.
//!
//! Stdio, HTTP, and WebSocket transports share one [`Relay`] and differ only
//! in framing.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod catalog;
pub mod hops;
pub mod normalize;
pub mod relay;
pub mod server;
pub mod session;
pub mod stdio;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use catalog::ToolValidator;
pub use hops::HopSettings;
pub use relay::Relay;
pub use relay::RelayFailure;
pub use relay::RelaySettings;
pub use server::RelayServer;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Relay startup and transport errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration, secret, or catalog failure.
    #[error("relay config error: {0}")]
    Config(String),
    /// Listener, framing, or stream failure.
    #[error("relay transport error: {0}")]
    Transport(String),
}
