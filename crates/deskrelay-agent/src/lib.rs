// crates/deskrelay-agent/src/lib.rs
// ============================================================================
// Module: Deskrelay Agent
// Description: Remote execution agent running inside the guest.
// Purpose: Open sealed primitives and execute them against the desktop.
// Dependencies: deskrelay-core, deskrelay-config, axum, tokio
// ============================================================================

//! ## Overview
//! The agent is deliberately thin. It accepts envelopes addressed to its own
//! project, refuses anything stale, replayed, or forged, and runs exactly one
//! primitive handler per envelope through a [`DesktopDriver`]. It holds no
//! decision logic: every waypoint, key name, and timeout was chosen by the
//! gateway.
//!
//! Security posture: the guest is untrusted and so is every request.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod agent;
pub mod command;
pub mod driver;
pub mod handlers;
pub mod ocr;
pub mod replay;
pub mod server;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use agent::Agent;
pub use agent::AgentFailure;
pub use agent::AgentSettings;
pub use command::CommandDriver;
pub use driver::DesktopDriver;
pub use driver::DriverError;
pub use driver::ShellOutput;
pub use server::AgentServer;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Agent startup and transport errors.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration or secret failure.
    #[error("agent config error: {0}")]
    Config(String),
    /// Listener or server failure.
    #[error("agent transport error: {0}")]
    Transport(String),
}
