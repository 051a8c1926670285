// crates/deskrelay-stabilizer/src/lib.rs
// ============================================================================
// Module: Deskrelay Address Stabilizer
// Description: Logical-address aliases, NAT redirection, and byte relays.
// Purpose: Let one guest image reach its services on fixed logical addresses.
// Dependencies: deskrelay-core, deskrelay-config, tokio
// ============================================================================

//! ## Overview
//! The guest image hardcodes `172.30.0.<role octet>` for its services. Inside
//! each tenant the services live at `172.30.<offset>.<role octet>`. This
//! crate bridges the two: [`plan`] computes aliases and NAT rules purely,
//! [`Stabilizer`] applies and removes them through [`HostCommandRunner`], and
//! [`Supervisor`] keeps a [`ByteRelay`] per mapping alive, re-resolving real
//! addresses on every restart.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod host;
pub mod plan;
pub mod relay;
pub mod resolve;
pub mod stabilizer;
pub mod supervisor;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use host::HostCommand;
pub use host::HostCommandRunner;
pub use host::HostError;
pub use host::SystemCommandRunner;
pub use plan::PlannedMapping;
pub use plan::Resolution;
pub use plan::ResolutionSource;
pub use plan::StabilizationPlan;
pub use plan::plan;
pub use plan::teardown_commands;
pub use relay::ByteRelay;
pub use resolve::NameResolver;
pub use resolve::SystemResolver;
pub use stabilizer::Stabilizer;
pub use supervisor::Supervisor;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Stabilizer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StabilizerError {
    /// A real address could not be determined.
    #[error("resolution failed: {0}")]
    Resolve(String),
    /// A required host command failed.
    #[error(transparent)]
    Host(#[from] HostError),
    /// State directory or pid file failure.
    #[error("stabilizer io error: {0}")]
    Io(String),
    /// Relay listener failure.
    #[error("relay error: {0}")]
    Relay(String),
}
