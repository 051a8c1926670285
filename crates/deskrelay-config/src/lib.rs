// crates/deskrelay-config/src/lib.rs
// ============================================================================
// Module: Deskrelay Config Library
// Description: Canonical config model, validation, and secret resolution.
// Purpose: Single source of truth for deskrelay.toml semantics.
// Dependencies: deskrelay-core, serde, toml
// ============================================================================

//! ## Overview
//! `deskrelay-config` defines the configuration model shared by every
//! Deskrelay component. Each component owns one optional section; a binary
//! asks for the section it needs and fails closed when it is missing or
//! invalid. Secrets are referenced indirectly and resolved at startup.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod secrets;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use secrets::SecretRef;
pub use secrets::SecretValue;
