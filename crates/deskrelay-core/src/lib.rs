// crates/deskrelay-core/src/lib.rs
// ============================================================================
// Module: Deskrelay Core Library
// Description: Public API surface for the Deskrelay core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Deskrelay core holds everything the sandbox components share: the
//! deterministic subnet allocator, the allocation table interface, the
//! envelope cipher, primitive command definitions, the versioned tool catalog,
//! the error taxonomy, and audit and credential helpers.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod core;
pub mod interfaces;
pub mod protocol;
pub mod runtime;
pub mod security;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use audit::AuditEvent;
pub use audit::AuditSink;
pub use audit::SharedAuditSink;
pub use interfaces::AllocationStore;
pub use interfaces::SharedAllocationStore;
pub use interfaces::StoreError;
pub use runtime::AllocationError;
pub use runtime::AllocatorPolicy;
pub use runtime::InMemoryAllocationStore;
pub use runtime::SubnetAllocator;
pub use security::BearerCredential;
