// crates/deskrelay-core/src/core/mod.rs
// ============================================================================
// Module: Deskrelay Core Types
// Description: Canonical sandbox, envelope, and tool data model.
// Purpose: Provide stable, serializable types shared by every component.
// Dependencies: serde, ring, sha2
// ============================================================================

//! ## Overview
//! Core types define project allocations, container attachments, execution
//! envelopes, primitive commands, invocation state, and the tool catalog.
//! These types are the canonical source of truth for every wire surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod envelope;
pub mod errors;
pub mod hashing;
pub mod identifiers;
pub mod invocation;
pub mod network;
pub mod primitives;
pub mod time;
pub mod tooling;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use envelope::ENVELOPE_KEY_LEN;
pub use envelope::EnvelopeError;
pub use envelope::EnvelopeKey;
pub use envelope::EnvelopeSealer;
pub use envelope::EnvelopeTarget;
pub use envelope::ExecutionEnvelope;
pub use envelope::SealRequest;
pub use errors::ErrorKind;
pub use errors::FailureReport;
pub use errors::GENERIC_REJECTION;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::IdentifierError;
pub use identifiers::InvocationId;
pub use identifiers::KeyId;
pub use identifiers::ProjectId;
pub use invocation::InvocationState;
pub use invocation::InvocationTransitionError;
pub use invocation::ToolInvocation;
pub use network::AllocationRecord;
pub use network::AttachmentKind;
pub use network::ContainerAttachment;
pub use network::NetworkAllocation;
pub use network::NetworkRole;
pub use network::ProjectState;
pub use primitives::CaptureOptions;
pub use primitives::MouseButton;
pub use primitives::Point;
pub use primitives::PrimitiveCommand;
pub use primitives::ScrollDirection;
pub use primitives::TextSearch;
pub use time::unix_millis;
pub use tooling::CATALOG_VERSION;
pub use tooling::EXECUTION_CEILING_MS;
pub use tooling::ToolCatalog;
pub use tooling::ToolDefinition;
pub use tooling::ToolExecution;
pub use tooling::ToolName;
