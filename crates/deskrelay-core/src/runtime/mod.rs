// crates/deskrelay-core/src/runtime/mod.rs
// ============================================================================
// Module: Deskrelay Runtime
// Description: Subnet allocator and in-memory store implementations.
// Purpose: Host the pure allocation logic and its test store.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! Runtime helpers that operate on the core data model.

pub mod allocator;
pub mod store;

pub use allocator::AllocationError;
pub use allocator::AllocatorPolicy;
pub use allocator::SubnetAllocator;
pub use allocator::occupied_offsets;
pub use store::InMemoryAllocationStore;
