// crates/deskrelay-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Allocation Store
// Description: Durable AllocationStore backend using SQLite WAL.
// Purpose: Persist subnet allocations so network plans survive restarts.
// Dependencies: deskrelay-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`AllocationStore`] implementation that
//! persists one canonical allocation record per project. Records are hashed on
//! write and verified on read so a corrupted table fails closed instead of
//! handing out an overlapping subnet.
//!
//! [`AllocationStore`]: deskrelay_core::AllocationStore

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_RECORD_BYTES;
pub use store::SqliteAllocationStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
