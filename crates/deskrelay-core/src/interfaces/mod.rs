// crates/deskrelay-core/src/interfaces/mod.rs
// ============================================================================
// Module: Deskrelay Interfaces
// Description: Persistence interface for the allocation table.
// Purpose: Let the lifecycle manager own allocations without ambient globals.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The allocation table maps each project to the network plan it was issued.
//! It is owned by the lifecycle manager and persisted externally so a restart
//! resumes the exact plan rather than recomputing one that might drift.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::core::AllocationRecord;
use crate::core::ProjectId;

// ============================================================================
// SECTION: Allocation Store
// ============================================================================

/// Allocation store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("allocation store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("allocation store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("allocation store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("allocation store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("allocation store error: {0}")]
    Store(String),
}

/// Durable projectId to allocation record table.
pub trait AllocationStore {
    /// Loads the record for a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, project_id: &ProjectId) -> Result<Option<AllocationRecord>, StoreError>;

    /// Inserts or replaces the record for its project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save(&self, record: &AllocationRecord) -> Result<(), StoreError>;

    /// Removes the record for a project. Missing records are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when removal fails.
    fn remove(&self, project_id: &ProjectId) -> Result<(), StoreError>;

    /// Lists every persisted record ordered by project id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn list(&self) -> Result<Vec<AllocationRecord>, StoreError>;
}

/// Shared allocation store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedAllocationStore {
    /// Inner store implementation.
    inner: Arc<dyn AllocationStore + Send + Sync>,
}

impl SharedAllocationStore {
    /// Wraps an allocation store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl AllocationStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn AllocationStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl AllocationStore for SharedAllocationStore {
    fn load(&self, project_id: &ProjectId) -> Result<Option<AllocationRecord>, StoreError> {
        self.inner.load(project_id)
    }

    fn save(&self, record: &AllocationRecord) -> Result<(), StoreError> {
        self.inner.save(record)
    }

    fn remove(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        self.inner.remove(project_id)
    }

    fn list(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        self.inner.list()
    }
}
