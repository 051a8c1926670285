// crates/deskrelay-core/src/runtime/store.rs
// ============================================================================
// Module: Deskrelay In-Memory Store
// Description: Simple in-memory allocation table for tests and dry runs.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of [`AllocationStore`]
//! for tests and local dry runs. Records do not survive a restart.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::AllocationRecord;
use crate::core::ProjectId;
use crate::interfaces::AllocationStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory allocation store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAllocationStore {
    /// Records keyed by project id.
    records: Arc<Mutex<BTreeMap<ProjectId, AllocationRecord>>>,
}

impl InMemoryAllocationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationStore for InMemoryAllocationStore {
    fn load(&self, project_id: &ProjectId) -> Result<Option<AllocationRecord>, StoreError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("allocation store mutex poisoned".to_string()))?;
        Ok(guard.get(project_id).cloned())
    }

    fn save(&self, record: &AllocationRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Store("allocation store mutex poisoned".to_string()))?
            .insert(record.allocation.project_id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Store("allocation store mutex poisoned".to_string()))?
            .remove(project_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Store("allocation store mutex poisoned".to_string()))?;
        Ok(guard.values().cloned().collect())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
