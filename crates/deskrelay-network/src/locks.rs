// crates/deskrelay-network/src/locks.rs
// ============================================================================
// Module: Per-Project Locks
// Description: Keyed async mutexes serializing work on one project.
// Purpose: Prevent concurrent create/destroy races for the same tenant.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`ProjectLocks`] hands out one async mutex per project id. Idle entries are
//! pruned on each acquisition so the map tracks only contended projects.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use deskrelay_core::ProjectId;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;

// ============================================================================
// SECTION: Locks
// ============================================================================

/// Keyed async locks.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    /// Lock per project; an entry with one strong reference is idle.
    locks: Mutex<HashMap<ProjectId, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `project_id`.
    pub async fn acquire(&self, project_id: &ProjectId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(project_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Returns the number of tracked projects.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks.lock().map_or(0, |locks| locks.len())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_project_is_serialized() {
        let locks = Arc::new(ProjectLocks::new());
        let project = ProjectId::new("p1").unwrap();
        let guard = locks.acquire(&project).await;
        let contender = {
            let locks = Arc::clone(&locks);
            let project = project.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&project).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn different_projects_do_not_block() {
        let locks = ProjectLocks::new();
        let _first = locks.acquire(&ProjectId::new("p1").unwrap()).await;
        let second = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(&ProjectId::new("p2").unwrap()),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = ProjectLocks::new();
        drop(locks.acquire(&ProjectId::new("p1").unwrap()).await);
        drop(locks.acquire(&ProjectId::new("p2").unwrap()).await);
        assert_eq!(locks.tracked(), 1);
    }
}
