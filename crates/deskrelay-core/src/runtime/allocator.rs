// crates/deskrelay-core/src/runtime/allocator.rs
// ============================================================================
// Module: Deskrelay Subnet Allocator
// Description: Deterministic projectId to subnet plan derivation.
// Purpose: Issue collision-free, reproducible tenant subnets.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The allocator hashes a project identifier (SHA-256, first eight bytes,
//! big-endian) into a bounded third-octet range and builds the canonical
//! `172.30.<offset>.0/24` plan. When the derived offset is held by another
//! active project it probes sequential offsets, wrapping inside the range, up
//! to a fixed budget before failing with [`AllocationError::Conflict`].
//!
//! The allocator is pure: callers supply the set of offsets in use, and the
//! lifecycle manager persists whatever plan is issued.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::AllocationRecord;
use crate::core::NetworkAllocation;
use crate::core::ProjectId;
use crate::core::ProjectState;
use crate::core::hashing::digest_prefix_u64;
use crate::core::network::LOGICAL_PLANE_OFFSET;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lowest third octet handed to tenants by default.
pub const DEFAULT_OFFSET_FLOOR: u8 = 10;
/// Highest third octet handed to tenants by default.
pub const DEFAULT_OFFSET_CEILING: u8 = 250;
/// Default number of offsets tried before reporting a conflict.
pub const DEFAULT_MAX_PROBES: u16 = 32;
/// Highest third octet ever allowed.
const MAX_OFFSET_CEILING: u8 = 253;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Allocation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Every probed offset is held by another active project.
    #[error("allocation conflict for project {project_id} after {attempts} probes")]
    Conflict {
        /// Project requesting an allocation.
        project_id: String,
        /// Offsets probed.
        attempts: u16,
    },
    /// Allocator policy is invalid.
    #[error("invalid allocator policy: {0}")]
    InvalidPolicy(String),
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Offset range and probe budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorPolicy {
    /// Lowest usable third octet.
    pub offset_floor: u8,
    /// Highest usable third octet.
    pub offset_ceiling: u8,
    /// Maximum offsets tried per allocation.
    pub max_probes: u16,
}

impl Default for AllocatorPolicy {
    fn default() -> Self {
        Self {
            offset_floor: DEFAULT_OFFSET_FLOOR,
            offset_ceiling: DEFAULT_OFFSET_CEILING,
            max_probes: DEFAULT_MAX_PROBES,
        }
    }
}

impl AllocatorPolicy {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidPolicy`] when the range overlaps the
    /// logical plane, exceeds the usable octets, is inverted, or the probe
    /// budget is zero.
    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.offset_floor <= LOGICAL_PLANE_OFFSET {
            return Err(AllocationError::InvalidPolicy(
                "offset_floor must be at least 1".to_string(),
            ));
        }
        if self.offset_ceiling > MAX_OFFSET_CEILING {
            return Err(AllocationError::InvalidPolicy(format!(
                "offset_ceiling must be at most {MAX_OFFSET_CEILING}"
            )));
        }
        if self.offset_floor > self.offset_ceiling {
            return Err(AllocationError::InvalidPolicy(
                "offset_floor must not exceed offset_ceiling".to_string(),
            ));
        }
        if self.max_probes == 0 {
            return Err(AllocationError::InvalidPolicy("max_probes must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Returns the number of offsets in the range.
    const fn range_size(&self) -> u64 {
        (self.offset_ceiling as u64) - (self.offset_floor as u64) + 1
    }
}

// ============================================================================
// SECTION: Allocator
// ============================================================================

/// Deterministic subnet allocator.
#[derive(Debug, Clone, Copy)]
pub struct SubnetAllocator {
    /// Range and probe budget.
    policy: AllocatorPolicy,
}

impl Default for SubnetAllocator {
    fn default() -> Self {
        Self {
            policy: AllocatorPolicy::default(),
        }
    }
}

impl SubnetAllocator {
    /// Creates an allocator with a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::InvalidPolicy`] when the policy is invalid.
    pub fn new(policy: AllocatorPolicy) -> Result<Self, AllocationError> {
        policy.validate()?;
        Ok(Self {
            policy,
        })
    }

    /// Returns the allocator policy.
    #[must_use]
    pub const fn policy(&self) -> AllocatorPolicy {
        self.policy
    }

    /// Returns the preferred offset for a project before collision probing.
    #[must_use]
    pub fn derive_offset(&self, project_id: &ProjectId) -> u8 {
        self.offset_at(self.base_index(project_id), 0)
    }

    /// Allocates a plan avoiding the offsets in `occupied`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Conflict`] when every probed offset is taken.
    pub fn allocate(
        &self,
        project_id: &ProjectId,
        occupied: &BTreeSet<u8>,
    ) -> Result<NetworkAllocation, AllocationError> {
        let base = self.base_index(project_id);
        let budget = u64::from(self.policy.max_probes).min(self.policy.range_size());
        for attempt in 0..budget {
            let offset = self.offset_at(base, attempt);
            if !occupied.contains(&offset) {
                return Ok(NetworkAllocation::for_offset(project_id.clone(), offset));
            }
        }
        Err(AllocationError::Conflict {
            project_id: project_id.to_string(),
            attempts: u16::try_from(budget).unwrap_or(u16::MAX),
        })
    }

    /// Allocates a plan against persisted records of other live projects.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Conflict`] when every probed offset is taken.
    pub fn allocate_against(
        &self,
        project_id: &ProjectId,
        records: &[AllocationRecord],
    ) -> Result<NetworkAllocation, AllocationError> {
        let occupied = occupied_offsets(project_id, records);
        self.allocate(project_id, &occupied)
    }

    /// Returns the project's position inside the range.
    fn base_index(&self, project_id: &ProjectId) -> u64 {
        digest_prefix_u64(project_id.as_str().as_bytes()) % self.policy.range_size()
    }

    /// Returns the offset `attempt` steps after `base`, wrapping inside the range.
    fn offset_at(&self, base: u64, attempt: u64) -> u8 {
        let index = (base + attempt) % self.policy.range_size();
        u8::try_from(u64::from(self.policy.offset_floor) + index)
            .unwrap_or(self.policy.offset_floor)
    }
}

/// Returns the offsets held by live projects other than `project_id`.
#[must_use]
pub fn occupied_offsets(project_id: &ProjectId, records: &[AllocationRecord]) -> BTreeSet<u8> {
    records
        .iter()
        .filter(|record| record.allocation.project_id != *project_id)
        .filter(|record| record.state != ProjectState::Deleted)
        .map(|record| record.allocation.offset)
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
