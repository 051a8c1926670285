// crates/deskrelay-gateway/src/ledger.rs
// ============================================================================
// Module: In-Flight Ledger
// Description: Tracks issued envelopes until they expire.
// Purpose: Keep at most one live envelope per invocation id.
// Dependencies: deskrelay-core
// ============================================================================

//! ## Overview
//! The ledger is advisory and local to one gateway instance. An invocation id
//! may be reused only once its previous envelope has expired. Expired entries
//! are pruned on every reservation and the table is bounded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;

use deskrelay_core::InvocationId;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ledger rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The invocation already has a live envelope.
    #[error("invocation {0} already has an envelope in flight")]
    Duplicate(String),
    /// Too many envelopes are live.
    #[error("in-flight ledger is full ({0} envelopes)")]
    Full(usize),
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Bounded map of invocation id to envelope expiry.
#[derive(Debug)]
pub struct InFlightLedger {
    /// Maximum live entries.
    capacity: usize,
    /// Expiry per invocation (milliseconds since epoch).
    entries: Mutex<HashMap<InvocationId, u64>>,
}

impl InFlightLedger {
    /// Creates a ledger holding at most `capacity` live envelopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records an envelope for `invocation_id` valid until `expires_at_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the id is still live or the ledger is full.
    pub fn reserve(
        &self,
        invocation_id: &InvocationId,
        expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, expiry| *expiry > now_ms);
        if entries.contains_key(invocation_id) {
            return Err(LedgerError::Duplicate(invocation_id.as_str().to_string()));
        }
        if entries.len() >= self.capacity {
            return Err(LedgerError::Full(self.capacity));
        }
        entries.insert(invocation_id.clone(), expires_at_ms);
        Ok(())
    }

    /// Drops a reservation whose envelope was never issued.
    pub fn release(&self, invocation_id: &InvocationId) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(invocation_id);
    }

    /// Returns the number of tracked entries, including unpruned expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Returns true when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use super::*;

    fn id(value: &str) -> InvocationId {
        InvocationId::new(value).unwrap()
    }

    #[test]
    fn live_duplicate_is_rejected() {
        let ledger = InFlightLedger::new(4);
        ledger.reserve(&id("a"), 2_000, 1_000).unwrap();
        assert_eq!(ledger.reserve(&id("a"), 3_000, 1_500), Err(LedgerError::Duplicate("a".to_string())));
    }

    #[test]
    fn expired_id_may_be_reused() {
        let ledger = InFlightLedger::new(4);
        ledger.reserve(&id("a"), 2_000, 1_000).unwrap();
        ledger.reserve(&id("a"), 4_000, 2_000).unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn capacity_counts_only_live_entries() {
        let ledger = InFlightLedger::new(1);
        ledger.reserve(&id("a"), 2_000, 1_000).unwrap();
        assert_eq!(ledger.reserve(&id("b"), 2_000, 1_000), Err(LedgerError::Full(1)));
        ledger.reserve(&id("b"), 5_000, 2_500).unwrap();
    }

    #[test]
    fn release_frees_the_id() {
        let ledger = InFlightLedger::new(2);
        ledger.reserve(&id("a"), 9_000, 1_000).unwrap();
        ledger.release(&id("a"));
        assert!(ledger.is_empty());
        ledger.reserve(&id("a"), 9_000, 1_000).unwrap();
    }
}
