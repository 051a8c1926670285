// crates/deskrelay-agent/src/replay.rs
// ============================================================================
// Module: Replay Cache
// Description: Remembers executed invocation ids until their envelopes expire.
// Purpose: Execute each envelope at most once.
// Dependencies: deskrelay-core
// ============================================================================

//! ## Overview
//! Entries live until the envelope's acceptance window closes. When the cache
//! is full the entry expiring soonest is evicted, which can only admit a
//! replay of an envelope that is about to be rejected as stale anyway.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;

use deskrelay_core::InvocationId;

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Bounded set of recently executed invocation ids.
#[derive(Debug)]
pub struct ReplayCache {
    /// Maximum remembered ids.
    capacity: usize,
    /// Window close per invocation (milliseconds since epoch).
    entries: Mutex<HashMap<InvocationId, u64>>,
}

impl ReplayCache {
    /// Creates a cache remembering at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records `invocation_id`; returns false when it was already seen.
    pub fn admit(&self, invocation_id: &InvocationId, window_closes_ms: u64, now_ms: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, closes| *closes > now_ms);
        if entries.contains_key(invocation_id) {
            return false;
        }
        if entries.len() >= self.capacity {
            let soonest = entries.iter().min_by_key(|(_, closes)| **closes).map(|(id, _)| id.clone());
            if let Some(id) = soonest {
                entries.remove(&id);
            }
        }
        entries.insert(invocation_id.clone(), window_closes_ms);
        true
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
    fn second_admission_is_refused() {
        let cache = ReplayCache::new(8);
        assert!(cache.admit(&id("a"), 5_000, 1_000));
        assert!(!cache.admit(&id("a"), 5_000, 2_000));
    }

    #[test]
    fn full_cache_evicts_soonest_expiry() {
        let cache = ReplayCache::new(2);
        assert!(cache.admit(&id("a"), 3_000, 1_000));
        assert!(cache.admit(&id("b"), 9_000, 1_000));
        assert!(cache.admit(&id("c"), 9_000, 1_000));
        assert!(!cache.admit(&id("b"), 9_000, 1_500));
        assert!(cache.admit(&id("a"), 9_000, 1_500));
    }
}
