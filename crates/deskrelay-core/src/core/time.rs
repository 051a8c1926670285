// crates/deskrelay-core/src/core/time.rs
// ============================================================================
// Module: Deskrelay Time Helpers
// Description: Wall-clock helpers for timestamps and envelope expiry.
// Purpose: Keep timestamp conversion in one place.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Timestamps are unsigned milliseconds since the Unix epoch. A clock before
//! the epoch reads as zero rather than failing.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Returns the current time in milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(now.as_millis()).unwrap_or(u64::MAX)
}
