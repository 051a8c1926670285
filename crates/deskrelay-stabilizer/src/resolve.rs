// crates/deskrelay-stabilizer/src/resolve.rs
// ============================================================================
// Module: Address Resolution
// Description: Name lookup for mapped services with a guest-offset fallback.
// Purpose: Find each service's real address inside the current tenant subnet.
// Dependencies: async-trait, tokio
// ============================================================================

//! ## Overview
//! [`NameResolver`] abstracts the lookup so tests can pin addresses.
//! [`SystemResolver`] uses the platform resolver through tokio and accepts
//! only IPv4 answers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Hostname to IPv4 lookup.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Returns the first IPv4 address for `hostname`, or `None` when lookup fails.
    async fn resolve(&self, hostname: &str) -> Option<Ipv4Addr>;
}

/// Platform resolver.
#[derive(Debug, Clone, Copy)]
pub struct SystemResolver {
    /// Lookup timeout.
    timeout: Duration,
}

impl SystemResolver {
    /// Creates a resolver with a lookup timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Option<Ipv4Addr> {
        let lookup = tokio::net::lookup_host((hostname, 0));
        let addresses = tokio::time::timeout(self.timeout, lookup).await.ok()?.ok()?;
        addresses.map(|addr| addr.ip()).find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
