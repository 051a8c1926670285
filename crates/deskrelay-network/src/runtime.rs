// crates/deskrelay-network/src/runtime.rs
// ============================================================================
// Module: Container Runtime Interface
// Description: Backend-agnostic network and container operations.
// Purpose: Let the lifecycle manager drive Docker or an in-memory runtime.
// Dependencies: async-trait, thiserror
// ============================================================================

//! ## Overview
//! [`ContainerRuntime`] is the narrow set of operations the lifecycle manager
//! needs. Implementations report absent objects as [`RuntimeError::NotFound`]
//! so callers can treat absence as success during teardown and as failure
//! during creation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use deskrelay_core::NetworkRole;
use thiserror::Error;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Isolated bridge network definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// Subnet in CIDR notation.
    pub subnet: String,
    /// Gateway address.
    pub gateway: Ipv4Addr,
    /// Labels applied to the network.
    pub labels: BTreeMap<String, String>,
}

/// Container started on a single tenant network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Network the container joins at creation.
    pub network: String,
    /// Fixed address on that network.
    pub ip: Ipv4Addr,
    /// DNS aliases on that network.
    pub aliases: Vec<String>,
    /// Labels applied to the container.
    pub labels: BTreeMap<String, String>,
}

/// Container runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Object does not exist or is not attached.
    #[error("not found: {0}")]
    NotFound(String),
    /// Object already exists or an address is taken.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Backend failure.
    #[error("container runtime error: {0}")]
    Backend(String),
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Network and container operations used by the lifecycle manager.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates an isolated bridge network.
    async fn create_network(&self, spec: &NetworkSpec) -> Result<(), RuntimeError>;

    /// Removes a network.
    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Creates and starts a container, returning its identifier.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Stops and removes a container.
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Connects an existing container to a network at a fixed address.
    async fn connect(
        &self,
        network: &str,
        container: &str,
        ip: Ipv4Addr,
        aliases: &[String],
    ) -> Result<(), RuntimeError>;

    /// Disconnects a container from a network.
    async fn disconnect(&self, network: &str, container: &str) -> Result<(), RuntimeError>;

    /// Returns the container's address on every network it belongs to.
    async fn container_addresses(
        &self,
        container: &str,
    ) -> Result<BTreeMap<String, Ipv4Addr>, RuntimeError>;
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the DNS alias a role answers to inside a tenant network.
#[must_use]
pub fn role_alias(role: NetworkRole) -> String {
    role.as_str().replace('_', "-")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_dns_safe() {
        assert_eq!(role_alias(NetworkRole::SharedStorage), "shared-storage");
        assert_eq!(role_alias(NetworkRole::ToolsService), "tools-service");
    }
}
