// crates/deskrelay-network/src/lib.rs
// ============================================================================
// Module: Deskrelay Network Lifecycle
// Description: Tenant network provisioning and teardown.
// Purpose: Create, attach, detach, and remove per-project sandbox networks.
// Dependencies: deskrelay-core, deskrelay-config, bollard, tokio
// ============================================================================

//! ## Overview
//! The [`NetworkManager`] turns a persisted subnet allocation into a live
//! tenant network: an isolated bridge, the guest and shared-storage
//! containers at their fixed addresses, and the dual-homed services attached
//! without disturbing their control-plane membership. Operations on one
//! project are serialized through [`ProjectLocks`]; different projects
//! proceed in parallel. Container runtime calls go through
//! [`ContainerRuntime`] so Docker and the in-memory runtime are
//! interchangeable.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod docker;
pub mod locks;
pub mod manager;
pub mod memory;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use docker::DockerRuntime;
pub use locks::ProjectLocks;
pub use manager::NetworkError;
pub use manager::NetworkManager;
pub use manager::ProjectStatus;
pub use memory::InMemoryRuntime;
pub use runtime::ContainerRuntime;
pub use runtime::ContainerSpec;
pub use runtime::NetworkSpec;
pub use runtime::RuntimeError;
pub use runtime::role_alias;
