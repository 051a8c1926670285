// crates/deskrelay-network/tests/common/mod.rs
// ============================================================================
// Module: Lifecycle Test Harness
// Description: Shared fixtures for network lifecycle tests.
// Purpose: Build a manager over the in-memory runtime and store.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]
#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only fixtures.")]

use std::net::Ipv4Addr;
use std::sync::Arc;

use deskrelay_config::DeskrelayConfig;
use deskrelay_config::NetworkConfig;
use deskrelay_core::InMemoryAllocationStore;
use deskrelay_core::SharedAllocationStore;
use deskrelay_core::audit::InMemoryAuditSink;
use deskrelay_network::InMemoryRuntime;
use deskrelay_network::NetworkManager;

/// Control-plane network name used by the fixtures.
pub const CONTROL_PLANE: &str = "deskrelay-control";
/// Tools service container.
pub const TOOLS: &str = "tools-api";
/// Control-plane bridge container.
pub const BRIDGE: &str = "bridge";
/// Protected identity service container.
pub const IDENTITY: &str = "identity";

/// Tools service control-plane address.
pub const TOOLS_CONTROL_IP: Ipv4Addr = Ipv4Addr::new(172, 18, 0, 5);
/// Bridge control-plane address.
pub const BRIDGE_CONTROL_IP: Ipv4Addr = Ipv4Addr::new(172, 18, 0, 6);

const NETWORK_TOML: &str = r#"
[network]
guest_image = "deskrelay/guest:latest"
storage_image = "deskrelay/storage:latest"
operation_timeout_ms = 2000
protected_services = ["identity", "postgres"]

[[network.dual_homed]]
container = "tools-api"
role = "tools_service"

[[network.dual_homed]]
container = "bridge"
role = "control_plane_bridge"
"#;

/// Manager plus handles on its collaborators.
pub struct Harness {
    /// Manager under test.
    pub manager: Arc<NetworkManager>,
    /// Simulated runtime.
    pub runtime: Arc<InMemoryRuntime>,
    /// Allocation store shared with the manager.
    pub store: SharedAllocationStore,
    /// Captured audit events.
    pub audit: Arc<InMemoryAuditSink>,
}

/// Parses the fixture network configuration.
pub fn network_config() -> NetworkConfig {
    DeskrelayConfig::from_toml_str(NETWORK_TOML).unwrap().require_network().unwrap().clone()
}

/// Builds a harness with the control plane and its services seeded.
pub fn harness() -> Harness {
    harness_with(network_config())
}

/// Builds a harness around a custom network configuration.
pub fn harness_with(config: NetworkConfig) -> Harness {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.seed_network(CONTROL_PLANE, "172.18.0.0/16", Ipv4Addr::new(172, 18, 0, 1));
    runtime.seed_container(TOOLS, CONTROL_PLANE, TOOLS_CONTROL_IP);
    runtime.seed_container(BRIDGE, CONTROL_PLANE, BRIDGE_CONTROL_IP);
    runtime.seed_container(IDENTITY, CONTROL_PLANE, Ipv4Addr::new(172, 18, 0, 7));
    let store = SharedAllocationStore::from_store(InMemoryAllocationStore::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let manager = NetworkManager::new(&config, runtime.clone(), store.clone(), audit.clone())
        .expect("manager");
    Harness {
        manager: Arc::new(manager),
        runtime,
        store,
        audit,
    }
}
