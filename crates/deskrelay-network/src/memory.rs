// crates/deskrelay-network/src/memory.rs
// ============================================================================
// Module: In-Memory Container Runtime
// Description: Deterministic ContainerRuntime for tests and dry runs.
// Purpose: Exercise lifecycle logic without a Docker daemon.
// Dependencies: async-trait
// ============================================================================

//! ## Overview
//! [`InMemoryRuntime`] models networks, containers, and their per-network
//! addresses with the same conflict and not-found rules Docker applies:
//! duplicate names and overlapping subnets conflict, an address can be held
//! by one container per network, and removing a network with members fails.
//! Failures can be injected per operation and target.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;

use crate::runtime::ContainerRuntime;
use crate::runtime::ContainerSpec;
use crate::runtime::NetworkSpec;
use crate::runtime::RuntimeError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Simulated container.
#[derive(Debug, Clone)]
struct SimContainer {
    /// Image reference; empty for seeded services.
    image: String,
    /// Address per network.
    networks: BTreeMap<String, Ipv4Addr>,
}

/// Simulated runtime state.
#[derive(Debug, Default)]
struct SimState {
    /// Networks by name.
    networks: BTreeMap<String, NetworkSpec>,
    /// Containers by name.
    containers: BTreeMap<String, SimContainer>,
    /// Injected failures keyed by `operation:target`.
    failures: BTreeSet<String>,
    /// Control-plane address rewrites applied on the next connect.
    drift: BTreeMap<String, (String, Ipv4Addr)>,
    /// Operation log.
    calls: Vec<String>,
}

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// In-memory container runtime.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    /// Shared state.
    state: Mutex<SimState>,
}

impl InMemoryRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pre-existing network, such as the control plane.
    pub fn seed_network(&self, name: &str, subnet: &str, gateway: Ipv4Addr) {
        self.lock().networks.insert(
            name.to_string(),
            NetworkSpec {
                name: name.to_string(),
                subnet: subnet.to_string(),
                gateway,
                labels: BTreeMap::new(),
            },
        );
    }

    /// Adds a pre-existing container attached to `network` at `ip`.
    pub fn seed_container(&self, name: &str, network: &str, ip: Ipv4Addr) {
        let mut state = self.lock();
        let container = state.containers.entry(name.to_string()).or_insert_with(|| SimContainer {
            image: String::new(),
            networks: BTreeMap::new(),
        });
        container.networks.insert(network.to_string(), ip);
    }

    /// Makes the next `operation` on `target` fail with a backend error.
    pub fn fail_on(&self, operation: &str, target: &str) {
        self.lock().failures.insert(format!("{operation}:{target}"));
    }

    /// Rewrites `container`'s address on `network` when it is next connected
    /// anywhere, simulating a runtime that renumbers existing endpoints.
    pub fn drift_on_connect(&self, container: &str, network: &str, ip: Ipv4Addr) {
        self.lock().drift.insert(container.to_string(), (network.to_string(), ip));
    }

    /// Returns true when a network exists.
    #[must_use]
    pub fn has_network(&self, name: &str) -> bool {
        self.lock().networks.contains_key(name)
    }

    /// Returns true when a container exists.
    #[must_use]
    pub fn has_container(&self, name: &str) -> bool {
        self.lock().containers.contains_key(name)
    }

    /// Returns the image a container was created from.
    #[must_use]
    pub fn container_image(&self, name: &str) -> Option<String> {
        self.lock().containers.get(name).map(|container| container.image.clone())
    }

    /// Returns the names of networks `container` belongs to.
    #[must_use]
    pub fn memberships(&self, container: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(container)
            .map(|container| container.networks.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the operation log.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Locks the state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    /// Logs a call and applies any injected failure.
    fn enter(&mut self, operation: &str, target: &str) -> Result<(), RuntimeError> {
        let key = format!("{operation}:{target}");
        self.calls.push(key.clone());
        if self.failures.remove(&key) {
            return Err(RuntimeError::Backend(format!("injected failure for {key}")));
        }
        Ok(())
    }

    /// Returns the container holding `ip` on `network`, if any.
    fn holder(&self, network: &str, ip: Ipv4Addr) -> Option<&str> {
        self.containers.iter().find_map(|(name, container)| {
            (container.networks.get(network) == Some(&ip)).then_some(name.as_str())
        })
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create_network(&self, spec: &NetworkSpec) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.enter("create_network", &spec.name)?;
        if state.networks.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(format!("network {} already exists", spec.name)));
        }
        if state.networks.values().any(|network| network.subnet == spec.subnet) {
            return Err(RuntimeError::Conflict(format!("pool {} overlaps", spec.subnet)));
        }
        state.networks.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.enter("remove_network", name)?;
        if !state.networks.contains_key(name) {
            return Err(RuntimeError::NotFound(format!("network {name}")));
        }
        if state.containers.values().any(|container| container.networks.contains_key(name)) {
            return Err(RuntimeError::Conflict(format!("network {name} has active endpoints")));
        }
        state.networks.remove(name);
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.enter("run_container", &spec.name)?;
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(format!("container {} already exists", spec.name)));
        }
        if !state.networks.contains_key(&spec.network) {
            return Err(RuntimeError::NotFound(format!("network {}", spec.network)));
        }
        if let Some(holder) = state.holder(&spec.network, spec.ip) {
            return Err(RuntimeError::Conflict(format!("address {} held by {holder}", spec.ip)));
        }
        state.containers.insert(
            spec.name.clone(),
            SimContainer {
                image: spec.image.clone(),
                networks: BTreeMap::from([(spec.network.clone(), spec.ip)]),
            },
        );
        Ok(spec.name.clone())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.enter("remove_container", name)?;
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("container {name}")))
    }

    async fn connect(
        &self,
        network: &str,
        container: &str,
        ip: Ipv4Addr,
        _aliases: &[String],
    ) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.enter("connect", &format!("{container}@{network}"))?;
        if !state.networks.contains_key(network) {
            return Err(RuntimeError::NotFound(format!("network {network}")));
        }
        if let Some(holder) = state.holder(network, ip) {
            return Err(RuntimeError::Conflict(format!("address {ip} held by {holder}")));
        }
        let drift = state.drift.remove(container);
        let entry = state
            .containers
            .get_mut(container)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {container}")))?;
        if entry.networks.contains_key(network) {
            return Err(RuntimeError::Conflict(format!(
                "container {container} already on {network}"
            )));
        }
        entry.networks.insert(network.to_string(), ip);
        if let Some((drift_network, drift_ip)) = drift {
            entry.networks.insert(drift_network, drift_ip);
        }
        Ok(())
    }

    async fn disconnect(&self, network: &str, container: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.enter("disconnect", &format!("{container}@{network}"))?;
        let entry = state
            .containers
            .get_mut(container)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {container}")))?;
        entry
            .networks
            .remove(network)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(format!("{container} is not connected to {network}")))
    }

    async fn container_addresses(
        &self,
        container: &str,
    ) -> Result<BTreeMap<String, Ipv4Addr>, RuntimeError> {
        let state = self.lock();
        state
            .containers
            .get(container)
            .map(|container| container.networks.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("container {container}")))
    }
}
