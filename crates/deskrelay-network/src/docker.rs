// crates/deskrelay-network/src/docker.rs
// ============================================================================
// Module: Docker Runtime
// Description: ContainerRuntime backed by the Docker Engine API.
// Purpose: Create tenant networks and containers through bollard.
// Dependencies: bollard, async-trait
// ============================================================================

//! ## Overview
//! [`DockerRuntime`] maps the lifecycle operations onto Docker Engine calls.
//! HTTP 404 responses become [`RuntimeError::NotFound`], 409 responses become
//! [`RuntimeError::Conflict`], and everything else is a backend error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use bollard::API_DEFAULT_VERSION;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::ContainerCreateBody;
use bollard::models::EndpointIpamConfig;
use bollard::models::EndpointSettings;
use bollard::models::Ipam;
use bollard::models::IpamConfig;
use bollard::models::NetworkConnectRequest;
use bollard::models::NetworkCreateRequest;
use bollard::models::NetworkDisconnectRequest;
use bollard::models::NetworkingConfig;
use bollard::query_parameters::CreateContainerOptionsBuilder;
use bollard::query_parameters::InspectContainerOptions;
use bollard::query_parameters::RemoveContainerOptionsBuilder;
use bollard::query_parameters::StartContainerOptions;
use bollard::query_parameters::StopContainerOptionsBuilder;

use crate::runtime::ContainerRuntime;
use crate::runtime::ContainerSpec;
use crate::runtime::NetworkSpec;
use crate::runtime::RuntimeError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Seconds Docker waits before killing a stopping container.
const STOP_GRACE_SECS: i32 = 5;
/// Client request timeout in seconds for socket connections.
const SOCKET_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// Docker Engine runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    /// Engine client.
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the engine at `socket`, or the local default when unset.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Backend`] when the client cannot be built.
    pub fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(path, SOCKET_TIMEOUT_SECS, API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|err| RuntimeError::Backend(format!("docker connect failed: {err}")))?;
        Ok(Self {
            docker,
        })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn from_client(docker: Docker) -> Self {
        Self {
            docker,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, spec: &NetworkSpec) -> Result<(), RuntimeError> {
        let request = NetworkCreateRequest {
            name: spec.name.clone(),
            driver: Some("bridge".to_string()),
            internal: Some(false),
            ipam: Some(Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(spec.subnet.clone()),
                    gateway: Some(spec.gateway.to_string()),
                    ..IpamConfig::default()
                }]),
                ..Ipam::default()
            }),
            labels: Some(to_hash_map(&spec.labels)),
            ..NetworkCreateRequest::default()
        };
        self.docker
            .create_network(request)
            .await
            .map(|_| ())
            .map_err(|err| map_error("create_network", &spec.name, &err))
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker.remove_network(name).await.map_err(|err| map_error("remove_network", name, &err))
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let endpoint = endpoint_settings(spec.ip, &spec.aliases);
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            labels: Some(to_hash_map(&spec.labels)),
            networking_config: Some(NetworkingConfig {
                endpoints_config: Some(HashMap::from([(spec.network.clone(), endpoint)])),
            }),
            ..ContainerCreateBody::default()
        };
        let created = self
            .docker
            .create_container(Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()), body)
            .await
            .map_err(|err| map_error("create_container", &spec.name, &err))?;
        self.docker
            .start_container(&spec.name, None::<StartContainerOptions>)
            .await
            .map_err(|err| map_error("start_container", &spec.name, &err))?;
        Ok(created.id)
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        if let Err(err) = self
            .docker
            .stop_container(name, Some(StopContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build()))
            .await
            && is_status(&err, 404)
        {
            return Err(map_error("stop_container", name, &err));
        }
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptionsBuilder::new().force(true).v(true).link(false).build()),
            )
            .await
            .map_err(|err| map_error("remove_container", name, &err))
    }

    async fn connect(
        &self,
        network: &str,
        container: &str,
        ip: Ipv4Addr,
        aliases: &[String],
    ) -> Result<(), RuntimeError> {
        let request = NetworkConnectRequest {
            container: Some(container.to_string()),
            endpoint_config: Some(endpoint_settings(ip, aliases)),
        };
        self.docker
            .connect_network(network, request)
            .await
            .map_err(|err| map_error("connect_network", &format!("{container}@{network}"), &err))
    }

    async fn disconnect(&self, network: &str, container: &str) -> Result<(), RuntimeError> {
        let request = NetworkDisconnectRequest {
            container: Some(container.to_string()),
            force: Some(true),
        };
        self.docker
            .disconnect_network(network, request)
            .await
            .map_err(|err| map_error("disconnect_network", &format!("{container}@{network}"), &err))
    }

    async fn container_addresses(
        &self,
        container: &str,
    ) -> Result<BTreeMap<String, Ipv4Addr>, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|err| map_error("inspect_container", container, &err))?;
        let networks = inspect.network_settings.and_then(|settings| settings.networks).unwrap_or_default();
        let mut addresses = BTreeMap::new();
        for (name, endpoint) in networks {
            if let Some(ip) = endpoint.ip_address.as_deref().and_then(|raw| raw.parse::<Ipv4Addr>().ok()) {
                addresses.insert(name, ip);
            }
        }
        Ok(addresses)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds endpoint settings pinning an IPv4 address.
fn endpoint_settings(ip: Ipv4Addr, aliases: &[String]) -> EndpointSettings {
    EndpointSettings {
        ipam_config: Some(EndpointIpamConfig {
            ipv4_address: Some(ip.to_string()),
            ..EndpointIpamConfig::default()
        }),
        aliases: (!aliases.is_empty()).then(|| aliases.to_vec()),
        ..EndpointSettings::default()
    }
}

/// Converts ordered labels into the map bollard expects.
fn to_hash_map(labels: &BTreeMap<String, String>) -> HashMap<String, String> {
    labels.iter().map(|(key, value)| (key.clone(), value.clone())).collect()
}

/// Returns true when the engine answered with `status`.
fn is_status(error: &BollardError, status: u16) -> bool {
    matches!(error, BollardError::DockerResponseServerError { status_code, .. } if *status_code == status)
}

/// Maps an engine error onto the runtime taxonomy.
fn map_error(operation: &str, target: &str, error: &BollardError) -> RuntimeError {
    let detail = format!("{operation} {target}: {error}");
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(detail),
        BollardError::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::Conflict(detail),
        BollardError::DockerResponseServerError {
            message, ..
        } if message.contains("is not connected") => RuntimeError::NotFound(detail),
        _ => RuntimeError::Backend(detail),
    }
}
