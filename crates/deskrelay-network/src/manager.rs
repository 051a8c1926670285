// crates/deskrelay-network/src/manager.rs
// ============================================================================
// Module: Network Lifecycle Manager
// Description: Creates and destroys per-tenant networks and their members.
// Purpose: Keep runtime state, persisted allocations, and audit in step.
// Dependencies: deskrelay-core, deskrelay-config, tokio, thiserror
// ============================================================================

//! ## Overview
//! [`NetworkManager`] provisions one isolated bridge network per project,
//! starts the guest and shared-storage containers at their fixed addresses,
//! and attaches the configured dual-homed services. Every transition is
//! persisted before runtime work begins so a crash leaves a record that the
//! next `create` or `destroy` can resume from.
//!
//! Security posture: dual-homed services must be listed in configuration and
//! protected services are never attached. A service whose control-plane
//! address moves during attach or detach fails the operation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use deskrelay_config::DualHomedService;
use deskrelay_config::NetworkConfig;
use deskrelay_core::AllocationError;
use deskrelay_core::AllocationRecord;
use deskrelay_core::AllocationStore;
use deskrelay_core::AttachmentKind;
use deskrelay_core::AuditEvent;
use deskrelay_core::ContainerAttachment;
use deskrelay_core::ErrorKind;
use deskrelay_core::NetworkAllocation;
use deskrelay_core::NetworkRole;
use deskrelay_core::ProjectId;
use deskrelay_core::ProjectState;
use deskrelay_core::SharedAllocationStore;
use deskrelay_core::SharedAuditSink;
use deskrelay_core::StoreError;
use deskrelay_core::SubnetAllocator;
use deskrelay_core::unix_millis;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::locks::ProjectLocks;
use crate::runtime::ContainerRuntime;
use crate::runtime::ContainerSpec;
use crate::runtime::NetworkSpec;
use crate::runtime::RuntimeError;
use crate::runtime::role_alias;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit component name.
const AUDIT_COMPONENT: &str = "network";
/// Label carrying the owning project.
pub const PROJECT_LABEL: &str = "deskrelay.project";
/// Label carrying the addressing role.
pub const ROLE_LABEL: &str = "deskrelay.role";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// No free subnet within the probe budget.
    #[error("{0}")]
    AllocationConflict(String),
    /// Allocator policy is invalid.
    #[error("{0}")]
    InvalidPolicy(String),
    /// Allocation store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Container runtime failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// Service is not allowed on tenant networks.
    #[error("attachment denied: {0}")]
    AttachmentDenied(String),
    /// A dual-homed service's control-plane address changed.
    #[error("control-plane address of {container} changed from {before} to {after}")]
    ControlPlaneDrift {
        /// Service container.
        container: String,
        /// Address before the operation.
        before: String,
        /// Address after the operation.
        after: String,
    },
    /// A runtime call exceeded the operation timeout.
    #[error("{0} timed out")]
    TimedOut(String),
}

impl NetworkError {
    /// Returns the stable failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AllocationConflict(_) => ErrorKind::AllocationConflict,
            Self::InvalidPolicy(_) | Self::AttachmentDenied(_) => ErrorKind::InvalidRequest,
            Self::Store(_) | Self::ControlPlaneDrift { .. } => ErrorKind::Internal,
            Self::Runtime(_) => ErrorKind::Unavailable,
            Self::TimedOut(_) => ErrorKind::TimedOut,
        }
    }
}

impl From<AllocationError> for NetworkError {
    fn from(error: AllocationError) -> Self {
        match error {
            AllocationError::Conflict { .. } => Self::AllocationConflict(error.to_string()),
            AllocationError::InvalidPolicy(_) => Self::InvalidPolicy(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Persisted and live view of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStatus {
    /// Persisted record, if any.
    pub record: Option<AllocationRecord>,
    /// Containers currently attached to the tenant network.
    pub attachments: Vec<ContainerAttachment>,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Per-tenant network lifecycle manager.
pub struct NetworkManager {
    /// Network configuration.
    config: NetworkConfig,
    /// Offset allocator.
    allocator: SubnetAllocator,
    /// Container runtime.
    runtime: Arc<dyn ContainerRuntime>,
    /// Durable allocation table.
    store: SharedAllocationStore,
    /// Audit sink.
    audit: SharedAuditSink,
    /// Per-project serialization.
    locks: ProjectLocks,
    /// Serializes offset selection across projects.
    allocation_lock: AsyncMutex<()>,
    /// Timeout applied to each runtime call.
    operation_timeout: Duration,
}

impl NetworkManager {
    /// Builds a manager from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidPolicy`] when the allocation policy is invalid.
    pub fn new(
        config: &NetworkConfig,
        runtime: Arc<dyn ContainerRuntime>,
        store: SharedAllocationStore,
        audit: SharedAuditSink,
    ) -> Result<Self, NetworkError> {
        let allocator = SubnetAllocator::new(config.allocation.policy())?;
        Ok(Self {
            config: config.clone(),
            allocator,
            runtime,
            store,
            audit,
            locks: ProjectLocks::new(),
            allocation_lock: AsyncMutex::new(()),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
        })
    }

    /// Returns the tenant network name for a project.
    #[must_use]
    pub fn network_name(&self, project_id: &ProjectId) -> String {
        format!("{}-{project_id}", self.config.name_prefix)
    }

    /// Returns the guest container name for a project.
    #[must_use]
    pub fn guest_name(&self, project_id: &ProjectId) -> String {
        format!("{}-{project_id}-guest", self.config.name_prefix)
    }

    /// Returns the shared-storage container name for a project.
    #[must_use]
    pub fn storage_name(&self, project_id: &ProjectId) -> String {
        format!("{}-{project_id}-storage", self.config.name_prefix)
    }

    /// Provisions the project's network and containers.
    ///
    /// Active projects return their existing allocation. Projects left
    /// mid-transition are torn down and provisioned again on the same plan.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when allocation, persistence, or any runtime
    /// step fails. Partial work is rolled back and the allocation released.
    pub async fn create(&self, project_id: &ProjectId) -> Result<NetworkAllocation, NetworkError> {
        let _guard = self.locks.acquire(project_id).await;
        let existing = self.store.load(project_id)?;
        let provisioning = match existing {
            Some(record) if record.state == ProjectState::Active => {
                return Ok(record.allocation);
            }
            Some(record)
                if matches!(record.state, ProjectState::Provisioning | ProjectState::TearingDown) =>
            {
                self.audit.record(
                    &AuditEvent::new(AUDIT_COMPONENT, "project_resumed")
                        .with("project_id", project_id.as_str())
                        .with("state", record.state.as_str()),
                );
                self.teardown(project_id).await?;
                let resumed = record.with_state(ProjectState::Provisioning, unix_millis());
                self.store.save(&resumed)?;
                resumed
            }
            _ => self.allocate(project_id).await?,
        };

        let allocation = provisioning.allocation.clone();
        if let Err(err) = self.provision(&allocation).await {
            self.roll_back(&provisioning, &err).await;
            return Err(err);
        }
        let active = provisioning.with_state(ProjectState::Active, unix_millis());
        if let Err(err) = self.store.save(&active) {
            let err = NetworkError::from(err);
            self.roll_back(&provisioning, &err).await;
            return Err(err);
        }
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "project_active")
                .with("project_id", project_id.as_str())
                .with("subnet", &allocation.subnet),
        );
        Ok(allocation)
    }

    /// Tears down the project's network and releases its allocation.
    ///
    /// Returns the final record when one was persisted. Absent resources are
    /// treated as already removed, so repeated calls succeed.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when persistence or a runtime step fails.
    pub async fn destroy(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<AllocationRecord>, NetworkError> {
        let _guard = self.locks.acquire(project_id).await;
        let record = self.store.load(project_id)?;
        if let Some(record) = &record {
            self.store.save(&record.with_state(ProjectState::TearingDown, unix_millis()))?;
        }
        self.teardown(project_id).await?;
        self.store.remove(project_id)?;
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "project_destroyed")
                .with("project_id", project_id.as_str())
                .with("had_record", record.is_some()),
        );
        Ok(record.map(|record| record.with_state(ProjectState::Deleted, unix_millis())))
    }

    /// Returns the persisted record and live attachments for a project.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the store or runtime cannot be read.
    pub async fn status(&self, project_id: &ProjectId) -> Result<ProjectStatus, NetworkError> {
        let record = self.store.load(project_id)?;
        let network = self.network_name(project_id);
        let mut members = vec![
            (self.guest_name(project_id), NetworkRole::Guest, AttachmentKind::Dedicated),
            (self.storage_name(project_id), NetworkRole::SharedStorage, AttachmentKind::Dedicated),
        ];
        members.extend(
            self.config
                .dual_homed
                .iter()
                .map(|service| (service.container.clone(), service.role, AttachmentKind::DualHomed)),
        );
        let mut attachments = Vec::new();
        for (container, role, kind) in members {
            let Some(addresses) = self.addresses_if_present(&container).await? else {
                continue;
            };
            if let Some(ip) = addresses.get(&network) {
                attachments.push(ContainerAttachment {
                    container_id: container,
                    network_name: network.clone(),
                    assigned_ip: *ip,
                    kind,
                    role,
                });
            }
        }
        Ok(ProjectStatus {
            record,
            attachments,
        })
    }

    // ------------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------------

    /// Picks a fresh plan and persists it as provisioning.
    async fn allocate(&self, project_id: &ProjectId) -> Result<AllocationRecord, NetworkError> {
        let _guard = self.allocation_lock.lock().await;
        let records = self.store.list()?;
        let allocation = match self.allocator.allocate_against(project_id, &records) {
            Ok(allocation) => allocation,
            Err(err) => {
                self.audit.record(
                    &AuditEvent::new(AUDIT_COMPONENT, "allocation_conflict")
                        .with("project_id", project_id.as_str())
                        .with("error", err.to_string()),
                );
                return Err(err.into());
            }
        };
        let record = AllocationRecord::provisioning(allocation, unix_millis());
        self.store.save(&record)?;
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "project_allocated")
                .with("project_id", project_id.as_str())
                .with("offset", record.allocation.offset),
        );
        Ok(record)
    }

    /// Creates the network, containers, and dual-homed attachments.
    async fn provision(&self, allocation: &NetworkAllocation) -> Result<(), NetworkError> {
        let project_id = &allocation.project_id;
        let network = self.network_name(project_id);
        let spec = NetworkSpec {
            name: network.clone(),
            subnet: allocation.subnet.clone(),
            gateway: allocation.gateway,
            labels: BTreeMap::from([(PROJECT_LABEL.to_string(), project_id.to_string())]),
        };
        self.call("create_network", self.runtime.create_network(&spec)).await?;

        let dedicated = [
            (self.guest_name(project_id), &self.config.guest_image, NetworkRole::Guest),
            (self.storage_name(project_id), &self.config.storage_image, NetworkRole::SharedStorage),
        ];
        for (name, image, role) in dedicated {
            let spec = ContainerSpec {
                name,
                image: image.clone(),
                network: network.clone(),
                ip: allocation.ip_for(role),
                aliases: vec![role_alias(role)],
                labels: BTreeMap::from([
                    (PROJECT_LABEL.to_string(), project_id.to_string()),
                    (ROLE_LABEL.to_string(), role.as_str().to_string()),
                ]),
            };
            self.call("run_container", self.runtime.run_container(&spec)).await?;
        }

        for service in &self.config.dual_homed {
            self.attach(service, &network, allocation.ip_for(service.role)).await?;
        }
        Ok(())
    }

    /// Attaches a dual-homed service to a tenant network.
    async fn attach(
        &self,
        service: &DualHomedService,
        network: &str,
        ip: Ipv4Addr,
    ) -> Result<(), NetworkError> {
        if self.config.protected_services.iter().any(|name| *name == service.container) {
            return Err(NetworkError::AttachmentDenied(format!(
                "{} is a protected service",
                service.container
            )));
        }
        let before = self.control_plane_ip(&service.container).await?;
        let aliases = [role_alias(service.role)];
        self.call("connect", self.runtime.connect(network, &service.container, ip, &aliases))
            .await?;
        self.check_drift(&service.container, before).await?;
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "attachment_added")
                .with("container", &service.container)
                .with("network", network)
                .with("ip", ip.to_string()),
        );
        Ok(())
    }

    /// Detaches a dual-homed service; a missing service or membership is success.
    async fn detach(&self, service: &DualHomedService, network: &str) -> Result<(), NetworkError> {
        let Some(addresses) = self.addresses_if_present(&service.container).await? else {
            return Ok(());
        };
        if !addresses.contains_key(network) {
            return Ok(());
        }
        let before = addresses.get(&self.config.control_plane_network).copied();
        match self.call("disconnect", self.runtime.disconnect(network, &service.container)).await {
            Ok(()) | Err(NetworkError::Runtime(RuntimeError::NotFound(_))) => {}
            Err(err) => return Err(err),
        }
        self.check_drift(&service.container, before).await?;
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "attachment_removed")
                .with("container", &service.container)
                .with("network", network),
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Removes every resource derived from the project id.
    ///
    /// Continues past failures and reports the first one.
    async fn teardown(&self, project_id: &ProjectId) -> Result<(), NetworkError> {
        let network = self.network_name(project_id);
        let mut first_error = None;
        for name in [self.guest_name(project_id), self.storage_name(project_id)] {
            let result = self.call("remove_container", self.runtime.remove_container(&name)).await;
            keep_first(&mut first_error, ignore_not_found(result));
        }
        for service in &self.config.dual_homed {
            keep_first(&mut first_error, self.detach(service, &network).await);
        }
        let result = self.call("remove_network", self.runtime.remove_network(&network)).await;
        keep_first(&mut first_error, ignore_not_found(result));
        first_error.map_or(Ok(()), Err)
    }

    /// Undoes a failed create.
    ///
    /// The allocation is released only when teardown succeeded. Otherwise the
    /// record stays in `TearingDown`, keeping its offset reserved until a later
    /// `destroy` or `create` finishes the cleanup.
    async fn roll_back(&self, record: &AllocationRecord, cause: &NetworkError) {
        let project_id = &record.allocation.project_id;
        let teardown = self.teardown(project_id).await;
        let mut event = AuditEvent::new(AUDIT_COMPONENT, "project_rollback")
            .with("project_id", project_id.as_str())
            .with("error_kind", cause.kind())
            .with("error", cause.to_string());
        let persisted = match &teardown {
            Ok(()) => self.store.remove(project_id),
            Err(err) => {
                event = event.with("teardown_error", err.to_string());
                self.store.save(&record.with_state(ProjectState::TearingDown, unix_millis()))
            }
        };
        event = event.with("allocation_retained", teardown.is_err());
        if let Err(err) = persisted {
            event = event.with("store_error", err.to_string());
        }
        self.audit.record(&event);
    }

    // ------------------------------------------------------------------------
    // Runtime helpers
    // ------------------------------------------------------------------------

    /// Runs a runtime call under the operation timeout.
    async fn call<T>(
        &self,
        operation: &str,
        future: impl Future<Output = Result<T, RuntimeError>>,
    ) -> Result<T, NetworkError> {
        match tokio::time::timeout(self.operation_timeout, future).await {
            Ok(result) => result.map_err(NetworkError::from),
            Err(_) => Err(NetworkError::TimedOut(operation.to_string())),
        }
    }

    /// Returns a container's addresses, or `None` when it does not exist.
    async fn addresses_if_present(
        &self,
        container: &str,
    ) -> Result<Option<BTreeMap<String, Ipv4Addr>>, NetworkError> {
        match self.call("inspect", self.runtime.container_addresses(container)).await {
            Ok(addresses) => Ok(Some(addresses)),
            Err(NetworkError::Runtime(RuntimeError::NotFound(_))) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Returns a container's control-plane address.
    async fn control_plane_ip(&self, container: &str) -> Result<Option<Ipv4Addr>, NetworkError> {
        let addresses = self.call("inspect", self.runtime.container_addresses(container)).await?;
        Ok(addresses.get(&self.config.control_plane_network).copied())
    }

    /// Fails when a container's control-plane address differs from `before`.
    async fn check_drift(
        &self,
        container: &str,
        before: Option<Ipv4Addr>,
    ) -> Result<(), NetworkError> {
        let after = self.control_plane_ip(container).await?;
        if after == before {
            return Ok(());
        }
        let error = NetworkError::ControlPlaneDrift {
            container: container.to_string(),
            before: describe(before),
            after: describe(after),
        };
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "control_plane_drift")
                .with("container", container)
                .with("error", error.to_string()),
        );
        Err(error)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Treats not-found as success.
fn ignore_not_found(result: Result<(), NetworkError>) -> Result<(), NetworkError> {
    match result {
        Err(NetworkError::Runtime(RuntimeError::NotFound(_))) => Ok(()),
        other => other,
    }
}

/// Records the first error seen.
fn keep_first(slot: &mut Option<NetworkError>, result: Result<(), NetworkError>) {
    if let Err(err) = result
        && slot.is_none()
    {
        *slot = Some(err);
    }
}

/// Renders an optional address.
fn describe(ip: Option<Ipv4Addr>) -> String {
    ip.map_or_else(|| "none".to_string(), |ip| ip.to_string())
}
