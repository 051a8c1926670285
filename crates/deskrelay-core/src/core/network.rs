// crates/deskrelay-core/src/core/network.rs
// ============================================================================
// Module: Deskrelay Network Model
// Description: Allocation, role addressing, and attachment types.
// Purpose: Encode the fixed per-role addressing contract shared with guests.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every tenant receives a `/24` inside `172.30.0.0/16`. Host octets for each
//! role are fixed because the guest image and its boot scripts hardcode them:
//! tools-service `.1`, guest `.2`, control-plane-bridge `.3`, shared-storage
//! `.20`, gateway `.254`. The `172.30.0.0/24` plane is reserved for the
//! logical addresses presented inside the guest by the stabilization proxy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ProjectId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// First octet of every tenant subnet.
pub const SUBNET_FIRST_OCTET: u8 = 172;
/// Second octet of every tenant subnet.
pub const SUBNET_SECOND_OCTET: u8 = 30;
/// Host octet of the tenant gateway.
pub const GATEWAY_HOST_OCTET: u8 = 254;
/// Third octet reserved for logical (stabilized) addresses.
pub const LOGICAL_PLANE_OFFSET: u8 = 0;
/// Prefix length of each tenant subnet.
pub const SUBNET_PREFIX_LEN: u8 = 24;

// ============================================================================
// SECTION: Roles
// ============================================================================

/// Fixed addressing roles inside a tenant subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRole {
    /// Tools service reachable from the guest.
    ToolsService,
    /// The virtual desktop guest.
    Guest,
    /// Bridge into the control plane.
    ControlPlaneBridge,
    /// Shared storage service.
    SharedStorage,
}

impl NetworkRole {
    /// Returns every role in address order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::ToolsService, Self::Guest, Self::ControlPlaneBridge, Self::SharedStorage]
    }

    /// Returns the fixed host octet for this role.
    #[must_use]
    pub const fn host_octet(self) -> u8 {
        match self {
            Self::ToolsService => 1,
            Self::Guest => 2,
            Self::ControlPlaneBridge => 3,
            Self::SharedStorage => 20,
        }
    }

    /// Returns the canonical label for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolsService => "tools_service",
            Self::Guest => "guest",
            Self::ControlPlaneBridge => "control_plane_bridge",
            Self::SharedStorage => "shared_storage",
        }
    }

    /// Returns the logical address the guest image uses for this role.
    #[must_use]
    pub const fn logical_address(self) -> Ipv4Addr {
        Ipv4Addr::new(
            SUBNET_FIRST_OCTET,
            SUBNET_SECOND_OCTET,
            LOGICAL_PLANE_OFFSET,
            self.host_octet(),
        )
    }
}

impl fmt::Display for NetworkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Allocation
// ============================================================================

/// Deterministic network plan for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAllocation {
    /// Owning project.
    pub project_id: ProjectId,
    /// Third octet of the tenant subnet.
    pub offset: u8,
    /// Subnet in CIDR notation.
    pub subnet: String,
    /// Gateway address.
    pub gateway: Ipv4Addr,
    /// Fixed role to address map.
    pub fixed_ips: BTreeMap<NetworkRole, Ipv4Addr>,
}

impl NetworkAllocation {
    /// Builds the canonical plan for a project at the given offset.
    #[must_use]
    pub fn for_offset(project_id: ProjectId, offset: u8) -> Self {
        let fixed_ips = NetworkRole::all()
            .into_iter()
            .map(|role| (role, host_address(offset, role.host_octet())))
            .collect();
        Self {
            project_id,
            offset,
            subnet: format!(
                "{SUBNET_FIRST_OCTET}.{SUBNET_SECOND_OCTET}.{offset}.0/{SUBNET_PREFIX_LEN}"
            ),
            gateway: host_address(offset, GATEWAY_HOST_OCTET),
            fixed_ips,
        }
    }

    /// Returns the address assigned to a role.
    #[must_use]
    pub fn ip_for(&self, role: NetworkRole) -> Ipv4Addr {
        self.fixed_ips
            .get(&role)
            .copied()
            .unwrap_or_else(|| host_address(self.offset, role.host_octet()))
    }

    /// Returns true when the allocation matches the canonical layout for its offset.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        *self == Self::for_offset(self.project_id.clone(), self.offset)
    }
}

/// Returns the address of a host octet inside the tenant subnet at `offset`.
#[must_use]
pub const fn host_address(offset: u8, host: u8) -> Ipv4Addr {
    Ipv4Addr::new(SUBNET_FIRST_OCTET, SUBNET_SECOND_OCTET, offset, host)
}

// ============================================================================
// SECTION: Project Lifecycle
// ============================================================================

/// Project lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Network resources are being created.
    Provisioning,
    /// Network resources are live.
    Active,
    /// Network resources are being removed.
    TearingDown,
    /// All resources and the allocation are released.
    Deleted,
}

impl ProjectState {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::TearingDown => "tearing_down",
            Self::Deleted => "deleted",
        }
    }
}

/// Persisted allocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Network plan issued to the project.
    pub allocation: NetworkAllocation,
    /// Current lifecycle state.
    pub state: ProjectState,
    /// Creation timestamp (milliseconds since epoch).
    pub created_at_ms: u64,
    /// Last update timestamp (milliseconds since epoch).
    pub updated_at_ms: u64,
}

impl AllocationRecord {
    /// Creates a new record in the provisioning state.
    #[must_use]
    pub const fn provisioning(allocation: NetworkAllocation, now_ms: u64) -> Self {
        Self {
            allocation,
            state: ProjectState::Provisioning,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Returns a copy transitioned to `state`.
    #[must_use]
    pub fn with_state(&self, state: ProjectState, now_ms: u64) -> Self {
        Self {
            allocation: self.allocation.clone(),
            state,
            created_at_ms: self.created_at_ms,
            updated_at_ms: now_ms,
        }
    }
}

// ============================================================================
// SECTION: Attachments
// ============================================================================

/// Membership class of an attached container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Container belongs to exactly one tenant network.
    Dedicated,
    /// Shared service attached to the control plane and tenant networks.
    DualHomed,
}

/// A container's membership in a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerAttachment {
    /// Container name or identifier.
    pub container_id: String,
    /// Network name.
    pub network_name: String,
    /// Address assigned on that network.
    pub assigned_ip: Ipv4Addr,
    /// Membership class.
    pub kind: AttachmentKind,
    /// Addressing role inside the tenant subnet.
    pub role: NetworkRole,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
