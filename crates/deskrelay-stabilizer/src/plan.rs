// crates/deskrelay-stabilizer/src/plan.rs
// ============================================================================
// Module: Stabilization Plan
// Description: Pure computation of aliases, NAT rules, and relay endpoints.
// Purpose: Decide every host change before any command runs.
// Dependencies: deskrelay-core, deskrelay-config
// ============================================================================

//! ## Overview
//! A [`StabilizationPlan`] pairs each configured role's logical address with
//! the real address it currently resolves to. The plan renders the exact
//! commands that install it ([`StabilizationPlan::apply_commands`]) and the
//! commands that remove it ([`teardown_commands`]). Nothing here touches the
//! host.
//!
//! Traffic path: the guest connects to `logical:port`, the NAT chain rewrites
//! it to `logical:relay_port`, and the relay listener bound there forwards
//! the bytes to `real:port`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::SocketAddrV4;

use deskrelay_config::StabilizerConfig;
use deskrelay_core::NetworkRole;
use serde::Serialize;

use crate::StabilizerError;
use crate::host::HostCommand;

// ============================================================================
// SECTION: Types
// ============================================================================

/// How a real address was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Name lookup succeeded.
    Dns,
    /// Derived from the guest's own address and the role octet.
    GuestOffset,
}

/// Real address for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Resolved address.
    pub address: Ipv4Addr,
    /// Where it came from.
    pub source: ResolutionSource,
}

/// One planned logical-to-real mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMapping {
    /// Service role.
    pub role: NetworkRole,
    /// Address the guest image uses.
    pub logical: Ipv4Addr,
    /// Address the service actually has.
    pub real: Ipv4Addr,
    /// How the real address was found.
    pub source: ResolutionSource,
    /// Service port.
    pub port: u16,
    /// Relay listener port on the logical address.
    pub relay_port: u16,
}

impl PlannedMapping {
    /// Address the relay listener binds.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.logical, self.relay_port))
    }

    /// Address the relay forwards to.
    #[must_use]
    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.real, self.port))
    }
}

/// Full set of host changes for one boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StabilizationPlan {
    /// Interface receiving the aliases.
    pub interface: String,
    /// Dedicated NAT chain.
    pub chain: String,
    /// Mappings in configuration order.
    pub mappings: Vec<PlannedMapping>,
}

// ============================================================================
// SECTION: Planning
// ============================================================================

/// Builds a plan from configuration and resolved addresses.
///
/// # Errors
///
/// Returns [`StabilizerError::Resolve`] when a mapped role has no resolution.
pub fn plan(
    config: &StabilizerConfig,
    resolved: &BTreeMap<NetworkRole, Resolution>,
) -> Result<StabilizationPlan, StabilizerError> {
    let mut mappings = Vec::with_capacity(config.mappings.len());
    for mapping in &config.mappings {
        let resolution = resolved.get(&mapping.role).ok_or_else(|| {
            StabilizerError::Resolve(format!("no address resolved for {}", mapping.role))
        })?;
        mappings.push(PlannedMapping {
            role: mapping.role,
            logical: mapping.role.logical_address(),
            real: resolution.address,
            source: resolution.source,
            port: mapping.port,
            relay_port: mapping.relay_port,
        });
    }
    Ok(StabilizationPlan {
        interface: config.interface.clone(),
        chain: config.chain.clone(),
        mappings,
    })
}

/// Derives a role's real address from the guest's own tenant address.
#[must_use]
pub fn fallback_address(guest: Ipv4Addr, role: NetworkRole) -> Ipv4Addr {
    let [a, b, c, _] = guest.octets();
    Ipv4Addr::new(a, b, c, role.host_octet())
}

/// Extracts the first IPv4 address from `ip -4 -o addr show` output.
#[must_use]
pub fn parse_interface_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        fields.find(|field| *field == "inet")?;
        let cidr = fields.next()?;
        let address = cidr.split('/').next()?.parse::<Ipv4Addr>().ok()?;
        let logical_plane = NetworkRole::Guest.logical_address().octets();
        // Skip aliases on the logical plane; only the tenant address counts.
        (address.octets()[..3] != logical_plane[..3]).then_some(address)
    })
}

/// Command that lists the interface's IPv4 addresses.
#[must_use]
pub fn interface_address_command(interface: &str) -> HostCommand {
    HostCommand::new("ip", &["-4", "-o", "addr", "show", "dev", interface])
}

// ============================================================================
// SECTION: Commands
// ============================================================================

impl StabilizationPlan {
    /// Commands that install the plan from any prior state.
    #[must_use]
    pub fn apply_commands(&self) -> Vec<HostCommand> {
        let chain = self.chain.as_str();
        let mut commands = vec![
            HostCommand::new("iptables", &["-t", "nat", "-N", chain]).tolerant(),
            HostCommand::new("iptables", &["-t", "nat", "-F", chain]),
            HostCommand::new("iptables", &["-t", "nat", "-D", "OUTPUT", "-j", chain]).tolerant(),
            HostCommand::new("iptables", &["-t", "nat", "-I", "OUTPUT", "1", "-j", chain]),
        ];
        for mapping in &self.mappings {
            let alias = format!("{}/32", mapping.logical);
            let port = mapping.port.to_string();
            let redirect = format!("{}:{}", mapping.logical, mapping.relay_port);
            commands.push(HostCommand::new(
                "ip",
                &["addr", "replace", &alias, "dev", &self.interface],
            ));
            commands.push(HostCommand::new(
                "iptables",
                &[
                    "-t",
                    "nat",
                    "-A",
                    chain,
                    "-d",
                    &alias,
                    "-p",
                    "tcp",
                    "--dport",
                    &port,
                    "-j",
                    "DNAT",
                    "--to-destination",
                    &redirect,
                ],
            ));
        }
        commands
    }
}

/// Commands that remove every alias and rule the configuration can install.
#[must_use]
pub fn teardown_commands(config: &StabilizerConfig) -> Vec<HostCommand> {
    let chain = config.chain.as_str();
    let mut commands = vec![
        HostCommand::new("iptables", &["-t", "nat", "-D", "OUTPUT", "-j", chain]).tolerant(),
        HostCommand::new("iptables", &["-t", "nat", "-F", chain]).tolerant(),
        HostCommand::new("iptables", &["-t", "nat", "-X", chain]).tolerant(),
    ];
    for mapping in &config.mappings {
        let alias = format!("{}/32", mapping.role.logical_address());
        commands.push(
            HostCommand::new("ip", &["addr", "del", &alias, "dev", &config.interface]).tolerant(),
        );
    }
    commands
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use std::path::PathBuf;

    use deskrelay_config::MappingConfig;

    use super::*;

    fn config() -> StabilizerConfig {
        StabilizerConfig {
            interface: "eth0".to_string(),
            chain: "DESKRELAY".to_string(),
            state_dir: PathBuf::from("/run/deskrelay"),
            restart_backoff_ms: 500,
            max_backoff_ms: 30_000,
            mappings: vec![
                MappingConfig {
                    role: NetworkRole::SharedStorage,
                    hostname: "shared-storage".to_string(),
                    port: 445,
                    relay_port: 14_445,
                },
                MappingConfig {
                    role: NetworkRole::ToolsService,
                    hostname: "tools-service".to_string(),
                    port: 8000,
                    relay_port: 18_000,
                },
            ],
        }
    }

    fn resolved() -> BTreeMap<NetworkRole, Resolution> {
        BTreeMap::from([
            (
                NetworkRole::SharedStorage,
                Resolution {
                    address: Ipv4Addr::new(172, 30, 47, 20),
                    source: ResolutionSource::Dns,
                },
            ),
            (
                NetworkRole::ToolsService,
                Resolution {
                    address: Ipv4Addr::new(172, 30, 47, 1),
                    source: ResolutionSource::GuestOffset,
                },
            ),
        ])
    }

    #[test]
    fn plan_pairs_logical_and_real_addresses() {
        let plan = plan(&config(), &resolved()).unwrap();
        assert_eq!(plan.mappings.len(), 2);
        let storage = &plan.mappings[0];
        assert_eq!(storage.logical, Ipv4Addr::new(172, 30, 0, 20));
        assert_eq!(storage.listen_addr().to_string(), "172.30.0.20:14445");
        assert_eq!(storage.target_addr().to_string(), "172.30.47.20:445");
        assert_eq!(plan.mappings[1].source, ResolutionSource::GuestOffset);
    }

    #[test]
    fn missing_resolution_is_an_error() {
        let mut partial = resolved();
        partial.remove(&NetworkRole::ToolsService);
        assert!(matches!(plan(&config(), &partial), Err(StabilizerError::Resolve(_))));
    }

    #[test]
    fn apply_flushes_chain_before_adding_rules() {
        let commands = plan(&config(), &resolved()).unwrap().apply_commands();
        let rendered: Vec<String> = commands.iter().map(ToString::to_string).collect();
        assert_eq!(rendered[1], "iptables -t nat -F DESKRELAY");
        assert!(rendered.contains(&"ip addr replace 172.30.0.20/32 dev eth0".to_string()));
        assert!(rendered.contains(
            &"iptables -t nat -A DESKRELAY -d 172.30.0.20/32 -p tcp --dport 445 -j DNAT \
              --to-destination 172.30.0.20:14445"
                .to_string()
        ));
        let flush = rendered.iter().position(|c| c.contains("-F DESKRELAY")).unwrap();
        let first_rule = rendered.iter().position(|c| c.contains("-A DESKRELAY")).unwrap();
        assert!(flush < first_rule);
    }

    #[test]
    fn teardown_is_fully_tolerant() {
        let commands = teardown_commands(&config());
        assert!(commands.iter().all(|command| command.tolerate_failure));
        assert!(commands.iter().any(|c| c.to_string() == "ip addr del 172.30.0.1/32 dev eth0"));
    }

    #[test]
    fn fallback_uses_role_octet_in_guest_subnet() {
        let guest = Ipv4Addr::new(172, 30, 47, 2);
        assert_eq!(
            fallback_address(guest, NetworkRole::SharedStorage),
            Ipv4Addr::new(172, 30, 47, 20)
        );
        assert_eq!(fallback_address(guest, NetworkRole::ToolsService), Ipv4Addr::new(172, 30, 47, 1));
    }

    #[test]
    fn interface_address_skips_logical_aliases() {
        let output = "2: eth0    inet 172.30.0.20/32 scope global eth0\n\
                      2: eth0    inet 172.30.47.2/24 brd 172.30.47.255 scope global eth0\n";
        assert_eq!(parse_interface_address(output), Some(Ipv4Addr::new(172, 30, 47, 2)));
        assert_eq!(parse_interface_address("garbage"), None);
    }
}
