// crates/deskrelay-stabilizer/src/stabilizer.rs
// ============================================================================
// Module: Stabilizer
// Description: Resolves, applies, and removes address stabilization state.
// Purpose: Make each apply restart-safe by clearing prior relay and NAT state.
// Dependencies: deskrelay-core, deskrelay-config, tokio
// ============================================================================

//! ## Overview
//! [`Stabilizer`] owns the host-facing side of the proxy. `resolve` finds
//! each mapped service by name and falls back to the guest-offset rule when
//! lookup fails. `apply` stops any relay recorded in the pid file, flushes
//! the dedicated chain, and reinstalls the plan. `teardown` removes all of
//! it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use deskrelay_config::StabilizerConfig;
use deskrelay_core::AuditEvent;
use deskrelay_core::NetworkRole;
use deskrelay_core::SharedAuditSink;

use crate::StabilizerError;
use crate::host::HostCommand;
use crate::host::HostCommandRunner;
use crate::host::run_all;
use crate::plan::Resolution;
use crate::plan::ResolutionSource;
use crate::plan::StabilizationPlan;
use crate::plan::fallback_address;
use crate::plan::interface_address_command;
use crate::plan::parse_interface_address;
use crate::plan::plan;
use crate::plan::teardown_commands;
use crate::resolve::NameResolver;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit component name.
const AUDIT_COMPONENT: &str = "stabilizer";
/// Pid file name inside the state directory.
pub const PID_FILE_NAME: &str = "relay.pid";

// ============================================================================
// SECTION: Stabilizer
// ============================================================================

/// Host-facing stabilization operations.
pub struct Stabilizer {
    /// Stabilizer configuration.
    config: StabilizerConfig,
    /// OS command seam.
    runner: Arc<dyn HostCommandRunner>,
    /// Name lookup seam.
    resolver: Arc<dyn NameResolver>,
    /// Audit sink.
    audit: SharedAuditSink,
    /// Pid recorded as the live relay owner.
    pid: u32,
}

impl Stabilizer {
    /// Creates a stabilizer owned by the current process.
    #[must_use]
    pub fn new(
        config: StabilizerConfig,
        runner: Arc<dyn HostCommandRunner>,
        resolver: Arc<dyn NameResolver>,
        audit: SharedAuditSink,
    ) -> Self {
        Self {
            config,
            runner,
            resolver,
            audit,
            pid: std::process::id(),
        }
    }

    /// Overrides the pid written to the pid file.
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Returns the pid file path.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.config.state_dir.join(PID_FILE_NAME)
    }

    /// Resolves every mapped role.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError::Resolve`] when lookup fails and the guest's
    /// own address cannot be read for the fallback.
    pub async fn resolve(&self) -> Result<BTreeMap<NetworkRole, Resolution>, StabilizerError> {
        let mut resolved = BTreeMap::new();
        let mut guest: Option<Ipv4Addr> = None;
        for mapping in &self.config.mappings {
            let resolution = if let Some(address) = self.resolver.resolve(&mapping.hostname).await {
                Resolution {
                    address,
                    source: ResolutionSource::Dns,
                }
            } else {
                let guest_ip = match guest {
                    Some(ip) => ip,
                    None => {
                        let ip = self.guest_address().await?;
                        guest = Some(ip);
                        ip
                    }
                };
                Resolution {
                    address: fallback_address(guest_ip, mapping.role),
                    source: ResolutionSource::GuestOffset,
                }
            };
            self.audit.record(
                &AuditEvent::new(AUDIT_COMPONENT, "mapping_resolved")
                    .with("role", mapping.role)
                    .with("hostname", &mapping.hostname)
                    .with("address", resolution.address.to_string())
                    .with("source", resolution.source),
            );
            resolved.insert(mapping.role, resolution);
        }
        Ok(resolved)
    }

    /// Resolves and builds the current plan.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError::Resolve`] when any role cannot be resolved.
    pub async fn plan(&self) -> Result<StabilizationPlan, StabilizerError> {
        let resolved = self.resolve().await?;
        plan(&self.config, &resolved)
    }

    /// Installs a plan, replacing any prior relay and rules.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError`] when a required command or the pid file fails.
    pub async fn apply(&self, plan: &StabilizationPlan) -> Result<(), StabilizerError> {
        self.stop_prior_relay().await?;
        run_all(self.runner.as_ref(), &plan.apply_commands()).await?;
        tokio::fs::create_dir_all(&self.config.state_dir).await.map_err(|err| {
            StabilizerError::Io(format!("create {} failed: {err}", self.config.state_dir.display()))
        })?;
        tokio::fs::write(self.pid_file(), format!("{}\n", self.pid))
            .await
            .map_err(|err| StabilizerError::Io(format!("write pid file failed: {err}")))?;
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "stabilization_applied")
                .with("chain", &plan.chain)
                .with("mappings", plan.mappings.len()),
        );
        Ok(())
    }

    /// Removes aliases, rules, and relay state.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError::Io`] when the pid file cannot be removed.
    pub async fn teardown(&self) -> Result<(), StabilizerError> {
        self.stop_prior_relay().await?;
        run_all(self.runner.as_ref(), &teardown_commands(&self.config)).await?;
        match tokio::fs::remove_file(self.pid_file()).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StabilizerError::Io(format!("remove pid file failed: {err}"))),
        }
        self.audit.record(
            &AuditEvent::new(AUDIT_COMPONENT, "stabilization_removed").with("chain", &self.config.chain),
        );
        Ok(())
    }

    /// Reads the guest's tenant address from its interface.
    async fn guest_address(&self) -> Result<Ipv4Addr, StabilizerError> {
        let output = self
            .runner
            .run(&interface_address_command(&self.config.interface))
            .await
            .map_err(|err| StabilizerError::Resolve(format!("guest address lookup failed: {err}")))?;
        parse_interface_address(&output).ok_or_else(|| {
            StabilizerError::Resolve(format!("no tenant address on {}", self.config.interface))
        })
    }

    /// Signals the relay recorded in the pid file when it is not this process.
    async fn stop_prior_relay(&self) -> Result<(), StabilizerError> {
        let content = match tokio::fs::read_to_string(self.pid_file()).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StabilizerError::Io(format!("read pid file failed: {err}"))),
        };
        let Ok(prior) = content.trim().parse::<u32>() else {
            return Ok(());
        };
        if prior == self.pid || prior == 0 {
            return Ok(());
        }
        let pid = prior.to_string();
        run_all(self.runner.as_ref(), &[HostCommand::new("kill", &["-TERM", &pid]).tolerant()])
            .await?;
        self.audit.record(&AuditEvent::new(AUDIT_COMPONENT, "prior_relay_stopped").with("pid", prior));
        Ok(())
    }
}
