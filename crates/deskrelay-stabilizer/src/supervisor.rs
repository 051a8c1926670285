// crates/deskrelay-stabilizer/src/supervisor.rs
// ============================================================================
// Module: Relay Supervisor
// Description: Runs relay generations and restarts them with bounded backoff.
// Purpose: Keep logical addresses reachable across crashes and renumbering.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Each generation resolves addresses afresh, applies the plan, binds one
//! relay per mapping, and serves until shutdown or until any relay exits.
//! Failed or crashed generations are retried after an exponential backoff
//! capped at the configured maximum. A generation that stayed up for at
//! least the maximum backoff resets the delay. Shutdown tears the host state
//! down before returning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use deskrelay_core::AuditEvent;
use deskrelay_core::SharedAuditSink;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::StabilizerError;
use crate::relay::ByteRelay;
use crate::stabilizer::Stabilizer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit component name.
const AUDIT_COMPONENT: &str = "stabilizer";

// ============================================================================
// SECTION: Supervisor
// ============================================================================

/// How a generation ended.
enum GenerationExit {
    /// Shutdown was requested.
    Shutdown,
    /// A relay stopped on its own.
    Crashed(String),
}

/// Relay supervisor.
pub struct Supervisor {
    /// Host operations.
    stabilizer: Arc<Stabilizer>,
    /// Audit sink.
    audit: SharedAuditSink,
    /// Bind relays here instead of the logical address.
    listen_override: Option<Ipv4Addr>,
    /// First restart delay.
    initial_backoff: Duration,
    /// Restart delay cap.
    max_backoff: Duration,
}

impl Supervisor {
    /// Creates a supervisor using the stabilizer's backoff settings.
    #[must_use]
    pub fn new(stabilizer: Arc<Stabilizer>, audit: SharedAuditSink) -> Self {
        let config = stabilizer.config();
        let initial_backoff = Duration::from_millis(config.restart_backoff_ms);
        let max_backoff = Duration::from_millis(config.max_backoff_ms);
        Self {
            stabilizer,
            audit,
            listen_override: None,
            initial_backoff,
            max_backoff,
        }
    }

    /// Binds relays on `address` instead of each logical alias.
    #[must_use]
    pub const fn with_listen_override(mut self, address: Ipv4Addr) -> Self {
        self.listen_override = Some(address);
        self
    }

    /// Runs generations until `shutdown` flips to true, then tears down.
    ///
    /// Returns the number of restarts performed.
    ///
    /// # Errors
    ///
    /// Returns [`StabilizerError`] when the final teardown fails.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<u32, StabilizerError> {
        let mut backoff = self.initial_backoff;
        let mut restarts = 0_u32;
        while !*shutdown.borrow() {
            let started = Instant::now();
            match self.generation(&mut shutdown).await {
                Ok(GenerationExit::Shutdown) => break,
                Ok(GenerationExit::Crashed(detail)) => self.audit.record(
                    &AuditEvent::new(AUDIT_COMPONENT, "relay_crashed").with("error", detail),
                ),
                Err(err) => self.audit.record(
                    &AuditEvent::new(AUDIT_COMPONENT, "generation_failed").with("error", err.to_string()),
                ),
            }
            if started.elapsed() >= self.max_backoff {
                backoff = self.initial_backoff;
            }
            restarts = restarts.saturating_add(1);
            self.audit.record(
                &AuditEvent::new(AUDIT_COMPONENT, "relay_restart_scheduled")
                    .with("attempt", restarts)
                    .with("delay_ms", u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX)),
            );
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {}
            }
            backoff = backoff.saturating_mul(2).min(self.max_backoff);
        }
        self.stabilizer.teardown().await?;
        Ok(restarts)
    }

    /// Runs one generation of relays.
    async fn generation(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<GenerationExit, StabilizerError> {
        let plan = self.stabilizer.plan().await?;
        self.stabilizer.apply(&plan).await?;

        let (stop, stop_rx) = watch::channel(false);
        let mut relays = JoinSet::new();
        for mapping in &plan.mappings {
            let listen = self.listen_override.map_or_else(
                || mapping.listen_addr(),
                |ip| SocketAddr::V4(SocketAddrV4::new(ip, mapping.relay_port)),
            );
            let relay = ByteRelay::bind(listen, mapping.target_addr()).await?;
            relays.spawn(relay.serve(stop_rx.clone()));
            self.audit.record(
                &AuditEvent::new(AUDIT_COMPONENT, "relay_started")
                    .with("role", mapping.role)
                    .with("listen", listen.to_string())
                    .with("target", mapping.target_addr().to_string()),
            );
        }

        let exit = tokio::select! {
            _ = shutdown.changed() => GenerationExit::Shutdown,
            joined = relays.join_next() => {
                let detail = match joined {
                    Some(Ok(Ok(()))) => "relay exited".to_string(),
                    Some(Ok(Err(err))) => err.to_string(),
                    Some(Err(err)) => format!("relay task failed: {err}"),
                    None => "no relays configured".to_string(),
                };
                GenerationExit::Crashed(detail)
            }
        };
        let _ = stop.send(true);
        while relays.join_next().await.is_some() {}
        Ok(exit)
    }
}
