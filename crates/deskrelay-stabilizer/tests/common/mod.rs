// crates/deskrelay-stabilizer/tests/common/mod.rs
// ============================================================================
// Module: Stabilizer Test Harness
// Description: Recording command runner and scripted resolver.
// Purpose: Drive the stabilizer without root privileges or real DNS.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a subset of the fixtures.")]
#![allow(clippy::unwrap_used, reason = "Test-only fixtures.")]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use deskrelay_config::MappingConfig;
use deskrelay_config::StabilizerConfig;
use deskrelay_core::NetworkRole;
use deskrelay_stabilizer::HostCommand;
use deskrelay_stabilizer::HostCommandRunner;
use deskrelay_stabilizer::HostError;
use deskrelay_stabilizer::NameResolver;

/// Runner that records commands and returns scripted output.
#[derive(Default)]
pub struct RecordingRunner {
    /// Rendered commands in execution order.
    pub commands: Mutex<Vec<String>>,
    /// Commands that fail once, by rendered prefix.
    pub fail_once: Mutex<BTreeSet<String>>,
    /// Output for `ip -4 -o addr show`.
    pub interface_output: Mutex<String>,
}

impl RecordingRunner {
    /// Returns the recorded commands.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Fails the next command starting with `prefix`.
    pub fn fail_once(&self, prefix: &str) {
        self.fail_once.lock().unwrap().insert(prefix.to_string());
    }

    /// Sets the interface listing output.
    pub fn set_interface_output(&self, output: &str) {
        *self.interface_output.lock().unwrap() = output.to_string();
    }
}

#[async_trait]
impl HostCommandRunner for RecordingRunner {
    async fn run(&self, command: &HostCommand) -> Result<String, HostError> {
        let rendered = command.to_string();
        self.commands.lock().unwrap().push(rendered.clone());
        let failing = {
            let mut fail_once = self.fail_once.lock().unwrap();
            let hit = fail_once.iter().find(|prefix| rendered.starts_with(prefix.as_str())).cloned();
            if let Some(prefix) = &hit {
                fail_once.remove(prefix);
            }
            hit
        };
        if failing.is_some() {
            return Err(HostError::Failed {
                command: rendered,
                status: "exit status: 1".to_string(),
                stderr: "scripted failure".to_string(),
            });
        }
        if rendered.starts_with("ip -4 -o addr show") {
            return Ok(self.interface_output.lock().unwrap().clone());
        }
        Ok(String::new())
    }
}

/// Resolver answering from per-host queues; the last answer repeats.
#[derive(Default)]
pub struct ScriptedResolver {
    /// Answers per hostname.
    pub answers: Mutex<BTreeMap<String, VecDeque<Option<Ipv4Addr>>>>,
    /// Lookup log.
    pub lookups: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    /// Scripts answers for a hostname.
    pub fn answer(&self, hostname: &str, answers: &[Option<Ipv4Addr>]) {
        self.answers
            .lock()
            .unwrap()
            .insert(hostname.to_string(), answers.iter().copied().collect());
    }

    /// Returns the lookup log.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl NameResolver for ScriptedResolver {
    async fn resolve(&self, hostname: &str) -> Option<Ipv4Addr> {
        self.lookups.lock().unwrap().push(hostname.to_string());
        let mut answers = self.answers.lock().unwrap();
        let queue = answers.get_mut(hostname)?;
        if queue.len() > 1 { queue.pop_front().flatten() } else { queue.front().copied().flatten() }
    }
}

/// Stabilizer configuration with storage and tools mappings.
pub fn config(state_dir: &Path, storage_relay: u16, tools_relay: u16) -> StabilizerConfig {
    StabilizerConfig {
        interface: "eth0".to_string(),
        chain: "DESKRELAY".to_string(),
        state_dir: state_dir.to_path_buf(),
        restart_backoff_ms: 10,
        max_backoff_ms: 40,
        mappings: vec![
            MappingConfig {
                role: NetworkRole::SharedStorage,
                hostname: "shared-storage".to_string(),
                port: 445,
                relay_port: storage_relay,
            },
            MappingConfig {
                role: NetworkRole::ToolsService,
                hostname: "tools-service".to_string(),
                port: 8000,
                relay_port: tools_relay,
            },
        ],
    }
}

/// Returns a currently free loopback port.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}
