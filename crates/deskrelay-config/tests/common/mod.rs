// crates/deskrelay-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for deskrelay-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use deskrelay_config::ConfigError;
use deskrelay_config::DeskrelayConfig;

/// Complete configuration exercising every section.
pub const FULL_CONFIG: &str = r#"
[gateway]
bind = "127.0.0.1:8700"
auth_token = { env = "DESKRELAY_GATEWAY_TOKEN" }
envelope_key = { file = "/run/secrets/envelope.key" }
key_id = "k1"

[agent]
project_id = "project-374"
auth_token = { file = "/run/secrets/agent.token" }
envelope_key = { file = "/run/secrets/envelope.key" }
key_id = "k1"

[relay]
project_id = "project-374"
auth_token = { env = "DESKRELAY_RELAY_TOKEN" }
gateway_url = "http://127.0.0.1:8700"
gateway_token = { env = "DESKRELAY_GATEWAY_TOKEN" }
agent_url = "http://172.30.47.2:8888"
agent_token = { file = "/run/secrets/agent.token" }

[network]
guest_image = "deskrelay/guest:latest"
storage_image = "deskrelay/storage:latest"
protected_services = ["identity", "postgres", "web-ui"]

[[network.dual_homed]]
container = "tools-api"
role = "tools_service"

[[network.dual_homed]]
container = "control-bridge"
role = "control_plane_bridge"

[store]
type = "sqlite"
path = "/var/lib/deskrelay/allocations.db"

[stabilizer]
interface = "eth0"

[[stabilizer.mappings]]
role = "shared_storage"
hostname = "storage"
port = 445
relay_port = 14445

[[stabilizer.mappings]]
role = "tools_service"
hostname = "tools-api"
port = 8000
relay_port = 18000

[audit]
sink = "file"
path = "/var/log/deskrelay/audit.jsonl"
"#;

/// Parses and validates the full configuration.
pub fn full_config() -> Result<DeskrelayConfig, ConfigError> {
    DeskrelayConfig::from_toml_str(FULL_CONFIG)
}

/// Parses the full configuration with `from` replaced by `to`.
pub fn full_config_with(from: &str, to: &str) -> Result<DeskrelayConfig, ConfigError> {
    DeskrelayConfig::from_toml_str(&FULL_CONFIG.replacen(from, to, 1))
}
