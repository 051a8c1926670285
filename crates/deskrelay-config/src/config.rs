// crates/deskrelay-config/src/config.rs
// ============================================================================
// Module: Deskrelay Configuration
// Description: Configuration loading and validation for Deskrelay.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: deskrelay-core, deskrelay-store-sqlite, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every component section is optional at parse time; binaries call the
//! matching `require_*` accessor so a missing section fails at startup rather
//! than at first use. Missing or invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use deskrelay_core::AllocatorPolicy;
use deskrelay_core::EXECUTION_CEILING_MS;
use deskrelay_core::NetworkRole;
use deskrelay_core::ProjectId;
use deskrelay_core::runtime::allocator::DEFAULT_MAX_PROBES;
use deskrelay_core::runtime::allocator::DEFAULT_OFFSET_CEILING;
use deskrelay_core::runtime::allocator::DEFAULT_OFFSET_FLOOR;
use deskrelay_store_sqlite::SqliteStoreConfig;
use deskrelay_store_sqlite::SqliteStoreMode;
use deskrelay_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::secrets::SecretRef;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "deskrelay.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "DESKRELAY_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default gateway bind address.
const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1:8700";
/// Default agent bind address.
const DEFAULT_AGENT_BIND: &str = "0.0.0.0:8888";
/// Default relay bind address.
const DEFAULT_RELAY_BIND: &str = "127.0.0.1:8790";
/// Default envelope key identifier.
const DEFAULT_KEY_ID: &str = "default";
/// Default timeout attached to non-shell primitives.
const DEFAULT_PRIMITIVE_TIMEOUT_MS: u64 = 30_000;
/// Default cap on tracked in-flight envelopes.
const DEFAULT_MAX_IN_FLIGHT: usize = 4_096;
/// Default tolerated clock skew between gateway and agent.
const DEFAULT_MAX_CLOCK_SKEW_MS: u64 = 30_000;
/// Maximum tolerated clock skew.
const MAX_CLOCK_SKEW_MS: u64 = 600_000;
/// Default replay cache capacity.
const DEFAULT_REPLAY_CACHE_CAPACITY: usize = 4_096;
/// Default maximum relay frame or body size.
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
/// Maximum relay hop timeout.
const MAX_HOP_TIMEOUT_MS: u64 = 600_000;
/// Default container runtime operation timeout.
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 120_000;
/// Maximum network name prefix length.
const MAX_NAME_PREFIX_LENGTH: usize = 32;
/// Default busy timeout for `SQLite`.
const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default initial supervisor backoff.
const DEFAULT_RESTART_BACKOFF_MS: u64 = 500;
/// Default maximum supervisor backoff.
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

// ============================================================================
// SECTION: Root
// ============================================================================

/// Deskrelay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeskrelayConfig {
    /// Command relay gateway section.
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    /// Remote execution agent section.
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    /// Thin relay client section.
    #[serde(default)]
    pub relay: Option<RelayConfig>,
    /// Network lifecycle section.
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    /// Allocation store section.
    #[serde(default)]
    pub store: StoreConfig,
    /// Address stabilization section.
    #[serde(default)]
    pub stabilizer: Option<StabilizerConfig>,
    /// Audit sink section.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl DeskrelayConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(gateway) = &self.gateway {
            gateway.validate()?;
        }
        if let Some(agent) = &self.agent {
            agent.validate()?;
        }
        if let Some(relay) = &self.relay {
            relay.validate()?;
        }
        if let Some(network) = &self.network {
            network.validate()?;
        }
        self.store.validate()?;
        if let Some(stabilizer) = &self.stabilizer {
            stabilizer.validate()?;
        }
        self.audit.validate()?;
        Ok(())
    }

    /// Returns the gateway section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the section is absent.
    pub fn require_gateway(&self) -> Result<&GatewayConfig, ConfigError> {
        self.gateway.as_ref().ok_or_else(|| missing_section("gateway"))
    }

    /// Returns the agent section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the section is absent.
    pub fn require_agent(&self) -> Result<&AgentConfig, ConfigError> {
        self.agent.as_ref().ok_or_else(|| missing_section("agent"))
    }

    /// Returns the relay section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the section is absent.
    pub fn require_relay(&self) -> Result<&RelayConfig, ConfigError> {
        self.relay.as_ref().ok_or_else(|| missing_section("relay"))
    }

    /// Returns the network section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the section is absent.
    pub fn require_network(&self) -> Result<&NetworkConfig, ConfigError> {
        self.network.as_ref().ok_or_else(|| missing_section("network"))
    }

    /// Returns the stabilizer section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the section is absent.
    pub fn require_stabilizer(&self) -> Result<&StabilizerConfig, ConfigError> {
        self.stabilizer.as_ref().ok_or_else(|| missing_section("stabilizer"))
    }
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Command relay gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listen address.
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    /// Orchestration-facing bearer token.
    pub auth_token: SecretRef,
    /// Pre-distributed AES-256-GCM key (base64, 32 bytes).
    pub envelope_key: SecretRef,
    /// Identifier carried in envelope headers.
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// Ceiling for server-side work and envelope lifetimes.
    #[serde(default = "default_execution_ceiling_ms")]
    pub execution_ceiling_ms: u64,
    /// Envelope timeout for primitives other than shell commands.
    #[serde(default = "default_primitive_timeout_ms")]
    pub primitive_timeout_ms: u64,
    /// Maximum envelopes tracked by the in-flight ledger.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl GatewayConfig {
    /// Validates gateway configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_bind("gateway.bind", &self.bind)?;
        self.auth_token.validate("gateway.auth_token")?;
        self.envelope_key.validate("gateway.envelope_key")?;
        validate_key_id("gateway.key_id", &self.key_id)?;
        validate_range(
            "gateway.execution_ceiling_ms",
            self.execution_ceiling_ms,
            1_000,
            EXECUTION_CEILING_MS,
        )?;
        validate_range(
            "gateway.primitive_timeout_ms",
            self.primitive_timeout_ms,
            100,
            self.execution_ceiling_ms,
        )?;
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "gateway.max_in_flight must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address is malformed.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_bind("gateway.bind", &self.bind)
    }
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Remote execution agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Listen address.
    #[serde(default = "default_agent_bind")]
    pub bind: String,
    /// Project whose guest this agent runs in.
    pub project_id: ProjectId,
    /// Agent bearer token, distinct from the orchestration-facing one.
    pub auth_token: SecretRef,
    /// Pre-distributed AES-256-GCM key (base64, 32 bytes).
    pub envelope_key: SecretRef,
    /// Identifier expected in envelope headers.
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// Tolerated clock skew when checking envelope expiry.
    #[serde(default = "default_max_clock_skew_ms")]
    pub max_clock_skew_ms: u64,
    /// Invocation ids remembered for replay detection.
    #[serde(default = "default_replay_cache_capacity")]
    pub replay_cache_capacity: usize,
    /// Desktop driver commands.
    #[serde(default)]
    pub driver: DriverConfig,
}

impl AgentConfig {
    /// Validates agent configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_bind("agent.bind", &self.bind)?;
        self.auth_token.validate("agent.auth_token")?;
        self.envelope_key.validate("agent.envelope_key")?;
        validate_key_id("agent.key_id", &self.key_id)?;
        validate_range("agent.max_clock_skew_ms", self.max_clock_skew_ms, 0, MAX_CLOCK_SKEW_MS)?;
        if self.replay_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "agent.replay_cache_capacity must be greater than zero".to_string(),
            ));
        }
        self.driver.validate()
    }

    /// Returns the parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address is malformed.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_bind("agent.bind", &self.bind)
    }
}

/// External commands used by the desktop driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// X display exported to child processes.
    #[serde(default)]
    pub display: Option<String>,
    /// Input automation program (xdotool compatible).
    #[serde(default = "default_input_command")]
    pub input_command: String,
    /// Capture command writing a PNG to stdout.
    #[serde(default = "default_capture_command")]
    pub capture_command: Vec<String>,
    /// OCR command reading a PNG on stdin and writing TSV to stdout.
    #[serde(default = "default_ocr_command")]
    pub ocr_command: Vec<String>,
    /// Optional command emitting UI elements as a JSON array.
    #[serde(default)]
    pub ui_elements_command: Option<Vec<String>>,
    /// Shell prefix; the command line is appended as the final argument.
    #[serde(default = "default_shell_command")]
    pub shell_command: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            display: None,
            input_command: default_input_command(),
            capture_command: default_capture_command(),
            ocr_command: default_ocr_command(),
            ui_elements_command: None,
            shell_command: default_shell_command(),
        }
    }
}

impl DriverConfig {
    /// Validates driver configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.input_command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "agent.driver.input_command must be non-empty".to_string(),
            ));
        }
        validate_argv("agent.driver.capture_command", &self.capture_command)?;
        validate_argv("agent.driver.ocr_command", &self.ocr_command)?;
        validate_argv("agent.driver.shell_command", &self.shell_command)?;
        if let Some(command) = &self.ui_elements_command {
            validate_argv("agent.driver.ui_elements_command", command)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Relay
// ============================================================================

/// Thin relay client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Project this relay serves.
    pub project_id: ProjectId,
    /// Listen address for the HTTP and WebSocket transports.
    #[serde(default = "default_relay_bind")]
    pub bind: String,
    /// Token the orchestration layer presents to the relay.
    pub auth_token: SecretRef,
    /// Gateway base URL.
    pub gateway_url: String,
    /// Token presented to the gateway.
    pub gateway_token: SecretRef,
    /// Agent base URL.
    pub agent_url: String,
    /// Token presented to the agent.
    pub agent_token: SecretRef,
    /// Timeout for the gateway hop.
    #[serde(default = "default_execution_ceiling_ms")]
    pub gateway_timeout_ms: u64,
    /// Timeout for the agent hop.
    #[serde(default = "default_execution_ceiling_ms")]
    pub agent_timeout_ms: u64,
    /// Maximum frame or body size accepted on any transport.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    /// Validates relay configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_bind("relay.bind", &self.bind)?;
        self.auth_token.validate("relay.auth_token")?;
        self.gateway_token.validate("relay.gateway_token")?;
        self.agent_token.validate("relay.agent_token")?;
        validate_http_url("relay.gateway_url", &self.gateway_url)?;
        validate_http_url("relay.agent_url", &self.agent_url)?;
        validate_range(
            "relay.gateway_timeout_ms",
            self.gateway_timeout_ms,
            100,
            MAX_HOP_TIMEOUT_MS,
        )?;
        validate_range("relay.agent_timeout_ms", self.agent_timeout_ms, 100, MAX_HOP_TIMEOUT_MS)?;
        if self.max_frame_bytes < 1024 {
            return Err(ConfigError::Invalid(
                "relay.max_frame_bytes must be at least 1024".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address is malformed.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_bind("relay.bind", &self.bind)
    }
}

// ============================================================================
// SECTION: Network
// ============================================================================

/// Network lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Docker socket path; platform defaults apply when unset.
    #[serde(default)]
    pub docker_socket: Option<String>,
    /// Prefix for tenant network and container names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Shared control-plane network name.
    #[serde(default = "default_control_plane_network")]
    pub control_plane_network: String,
    /// Guest desktop image.
    pub guest_image: String,
    /// Shared-storage image.
    pub storage_image: String,
    /// Subnet allocator policy.
    #[serde(default)]
    pub allocation: AllocationConfig,
    /// Services allowed on both the control plane and tenant networks.
    #[serde(default)]
    pub dual_homed: Vec<DualHomedService>,
    /// Control-plane services that must never join a tenant network.
    #[serde(default)]
    pub protected_services: Vec<String>,
    /// Timeout for each container runtime call.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl NetworkConfig {
    /// Validates network configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_docker_name("network.name_prefix", &self.name_prefix)?;
        if self.name_prefix.len() > MAX_NAME_PREFIX_LENGTH {
            return Err(ConfigError::Invalid("network.name_prefix is too long".to_string()));
        }
        validate_docker_name("network.control_plane_network", &self.control_plane_network)?;
        if self.guest_image.trim().is_empty() || self.storage_image.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "network.guest_image and network.storage_image must be set".to_string(),
            ));
        }
        if let Some(socket) = &self.docker_socket {
            validate_path_string("network.docker_socket", socket)?;
        }
        self.allocation
            .policy()
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("network.allocation: {err}")))?;
        let protected: BTreeSet<&str> =
            self.protected_services.iter().map(String::as_str).collect();
        let mut roles = BTreeSet::new();
        let mut containers = BTreeSet::new();
        for service in &self.dual_homed {
            validate_docker_name("network.dual_homed.container", &service.container)?;
            let attachable =
                matches!(service.role, NetworkRole::ToolsService | NetworkRole::ControlPlaneBridge);
            if !attachable {
                return Err(ConfigError::Invalid(format!(
                    "network.dual_homed role {} cannot be dual-homed",
                    service.role
                )));
            }
            if protected.contains(service.container.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "network.dual_homed container {} is a protected service",
                    service.container
                )));
            }
            if !roles.insert(service.role) || !containers.insert(service.container.as_str()) {
                return Err(ConfigError::Invalid(
                    "network.dual_homed entries must have unique roles and containers".to_string(),
                ));
            }
        }
        validate_range(
            "network.operation_timeout_ms",
            self.operation_timeout_ms,
            1_000,
            MAX_HOP_TIMEOUT_MS,
        )?;
        Ok(())
    }
}

/// Subnet allocator settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationConfig {
    /// Lowest third octet handed out.
    #[serde(default = "default_offset_floor")]
    pub offset_floor: u8,
    /// Highest third octet handed out.
    #[serde(default = "default_offset_ceiling")]
    pub offset_ceiling: u8,
    /// Sequential probes before reporting a conflict.
    #[serde(default = "default_max_probes")]
    pub max_probes: u16,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            offset_floor: DEFAULT_OFFSET_FLOOR,
            offset_ceiling: DEFAULT_OFFSET_CEILING,
            max_probes: DEFAULT_MAX_PROBES,
        }
    }
}

impl AllocationConfig {
    /// Returns the allocator policy.
    #[must_use]
    pub const fn policy(&self) -> AllocatorPolicy {
        AllocatorPolicy {
            offset_floor: self.offset_floor,
            offset_ceiling: self.offset_ceiling,
            max_probes: self.max_probes,
        }
    }
}

/// Service attached to the control plane and every tenant network.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DualHomedService {
    /// Container name.
    pub container: String,
    /// Fixed role inside each tenant subnet.
    pub role: NetworkRole,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Allocation store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Allocation store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())
            }
        }
    }

    /// Returns the `SQLite` settings when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Stabilizer
// ============================================================================

/// Address stabilization configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StabilizerConfig {
    /// Guest interface receiving the logical aliases.
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Dedicated NAT chain name.
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Directory for the relay pid file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Initial restart backoff.
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    /// Maximum restart backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Services reached through logical addresses.
    pub mappings: Vec<MappingConfig>,
}

impl StabilizerConfig {
    /// Validates stabilizer configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_token("stabilizer.interface", &self.interface, 15)?;
        validate_token("stabilizer.chain", &self.chain, 28)?;
        validate_path_string("stabilizer.state_dir", &self.state_dir.to_string_lossy())?;
        if self.restart_backoff_ms == 0 || self.restart_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "stabilizer backoff must satisfy 0 < restart_backoff_ms <= max_backoff_ms"
                    .to_string(),
            ));
        }
        if self.mappings.is_empty() {
            return Err(ConfigError::Invalid(
                "stabilizer.mappings must contain at least one mapping".to_string(),
            ));
        }
        let mut roles = BTreeSet::new();
        let mut relay_ports = BTreeSet::new();
        for mapping in &self.mappings {
            if mapping.role == NetworkRole::Guest {
                return Err(ConfigError::Invalid(
                    "stabilizer mapping cannot target the guest role".to_string(),
                ));
            }
            if mapping.hostname.trim().is_empty() || mapping.hostname.len() > 253 {
                return Err(ConfigError::Invalid(
                    "stabilizer mapping hostname must be 1-253 characters".to_string(),
                ));
            }
            if mapping.port == 0 || mapping.relay_port == 0 {
                return Err(ConfigError::Invalid(
                    "stabilizer mapping ports must be non-zero".to_string(),
                ));
            }
            if !roles.insert(mapping.role) || !relay_ports.insert(mapping.relay_port) {
                return Err(ConfigError::Invalid(
                    "stabilizer mappings must have unique roles and relay ports".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One logical-to-real service mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Role whose logical address the guest uses.
    pub role: NetworkRole,
    /// Name resolving to the real address.
    pub hostname: String,
    /// Service port.
    pub port: u16,
    /// Local relay listener port.
    pub relay_port: u16,
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkType {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Drop events.
    None,
}

/// Audit configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Sink type.
    #[serde(default)]
    pub sink: AuditSinkType,
    /// Log path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkType::File, None) => {
                Err(ConfigError::Invalid("file audit sink requires path".to_string()))
            }
            (AuditSinkType::File, Some(path)) => {
                validate_path_string("audit.path", &path.to_string_lossy())
            }
            (_, Some(_)) => {
                Err(ConfigError::Invalid("audit.path is only valid for the file sink".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the error for a missing section.
fn missing_section(name: &str) -> ConfigError {
    ConfigError::Invalid(format!("[{name}] section is required"))
}

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Parses a socket address.
fn parse_bind(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid(format!("{field} must be host:port")))
}

/// Validates a socket address.
fn validate_bind(field: &str, value: &str) -> Result<(), ConfigError> {
    parse_bind(field, value).map(|_| ())
}

/// Validates an inclusive numeric range.
fn validate_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!("{field} must be between {min} and {max}")));
    }
    Ok(())
}

/// Validates an envelope key identifier.
fn validate_key_id(field: &str, value: &str) -> Result<(), ConfigError> {
    validate_token(field, value, 64)
}

/// Validates a short identifier of ASCII alphanumerics, `-`, `_` or `.`.
fn validate_token(field: &str, value: &str, max: usize) -> Result<(), ConfigError> {
    if value.is_empty()
        || value.len() > max
        || !value.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(ConfigError::Invalid(format!(
            "{field} must be 1-{max} characters of [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}

/// Validates a Docker object name.
fn validate_docker_name(field: &str, value: &str) -> Result<(), ConfigError> {
    validate_token(field, value, 128)?;
    if !value.starts_with(|ch: char| ch.is_ascii_alphanumeric()) {
        return Err(ConfigError::Invalid(format!("{field} must start with an alphanumeric")));
    }
    Ok(())
}

/// Validates an argv vector.
fn validate_argv(field: &str, argv: &[String]) -> Result<(), ConfigError> {
    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(()),
        _ => Err(ConfigError::Invalid(format!("{field} must name a program"))),
    }
}

/// Validates an http(s) URL.
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::Invalid(format!("{field}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::Invalid(format!("{field} must be an http(s) URL")));
    }
    Ok(())
}

/// Default gateway bind.
fn default_gateway_bind() -> String {
    DEFAULT_GATEWAY_BIND.to_string()
}

/// Default agent bind.
fn default_agent_bind() -> String {
    DEFAULT_AGENT_BIND.to_string()
}

/// Default relay bind.
fn default_relay_bind() -> String {
    DEFAULT_RELAY_BIND.to_string()
}

/// Default key id.
fn default_key_id() -> String {
    DEFAULT_KEY_ID.to_string()
}

/// Default execution ceiling.
const fn default_execution_ceiling_ms() -> u64 {
    EXECUTION_CEILING_MS
}

/// Default primitive timeout.
const fn default_primitive_timeout_ms() -> u64 {
    DEFAULT_PRIMITIVE_TIMEOUT_MS
}

/// Default in-flight ledger size.
const fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

/// Default clock skew.
const fn default_max_clock_skew_ms() -> u64 {
    DEFAULT_MAX_CLOCK_SKEW_MS
}

/// Default replay cache capacity.
const fn default_replay_cache_capacity() -> usize {
    DEFAULT_REPLAY_CACHE_CAPACITY
}

/// Default frame limit.
const fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

/// Default input program.
fn default_input_command() -> String {
    "xdotool".to_string()
}

/// Default capture command.
fn default_capture_command() -> Vec<String> {
    ["import", "-window", "root", "png:-"].map(String::from).to_vec()
}

/// Default OCR command.
fn default_ocr_command() -> Vec<String> {
    ["tesseract", "stdin", "stdout", "tsv"].map(String::from).to_vec()
}

/// Default shell prefix.
fn default_shell_command() -> Vec<String> {
    ["/bin/sh", "-c"].map(String::from).to_vec()
}

/// Default name prefix.
fn default_name_prefix() -> String {
    "deskrelay".to_string()
}

/// Default control-plane network.
fn default_control_plane_network() -> String {
    "deskrelay-control".to_string()
}

/// Default runtime timeout.
const fn default_operation_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}

/// Default offset floor.
const fn default_offset_floor() -> u8 {
    DEFAULT_OFFSET_FLOOR
}

/// Default offset ceiling.
const fn default_offset_ceiling() -> u8 {
    DEFAULT_OFFSET_CEILING
}

/// Default probe budget.
const fn default_max_probes() -> u16 {
    DEFAULT_MAX_PROBES
}

/// Default store busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Default guest interface.
fn default_interface() -> String {
    "eth0".to_string()
}

/// Default NAT chain.
fn default_chain() -> String {
    "DESKRELAY".to_string()
}

/// Default state directory.
fn default_state_dir() -> PathBuf {
    PathBuf::from("/run/deskrelay")
}

/// Default initial backoff.
const fn default_restart_backoff_ms() -> u64 {
    DEFAULT_RESTART_BACKOFF_MS
}

/// Default maximum backoff.
const fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use super::*;

    #[test]
    fn validate_path_string_rejects_empty_string() {
        let result = validate_path_string("test_path", "  ");
        assert!(result.unwrap_err().to_string().contains("non-empty"));
    }

    #[test]
    fn validate_path_rejects_long_component() {
        let long = "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1);
        assert!(validate_path(Path::new(&long)).is_err());
        assert!(validate_path(Path::new("deskrelay.toml")).is_ok());
    }

    #[test]
    fn explicit_path_wins() {
        let resolved = resolve_path(Some(Path::new("/etc/deskrelay/custom.toml"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/deskrelay/custom.toml"));
    }

    #[test]
    fn docker_names_are_checked() {
        assert!(validate_docker_name("x", "deskrelay").is_ok());
        assert!(validate_docker_name("x", "-bad").is_err());
        assert!(validate_docker_name("x", "has space").is_err());
    }

    #[test]
    fn urls_must_be_http() {
        assert!(validate_http_url("x", "http://127.0.0.1:8700").is_ok());
        assert!(validate_http_url("x", "ftp://host").is_err());
        assert!(validate_http_url("x", "not a url").is_err());
    }
}
