// crates/deskrelay-cli/src/main.rs
// ============================================================================
// Module: Deskrelay CLI Entry Point
// Description: Command dispatcher for every deskrelay component.
// Purpose: Start services and run lifecycle operations from one binary.
// Dependencies: clap, deskrelay-*, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! One binary hosts the gateway, the guest agent, and the relay client, plus
//! the operator commands for tenant networks, address stabilization, and key
//! material. Every command reads the same TOML file, resolved from
//! `--config`, then `DESKRELAY_CONFIG`, then `deskrelay.toml`. Security
//! posture: configuration and arguments are untrusted and validated before
//! any service starts; secrets are only ever read through references.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;
pub(crate) mod wiring;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use deskrelay_agent::Agent;
use deskrelay_agent::AgentServer;
use deskrelay_agent::AgentSettings;
use deskrelay_agent::CommandDriver;
use deskrelay_config::DeskrelayConfig;
use deskrelay_core::EnvelopeKey;
use deskrelay_core::ProjectId;
use deskrelay_core::SharedAuditSink;
use deskrelay_gateway::Gateway;
use deskrelay_gateway::GatewayServer;
use deskrelay_gateway::GatewaySettings;
use deskrelay_network::DockerRuntime;
use deskrelay_network::NetworkManager;
use deskrelay_relay::Relay;
use deskrelay_relay::RelayServer;
use deskrelay_relay::RelaySettings;
use deskrelay_relay::stdio::serve_stdio;
use deskrelay_stabilizer::Stabilizer;
use deskrelay_stabilizer::Supervisor;
use deskrelay_stabilizer::SystemCommandRunner;
use deskrelay_stabilizer::SystemResolver;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "deskrelay", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to `DESKRELAY_CONFIG`, then deskrelay.toml).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Host-side decision gateway.
    Gateway {
        /// Selected gateway subcommand.
        #[command(subcommand)]
        command: ServeCommand,
    },
    /// In-guest execution agent.
    Agent {
        /// Selected agent subcommand.
        #[command(subcommand)]
        command: ServeCommand,
    },
    /// Orchestration-facing relay client.
    Relay {
        /// Selected relay subcommand.
        #[command(subcommand)]
        command: RelayCommand,
    },
    /// Tenant network lifecycle.
    Network {
        /// Selected network subcommand.
        #[command(subcommand)]
        command: NetworkCommand,
    },
    /// Show the subnet a project holds or would receive.
    Allocate(ProjectArgs),
    /// In-guest address stabilization.
    Stabilize {
        /// Selected stabilize subcommand.
        #[command(subcommand)]
        command: StabilizeCommand,
    },
    /// Generate a base64 envelope key.
    Keygen,
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Service subcommands.
#[derive(Subcommand, Debug)]
enum ServeCommand {
    /// Run the service until interrupted.
    Serve,
}

/// Relay subcommands.
#[derive(Subcommand, Debug)]
enum RelayCommand {
    /// Run the relay until interrupted.
    Serve(RelayServeArgs),
}

/// Arguments for `relay serve`.
#[derive(Args, Debug)]
struct RelayServeArgs {
    /// Serve one framed session over stdin/stdout instead of HTTP.
    #[arg(long)]
    stdio: bool,
}

/// Network subcommands.
#[derive(Subcommand, Debug)]
enum NetworkCommand {
    /// Provision the project's network and containers.
    Create(ProjectArgs),
    /// Tear down the project's network and release its subnet.
    Destroy(ProjectArgs),
    /// Show the persisted record and live attachments.
    Status(ProjectArgs),
}

/// Project selector shared by several commands.
#[derive(Args, Debug)]
struct ProjectArgs {
    /// Project identifier.
    #[arg(long, value_name = "PROJECT_ID")]
    project: String,
}

/// Stabilize subcommands.
#[derive(Subcommand, Debug)]
enum StabilizeCommand {
    /// Apply host changes and supervise relays until interrupted.
    Run(StabilizeRunArgs),
    /// Print the plan and host commands without applying them.
    Plan,
    /// Remove every host change and stop a recorded relay owner.
    Teardown,
}

/// Arguments for `stabilize run`.
#[derive(Args, Debug)]
struct StabilizeRunArgs {
    /// Bind relays on this address instead of each logical alias.
    #[arg(long, value_name = "ADDR")]
    listen: Option<Ipv4Addr>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the configuration file.
    Validate,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error carrying the message printed on stderr.
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    pub(crate) const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
pub(crate) type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Gateway {
            command: ServeCommand::Serve,
        } => command_gateway_serve(config_path).await,
        Commands::Agent {
            command: ServeCommand::Serve,
        } => command_agent_serve(config_path).await,
        Commands::Relay {
            command: RelayCommand::Serve(args),
        } => command_relay_serve(config_path, &args).await,
        Commands::Network {
            command,
        } => command_network(config_path, command).await,
        Commands::Allocate(args) => command_allocate(config_path, &args),
        Commands::Stabilize {
            command,
        } => command_stabilize(config_path, command).await,
        Commands::Keygen => command_keygen(),
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(config_path),
    }
}

// ============================================================================
// SECTION: Service Commands
// ============================================================================

/// Executes `gateway serve`.
async fn command_gateway_serve(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let section = config.require_gateway().map_err(config_error)?;
    let bind = section.bind_addr().map_err(config_error)?;
    let settings = GatewaySettings::from_config(section).map_err(display_error)?;
    let audit = wiring::audit_sink(&config.audit)?;
    let store = wiring::allocation_store(&config.store)?;
    let gateway = Gateway::new(settings, audit).with_store(store);
    write_stderr_line(&format!(
        "gateway listening on {bind} (credential {})",
        gateway.credential_fingerprint()
    ))?;
    GatewayServer::new(Arc::new(gateway), bind)
        .serve(wiring::shutdown_signal())
        .await
        .map_err(display_error)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `agent serve`.
async fn command_agent_serve(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let section = config.require_agent().map_err(config_error)?;
    let bind = section.bind_addr().map_err(config_error)?;
    let settings = AgentSettings::from_config(section).map_err(display_error)?;
    let audit = wiring::audit_sink(&config.audit)?;
    let driver = Arc::new(CommandDriver::new(section.driver.clone()));
    let agent = Agent::new(settings, driver, audit);
    write_stderr_line(&format!("agent for {} listening on {bind}", section.project_id))?;
    AgentServer::new(Arc::new(agent), bind)
        .serve(wiring::shutdown_signal())
        .await
        .map_err(display_error)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `relay serve`.
async fn command_relay_serve(
    config_path: Option<&Path>,
    args: &RelayServeArgs,
) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let section = config.require_relay().map_err(config_error)?;
    let settings = RelaySettings::from_config(section).map_err(display_error)?;
    let audit = wiring::audit_sink(&config.audit)?;
    let relay = Relay::new(settings, audit).map_err(display_error)?;
    if args.stdio {
        serve_stdio(&relay).await.map_err(display_error)?;
        return Ok(ExitCode::SUCCESS);
    }
    let bind = section.bind_addr().map_err(config_error)?;
    write_stderr_line(&format!("relay for {} listening on {bind}", section.project_id))?;
    RelayServer::new(Arc::new(relay), bind)
        .serve(wiring::shutdown_signal())
        .await
        .map_err(display_error)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Network Commands
// ============================================================================

/// Executes `network create|destroy|status`.
async fn command_network(config_path: Option<&Path>, command: NetworkCommand) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let network = config.require_network().map_err(config_error)?;
    let audit = wiring::audit_sink(&config.audit)?;
    let store = wiring::allocation_store(&config.store)?;
    let runtime = DockerRuntime::connect(network.docker_socket.as_deref()).map_err(display_error)?;
    let manager = NetworkManager::new(network, Arc::new(runtime), store, audit).map_err(display_error)?;
    let output = match command {
        NetworkCommand::Create(args) => {
            let allocation = manager.create(&parse_project(&args)?).await.map_err(display_error)?;
            json!({"allocation": allocation})
        }
        NetworkCommand::Destroy(args) => {
            let record = manager.destroy(&parse_project(&args)?).await.map_err(display_error)?;
            json!({"destroyed": true, "record": record})
        }
        NetworkCommand::Status(args) => {
            let project_id = parse_project(&args)?;
            let status = manager.status(&project_id).await.map_err(display_error)?;
            json!({
                "project_id": project_id,
                "network": manager.network_name(&project_id),
                "record": status.record,
                "attachments": status.attachments,
            })
        }
    };
    write_json(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `allocate`.
fn command_allocate(config_path: Option<&Path>, args: &ProjectArgs) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let network = config.require_network().map_err(config_error)?;
    let store = wiring::allocation_store(&config.store)?;
    let preview = wiring::allocation_preview(network, &store, &parse_project(args)?)?;
    write_json(&preview)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Stabilize Commands
// ============================================================================

/// Executes `stabilize run|plan|teardown`.
async fn command_stabilize(
    config_path: Option<&Path>,
    command: StabilizeCommand,
) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let section = config.require_stabilizer().map_err(config_error)?;
    let audit = wiring::audit_sink(&config.audit)?;
    let stabilizer = Arc::new(Stabilizer::new(
        section.clone(),
        Arc::new(SystemCommandRunner::default()),
        Arc::new(SystemResolver::default()),
        Arc::clone(&audit),
    ));
    match command {
        StabilizeCommand::Plan => {
            let plan = stabilizer.plan().await.map_err(display_error)?;
            let commands: Vec<String> =
                plan.apply_commands().iter().map(ToString::to_string).collect();
            write_json(&json!({"plan": plan, "commands": commands}))?;
        }
        StabilizeCommand::Teardown => {
            stabilizer.teardown().await.map_err(display_error)?;
            write_stderr_line("stabilization removed")?;
        }
        StabilizeCommand::Run(args) => {
            let restarts = run_supervisor(stabilizer, audit, args.listen).await?;
            write_stderr_line(&format!("stabilizer stopped after {restarts} restarts"))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Supervises relays until a shutdown signal arrives.
async fn run_supervisor(
    stabilizer: Arc<Stabilizer>,
    audit: SharedAuditSink,
    listen: Option<Ipv4Addr>,
) -> CliResult<u32> {
    let mut supervisor = Supervisor::new(stabilizer, audit);
    if let Some(address) = listen {
        supervisor = supervisor.with_listen_override(address);
    }
    let (stop, stopped) = watch::channel(false);
    tokio::spawn(async move {
        wiring::shutdown_signal().await;
        let _ = stop.send(true);
    });
    supervisor.run(stopped).await.map_err(display_error)
}

// ============================================================================
// SECTION: Utility Commands
// ============================================================================

/// Executes `keygen`.
fn command_keygen() -> CliResult<ExitCode> {
    let key = EnvelopeKey::generate_base64().map_err(display_error)?;
    write_stdout_line(&key)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `config validate`.
fn command_config_validate(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    write_json(&json!({"valid": true, "sections": configured_sections(&config)}))?;
    Ok(ExitCode::SUCCESS)
}

/// Lists the optional sections present in a configuration.
fn configured_sections(config: &DeskrelayConfig) -> Vec<&'static str> {
    [
        ("gateway", config.gateway.is_some()),
        ("agent", config.agent.is_some()),
        ("relay", config.relay.is_some()),
        ("network", config.network.is_some()),
        ("stabilizer", config.stabilizer.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, present)| present.then_some(name))
    .collect()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates configuration.
fn load_config(path: Option<&Path>) -> CliResult<DeskrelayConfig> {
    DeskrelayConfig::load(path).map_err(config_error)
}

/// Parses the `--project` argument.
fn parse_project(args: &ProjectArgs) -> CliResult<ProjectId> {
    ProjectId::new(args.project.as_str())
        .map_err(|err| CliError::new(format!("invalid project id: {err}")))
}

/// Maps a configuration error.
fn config_error(err: deskrelay_config::ConfigError) -> CliError {
    CliError::new(err.to_string())
}

/// Maps any displayable error.
fn display_error(err: impl std::fmt::Display) -> CliError {
    CliError::new(err.to_string())
}

/// Writes pretty JSON to stdout.
fn write_json(value: &Value) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output: {err}")))?;
    write_stdout_line(&text)
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> CliResult<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stderr: {err}")))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}
