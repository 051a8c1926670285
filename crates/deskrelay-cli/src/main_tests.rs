// crates/deskrelay-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Tests
// Description: Unit tests for argument parsing and component wiring.
// Purpose: Ensure commands parse as documented and configuration wires up.
// Dependencies: deskrelay-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! Covers the command surface, audit sink and store selection, and the
//! allocation preview used by `allocate`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;

use clap::Parser;
use deskrelay_config::DeskrelayConfig;
use deskrelay_core::AllocationRecord;
use deskrelay_core::AllocationStore;
use deskrelay_core::AuditEvent;
use deskrelay_core::NetworkAllocation;
use deskrelay_core::ProjectId;

use super::Cli;
use super::Commands;
use super::NetworkCommand;
use super::RelayCommand;
use super::StabilizeCommand;
use super::configured_sections;
use super::wiring;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Minimal network section.
const NETWORK: &str = r#"
[network]
guest_image = "deskrelay/guest:latest"
storage_image = "deskrelay/storage:latest"
"#;

fn config(text: &str) -> DeskrelayConfig {
    DeskrelayConfig::from_toml_str(text).unwrap()
}

fn project(id: &str) -> ProjectId {
    ProjectId::new(id).unwrap()
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn relay_serve_accepts_stdio_flag() {
    let cli = Cli::try_parse_from(["deskrelay", "--config", "d.toml", "relay", "serve", "--stdio"])
        .unwrap();
    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("d.toml")));
    match cli.command {
        Commands::Relay {
            command: RelayCommand::Serve(args),
        } => assert!(args.stdio),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn network_commands_require_a_project() {
    assert!(Cli::try_parse_from(["deskrelay", "network", "create"]).is_err());
    let cli = Cli::try_parse_from(["deskrelay", "network", "status", "--project", "p-1"]).unwrap();
    match cli.command {
        Commands::Network {
            command: NetworkCommand::Status(args),
        } => assert_eq!(args.project, "p-1"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn stabilize_run_parses_listen_override() {
    let cli = Cli::try_parse_from(["deskrelay", "stabilize", "run", "--listen", "127.0.0.1"]).unwrap();
    match cli.command {
        Commands::Stabilize {
            command: StabilizeCommand::Run(args),
        } => assert_eq!(args.listen, Some(std::net::Ipv4Addr::LOCALHOST)),
        other => panic!("unexpected command: {other:?}"),
    }
    assert!(Cli::try_parse_from(["deskrelay", "stabilize", "run", "--listen", "nope"]).is_err());
}

#[test]
fn unknown_commands_are_rejected() {
    assert!(Cli::try_parse_from(["deskrelay", "teleport"]).is_err());
    assert!(Cli::try_parse_from(["deskrelay"]).is_err());
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

#[test]
fn file_audit_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let text = format!("[audit]\nsink = \"file\"\npath = \"{}\"\n", path.display());
    let sink = wiring::audit_sink(&config(&text).audit).unwrap();
    sink.record(&AuditEvent::new("cli", "first"));
    sink.record(&AuditEvent::new("cli", "second"));
    let written = fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> =
        written.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["event"], "second");
}

#[test]
fn sqlite_store_is_opened_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("allocations.db");
    let text = format!("[store]\ntype = \"sqlite\"\npath = \"{}\"\n", path.display());
    let store = wiring::allocation_store(&config(&text).store).unwrap();
    assert!(store.list().unwrap().is_empty());
    assert!(path.exists());
}

#[test]
fn allocation_preview_matches_the_derived_offset() {
    let config = config(NETWORK);
    let store = wiring::allocation_store(&config.store).unwrap();
    let network = config.network.as_ref().unwrap();
    let preview = wiring::allocation_preview(network, &store, &project("project-374")).unwrap();
    assert_eq!(preview["persisted"], false);
    assert_eq!(preview["allocation"]["offset"], 47);
    assert_eq!(preview["allocation"]["subnet"], "172.30.47.0/24");
}

#[test]
fn allocation_preview_reports_persisted_records() {
    let config = config(NETWORK);
    let store = wiring::allocation_store(&config.store).unwrap();
    let allocation = NetworkAllocation::for_offset(project("project-374"), 60);
    store.save(&AllocationRecord::provisioning(allocation, 1)).unwrap();
    let network = config.network.as_ref().unwrap();
    let preview = wiring::allocation_preview(network, &store, &project("project-374")).unwrap();
    assert_eq!(preview["persisted"], true);
    assert_eq!(preview["allocation"]["offset"], 60);
}

#[test]
fn configured_sections_lists_present_sections() {
    assert_eq!(configured_sections(&config(NETWORK)), vec!["network"]);
    assert!(configured_sections(&config("")).is_empty());
}
