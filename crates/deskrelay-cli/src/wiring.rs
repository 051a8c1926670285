// crates/deskrelay-cli/src/wiring.rs
// ============================================================================
// Module: Component Wiring
// Description: Builds audit sinks, allocation stores, and shutdown futures.
// Purpose: Turn validated configuration into the shared runtime seams.
// Dependencies: deskrelay-config, deskrelay-core, deskrelay-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! Every subcommand builds the same ambient pieces from configuration: one
//! audit sink, one allocation store, and a shutdown future tied to process
//! signals. Keeping them here lets `main` stay a thin dispatcher.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use deskrelay_config::AuditConfig;
use deskrelay_config::AuditSinkType;
use deskrelay_config::NetworkConfig;
use deskrelay_config::StoreConfig;
use deskrelay_config::StoreType;
use deskrelay_core::AllocationStore;
use deskrelay_core::InMemoryAllocationStore;
use deskrelay_core::ProjectId;
use deskrelay_core::SharedAllocationStore;
use deskrelay_core::SharedAuditSink;
use deskrelay_core::StoreError;
use deskrelay_core::SubnetAllocator;
use deskrelay_core::audit::FileAuditSink;
use deskrelay_core::audit::NoopAuditSink;
use deskrelay_core::audit::StderrAuditSink;
use deskrelay_store_sqlite::SqliteAllocationStore;
use serde_json::Value;
use serde_json::json;

use crate::CliError;
use crate::CliResult;

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Builds the configured audit sink.
pub(crate) fn audit_sink(config: &AuditConfig) -> CliResult<SharedAuditSink> {
    match config.sink {
        AuditSinkType::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkType::None => Ok(Arc::new(NoopAuditSink)),
        AuditSinkType::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| CliError::new("file audit sink requires path".to_string()))?;
            let sink = FileAuditSink::new(path).map_err(|err| {
                CliError::new(format!("failed to open audit log {}: {err}", path.display()))
            })?;
            Ok(Arc::new(sink))
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Opens the configured allocation store.
pub(crate) fn allocation_store(config: &StoreConfig) -> CliResult<SharedAllocationStore> {
    match config.store_type {
        StoreType::Memory => Ok(SharedAllocationStore::from_store(InMemoryAllocationStore::new())),
        StoreType::Sqlite => {
            let sqlite = config
                .sqlite()
                .ok_or_else(|| CliError::new("sqlite store requires path".to_string()))?;
            let store = SqliteAllocationStore::new(&sqlite)
                .map_err(|err| CliError::new(format!("failed to open allocation store: {err}")))?;
            Ok(SharedAllocationStore::from_store(store))
        }
    }
}

/// Returns the plan a project holds or would receive, without provisioning.
pub(crate) fn allocation_preview(
    network: &NetworkConfig,
    store: &SharedAllocationStore,
    project_id: &ProjectId,
) -> CliResult<Value> {
    let store_error = |err: StoreError| CliError::new(format!("allocation store error: {err}"));
    if let Some(record) = store.load(project_id).map_err(store_error)? {
        return Ok(json!({
            "persisted": true,
            "state": record.state,
            "allocation": record.allocation,
        }));
    }
    let allocator = SubnetAllocator::new(network.allocation.policy())
        .map_err(|err| CliError::new(err.to_string()))?;
    let records = store.list().map_err(store_error)?;
    let allocation = allocator
        .allocate_against(project_id, &records)
        .map_err(|err| CliError::new(err.to_string()))?;
    Ok(json!({
        "persisted": false,
        "preferred_offset": allocator.derive_offset(project_id),
        "allocation": allocation,
    }))
}

// ============================================================================
// SECTION: Shutdown
// ============================================================================

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
