//! Network lifecycle tests for deskrelay-network.
// crates/deskrelay-network/tests/lifecycle.rs
// =============================================================================
// Module: Lifecycle Tests
// Description: Create, destroy, rollback, resume, and attachment policy.
// Purpose: Exercise the manager end to end over the in-memory runtime.
// =============================================================================

#![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use deskrelay_core::AllocationRecord;
use deskrelay_core::AllocationStore;
use deskrelay_core::AttachmentKind;
use deskrelay_core::ErrorKind;
use deskrelay_core::NetworkAllocation;
use deskrelay_core::NetworkRole;
use deskrelay_core::ProjectId;
use deskrelay_core::ProjectState;
use deskrelay_network::ContainerRuntime;
use deskrelay_network::NetworkError;
use deskrelay_network::NetworkSpec;

mod common;

use common::BRIDGE;
use common::BRIDGE_CONTROL_IP;
use common::CONTROL_PLANE;
use common::TOOLS;
use common::TOOLS_CONTROL_IP;

type TestResult = Result<(), String>;

fn project(id: &str) -> ProjectId {
    ProjectId::new(id).unwrap()
}

fn ensure(condition: bool, message: &str) -> TestResult {
    if condition { Ok(()) } else { Err(message.to_string()) }
}

#[tokio::test]
async fn create_provisions_isolated_network() -> TestResult {
    let harness = common::harness();
    let id = project("project-374");
    let allocation = harness.manager.create(&id).await.map_err(|err| err.to_string())?;

    ensure(allocation.subnet == "172.30.47.0/24", "unexpected subnet")?;
    ensure(allocation.gateway == Ipv4Addr::new(172, 30, 47, 254), "unexpected gateway")?;
    ensure(harness.runtime.has_network("deskrelay-project-374"), "network missing")?;

    let guest = harness
        .runtime
        .container_addresses("deskrelay-project-374-guest")
        .await
        .map_err(|err| err.to_string())?;
    ensure(
        guest.get("deskrelay-project-374") == Some(&Ipv4Addr::new(172, 30, 47, 2)),
        "guest not at .2",
    )?;
    ensure(guest.len() == 1, "guest joined more than its tenant network")?;
    ensure(
        harness.runtime.container_image("deskrelay-project-374-storage").as_deref()
            == Some("deskrelay/storage:latest"),
        "storage image mismatch",
    )?;

    let tools = harness.runtime.container_addresses(TOOLS).await.map_err(|err| err.to_string())?;
    ensure(tools.get(CONTROL_PLANE) == Some(&TOOLS_CONTROL_IP), "tools control-plane ip moved")?;
    ensure(
        tools.get("deskrelay-project-374") == Some(&Ipv4Addr::new(172, 30, 47, 1)),
        "tools not at .1",
    )?;

    let record = harness.store.load(&id).map_err(|err| err.to_string())?;
    ensure(
        record.is_some_and(|record| record.state == ProjectState::Active),
        "record not active",
    )?;
    ensure(harness.audit.event_names().contains(&"project_active"), "missing audit event")
}

#[tokio::test]
async fn create_on_active_project_reuses_allocation() -> TestResult {
    let harness = common::harness();
    let id = project("project-374");
    let first = harness.manager.create(&id).await.map_err(|err| err.to_string())?;
    let second = harness.manager.create(&id).await.map_err(|err| err.to_string())?;
    ensure(first == second, "allocation changed")?;
    let creates = harness
        .runtime
        .calls()
        .iter()
        .filter(|call| call.starts_with("create_network:"))
        .count();
    ensure(creates == 1, "network created twice")
}

#[tokio::test]
async fn colliding_projects_probe_to_next_offset() -> TestResult {
    let harness = common::harness();
    let first = harness.manager.create(&project("project-374")).await.map_err(|err| err.to_string())?;
    let second = harness.manager.create(&project("project-661")).await.map_err(|err| err.to_string())?;
    ensure(first.offset == 47, "first project not at 47")?;
    ensure(second.offset == 48, "colliding project did not probe forward")?;
    ensure(harness.runtime.has_network("deskrelay-project-661"), "second network missing")
}

#[tokio::test]
async fn destroy_releases_everything_and_is_idempotent() -> TestResult {
    let harness = common::harness();
    let id = project("project-374");
    harness.manager.create(&id).await.map_err(|err| err.to_string())?;

    let removed = harness.manager.destroy(&id).await.map_err(|err| err.to_string())?;
    ensure(
        removed.is_some_and(|record| record.state == ProjectState::Deleted),
        "destroy did not report the deleted record",
    )?;
    ensure(!harness.runtime.has_network("deskrelay-project-374"), "network survived")?;
    ensure(!harness.runtime.has_container("deskrelay-project-374-guest"), "guest survived")?;
    ensure(harness.runtime.has_container(TOOLS), "dual-homed service was removed")?;
    ensure(harness.runtime.memberships(TOOLS) == vec![CONTROL_PLANE.to_string()], "tools still attached")?;
    let bridge = harness.runtime.container_addresses(BRIDGE).await.map_err(|err| err.to_string())?;
    ensure(bridge.get(CONTROL_PLANE) == Some(&BRIDGE_CONTROL_IP), "bridge control-plane ip moved")?;
    ensure(harness.store.load(&id).map_err(|err| err.to_string())?.is_none(), "record survived")?;

    let again = harness.manager.destroy(&id).await.map_err(|err| err.to_string())?;
    ensure(again.is_none(), "second destroy reported a record")
}

#[tokio::test]
async fn destroy_without_record_removes_leftovers() -> TestResult {
    let harness = common::harness();
    let id = project("orphan");
    let plan = NetworkAllocation::for_offset(id.clone(), 90);
    harness
        .runtime
        .create_network(&NetworkSpec {
            name: "deskrelay-orphan".to_string(),
            subnet: plan.subnet.clone(),
            gateway: plan.gateway,
            labels: std::collections::BTreeMap::new(),
        })
        .await
        .map_err(|err| err.to_string())?;
    let removed = harness.manager.destroy(&id).await.map_err(|err| err.to_string())?;
    ensure(removed.is_none(), "no record was expected")?;
    ensure(!harness.runtime.has_network("deskrelay-orphan"), "leftover network survived")
}

#[tokio::test]
async fn failed_create_rolls_back_and_releases_allocation() -> TestResult {
    let harness = common::harness();
    let id = project("p1");
    harness.runtime.fail_on("run_container", "deskrelay-p1-storage");

    let result = harness.manager.create(&id).await;
    let Err(err) = result else {
        return Err("create should fail".to_string());
    };
    ensure(matches!(err, NetworkError::Runtime(_)), "original error not returned")?;
    ensure(err.kind() == ErrorKind::Unavailable, "unexpected error kind")?;
    ensure(!harness.runtime.has_network("deskrelay-p1"), "network not rolled back")?;
    ensure(!harness.runtime.has_container("deskrelay-p1-guest"), "guest not rolled back")?;
    ensure(harness.store.load(&id).map_err(|err| err.to_string())?.is_none(), "allocation kept")?;
    ensure(harness.audit.event_names().contains(&"project_rollback"), "rollback not audited")?;

    let retry = harness.manager.create(&id).await.map_err(|err| err.to_string())?;
    ensure(retry.offset == 124, "retry did not reuse the derived offset")
}

#[tokio::test]
async fn incomplete_rollback_keeps_allocation_reserved() -> TestResult {
    let harness = common::harness();
    let id = project("p1");
    harness.runtime.fail_on("run_container", "deskrelay-p1-storage");
    harness.runtime.fail_on("remove_network", "deskrelay-p1");

    ensure(harness.manager.create(&id).await.is_err(), "create should fail")?;
    ensure(harness.runtime.has_network("deskrelay-p1"), "network should survive the failed teardown")?;
    let kept = harness.store.load(&id).map_err(|err| err.to_string())?;
    let Some(kept) = kept else {
        return Err("allocation released while the network still exists".to_string());
    };
    ensure(kept.state == ProjectState::TearingDown, "record not left tearing down")?;
    ensure(kept.allocation.offset == 124, "reserved offset changed")?;
    let offsets: BTreeSet<u8> = harness
        .store
        .list()
        .map_err(|err| err.to_string())?
        .iter()
        .map(|record| record.allocation.offset)
        .collect();
    ensure(offsets.contains(&124), "offset no longer reserved")?;

    let removed = harness.manager.destroy(&id).await.map_err(|err| err.to_string())?;
    ensure(removed.is_some(), "destroy did not see the retained record")?;
    ensure(!harness.runtime.has_network("deskrelay-p1"), "destroy left the network")?;
    ensure(harness.store.load(&id).map_err(|err| err.to_string())?.is_none(), "record kept after destroy")
}

#[tokio::test]
async fn dual_homed_failure_rolls_back_earlier_attachments() -> TestResult {
    let harness = common::harness();
    let id = project("p1");
    harness.runtime.fail_on("connect", "bridge@deskrelay-p1");

    ensure(harness.manager.create(&id).await.is_err(), "create should fail")?;
    ensure(harness.runtime.memberships(TOOLS) == vec![CONTROL_PLANE.to_string()], "tools left attached")?;
    ensure(harness.runtime.memberships(BRIDGE) == vec![CONTROL_PLANE.to_string()], "bridge attached")
}

#[tokio::test]
async fn interrupted_create_resumes_with_persisted_plan() -> TestResult {
    let harness = common::harness();
    let id = project("project-374");
    let plan = NetworkAllocation::for_offset(id.clone(), 47);
    harness
        .store
        .save(&AllocationRecord::provisioning(plan.clone(), 1_000))
        .map_err(|err| err.to_string())?;
    harness
        .runtime
        .create_network(&NetworkSpec {
            name: "deskrelay-project-374".to_string(),
            subnet: plan.subnet.clone(),
            gateway: plan.gateway,
            labels: std::collections::BTreeMap::new(),
        })
        .await
        .map_err(|err| err.to_string())?;

    let allocation = harness.manager.create(&id).await.map_err(|err| err.to_string())?;
    ensure(allocation == plan, "persisted plan not reused")?;
    let record = harness.store.load(&id).map_err(|err| err.to_string())?.unwrap();
    ensure(record.state == ProjectState::Active, "record not active")?;
    ensure(record.created_at_ms == 1_000, "creation time not preserved")?;
    ensure(harness.audit.event_names().contains(&"project_resumed"), "resume not audited")
}

#[tokio::test]
async fn control_plane_drift_fails_create() -> TestResult {
    let harness = common::harness();
    let id = project("p1");
    harness.runtime.drift_on_connect(BRIDGE, CONTROL_PLANE, Ipv4Addr::new(172, 18, 0, 99));

    let Err(err) = harness.manager.create(&id).await else {
        return Err("drift should fail create".to_string());
    };
    ensure(matches!(err, NetworkError::ControlPlaneDrift { .. }), "unexpected error")?;
    ensure(err.kind() == ErrorKind::Internal, "unexpected kind")?;
    ensure(harness.store.load(&id).map_err(|err| err.to_string())?.is_none(), "allocation kept")?;
    ensure(harness.audit.event_names().contains(&"control_plane_drift"), "drift not audited")
}

#[tokio::test]
async fn protected_service_is_never_attached() -> TestResult {
    let mut config = common::network_config();
    config.protected_services.push(TOOLS.to_string());
    let harness = common::harness_with(config);
    let id = project("p1");

    let Err(err) = harness.manager.create(&id).await else {
        return Err("protected service attach should fail".to_string());
    };
    ensure(matches!(err, NetworkError::AttachmentDenied(_)), "unexpected error")?;
    ensure(harness.runtime.memberships(TOOLS) == vec![CONTROL_PLANE.to_string()], "tools attached")?;
    ensure(!harness.runtime.has_network("deskrelay-p1"), "network not rolled back")
}

#[tokio::test]
async fn status_lists_live_attachments() -> TestResult {
    let harness = common::harness();
    let id = project("project-374");
    harness.manager.create(&id).await.map_err(|err| err.to_string())?;

    let status = harness.manager.status(&id).await.map_err(|err| err.to_string())?;
    ensure(status.record.is_some(), "record missing")?;
    let roles: BTreeSet<NetworkRole> = status.attachments.iter().map(|a| a.role).collect();
    ensure(roles.len() == 4, "expected four attachments")?;
    let dual = status.attachments.iter().filter(|a| a.kind == AttachmentKind::DualHomed).count();
    ensure(dual == 2, "expected two dual-homed attachments")?;
    ensure(
        status.attachments.iter().all(|a| a.assigned_ip.octets()[2] == 47),
        "attachment outside tenant subnet",
    )?;

    harness.manager.destroy(&id).await.map_err(|err| err.to_string())?;
    let status = harness.manager.status(&id).await.map_err(|err| err.to_string())?;
    ensure(status.record.is_none() && status.attachments.is_empty(), "status not empty")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_subnets() -> TestResult {
    let harness = common::harness();
    let mut handles = Vec::new();
    for index in 0..12 {
        let manager = Arc::clone(&harness.manager);
        handles.push(tokio::spawn(async move {
            manager.create(&ProjectId::new(format!("tenant-{index}")).unwrap()).await
        }));
    }
    let mut subnets = BTreeSet::new();
    for handle in handles {
        let allocation = handle.await.map_err(|err| err.to_string())?.map_err(|err| err.to_string())?;
        subnets.insert(allocation.subnet);
    }
    ensure(subnets.len() == 12, "subnets overlapped")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_one_project_are_serialized() -> TestResult {
    let harness = common::harness();
    let id = project("project-374");
    let first = {
        let manager = Arc::clone(&harness.manager);
        let id = id.clone();
        tokio::spawn(async move { manager.create(&id).await })
    };
    let second = {
        let manager = Arc::clone(&harness.manager);
        let id = id.clone();
        tokio::spawn(async move { manager.create(&id).await })
    };
    let first = first.await.map_err(|err| err.to_string())?.map_err(|err| err.to_string())?;
    let second = second.await.map_err(|err| err.to_string())?.map_err(|err| err.to_string())?;
    ensure(first == second, "allocations diverged")?;
    let creates = harness
        .runtime
        .calls()
        .iter()
        .filter(|call| call.starts_with("create_network:"))
        .count();
    ensure(creates == 1, "network created twice")
}
