//! HTTP invocation tests for deskrelay-gateway.
// crates/deskrelay-gateway/tests/invoke.rs
// =============================================================================
// Module: Gateway Invocation Tests
// Description: Authentication, direct tools, envelopes, ledger, and ceilings.
// Purpose: Verify the gateway contract over real HTTP.
// =============================================================================

#![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

use std::sync::Arc;
use std::time::Instant;

use deskrelay_core::AllocationRecord;
use deskrelay_core::AllocationStore;
use deskrelay_core::ExecutionEnvelope;
use deskrelay_core::InMemoryAllocationStore;
use deskrelay_core::NetworkAllocation;
use deskrelay_core::Point;
use deskrelay_core::PrimitiveCommand;
use deskrelay_core::ProjectId;
use deskrelay_core::SharedAllocationStore;
use deskrelay_core::envelope::open;
use deskrelay_gateway::FixedJitter;
use serde_json::Value;
use serde_json::json;

mod common;

use common::TOKEN;

fn envelope_of(body: &Value) -> ExecutionEnvelope {
    assert_eq!(body["kind"], "envelope", "unexpected body {body}");
    serde_json::from_value(body["envelope"].clone()).unwrap()
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let harness = common::spawn().await;
    let response = harness.client.get(format!("{}/health", harness.base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_wrong_token_is_rejected_generically() {
    let harness = common::spawn().await;
    let body = json!({"project_id": "p1", "tool": "wait", "arguments": {"milliseconds": 1}});
    let (status, missing) = harness.invoke(None, &body).await;
    assert_eq!(status, 401);
    assert_eq!(missing["error_kind"], "unauthenticated");
    assert_eq!(missing["error"], "request rejected");

    let (status, wrong) = harness.invoke(Some("not-the-token"), &body).await;
    assert_eq!(status, 401);
    assert_eq!(wrong["error"], "request rejected");
}

#[tokio::test]
async fn malformed_body_hides_parser_from_strangers() {
    let harness = common::spawn().await;
    let send = |token: Option<&'static str>| {
        let mut request = harness
            .client
            .post(format!("{}/v1/invoke", harness.base))
            .header("content-type", "application/json")
            .body("{not json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send()
    };
    assert_eq!(send(None).await.unwrap().status().as_u16(), 401);
    assert_eq!(send(Some(TOKEN)).await.unwrap().status().as_u16(), 400);
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let harness = common::spawn().await;
    let body = json!({"project_id": "p1", "tool": "format_disk", "arguments": {}});
    let (status, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(status, 404);
    assert_eq!(response["error_kind"], "unknown_tool");
}

#[tokio::test]
async fn wait_runs_server_side() {
    let harness = common::spawn().await;
    let body = json!({"project_id": "p1", "tool": "wait", "arguments": {"milliseconds": 30}});
    let started = Instant::now();
    let (status, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(status, 200);
    assert_eq!(response["kind"], "result");
    assert_eq!(response["result"]["waited_ms"], 30);
    assert!(started.elapsed().as_millis() >= 30);
    assert!(harness.audit.event_names().contains(&"invocation_finished"));
}

#[tokio::test]
async fn direct_work_past_the_ceiling_times_out() {
    let harness = common::spawn_with(common::settings(50, 8), |gateway| gateway).await;
    let body = json!({"project_id": "p1", "tool": "wait", "arguments": {"milliseconds": 5_000}});
    let started = Instant::now();
    let (status, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(status, 504);
    assert_eq!(response["error_kind"], "timed_out");
    assert!(started.elapsed().as_millis() < 2_000);
}

#[tokio::test]
async fn describe_sandbox_reports_logical_contract() {
    let store = SharedAllocationStore::from_store(InMemoryAllocationStore::new());
    let project = ProjectId::new("project-374").unwrap();
    let record = AllocationRecord::provisioning(NetworkAllocation::for_offset(project, 47), 1_000);
    store.save(&record).unwrap();
    let harness =
        common::spawn_with(common::settings(300_000, 8), |gateway| gateway.with_store(store)).await;

    let body = json!({"project_id": "project-374", "tool": "describe_sandbox"});
    let (status, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(status, 200);
    let result = &response["result"];
    let services = result["services"].as_array().unwrap();
    let storage = services.iter().find(|s| s["role"] == "shared_storage").unwrap();
    assert_eq!(storage["logical_address"], "172.30.0.20");
    assert_eq!(storage["hostname"], "shared-storage");
    assert_eq!(result["allocation"]["subnet"], "172.30.47.0/24");
}

#[tokio::test]
async fn primitive_tools_return_only_ciphertext() {
    let harness = common::spawn().await;
    let body = json!({
        "invocation_id": "inv-1",
        "project_id": "p1",
        "tool": "press_key",
        "arguments": {"key": "Control+C"}
    });
    let (status, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(status, 200);
    let text = response.to_string();
    assert!(!text.contains("ctrl"), "decision output leaked: {text}");

    let envelope = envelope_of(&response);
    assert_eq!(envelope.target.project_id.as_str(), "p1");
    assert_eq!(envelope.invocation_id.as_str(), "inv-1");
    let command = open(&common::key(), &envelope).unwrap();
    assert_eq!(
        command,
        PrimitiveCommand::KeyPress {
            keys: vec!["ctrl".to_string(), "c".to_string()],
        }
    );
}

#[tokio::test]
async fn shell_envelope_carries_clamped_timeout() {
    let harness = common::spawn().await;
    let body = json!({"project_id": "p1", "tool": "run_command", "arguments": {"command": "echo hi"}});
    let (_, response) = harness.invoke(Some(TOKEN), &body).await;
    let envelope = envelope_of(&response);
    assert_eq!(envelope.timeout_ms, 30_000);
    assert_eq!(envelope.expires_at_ms(), envelope.issued_at_ms + 30_000);
}

#[tokio::test]
async fn live_invocation_id_cannot_be_reissued() {
    let harness = common::spawn().await;
    let body = json!({
        "invocation_id": "dup-1",
        "project_id": "p1",
        "tool": "get_mouse_position"
    });
    let (first, _) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(first, 200);
    let (second, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(second, 400);
    assert_eq!(response["error_kind"], "invalid_request");
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_sealing() {
    let harness = common::spawn().await;
    let body = json!({"project_id": "p1", "tool": "click", "arguments": {"x": 10}});
    let (status, response) = harness.invoke(Some(TOKEN), &body).await;
    assert_eq!(status, 400);
    assert_eq!(response["error_kind"], "invalid_request");
    assert!(!harness.audit.event_names().contains(&"envelope_issued"));
}

#[tokio::test]
async fn pointer_paths_continue_from_last_issued_position() {
    let harness = common::spawn_with(common::settings(300_000, 8), |gateway| {
        gateway.with_jitter(Arc::new(FixedJitter(0.5)))
    })
    .await;
    let first = json!({"project_id": "p1", "tool": "move_mouse", "arguments": {"x": 100, "y": 100}});
    let (_, response) = harness.invoke(Some(TOKEN), &first).await;
    let PrimitiveCommand::PointerMove {
        path, ..
    } = open(&common::key(), &envelope_of(&response)).unwrap()
    else {
        unreachable!("move_mouse seals a pointer move");
    };
    assert_eq!(path, vec![Point::new(100, 100)]);

    let second = json!({"project_id": "p1", "tool": "click", "arguments": {"x": 300, "y": 100}});
    let (_, response) = harness.invoke(Some(TOKEN), &second).await;
    let PrimitiveCommand::Click {
        approach,
        step_delay_ms,
        ..
    } = open(&common::key(), &envelope_of(&response)).unwrap()
    else {
        unreachable!("click seals a click");
    };
    assert_eq!(approach.len(), 20);
    assert_eq!(approach[0], Point::new(110, 100));
    assert_eq!(approach.last().copied(), Some(Point::new(300, 100)));
    assert_eq!(step_delay_ms, 15);

    let other = json!({"project_id": "p2", "tool": "move_mouse", "arguments": {"x": 5, "y": 5}});
    let (_, response) = harness.invoke(Some(TOKEN), &other).await;
    let PrimitiveCommand::PointerMove {
        path, ..
    } = open(&common::key(), &envelope_of(&response)).unwrap()
    else {
        unreachable!("move_mouse seals a pointer move");
    };
    assert_eq!(path.len(), 1, "pointer memory is per project");
}
