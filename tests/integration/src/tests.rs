//! Integration tests for the Toolhost Server
//!
//! Every test starts its own in-process server backed by fake tool scripts.
#![cfg(unix)]

use std::time::Duration;

use futures_util::SinkExt;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use integration_tests::*;

const SESSION_TIMEOUT: Duration = Duration::from_secs(20);

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
async fn test_health_ready_with_verified_tools() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .expect("Failed to send health request");
    assert!(response.status().is_success());

    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "Ready");
    assert_eq!(health["dependenciesReady"], true);
}

#[tokio::test]
async fn test_health_reports_checksum_mismatch() {
    let server = TestServer::start_with(|config| {
        config
            .tool_checksums
            .insert("retoc".to_string(), "00".repeat(32));
    })
    .await
    .unwrap();

    let health: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "Error");
    assert!(health["message"].as_str().unwrap().contains("retoc"));
}

// ============================================================================
// Batch Tests
// ============================================================================

#[tokio::test]
async fn test_batch_info_succeeds() {
    let server = TestServer::start().await.unwrap();

    let response = server
        .client
        .post(server.url("/api/retoc/info"))
        .json(&json!({ "inputPath": "/abs/in.utoc" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], 1);
    assert_eq!(body["result"]["stdout"], "info ok\n");
    assert!(body["completedAt"].is_string());

    let operation_id = body["operationId"].as_str().unwrap();
    let stored: Value = server
        .client
        .get(server.url(&format!("/api/operations/{}", operation_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored["status"], 1);
}

#[tokio::test]
async fn test_batch_tool_failure_carries_output() {
    let server = TestServer::start().await.unwrap();

    let response = server
        .client
        .post(server.url("/api/retoc/verify"))
        .json(&json!({ "inputPath": "/abs/in.utoc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], 2);
    assert_eq!(body["error"]["code"], "TOOL_EXECUTION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("bad container"));
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn test_batch_rejects_unlisted_extra_args() {
    let server = TestServer::start().await.unwrap();

    let response = server
        .client
        .post(server.url("/api/retoc/info"))
        .json(&json!({
            "inputPath": "/abs/in.utoc",
            "additionalArgs": ["--flag; rm -rf /"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("AdditionalArgs"));
    assert!(message.contains("--flag; rm -rf /"));
}

#[tokio::test]
async fn test_missing_serializer_is_dependency_missing() {
    let server = TestServer::start().await.unwrap();

    let body: Value = server
        .client
        .post(server.url("/api/uasset/tojson"))
        .json(&json!({
            "inputPath": "/abs/a.uasset",
            "outputPath": "/abs/a.json",
            "engineVersion": "UE5_4",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"]["code"], "DEPENDENCY_MISSING");
    assert!(body["error"]["remediationHint"].is_string());
}

#[tokio::test]
async fn test_build_command_matches_builder() {
    let server = TestServer::start().await.unwrap();

    let preview: Value = server
        .client
        .post(server.url("/api/retoc/build-command"))
        .json(&json!({
            "commandType": "ToZen",
            "inputPath": "/abs/in",
            "outputPath": "/abs/out.utoc",
            "engineVersion": "UE5_4",
            "includeFilters": ["Content/*"],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let arguments: Vec<String> = serde_json::from_value(preview["arguments"].clone()).unwrap();
    assert_eq!(
        arguments,
        vec![
            "to-zen",
            "/abs/in",
            "/abs/out.utoc",
            "--version",
            "UE5_4",
            "--compression",
            "Oodle",
            "--filter",
            "Content/*",
        ]
    );
    assert!(preview["commandLine"]
        .as_str()
        .unwrap()
        .contains("\"/abs/out.utoc\""));
}

// ============================================================================
// Streaming Tests
// ============================================================================

#[tokio::test]
async fn test_stream_info_end_to_end() {
    let server = TestServer::start().await.unwrap();
    let mut ws = server
        .open_stream(json!({
            "commandType": "Info",
            "inputPath": "/abs/in.utoc",
            "outputPath": "/abs/out",
        }))
        .await
        .unwrap();

    let events = timeout(SESSION_TIMEOUT, collect_events(&mut ws))
        .await
        .expect("session did not finish")
        .unwrap();

    assert_eq!(events.first().map(|e| e.kind.as_str()), Some("started"));
    let command_line = events[0].command_line.as_deref().unwrap();
    // The requested "Info" is rendered as the converter's own verb.
    let verb = command_line.split_whitespace().nth(1).unwrap();
    assert!(verb.eq_ignore_ascii_case("Info"));
    assert_eq!(verb, "info");
    assert!(events[0].operation_id.is_some());

    assert!(output_text(&events).contains("info ok"));
    assert!(events[1..events.len() - 1].iter().all(|e| e.kind == "output"));

    let last = events.last().unwrap();
    assert_eq!(last.kind, "exited");
    assert_eq!(last.exit_code, Some(0));
    assert!(last.duration.is_some());
}

#[tokio::test]
async fn test_stream_validation_error_is_alone() {
    let server = TestServer::start().await.unwrap();
    let mut ws = server
        .open_stream(json!({ "commandType": "Info", "inputPath": "relative/in.utoc" }))
        .await
        .unwrap();

    let events = timeout(SESSION_TIMEOUT, collect_events(&mut ws))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "error");
    assert_eq!(events[0].code.as_deref(), Some("VALIDATION_ERROR"));
}

#[tokio::test]
async fn test_stream_tty_probe_sees_a_terminal() {
    let server = TestServer::start().await.unwrap();
    let mut ws = server.open_stream(json!({ "ttyProbe": true })).await.unwrap();

    let events = timeout(SESSION_TIMEOUT, collect_events(&mut ws))
        .await
        .unwrap()
        .unwrap();
    assert!(output_text(&events).contains("tty: yes"));
    assert_eq!(events.last().unwrap().kind, "exited");
}

#[tokio::test]
async fn test_stream_cancel_request() {
    let server = TestServer::start().await.unwrap();
    let mut ws = server
        .open_stream(json!({ "commandType": "List", "inputPath": "/abs/in.utoc" }))
        .await
        .unwrap();

    // Wait for the session to start, then cancel it.
    let started = timeout(SESSION_TIMEOUT, async {
        use futures_util::StreamExt;
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(text) = frame {
                let event: WireEvent = serde_json::from_str(&text).unwrap();
                if event.kind == "started" {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(started);

    ws.send(Message::text(json!({ "type": "cancel" }).to_string()))
        .await
        .unwrap();

    let events = timeout(SESSION_TIMEOUT, collect_events(&mut ws))
        .await
        .expect("cancel did not end the session")
        .unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.kind, "error");
    assert_eq!(last.code.as_deref(), Some("OPERATION_CANCELLED"));
}
