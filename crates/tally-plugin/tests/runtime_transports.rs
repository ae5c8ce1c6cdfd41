// crates/tally-plugin/tests/runtime_transports.rs
// ============================================================================
// Module: Runtime Transport Tests
// Description: End-to-end plugin calls over the native and JSON-RPC transports.
// Purpose: Exercise handshake, authentication, policy application, panic
//          isolation, size limits, and the daemon lifecycle on real sockets.
// ============================================================================

//! ## Overview
//! Each test starts a demo plugin runtime on loopback, connects through the
//! handshake it writes, and drives it the way a control process would.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::time::Duration;

use tally_config::RpcTransport;
use tally_plugin::ClientError;
use tally_plugin::MetricData;
use tally_plugin::PluginClient;
use tally_plugin::PluginExitCode;
use tally_plugin::PluginMetricType;
use tally_plugin::PluginType;
use tally_plugin::RpcError;
use tally_plugin::RpcMethod;
use tally_plugin::RpcRequest;
use tally_plugin::native::decode_response;
use tally_plugin::native::encode_request;
use tally_plugin::native::read_frame;
use tally_plugin::native::write_frame;
use tally_policy::ConfigMap;
use tally_policy::ConfigValue;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::common::COLLECTED_AT_MS;
use crate::common::daemon_config;
use crate::common::start_collector;
use crate::common::start_processor;

/// Upper bound on how long a runtime may take to exit after a kill.
const EXIT_WAIT: Duration = Duration::from_secs(5);

/// Collects both demo metrics through the fetched policy tree.
async fn collect_through_policy(client: &PluginClient) -> Vec<PluginMetricType> {
    let tree = client.get_config_policy_tree().await.unwrap();
    let metrics = client.get_metric_types().await.unwrap();
    assert_eq!(metrics.len(), 2);
    client.collect_metrics_with_policy(&tree, metrics).await.unwrap()
}

/// Asserts the collected values match the `interval` tree defaults.
fn assert_interval_defaults(collected: &[PluginMetricType]) {
    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0].namespace_key(), "intel/cpu/load");
    assert_eq!(collected[0].data, Some(MetricData::Int(5)));
    assert_eq!(collected[0].source.as_deref(), Some("demo-host"));
    assert_eq!(collected[0].timestamp_ms, Some(COLLECTED_AT_MS));
    assert_eq!(collected[1].namespace_key(), "intel/mem/free");
    assert_eq!(collected[1].data, Some(MetricData::Int(1)));
    let config = collected[1].config.as_ref().unwrap();
    assert_eq!(config.get("interval"), Some(&ConfigValue::Int(1)));
}

// ============================================================================
// SECTION: Collector End-to-End
// ============================================================================

#[tokio::test]
async fn native_collector_serves_policy_and_metrics() {
    let harness = start_collector(daemon_config(RpcTransport::Native)).await;
    assert_eq!(harness.handshake.rpc_transport, RpcTransport::Native);
    assert_eq!(harness.client.plugin_type(), PluginType::Collector);
    assert_interval_defaults(&collect_through_policy(&harness.client).await);

    harness.client.kill("test complete").await.unwrap();
    let code = tokio::time::timeout(EXIT_WAIT, harness.runtime).await.unwrap().unwrap();
    assert_eq!(code.unwrap(), PluginExitCode::Clean);
    assert_eq!(harness.logs.events_named("listening").len(), 1);
}

#[tokio::test]
async fn json_collector_serves_policy_and_metrics() {
    let harness = start_collector(daemon_config(RpcTransport::Json)).await;
    assert_eq!(harness.handshake.rpc_transport, RpcTransport::Json);
    assert_interval_defaults(&collect_through_policy(&harness.client).await);

    harness.client.kill("test complete").await.unwrap();
    let code = tokio::time::timeout(EXIT_WAIT, harness.runtime).await.unwrap().unwrap();
    assert_eq!(code.unwrap(), PluginExitCode::Clean);
}

#[tokio::test]
async fn out_of_range_config_is_rejected_before_collection() {
    let harness = start_collector(daemon_config(RpcTransport::Native)).await;
    let tree = harness.client.get_config_policy_tree().await.unwrap();
    let mut config = ConfigMap::new();
    config.insert("interval".to_string(), ConfigValue::Int(120));
    let metric = PluginMetricType::new(["intel", "cpu", "load"], 1).with_config(config);
    let err = harness.client.collect_metrics_with_policy(&tree, vec![metric]).await.unwrap_err();
    assert!(
        matches!(&err, ClientError::Policy { namespace, .. } if namespace == "intel/cpu/load"),
        "{err:?}"
    );
    assert!(harness.logs.events_named("rpc_call").iter().all(|event| {
        event.method.as_deref() != Some(RpcMethod::CollectMetrics.as_str())
    }));
}

// ============================================================================
// SECTION: Processor End-to-End
// ============================================================================

#[tokio::test]
async fn processor_applies_node_defaults_on_both_transports() {
    for transport in [RpcTransport::Native, RpcTransport::Json] {
        let harness = start_processor(daemon_config(transport)).await;
        assert_eq!(harness.client.plugin_type(), PluginType::Processor);
        let node = harness.client.get_config_policy_node().await.unwrap();
        let (content_type, content) = harness
            .client
            .process_with_policy(&node, "text/plain", b"load=0.5".to_vec(), ConfigMap::new())
            .await
            .unwrap();
        assert_eq!(content_type, "text/plain");
        assert_eq!(content, b"LOAD=0.5!");

        let err = harness
            .client
            .process("text/plain", b"raw".to_vec(), ConfigMap::new())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, ClientError::Rpc(RpcError::Call(message))
                if message == "Process call error: invalid config: suffix missing"),
            "{err:?}"
        );
        harness.client.kill("done").await.unwrap();
    }
}

#[tokio::test]
async fn collector_methods_are_not_served_by_a_processor() {
    let harness = start_processor(daemon_config(RpcTransport::Json)).await;
    let err = harness.client.get_metric_types().await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(RpcError::MethodNotFound(_))), "{err:?}");
}

// ============================================================================
// SECTION: Failure Isolation
// ============================================================================

#[tokio::test]
async fn plugin_panic_becomes_an_error_and_serving_continues() {
    for transport in [RpcTransport::Native, RpcTransport::Json] {
        let harness = start_collector(daemon_config(transport)).await;
        let err = harness
            .client
            .collect_metrics(vec![PluginMetricType::new(["intel", "panic"], 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rpc(RpcError::Panic(_))), "{err:?}");
        assert_eq!(harness.logs.events_named("plugin_panic").len(), 1);

        harness.client.ping().await.unwrap();
        let collected = harness
            .client
            .collect_metrics(vec![PluginMetricType::new(["intel", "cpu", "load"], 1)])
            .await
            .unwrap();
        assert_eq!(collected.len(), 1);
        assert!(!harness.runtime.is_finished());
        harness.client.kill("done").await.unwrap();
    }
}

#[tokio::test]
async fn plugin_error_names_the_failed_operation() {
    let harness = start_collector(daemon_config(RpcTransport::Native)).await;
    let err = harness
        .client
        .collect_metrics(vec![PluginMetricType::new(["intel", "fail"], 1)])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "CollectMetrics call error: sensor offline");
}

// ============================================================================
// SECTION: Authentication
// ============================================================================

#[tokio::test]
async fn native_connection_must_authenticate_first() {
    let harness = start_collector(daemon_config(RpcTransport::Native)).await;
    let address = harness.handshake.listen_address.unwrap();
    let mut stream = TcpStream::connect(address).await.unwrap();
    let payload = encode_request(1, &RpcRequest::GetMetricTypes);
    write_frame(&mut stream, &payload, 1024).await.unwrap();
    let response = read_frame(&mut stream, 1024).await.unwrap().unwrap();
    let (id, outcome) = decode_response(RpcMethod::GetMetricTypes, response).unwrap();
    assert_eq!(id, 1);
    assert!(matches!(outcome, Err(RpcError::Unauthenticated(_))));
    assert!(read_frame(&mut stream, 1024).await.unwrap().is_none());
}

#[tokio::test]
async fn wrong_token_is_rejected_on_both_transports() {
    for transport in [RpcTransport::Native, RpcTransport::Json] {
        let harness = start_collector(daemon_config(transport)).await;
        let mut forged = harness.handshake.clone();
        forged.token = "not-the-session-token".to_string();
        let outcome = match PluginClient::connect(&forged).await {
            Ok(client) => client.ping().await,
            Err(err) => Err(err),
        };
        assert!(
            matches!(outcome, Err(ClientError::Rpc(RpcError::Unauthenticated(_)))),
            "{outcome:?}"
        );
        assert!(!harness.logs.events_named("auth_rejected").is_empty());
    }
}

#[tokio::test]
async fn json_rejects_missing_bearer_with_401() {
    let harness = start_collector(daemon_config(RpcTransport::Json)).await;
    let address = harness.handshake.listen_address.unwrap();
    let response = reqwest::Client::new()
        .post(format!("http://{address}/rpc"))
        .header("content-type", "application/json")
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"SessionState.Ping"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["error"]["code"], -32001);
}

// ============================================================================
// SECTION: Size Limits
// ============================================================================

#[tokio::test]
async fn json_body_over_limit_is_rejected_with_413() {
    let mut config = daemon_config(RpcTransport::Json);
    config.limits.max_body_bytes = 1024;
    let harness = start_collector(config).await;
    let address = harness.handshake.listen_address.unwrap();
    let response = reqwest::Client::new()
        .post(format!("http://{address}/rpc"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", harness.handshake.token))
        .body(vec![b' '; 2048])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);
}

#[tokio::test]
async fn native_frame_over_limit_closes_the_connection() {
    let mut config = daemon_config(RpcTransport::Native);
    config.limits.max_frame_bytes = 1024;
    let harness = start_collector(config).await;
    let address = harness.handshake.listen_address.unwrap();
    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_u32(4096).await.unwrap();
    stream.flush().await.unwrap();
    let closed = read_frame(&mut stream, 1024).await;
    assert!(matches!(closed, Ok(None) | Err(_)), "{closed:?}");
    assert!(harness.client.ping().await.is_ok());
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[tokio::test]
async fn silent_control_process_triggers_heartbeat_timeout() {
    let mut config = daemon_config(RpcTransport::Native);
    config.heartbeat.tick_ms = 20;
    config.heartbeat.deadline_ticks = 10;
    let harness = start_collector(config).await;
    let code = tokio::time::timeout(EXIT_WAIT, harness.runtime).await.unwrap().unwrap();
    assert_eq!(code.unwrap(), PluginExitCode::HeartbeatTimeout);
    assert_eq!(harness.logs.events_named("heartbeat_timeout").len(), 1);
}

#[tokio::test]
async fn one_shot_runtime_returns_while_serving_continues() {
    let mut config = daemon_config(RpcTransport::Json);
    config.runtime.daemon = false;
    let harness = start_collector(config).await;
    let code = tokio::time::timeout(EXIT_WAIT, harness.runtime).await.unwrap().unwrap();
    assert_eq!(code.unwrap(), PluginExitCode::Clean);
    assert_eq!(harness.client.get_metric_types().await.unwrap().len(), 2);
}
