// crates/tally-plugin/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Demo plugins and a runtime harness for integration tests.
// Purpose: Start real plugin runtimes on loopback and connect clients to them.
// Dependencies: tally-config, tally-plugin, tally-policy, tokio
// ============================================================================

//! ## Overview
//! [`DemoCollector`] and [`DemoProcessor`] are small but complete plugins.
//! [`start_collector`] and [`start_processor`] run them on a spawned task,
//! read the handshake line from an in-memory stdout, and return a connected
//! [`PluginClient`] together with the runtime's join handle.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tally_config::PluginConfig;
use tally_config::RpcTransport;
use tally_plugin::CollectorPlugin;
use tally_plugin::Handshake;
use tally_plugin::MemoryLogSink;
use tally_plugin::MetricData;
use tally_plugin::PluginClient;
use tally_plugin::PluginError;
use tally_plugin::PluginExitCode;
use tally_plugin::PluginMeta;
use tally_plugin::PluginMetricType;
use tally_plugin::PluginRuntime;
use tally_plugin::ProcessorPlugin;
use tally_plugin::RuntimeError;
use tally_policy::ConfigMap;
use tally_policy::ConfigPolicyNode;
use tally_policy::ConfigPolicyTree;
use tally_policy::ConfigValue;
use tally_policy::IntegerRule;
use tally_policy::StringRule;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::task::JoinHandle;

// ============================================================================
// SECTION: Demo Plugins
// ============================================================================

/// Fixed collection timestamp.
pub const COLLECTED_AT_MS: u64 = 1_700_000_000_000;

/// Collector exposing `intel/cpu/load` and `intel/mem/free`.
///
/// Collecting a metric whose last segment is `panic` panics; `fail` returns
/// an error.
pub struct DemoCollector;

impl CollectorPlugin for DemoCollector {
    fn collect_metrics(
        &self,
        metrics: &[PluginMetricType],
    ) -> Result<Vec<PluginMetricType>, PluginError> {
        metrics
            .iter()
            .map(|metric| {
                match metric.namespace.last().map(String::as_str) {
                    Some("panic") => panic!("demo collector panic"),
                    Some("fail") => return Err(PluginError::Failed("sensor offline".to_string())),
                    _ => {}
                }
                let interval = match metric.config.as_ref().and_then(|c| c.get("interval")) {
                    Some(ConfigValue::Int(value)) => *value,
                    _ => 0,
                };
                Ok(metric.clone().with_data(MetricData::Int(interval), "demo-host", COLLECTED_AT_MS))
            })
            .collect()
    }

    fn get_metric_types(&self) -> Result<Vec<PluginMetricType>, PluginError> {
        Ok(vec![
            PluginMetricType::new(["intel", "cpu", "load"], 1),
            PluginMetricType::new(["intel", "mem", "free"], 1),
        ])
    }

    fn get_config_policy_tree(&self) -> Result<ConfigPolicyTree, PluginError> {
        Ok(interval_tree())
    }
}

/// Processor that upper-cases content and appends the `suffix` config value.
pub struct DemoProcessor;

impl ProcessorPlugin for DemoProcessor {
    fn process(
        &self,
        content_type: &str,
        content: &[u8],
        config: &ConfigMap,
    ) -> Result<(String, Vec<u8>), PluginError> {
        let suffix = match config.get("suffix") {
            Some(ConfigValue::Str(value)) => value.clone(),
            _ => return Err(PluginError::InvalidConfig("suffix missing".to_string())),
        };
        let mut output = content.to_ascii_uppercase();
        output.extend_from_slice(suffix.as_bytes());
        Ok((content_type.to_string(), output))
    }

    fn get_config_policy_node(&self) -> ConfigPolicyNode {
        ConfigPolicyNode::with_rules([
            StringRule::new("suffix", false, Some("!".to_string())).unwrap().into()
        ])
    }
}

/// Required `interval` rule bounded to 1..=60.
pub fn interval_rule(default: i64) -> IntegerRule {
    let mut rule = IntegerRule::new("interval", true, Some(default)).unwrap();
    rule.set_minimum(1);
    rule.set_maximum(60);
    rule
}

/// Tree with a root interval default of 1 and an `intel/cpu` default of 5.
pub fn interval_tree() -> ConfigPolicyTree {
    let tree = ConfigPolicyTree::new();
    let root: [&str; 0] = [];
    tree.add_policy_node(&root, ConfigPolicyNode::with_rules([interval_rule(1).into()])).unwrap();
    tree.add_policy_node(
        &["intel", "cpu"],
        ConfigPolicyNode::with_rules([interval_rule(5).into()]),
    )
    .unwrap();
    tree
}

// ============================================================================
// SECTION: Runtime Harness
// ============================================================================

/// Running plugin under test.
pub struct Harness {
    /// Client connected through the handshake.
    pub client: PluginClient,
    /// Parsed handshake line.
    pub handshake: Handshake,
    /// Log events recorded by the plugin.
    pub logs: Arc<MemoryLogSink>,
    /// Runtime task; resolves when the plugin shuts down.
    pub runtime: JoinHandle<Result<PluginExitCode, RuntimeError>>,
}

/// Daemon config for `transport` with a generous heartbeat deadline.
pub fn daemon_config(transport: RpcTransport) -> PluginConfig {
    let mut config = PluginConfig::default();
    config.runtime.transport = transport;
    config.heartbeat.tick_ms = 50;
    config.heartbeat.deadline_ticks = 200;
    config
}

/// Starts [`DemoCollector`] and connects a client.
pub async fn start_collector(config: PluginConfig) -> Harness {
    let logs = Arc::new(MemoryLogSink::new());
    let runtime = PluginRuntime::new(PluginMeta::new("demo-collector", 1), config)
        .unwrap()
        .with_logger(logs.clone());
    let (writer, reader) = tokio::io::duplex(4096);
    let task = tokio::spawn(async move {
        let mut writer = writer;
        runtime.start_collector(DemoCollector, &mut writer).await
    });
    connect(reader, logs, task).await
}

/// Starts [`DemoProcessor`] and connects a client.
pub async fn start_processor(config: PluginConfig) -> Harness {
    let logs = Arc::new(MemoryLogSink::new());
    let runtime = PluginRuntime::new(PluginMeta::new("demo-processor", 1), config)
        .unwrap()
        .with_logger(logs.clone());
    let (writer, reader) = tokio::io::duplex(4096);
    let task = tokio::spawn(async move {
        let mut writer = writer;
        runtime.start_processor(DemoProcessor, &mut writer).await
    });
    connect(reader, logs, task).await
}

/// Reads the handshake line and connects a client.
async fn connect(
    reader: tokio::io::DuplexStream,
    logs: Arc<MemoryLogSink>,
    runtime: JoinHandle<Result<PluginExitCode, RuntimeError>>,
) -> Harness {
    let handshake = read_handshake(reader).await;
    let client = PluginClient::connect(&handshake).await.unwrap();
    Harness {
        client,
        handshake,
        logs,
        runtime,
    }
}

/// Reads exactly one handshake line from the plugin's stdout.
pub async fn read_handshake(reader: tokio::io::DuplexStream) -> Handshake {
    let mut lines = BufReader::new(reader).lines();
    let line = lines.next_line().await.unwrap().expect("handshake line");
    Handshake::parse(&line).unwrap()
}
