// crates/tally-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Validation Tests
// Description: TOML loading, JSON invocation parsing, and validation limits.
// Purpose: Ensure plugin configuration is fail-closed and defaults are stable.
// ============================================================================

//! ## Overview
//! Loads plugin configuration from temp files and invocation arguments and
//! checks every validation limit.

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

use std::io::Write;
use std::time::Duration;

use tally_config::ConfigError;
use tally_config::LogSinkKind;
use tally_config::PluginConfig;
use tally_config::RpcTransport;

type TestResult = Result<(), String>;

/// Assert that a result is an error whose message contains `needle`.
fn assert_invalid(result: Result<PluginConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error '{message}' did not contain '{needle}'"))
            }
        }
        Ok(config) => Err(format!("expected invalid config, got {config:?}")),
    }
}

/// Writes `content` to a temp file and loads it.
fn load_toml(content: &[u8]) -> Result<PluginConfig, ConfigError> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    PluginConfig::load(Some(file.path()))
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

#[test]
fn empty_documents_yield_native_daemon_defaults() {
    let from_toml = PluginConfig::from_toml_str("").unwrap();
    let from_json = PluginConfig::from_json_arg("{}").unwrap();
    assert_eq!(from_toml, from_json);
    assert_eq!(from_toml, PluginConfig::default());

    assert_eq!(from_toml.runtime.transport, RpcTransport::Native);
    assert_eq!(from_toml.runtime.listen_port, 0);
    assert!(from_toml.runtime.daemon);
    assert_eq!(from_toml.heartbeat.tick(), Duration::from_secs(1));
    assert_eq!(from_toml.heartbeat.deadline(), Duration::from_secs(3));
    assert_eq!(from_toml.log.sink, LogSinkKind::Stderr);
    assert_eq!(from_toml.limits.max_frame_bytes, 4 * 1024 * 1024);
    assert_eq!(from_toml.limits.max_body_bytes, 4 * 1024 * 1024);
}

#[test]
fn full_toml_file_loads() {
    let config = load_toml(
        br#"
[runtime]
transport = "json"
listen_port = 8181
daemon = false

[heartbeat]
tick_ms = 250
deadline_ticks = 4

[log]
sink = "file"
path = "/var/log/tally/plugin.jsonl"

[limits]
max_frame_bytes = 65536
max_body_bytes = 131072
"#,
    )
    .unwrap();
    assert_eq!(config.runtime.transport, RpcTransport::Json);
    assert_eq!(config.runtime.listen_port, 8181);
    assert!(!config.runtime.daemon);
    assert_eq!(config.heartbeat.deadline(), Duration::from_secs(1));
    assert_eq!(config.log.sink, LogSinkKind::File);
    assert_eq!(config.log.path.as_deref(), Some("/var/log/tally/plugin.jsonl"));
    assert_eq!(config.limits.max_frame_bytes, 65_536);
    assert_eq!(config.limits.max_body_bytes, 131_072);
}

#[test]
fn invocation_argument_round_trips() {
    let mut config = PluginConfig::default();
    config.runtime.transport = RpcTransport::Json;
    config.runtime.daemon = false;
    config.heartbeat.tick_ms = 50;
    let arg = config.to_json_arg().unwrap();
    assert!(arg.contains(r#""transport":"json""#), "{arg}");
    assert_eq!(PluginConfig::from_json_arg(&arg).unwrap(), config);
}

// ============================================================================
// SECTION: Transport Selection
// ============================================================================

#[test]
fn unsupported_transport_is_a_parse_error() -> TestResult {
    assert_invalid(
        PluginConfig::from_toml_str("[runtime]\ntransport = \"grpc\"\n"),
        "unknown variant `grpc`",
    )?;
    assert_invalid(
        PluginConfig::from_json_arg(r#"{"runtime": {"transport": "grpc"}}"#),
        "unknown variant `grpc`",
    )
}

#[test]
fn transport_labels_are_stable() {
    assert_eq!(RpcTransport::Native.to_string(), "native");
    assert_eq!(RpcTransport::Json.as_str(), "json");
}

// ============================================================================
// SECTION: Validation Limits
// ============================================================================

#[test]
fn zero_heartbeat_values_are_rejected() -> TestResult {
    assert_invalid(PluginConfig::from_toml_str("[heartbeat]\ntick_ms = 0\n"), "tick_ms")?;
    assert_invalid(
        PluginConfig::from_toml_str("[heartbeat]\ndeadline_ticks = 0\n"),
        "deadline_ticks",
    )?;
    assert_invalid(
        PluginConfig::from_toml_str("[heartbeat]\ntick_ms = 3600001\n"),
        "tick_ms must be between 1 and 3600000",
    )
}

#[test]
fn zero_and_oversized_limits_are_rejected() -> TestResult {
    assert_invalid(
        PluginConfig::from_toml_str("[limits]\nmax_frame_bytes = 0\n"),
        "limits.max_frame_bytes",
    )?;
    assert_invalid(
        PluginConfig::from_toml_str("[limits]\nmax_body_bytes = 67108865\n"),
        "limits.max_body_bytes",
    )
}

#[test]
fn file_sink_requires_a_non_empty_path() -> TestResult {
    assert_invalid(
        PluginConfig::from_toml_str("[log]\nsink = \"file\"\n"),
        "file log sink requires log.path",
    )?;
    assert_invalid(
        PluginConfig::from_toml_str("[log]\nsink = \"file\"\npath = \"  \"\n"),
        "log.path must be non-empty",
    )?;
    let config = PluginConfig::from_toml_str("[log]\nsink = \"none\"\n").unwrap();
    assert_eq!(config.log.sink, LogSinkKind::None);
    Ok(())
}

// ============================================================================
// SECTION: Loading
// ============================================================================

#[test]
fn oversized_config_file_is_rejected() -> TestResult {
    let mut content = b"# padding\n".to_vec();
    content.resize(1024 * 1024 + 1, b'#');
    assert_invalid(load_toml(&content), "config file exceeds size limit")
}

#[test]
fn non_utf8_config_file_is_rejected() -> TestResult {
    assert_invalid(load_toml(&[0xff, 0xfe, 0x00]), "config file must be utf-8")
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PluginConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)), "{err:?}");
}

#[test]
fn absent_default_file_falls_back_to_defaults() {
    if std::env::var_os(tally_config::CONFIG_ENV_VAR).is_some() {
        return;
    }
    assert_eq!(PluginConfig::load_or_default().unwrap(), PluginConfig::default());
}

#[test]
fn oversized_invocation_argument_is_rejected() -> TestResult {
    let arg = format!("{{\"pad\": \"{}\"}}", "x".repeat(64 * 1024));
    assert_invalid(PluginConfig::from_json_arg(&arg), "invocation argument exceeds size limit")
}
