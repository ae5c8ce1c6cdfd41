// crates/tally-config/src/config.rs
// ============================================================================
// Module: Tally Plugin Configuration
// Description: Configuration loading and validation for plugin processes.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, serde_json, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits,
//! or parsed from the JSON invocation argument handed to the plugin by its
//! control process. Every section has defaults, so an empty document is a
//! valid native-transport daemon. An unrecognized transport selector fails at
//! parse time and never reaches the runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "tally-plugin.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TALLY_PLUGIN_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum invocation argument size in bytes.
pub(crate) const MAX_INVOCATION_ARG_BYTES: usize = 64 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum heartbeat tick in milliseconds.
pub(crate) const MAX_TICK_MS: u64 = 3_600_000;
/// Maximum number of missed ticks before timeout.
pub(crate) const MAX_DEADLINE_TICKS: u32 = 1_000;
/// Upper bound for frame and body limits in bytes.
pub(crate) const MAX_LIMIT_BYTES: usize = 64 * 1024 * 1024;

// ============================================================================
// SECTION: Plugin Config
// ============================================================================

/// Top-level plugin process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PluginConfig {
    /// Transport and lifecycle settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Heartbeat supervisor settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Log sink settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Transport size limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl PluginConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution order is `path`, then [`CONFIG_ENV_VAR`], then
    /// `tally-plugin.toml` in the working directory.
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

    /// Loads configuration like [`PluginConfig::load`], falling back to
    /// defaults when neither [`CONFIG_ENV_VAR`] nor the default file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a configured file fails to load.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        if env::var_os(CONFIG_ENV_VAR).is_none() && !Path::new(DEFAULT_CONFIG_NAME).exists() {
            return Ok(Self::default());
        }
        Self::load(None)
    }

    /// Parses and validates a TOML document.
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

    /// Parses and validates the JSON invocation argument.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the argument is oversized, malformed, or
    /// invalid.
    pub fn from_json_arg(arg: &str) -> Result<Self, ConfigError> {
        if arg.len() > MAX_INVOCATION_ARG_BYTES {
            return Err(ConfigError::Invalid("invocation argument exceeds size limit".to_string()));
        }
        let config: Self =
            serde_json::from_str(arg).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as a JSON invocation argument.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when serialization fails.
    pub fn to_json_arg(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heartbeat.validate()?;
        self.log.validate()?;
        self.limits.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// RPC transports a plugin can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RpcTransport {
    /// Length-framed binary RPC over raw TCP.
    #[default]
    Native,
    /// JSON-RPC 2.0 over HTTP `POST /rpc`.
    Json,
}

impl RpcTransport {
    /// Returns the stable label used in configs and handshakes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for RpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Transport served to the control process.
    #[serde(default)]
    pub transport: RpcTransport,
    /// Loopback port to bind; `0` selects an ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Block until shutdown when true; return after the handshake otherwise.
    #[serde(default = "default_daemon")]
    pub daemon: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transport: RpcTransport::Native,
            listen_port: 0,
            daemon: default_daemon(),
        }
    }
}

// ============================================================================
// SECTION: Heartbeat
// ============================================================================

/// Heartbeat supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    /// Supervisor tick interval in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Ticks without a reset before the plugin exits.
    #[serde(default = "default_deadline_ticks")]
    pub deadline_ticks: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            deadline_ticks: default_deadline_ticks(),
        }
    }
}

impl HeartbeatConfig {
    /// Returns the supervisor tick interval.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Returns the liveness deadline (`tick * deadline_ticks`).
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.tick_ms.saturating_mul(u64::from(self.deadline_ticks)))
    }

    /// Validates heartbeat timing.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 || self.tick_ms > MAX_TICK_MS {
            return Err(ConfigError::Invalid(format!(
                "heartbeat.tick_ms must be between 1 and {MAX_TICK_MS}"
            )));
        }
        if self.deadline_ticks == 0 || self.deadline_ticks > MAX_DEADLINE_TICKS {
            return Err(ConfigError::Invalid(format!(
                "heartbeat.deadline_ticks must be between 1 and {MAX_DEADLINE_TICKS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Destinations for plugin log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `log.path`.
    File,
    /// Discard events.
    None,
}

/// Log sink settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Selected sink.
    #[serde(default)]
    pub sink: LogSinkKind,
    /// Log file path (JSON lines), required for the file sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl LogConfig {
    /// Validates log configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("log.path", path)?;
        }
        if self.sink == LogSinkKind::File && self.path.is_none() {
            return Err(ConfigError::Invalid("file log sink requires log.path".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Transport size limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum native frame payload in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Maximum JSON-RPC request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl LimitsConfig {
    /// Validates transport limits.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_limit("limits.max_frame_bytes", self.max_frame_bytes)?;
        validate_limit("limits.max_body_bytes", self.max_body_bytes)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML or JSON parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
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

/// Validates the resolved path against length limits.
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

/// Validates a byte limit.
fn validate_limit(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_LIMIT_BYTES {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between 1 and {MAX_LIMIT_BYTES}"
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default daemon mode.
const fn default_daemon() -> bool {
    true
}

/// Default heartbeat tick in milliseconds.
const fn default_tick_ms() -> u64 {
    1_000
}

/// Default number of missed ticks before timeout.
const fn default_deadline_ticks() -> u32 {
    3
}

/// Default native frame limit in bytes.
const fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

/// Default JSON-RPC body limit in bytes.
const fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}
