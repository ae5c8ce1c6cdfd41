// crates/tally-plugin/src/plugin.rs
// ============================================================================
// Module: Plugin Capabilities
// Description: Collector and processor traits implemented by plugin authors.
// Purpose: Define the capability surface the proxy layer exposes over RPC.
// Dependencies: serde, tally-policy, thiserror
// ============================================================================

//! ## Overview
//! Plugin authors implement [`CollectorPlugin`] or [`ProcessorPlugin`] with
//! plain synchronous methods. The runtime calls them on blocking workers, so
//! implementations may do blocking I/O, and wraps every call in panic
//! isolation so a faulty call never takes the process down.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use tally_policy::ConfigMap;
use tally_policy::ConfigPolicyNode;
use tally_policy::ConfigPolicyTree;
use thiserror::Error;

use crate::metric::PluginMetricType;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Capability a plugin process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Produces metrics.
    Collector,
    /// Transforms metric content.
    Processor,
}

impl PluginType {
    /// Returns the RPC service name for this capability.
    #[must_use]
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::Collector => "Collector",
            Self::Processor => "Processor",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

/// Identity a plugin advertises in its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: i64,
}

impl PluginMeta {
    /// Creates plugin metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, version: i64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Errors returned by plugin implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The operation failed.
    #[error("{0}")]
    Failed(String),
    /// The supplied config was rejected by the plugin.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// SECTION: Capabilities
// ============================================================================

/// Metric-producing plugin.
pub trait CollectorPlugin: Send + Sync + 'static {
    /// Collects values for the requested metrics.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when collection fails.
    fn collect_metrics(
        &self,
        metrics: &[PluginMetricType],
    ) -> Result<Vec<PluginMetricType>, PluginError>;

    /// Lists the metrics this plugin can collect.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when discovery fails.
    fn get_metric_types(&self) -> Result<Vec<PluginMetricType>, PluginError>;

    /// Returns the config policy tree, keyed by metric namespace.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the policy cannot be built.
    fn get_config_policy_tree(&self) -> Result<ConfigPolicyTree, PluginError>;
}

/// Content-transforming plugin.
pub trait ProcessorPlugin: Send + Sync + 'static {
    /// Transforms `content`, returning the new content type and bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when processing fails.
    fn process(
        &self,
        content_type: &str,
        content: &[u8],
        config: &ConfigMap,
    ) -> Result<(String, Vec<u8>), PluginError>;

    /// Returns the config policy applied to `process` configs.
    fn get_config_policy_node(&self) -> ConfigPolicyNode;
}
