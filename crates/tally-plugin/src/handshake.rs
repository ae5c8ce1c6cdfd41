// crates/tally-plugin/src/handshake.rs
// ============================================================================
// Module: Plugin Handshake
// Description: The one-line startup record a plugin writes to stdout.
// Purpose: Tell the control process where and how to reach the plugin.
// Dependencies: serde, serde_json, tally-config, thiserror
// ============================================================================

//! ## Overview
//! After binding its listener the runtime writes exactly one [`Handshake`] as
//! a single JSON line. A successful record carries the listen address, the
//! session token, and the selected transport; a failure record carries an
//! error message instead. [`Handshake::parse`] is the control-side reader.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;
use tally_config::RpcTransport;
use thiserror::Error;

use crate::plugin::PluginMeta;
use crate::plugin::PluginType;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome advertised by a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    /// The plugin is serving.
    Ok,
    /// The plugin failed to start.
    Failure,
}

/// Identity block of a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMeta {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: i64,
    /// Capability served.
    pub plugin_type: PluginType,
    /// Transport the plugin was asked to use.
    pub rpc_transport: RpcTransport,
}

/// Startup record written to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Capability served.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Startup outcome.
    pub state: HandshakeState,
    /// Plugin identity.
    pub meta: HandshakeMeta,
    /// Bound listener address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<SocketAddr>,
    /// Session token required on every call.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Transport actually serving.
    pub rpc_transport: RpcTransport,
    /// Startup failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Errors raised while reading a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The line is not a handshake record.
    #[error("invalid handshake: {0}")]
    Parse(String),
    /// The plugin reported a startup failure.
    #[error("plugin failed to start: {0}")]
    Failed(String),
    /// A successful record lacked an address or token.
    #[error("handshake missing {0}")]
    Incomplete(&'static str),
}

// ============================================================================
// SECTION: Construction
// ============================================================================

impl Handshake {
    /// Builds the record for a plugin that is serving.
    #[must_use]
    pub fn ok(
        meta: &PluginMeta,
        plugin_type: PluginType,
        transport: RpcTransport,
        listen_address: SocketAddr,
        token: impl Into<String>,
    ) -> Self {
        Self {
            plugin_type,
            state: HandshakeState::Ok,
            meta: HandshakeMeta::new(meta, plugin_type, transport),
            listen_address: Some(listen_address),
            token: token.into(),
            rpc_transport: transport,
            error_message: None,
        }
    }

    /// Builds the record for a plugin that failed to start.
    #[must_use]
    pub fn failure(
        meta: &PluginMeta,
        plugin_type: PluginType,
        transport: RpcTransport,
        message: impl Into<String>,
    ) -> Self {
        Self {
            plugin_type,
            state: HandshakeState::Failure,
            meta: HandshakeMeta::new(meta, plugin_type, transport),
            listen_address: None,
            token: String::new(),
            rpc_transport: transport,
            error_message: Some(message.into()),
        }
    }

    /// Serializes the record as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parses a record from one line of plugin output.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::Parse`] when the line is not a record.
    pub fn parse(line: &str) -> Result<Self, HandshakeError> {
        serde_json::from_str(line.trim()).map_err(|err| HandshakeError::Parse(err.to_string()))
    }

    /// Returns the listen address of a successful record.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError`] for failure records and records without an
    /// address or token.
    pub fn endpoint(&self) -> Result<SocketAddr, HandshakeError> {
        if self.state == HandshakeState::Failure {
            let message = self.error_message.clone().unwrap_or_default();
            return Err(HandshakeError::Failed(message));
        }
        if self.token.is_empty() {
            return Err(HandshakeError::Incomplete("token"));
        }
        self.listen_address.ok_or(HandshakeError::Incomplete("listen_address"))
    }
}

impl HandshakeMeta {
    /// Builds the identity block.
    fn new(meta: &PluginMeta, plugin_type: PluginType, rpc_transport: RpcTransport) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version,
            plugin_type,
            rpc_transport,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
