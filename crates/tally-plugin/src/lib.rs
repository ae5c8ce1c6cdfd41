// crates/tally-plugin/src/lib.rs
// ============================================================================
// Module: Tally Plugin Library
// Description: Public API surface for the plugin runtime and its client.
// Purpose: Expose plugin traits, the runtime, both RPC transports, and the
//          control-side client.
// Dependencies: crate::{client, handshake, jsonrpc, log, metric, native,
//               plugin, proxy, rpc, runtime, session}
// ============================================================================

//! ## Overview
//! A plugin binary implements [`CollectorPlugin`] or [`ProcessorPlugin`] and
//! hands it to [`run_collector`] or [`run_processor`]. The runtime binds a
//! loopback listener, writes one [`Handshake`] line to stdout, serves calls
//! through the proxy layer, and exits when the control process kills it or
//! stops sending heartbeats. [`PluginClient`] is the control-process side of
//! the same protocol.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;
pub mod handshake;
pub mod jsonrpc;
pub mod log;
pub mod metric;
pub mod native;
pub mod plugin;
pub mod proxy;
pub mod rpc;
pub mod runtime;
pub mod session;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::ClientError;
pub use client::PluginClient;
pub use handshake::Handshake;
pub use handshake::HandshakeError;
pub use handshake::HandshakeState;
pub use log::MemoryLogSink;
pub use log::PluginLogEvent;
pub use log::PluginLogLevel;
pub use log::PluginLogSink;
pub use metric::MetricData;
pub use metric::PluginMetricType;
pub use plugin::CollectorPlugin;
pub use plugin::PluginError;
pub use plugin::PluginMeta;
pub use plugin::PluginType;
pub use plugin::ProcessorPlugin;
pub use proxy::CollectorProxy;
pub use proxy::PluginService;
pub use proxy::ProcessorProxy;
pub use rpc::RpcError;
pub use rpc::RpcMethod;
pub use rpc::RpcReply;
pub use rpc::RpcRequest;
pub use runtime::PluginRuntime;
pub use runtime::RuntimeError;
pub use runtime::run_collector;
pub use runtime::run_processor;
pub use session::PluginExitCode;
pub use session::Session;
