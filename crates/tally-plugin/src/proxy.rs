// crates/tally-plugin/src/proxy.rs
// ============================================================================
// Module: Plugin Proxy
// Description: RPC-facing wrappers around collector and processor plugins.
// Purpose: Reset the heartbeat, isolate panics, and label plugin errors for
//          every call before it reaches plugin code.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! A proxy owns the plugin and the [`Session`]. Transports hand every decoded
//! [`RpcRequest`] to [`PluginService::call`]; session methods are answered
//! directly, capability methods run inside [`guarded`], which resets the
//! heartbeat, logs the call, and converts plugin errors and panics into
//! [`RpcError`] values so the serving loop keeps running.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::log::PluginLogEvent;
use crate::plugin::CollectorPlugin;
use crate::plugin::PluginError;
use crate::plugin::PluginType;
use crate::plugin::ProcessorPlugin;
use crate::rpc::RpcError;
use crate::rpc::RpcMethod;
use crate::rpc::RpcReply;
use crate::rpc::RpcRequest;
use crate::session::PluginExitCode;
use crate::session::Session;

// ============================================================================
// SECTION: Service Trait
// ============================================================================

/// RPC dispatch surface shared by both transports.
pub trait PluginService: Send + Sync + 'static {
    /// Returns the capability this service exposes.
    fn plugin_type(&self) -> PluginType;

    /// Returns the session the service reports to.
    fn session(&self) -> &Arc<Session>;

    /// Handles a capability method of this plugin type.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError`] when the method is not served or the call fails.
    fn dispatch(&self, request: RpcRequest) -> Result<RpcReply, RpcError>;

    /// Handles any request, answering session methods directly.
    ///
    /// Methods of another service are refused before they reach
    /// [`PluginService::dispatch`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError`] when authentication or the call fails.
    fn call(&self, request: RpcRequest) -> Result<RpcReply, RpcError> {
        let session = self.session();
        match request {
            RpcRequest::Authenticate {
                token,
            } => {
                if session.authenticate(&token) {
                    session.reset_heartbeat();
                    Ok(RpcReply::Ack)
                } else {
                    session.log(
                        &PluginLogEvent::warn("auth_rejected", "session token mismatch")
                            .with_method(RpcMethod::Authenticate.as_str()),
                    );
                    Err(RpcError::unauthenticated())
                }
            }
            RpcRequest::Ping => {
                session.reset_heartbeat();
                Ok(RpcReply::Ack)
            }
            RpcRequest::Kill {
                reason,
            } => {
                session.log(
                    &PluginLogEvent::info("kill_requested", reason)
                        .with_method(RpcMethod::Kill.as_str()),
                );
                session.shutdown(PluginExitCode::Clean);
                Ok(RpcReply::Ack)
            }
            other => {
                let method = other.method();
                let plugin_type = self.plugin_type();
                if method.service() == plugin_type.service_name() {
                    return self.dispatch(other);
                }
                session.log(
                    &PluginLogEvent::warn(
                        "method_not_served",
                        format!("{plugin_type} plugin does not serve {}", method.service()),
                    )
                    .with_method(method.as_str()),
                );
                Err(RpcError::method_not_found(method.as_str()))
            }
        }
    }
}

// ============================================================================
// SECTION: Collector Proxy
// ============================================================================

/// Proxy exposing a [`CollectorPlugin`] as the `Collector` service.
pub struct CollectorProxy<P> {
    /// Wrapped plugin.
    plugin: P,
    /// Session shared with the runtime.
    session: Arc<Session>,
}

impl<P: CollectorPlugin> CollectorProxy<P> {
    /// Wraps `plugin` with `session`.
    #[must_use]
    pub const fn new(plugin: P, session: Arc<Session>) -> Self {
        Self {
            plugin,
            session,
        }
    }
}

impl<P: CollectorPlugin> PluginService for CollectorProxy<P> {
    fn plugin_type(&self) -> PluginType {
        PluginType::Collector
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn dispatch(&self, request: RpcRequest) -> Result<RpcReply, RpcError> {
        let method = request.method();
        match request {
            RpcRequest::GetMetricTypes => {
                guarded(&self.session, method, || self.plugin.get_metric_types())
                    .map(RpcReply::MetricTypes)
            }
            RpcRequest::CollectMetrics {
                metrics,
            } => guarded(&self.session, method, || self.plugin.collect_metrics(&metrics))
                .map(RpcReply::Metrics),
            RpcRequest::GetConfigPolicyTree => {
                guarded(&self.session, method, || self.plugin.get_config_policy_tree())
                    .map(RpcReply::PolicyTree)
            }
            _ => Err(RpcError::method_not_found(method.as_str())),
        }
    }
}

// ============================================================================
// SECTION: Processor Proxy
// ============================================================================

/// Proxy exposing a [`ProcessorPlugin`] as the `Processor` service.
pub struct ProcessorProxy<P> {
    /// Wrapped plugin.
    plugin: P,
    /// Session shared with the runtime.
    session: Arc<Session>,
}

impl<P: ProcessorPlugin> ProcessorProxy<P> {
    /// Wraps `plugin` with `session`.
    #[must_use]
    pub const fn new(plugin: P, session: Arc<Session>) -> Self {
        Self {
            plugin,
            session,
        }
    }
}

impl<P: ProcessorPlugin> PluginService for ProcessorProxy<P> {
    fn plugin_type(&self) -> PluginType {
        PluginType::Processor
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn dispatch(&self, request: RpcRequest) -> Result<RpcReply, RpcError> {
        let method = request.method();
        match request {
            RpcRequest::Process {
                content_type,
                content,
                config,
            } => guarded(&self.session, method, || {
                self.plugin.process(&content_type, &content, &config)
            })
            .map(|(content_type, content)| RpcReply::Processed {
                content_type,
                content,
            }),
            RpcRequest::GetConfigPolicyNode => {
                guarded(&self.session, method, || Ok(self.plugin.get_config_policy_node()))
                    .map(RpcReply::PolicyNode)
            }
            _ => Err(RpcError::method_not_found(method.as_str())),
        }
    }
}

// ============================================================================
// SECTION: Call Guard
// ============================================================================

/// Runs one plugin call with heartbeat reset, logging, and panic isolation.
///
/// # Errors
///
/// Returns [`RpcError::Call`] when the plugin fails and [`RpcError::Panic`]
/// when it panics.
pub fn guarded<T>(
    session: &Session,
    method: RpcMethod,
    call: impl FnOnce() -> Result<T, PluginError>,
) -> Result<T, RpcError> {
    session.reset_heartbeat();
    let operation = method.operation();
    session.log(
        &PluginLogEvent::info("rpc_call", format!("{operation} called"))
            .with_method(method.as_str()),
    );
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let message = format!("{operation} call error: {err}");
            session.log(
                &PluginLogEvent::warn("rpc_call_failed", message.clone())
                    .with_method(method.as_str()),
            );
            Err(RpcError::Call(message))
        }
        Err(payload) => {
            let message = format!("{operation} panicked: {}", panic_message(payload.as_ref()));
            session.log(
                &PluginLogEvent::error("plugin_panic", message.clone())
                    .with_method(method.as_str()),
            );
            Err(RpcError::Panic(message))
        }
    }
}

/// Runs [`PluginService::call`] on a blocking worker.
///
/// # Errors
///
/// Returns the call's [`RpcError`], or [`RpcError::Panic`] when the worker
/// task itself fails.
pub async fn call_blocking(
    service: &Arc<dyn PluginService>,
    request: RpcRequest,
) -> Result<RpcReply, RpcError> {
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || service.call(request))
        .await
        .unwrap_or_else(|err| Err(RpcError::Panic(format!("plugin worker failed: {err}"))))
}

/// Extracts the message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
