// crates/tally-plugin/src/runtime.rs
// ============================================================================
// Module: Plugin Runtime
// Description: Startup, handshake emission, and lifecycle of a plugin process.
// Purpose: Bind the listener, serve the selected transport, supervise the
//          heartbeat, and turn the shutdown signal into an exit code.
// Dependencies: tally-config, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`PluginRuntime`] walks one plugin process through its lifecycle:
//! - bind `127.0.0.1:<listen_port>` and record the address on the session
//! - spawn the native or JSON-RPC server around the proxy
//! - write exactly one handshake line to the output stream
//! - spawn the heartbeat supervisor
//! - in daemon mode wait for the shutdown signal, otherwise return at once
//!
//! [`run_collector`] and [`run_processor`] wrap this for a plugin `main`,
//! building the tokio runtime and returning the process exit code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;

use tally_config::ConfigError;
use tally_config::PluginConfig;
use tally_config::RpcTransport;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::handshake::Handshake;
use crate::jsonrpc::serve_jsonrpc;
use crate::log::PluginLogEvent;
use crate::log::PluginLogSink;
use crate::log::StderrLogSink;
use crate::log::log_sink_from_config;
use crate::native::serve_native;
use crate::plugin::CollectorPlugin;
use crate::plugin::PluginMeta;
use crate::plugin::PluginType;
use crate::plugin::ProcessorPlugin;
use crate::proxy::CollectorProxy;
use crate::proxy::PluginService;
use crate::proxy::ProcessorProxy;
use crate::session::PluginExitCode;
use crate::session::Session;
use crate::session::supervise_heartbeat;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fatal runtime startup errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The configured log sink could not be opened.
    #[error("log sink error: {0}")]
    Log(String),
    /// The listener could not be bound.
    #[error("bind {address} failed: {message}")]
    Bind {
        /// Requested address.
        address: SocketAddr,
        /// Underlying failure.
        message: String,
    },
    /// The handshake line could not be written.
    #[error("handshake emission failed: {0}")]
    Handshake(String),
    /// The async runtime could not be built.
    #[error("async runtime error: {0}")]
    AsyncRuntime(String),
}

impl RuntimeError {
    /// Returns the process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> PluginExitCode {
        match self {
            Self::Handshake(_) => PluginExitCode::RegistrationFailure,
            Self::Config(_)
            | Self::Log(_)
            | Self::Bind {
                ..
            }
            | Self::AsyncRuntime(_) => PluginExitCode::StartupFailure,
        }
    }
}

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// Lifecycle driver for one plugin process.
pub struct PluginRuntime {
    /// Identity advertised in the handshake.
    meta: PluginMeta,
    /// Validated configuration.
    config: PluginConfig,
    /// Log sink override; defaults to the configured sink.
    logger: Option<Arc<dyn PluginLogSink>>,
}

impl PluginRuntime {
    /// Creates a runtime after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] when `config` is invalid.
    pub fn new(meta: PluginMeta, config: PluginConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        Ok(Self {
            meta,
            config,
            logger: None,
        })
    }

    /// Replaces the configured log sink.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn PluginLogSink>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Starts `plugin` as a collector, writing the handshake to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when startup fails.
    pub async fn start_collector<P, W>(
        self,
        plugin: P,
        output: &mut W,
    ) -> Result<PluginExitCode, RuntimeError>
    where
        P: CollectorPlugin,
        W: AsyncWrite + Unpin + Send,
    {
        self.start(PluginType::Collector, output, |session| {
            Arc::new(CollectorProxy::new(plugin, session))
        })
        .await
    }

    /// Starts `plugin` as a processor, writing the handshake to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when startup fails.
    pub async fn start_processor<P, W>(
        self,
        plugin: P,
        output: &mut W,
    ) -> Result<PluginExitCode, RuntimeError>
    where
        P: ProcessorPlugin,
        W: AsyncWrite + Unpin + Send,
    {
        self.start(PluginType::Processor, output, |session| {
            Arc::new(ProcessorProxy::new(plugin, session))
        })
        .await
    }

    /// Runs the shared startup sequence.
    async fn start<W>(
        self,
        plugin_type: PluginType,
        output: &mut W,
        build: impl FnOnce(Arc<Session>) -> Arc<dyn PluginService>,
    ) -> Result<PluginExitCode, RuntimeError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let transport = self.config.runtime.transport;
        let logger = match self.logger {
            Some(logger) => logger,
            None => log_sink_from_config(&self.config.log)
                .map_err(|err| RuntimeError::Log(err.to_string()))?,
        };
        let session = Arc::new(Session::new(&self.config, logger));

        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.config.runtime.listen_port));
        let listener = match bind(address).await {
            Ok(bound) => bound,
            Err(err) => {
                session.log(&PluginLogEvent::error("bind_failed", err.to_string()));
                let failure =
                    Handshake::failure(&self.meta, plugin_type, transport, err.to_string());
                let _ = emit_handshake(output, &failure).await;
                return Err(err);
            }
        };
        let local = listener.local_addr().map_err(|err| RuntimeError::Bind {
            address,
            message: err.to_string(),
        })?;
        session.set_listen_address(local);
        session.log(&PluginLogEvent::info("listening", format!("listening on {local}")));

        let service = build(Arc::clone(&session));
        spawn_transport(transport, listener, service, &self.config);

        let handshake =
            Handshake::ok(&self.meta, plugin_type, transport, local, session.token());
        emit_handshake(output, &handshake).await?;
        tokio::spawn(supervise_heartbeat(Arc::clone(&session)));

        if !session.is_daemon() {
            return Ok(PluginExitCode::Clean);
        }
        let code = session.wait_for_shutdown().await;
        session.log(&PluginLogEvent::info("shutdown", format!("exit code {}", code.as_i32())));
        Ok(code)
    }
}

/// Binds the loopback listener.
async fn bind(address: SocketAddr) -> Result<TcpListener, RuntimeError> {
    TcpListener::bind(address).await.map_err(|err| RuntimeError::Bind {
        address,
        message: err.to_string(),
    })
}

/// Spawns the server task for `transport`.
fn spawn_transport(
    transport: RpcTransport,
    listener: TcpListener,
    service: Arc<dyn PluginService>,
    config: &PluginConfig,
) {
    match transport {
        RpcTransport::Native => {
            tokio::spawn(serve_native(listener, service, config.limits.max_frame_bytes));
        }
        RpcTransport::Json => {
            let max_body_bytes = config.limits.max_body_bytes;
            tokio::spawn(async move {
                let session = Arc::clone(service.session());
                if let Err(err) = serve_jsonrpc(listener, service, max_body_bytes).await {
                    session.log(&PluginLogEvent::error("transport_failed", err.to_string()));
                }
            });
        }
    }
}

/// Writes the handshake line and flushes.
async fn emit_handshake<W>(output: &mut W, handshake: &Handshake) -> Result<(), RuntimeError>
where
    W: AsyncWrite + Unpin + Send,
{
    let line = handshake.to_line().map_err(|err| RuntimeError::Handshake(err.to_string()))?;
    output
        .write_all(line.as_bytes())
        .await
        .map_err(|err| RuntimeError::Handshake(err.to_string()))?;
    output.flush().await.map_err(|err| RuntimeError::Handshake(err.to_string()))
}

// ============================================================================
// SECTION: Process Entry Points
// ============================================================================

/// Runs a collector plugin process and returns its exit code.
///
/// `arg` is the JSON invocation argument from the control process; without
/// it configuration is loaded from disk or defaulted.
#[must_use]
pub fn run_collector<P: CollectorPlugin>(plugin: P, meta: PluginMeta, arg: Option<&str>) -> i32 {
    run_process(meta, arg, |runtime, mut stdout| async move {
        runtime.start_collector(plugin, &mut stdout).await
    })
}

/// Runs a processor plugin process and returns its exit code.
///
/// `arg` is the JSON invocation argument from the control process; without
/// it configuration is loaded from disk or defaulted.
#[must_use]
pub fn run_processor<P: ProcessorPlugin>(plugin: P, meta: PluginMeta, arg: Option<&str>) -> i32 {
    run_process(meta, arg, |runtime, mut stdout| async move {
        runtime.start_processor(plugin, &mut stdout).await
    })
}

/// Builds the async runtime, runs `start`, and maps the outcome to an exit
/// code.
fn run_process<F, Fut>(meta: PluginMeta, arg: Option<&str>, start: F) -> i32
where
    F: FnOnce(PluginRuntime, tokio::io::Stdout) -> Fut,
    Fut: Future<Output = Result<PluginExitCode, RuntimeError>>,
{
    let outcome = resolve_config(arg)
        .and_then(|config| PluginRuntime::new(meta, config))
        .and_then(|runtime| {
            let executor = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| RuntimeError::AsyncRuntime(err.to_string()))?;
            let outcome = executor.block_on(start(runtime, tokio::io::stdout()));
            executor.shutdown_background();
            outcome
        });
    match outcome {
        Ok(code) => code.as_i32(),
        Err(err) => {
            StderrLogSink.record(&PluginLogEvent::error("startup_failed", err.to_string()));
            err.exit_code().as_i32()
        }
    }
}

/// Resolves configuration from the invocation argument or disk.
fn resolve_config(arg: Option<&str>) -> Result<PluginConfig, RuntimeError> {
    let config = match arg {
        Some(arg) => PluginConfig::from_json_arg(arg)?,
        None => PluginConfig::load_or_default()?,
    };
    Ok(config)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
