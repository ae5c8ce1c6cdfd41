// crates/tally-plugin/src/client.rs
// ============================================================================
// Module: Plugin Client
// Description: Control-side client for talking to a running plugin.
// Purpose: Connect using a handshake record and issue typed RPC calls over
//          either transport, applying config policy before collect/process.
// Dependencies: reqwest, serde_json, tally-config, tally-policy, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`PluginClient::connect`] reads the transport, address, and token from a
//! [`Handshake`]. Native connections authenticate once with
//! `SessionState.Authenticate`; JSON-RPC requests carry the token as a bearer
//! header. Plugin responses are untrusted: frame and body sizes are capped
//! and malformed replies fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::redirect::Policy;
use serde_json::Value;
use tally_config::LimitsConfig;
use tally_config::RpcTransport;
use tally_policy::ConfigMap;
use tally_policy::ConfigPolicyNode;
use tally_policy::ConfigPolicyTree;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::handshake::Handshake;
use crate::handshake::HandshakeError;
use crate::jsonrpc::JSONRPC_VERSION;
use crate::jsonrpc::JsonRpcRequest;
use crate::jsonrpc::JsonRpcResponse;
use crate::jsonrpc::RPC_PATH;
use crate::metric::PluginMetricType;
use crate::native::decode_response;
use crate::native::encode_request;
use crate::native::read_frame;
use crate::native::write_frame;
use crate::plugin::PluginType;
use crate::rpc::RpcError;
use crate::rpc::RpcReply;
use crate::rpc::RpcRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by [`PluginClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The handshake cannot be used to connect.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// The plugin answered with an RPC error.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The connection failed or timed out.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The response exceeded the size limit.
    #[error("response of {actual} bytes exceeds limit of {limit} bytes")]
    ResponseTooLarge {
        /// Observed size.
        actual: usize,
        /// Configured limit.
        limit: usize,
    },
    /// A metric config was rejected by the plugin's policy.
    #[error("config for {namespace} rejected: {errors}")]
    Policy {
        /// Metric namespace key.
        namespace: String,
        /// Joined validation errors.
        errors: String,
    },
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Connected client for one plugin process.
pub struct PluginClient {
    /// Capability advertised by the plugin.
    plugin_type: PluginType,
    /// Transport-specific connection.
    transport: ClientTransport,
    /// Next request id.
    next_id: AtomicU64,
}

/// Transport-specific connection state.
enum ClientTransport {
    /// Authenticated native connection.
    Native(NativeConnection),
    /// JSON-RPC over HTTP.
    Json(HttpConnection),
}

/// Native TCP connection.
struct NativeConnection {
    /// Stream shared across calls; one call in flight at a time.
    stream: Mutex<TcpStream>,
    /// Frame size limit.
    max_frame_bytes: usize,
}

/// JSON-RPC HTTP endpoint.
struct HttpConnection {
    /// Reqwest client instance.
    client: Client,
    /// `/rpc` endpoint URL.
    endpoint: String,
    /// Prebuilt request headers.
    headers: HeaderMap,
    /// Response body size limit.
    max_body_bytes: usize,
}

impl PluginClient {
    /// Connects using default transport limits.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the handshake is unusable or the
    /// connection or authentication fails.
    pub async fn connect(handshake: &Handshake) -> Result<Self, ClientError> {
        Self::connect_with_limits(handshake, &LimitsConfig::default()).await
    }

    /// Connects using explicit transport limits.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the handshake is unusable or the
    /// connection or authentication fails.
    pub async fn connect_with_limits(
        handshake: &Handshake,
        limits: &LimitsConfig,
    ) -> Result<Self, ClientError> {
        let address = handshake.endpoint()?;
        let transport = match handshake.rpc_transport {
            RpcTransport::Native => {
                ClientTransport::Native(connect_native(address, limits.max_frame_bytes).await?)
            }
            RpcTransport::Json => ClientTransport::Json(HttpConnection::new(
                address,
                &handshake.token,
                limits.max_body_bytes,
            )?),
        };
        let client = Self {
            plugin_type: handshake.plugin_type,
            transport,
            next_id: AtomicU64::new(1),
        };
        if matches!(client.transport, ClientTransport::Native(_)) {
            client
                .call(RpcRequest::Authenticate {
                    token: handshake.token.clone(),
                })
                .await?;
        }
        Ok(client)
    }

    /// Returns the capability advertised by the plugin.
    #[must_use]
    pub const fn plugin_type(&self) -> PluginType {
        self.plugin_type
    }

    /// Sends one request and returns the typed reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails in transport or in the
    /// plugin.
    pub async fn call(&self, request: RpcRequest) -> Result<RpcReply, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let call = async {
            match &self.transport {
                ClientTransport::Native(connection) => connection.call(id, &request).await,
                ClientTransport::Json(connection) => connection.call(id, &request).await,
            }
        };
        tokio::time::timeout(DEFAULT_CALL_TIMEOUT, call)
            .await
            .map_err(|_| ClientError::Transport("call timed out".to_string()))?
    }

    /// Resets the plugin heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call(RpcRequest::Ping).await.map(|_| ())
    }

    /// Asks the plugin to shut down cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn kill(&self, reason: &str) -> Result<(), ClientError> {
        self.call(RpcRequest::Kill {
            reason: reason.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Lists the metrics a collector can produce.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn get_metric_types(&self) -> Result<Vec<PluginMetricType>, ClientError> {
        match self.call(RpcRequest::GetMetricTypes).await? {
            RpcReply::MetricTypes(metrics) => Ok(metrics),
            _ => Err(unexpected("GetMetricTypes")),
        }
    }

    /// Collects the requested metrics as given.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn collect_metrics(
        &self,
        metrics: Vec<PluginMetricType>,
    ) -> Result<Vec<PluginMetricType>, ClientError> {
        match self
            .call(RpcRequest::CollectMetrics {
                metrics,
            })
            .await?
        {
            RpcReply::Metrics(metrics) => Ok(metrics),
            _ => Err(unexpected("CollectMetrics")),
        }
    }

    /// Fetches a collector's config policy tree.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn get_config_policy_tree(&self) -> Result<ConfigPolicyTree, ClientError> {
        match self.call(RpcRequest::GetConfigPolicyTree).await? {
            RpcReply::PolicyTree(tree) => Ok(tree),
            _ => Err(unexpected("GetConfigPolicyTree")),
        }
    }

    /// Sends content through a processor as given.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn process(
        &self,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigMap,
    ) -> Result<(String, Vec<u8>), ClientError> {
        let request = RpcRequest::Process {
            content_type: content_type.to_string(),
            content,
            config,
        };
        match self.call(request).await? {
            RpcReply::Processed {
                content_type,
                content,
            } => Ok((content_type, content)),
            _ => Err(unexpected("Process")),
        }
    }

    /// Fetches a processor's config policy node.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the call fails.
    pub async fn get_config_policy_node(&self) -> Result<ConfigPolicyNode, ClientError> {
        match self.call(RpcRequest::GetConfigPolicyNode).await? {
            RpcReply::PolicyNode(node) => Ok(node),
            _ => Err(unexpected("GetConfigPolicyNode")),
        }
    }

    /// Validates and defaults each metric's config against `tree`, then
    /// collects.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Policy`] for the first metric whose config is
    /// rejected, or any call failure.
    pub async fn collect_metrics_with_policy(
        &self,
        tree: &ConfigPolicyTree,
        metrics: Vec<PluginMetricType>,
    ) -> Result<Vec<PluginMetricType>, ClientError> {
        let mut prepared = Vec::with_capacity(metrics.len());
        for mut metric in metrics {
            let config = metric.config.take().unwrap_or_default();
            let processed =
                tree.process(&metric.namespace, config).map_err(|errors| ClientError::Policy {
                    namespace: metric.namespace_key(),
                    errors: errors.to_string(),
                })?;
            metric.config = Some(processed);
            prepared.push(metric);
        }
        self.collect_metrics(prepared).await
    }

    /// Validates and defaults `config` against `node`, then processes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Policy`] when the config is rejected, or any
    /// call failure.
    pub async fn process_with_policy(
        &self,
        node: &ConfigPolicyNode,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigMap,
    ) -> Result<(String, Vec<u8>), ClientError> {
        let processed = node.process(config).map_err(|errors| ClientError::Policy {
            namespace: content_type.to_string(),
            errors: errors.to_string(),
        })?;
        self.process(content_type, content, processed).await
    }
}

/// Builds the error for a reply that does not match its request.
fn unexpected(operation: &str) -> ClientError {
    ClientError::Protocol(format!("unexpected reply for {operation}"))
}

// ============================================================================
// SECTION: Native Transport
// ============================================================================

/// Opens a native connection.
async fn connect_native(
    address: SocketAddr,
    max_frame_bytes: usize,
) -> Result<NativeConnection, ClientError> {
    let stream = tokio::time::timeout(DEFAULT_CALL_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| ClientError::Transport("connect timed out".to_string()))?
        .map_err(|err| ClientError::Transport(err.to_string()))?;
    Ok(NativeConnection {
        stream: Mutex::new(stream),
        max_frame_bytes,
    })
}

impl NativeConnection {
    /// Writes one request frame and reads its response.
    async fn call(&self, id: u64, request: &RpcRequest) -> Result<RpcReply, ClientError> {
        let method = request.method();
        let payload = encode_request(id, request);
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &payload, self.max_frame_bytes)
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let response = read_frame(&mut *stream, self.max_frame_bytes)
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?
            .ok_or_else(|| ClientError::Transport("connection closed by plugin".to_string()))?;
        drop(stream);
        let (response_id, outcome) = decode_response(method, response)
            .map_err(|err| ClientError::Protocol(err.to_string()))?;
        if response_id != id {
            return Err(ClientError::Protocol(format!(
                "response id {response_id} does not match request id {id}"
            )));
        }
        outcome.map_err(ClientError::from)
    }
}

// ============================================================================
// SECTION: JSON-RPC Transport
// ============================================================================

impl HttpConnection {
    /// Builds the HTTP client for `address`.
    fn new(address: SocketAddr, token: &str, max_body_bytes: usize) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(DEFAULT_CALL_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::Protocol("invalid session token header".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        Ok(Self {
            client,
            endpoint: format!("http://{address}{RPC_PATH}"),
            headers,
            max_body_bytes,
        })
    }

    /// Posts one JSON-RPC request and decodes the typed reply.
    async fn call(&self, id: u64, request: &RpcRequest) -> Result<RpcReply, ClientError> {
        let method = request.method();
        let params = request
            .to_json_params()
            .map_err(|err| ClientError::Protocol(format!("params serialization failed: {err}")))?;
        let envelope = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::from(id),
            method: method.as_str().to_string(),
            params,
        };
        let payload = serde_json::to_vec(&envelope)
            .map_err(|err| ClientError::Protocol(format!("request serialization failed: {err}")))?;
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(payload)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let status = response.status();
        let body = read_body_with_limit(response, self.max_body_bytes).await?;
        let Ok(envelope) = serde_json::from_slice::<JsonRpcResponse>(&body) else {
            let preview = String::from_utf8_lossy(&body);
            return Err(ClientError::Transport(format!(
                "http status {}: {}",
                status.as_u16(),
                preview.trim()
            )));
        };
        if let Some(error) = envelope.error {
            return Err(RpcError::from_jsonrpc_code(error.code, error.message).into());
        }
        RpcReply::from_json_result(method, envelope.result.unwrap_or(Value::Null))
            .map_err(ClientError::from)
    }
}

/// Reads an HTTP response body while enforcing a hard byte limit.
async fn read_body_with_limit(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ClientError> {
    let mut body = Vec::new();
    while let Some(chunk) =
        response.chunk().await.map_err(|err| ClientError::Transport(err.to_string()))?
    {
        let next_total = body.len().saturating_add(chunk.len());
        if next_total > limit {
            return Err(ClientError::ResponseTooLarge {
                actual: next_total,
                limit,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
