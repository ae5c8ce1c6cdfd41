// crates/tally-plugin/src/rpc.rs
// ============================================================================
// Module: Plugin RPC Vocabulary
// Description: Method names, typed requests and replies, and RPC errors.
// Purpose: Give both transports one message model with binary and JSON forms.
// Dependencies: base64, bytes, serde, serde_json, tally-policy, thiserror
// ============================================================================

//! ## Overview
//! Every call a plugin accepts is an [`RpcRequest`] addressed by an
//! [`RpcMethod`] of the form `Service.Operation`. Replies carry no tag of
//! their own: both sides know the method, so [`RpcReply`] is decoded keyed by
//! it. The native transport uses the binary wire form; the JSON-RPC transport
//! uses the serde form, with raw content carried as standard base64.
//! [`RpcError`] carries its full message and a stable code per transport so a
//! client can rebuild the same variant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use bytes::BytesMut;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Value;
use tally_policy::CodecError;
use tally_policy::ConfigMap;
use tally_policy::ConfigPolicyNode;
use tally_policy::ConfigPolicyTree;
use tally_policy::WireDecode;
use tally_policy::WireEncode;
use tally_policy::wire::get_bytes;
use tally_policy::wire::get_string;
use tally_policy::wire::put_bytes;
use tally_policy::wire::put_str;
use thiserror::Error;

use crate::metric::PluginMetricType;

// ============================================================================
// SECTION: Methods
// ============================================================================

/// RPC method addressed as `Service.Operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Presents the session token on a native connection.
    Authenticate,
    /// Liveness probe; resets the heartbeat.
    Ping,
    /// Requests a clean shutdown.
    Kill,
    /// Lists collectable metrics.
    GetMetricTypes,
    /// Collects metric values.
    CollectMetrics,
    /// Returns the collector policy tree.
    GetConfigPolicyTree,
    /// Transforms content.
    Process,
    /// Returns the processor policy node.
    GetConfigPolicyNode,
}

impl RpcMethod {
    /// Every method, in a stable order.
    pub const ALL: [Self; 8] = [
        Self::Authenticate,
        Self::Ping,
        Self::Kill,
        Self::GetMetricTypes,
        Self::CollectMetrics,
        Self::GetConfigPolicyTree,
        Self::Process,
        Self::GetConfigPolicyNode,
    ];

    /// Returns the fully qualified method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "SessionState.Authenticate",
            Self::Ping => "SessionState.Ping",
            Self::Kill => "SessionState.Kill",
            Self::GetMetricTypes => "Collector.GetMetricTypes",
            Self::CollectMetrics => "Collector.CollectMetrics",
            Self::GetConfigPolicyTree => "Collector.GetConfigPolicyTree",
            Self::Process => "Processor.Process",
            Self::GetConfigPolicyNode => "Processor.GetConfigPolicyNode",
        }
    }

    /// Parses a fully qualified method name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.as_str() == name)
    }

    /// Returns the service half of the name.
    #[must_use]
    pub fn service(self) -> &'static str {
        self.as_str().split_once('.').map_or("", |(service, _)| service)
    }

    /// Returns the operation half of the name.
    #[must_use]
    pub fn operation(self) -> &'static str {
        self.as_str().split_once('.').map_or("", |(_, operation)| operation)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned across the RPC boundary.
///
/// Each variant holds the complete message shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The envelope was malformed.
    #[error("{0}")]
    InvalidRequest(String),
    /// The caller did not present the session token.
    #[error("{0}")]
    Unauthenticated(String),
    /// The method is unknown or not served by this plugin.
    #[error("{0}")]
    MethodNotFound(String),
    /// The arguments could not be decoded.
    #[error("{0}")]
    InvalidParams(String),
    /// The plugin returned an error.
    #[error("{0}")]
    Call(String),
    /// The plugin panicked during the call.
    #[error("{0}")]
    Panic(String),
    /// The reply could not be encoded or decoded.
    #[error("{0}")]
    Serialization(String),
}

impl RpcError {
    /// Returns the standard unauthenticated error.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated("unauthenticated".to_string())
    }

    /// Returns the method-not-found error for `name`.
    #[must_use]
    pub fn method_not_found(name: &str) -> Self {
        Self::MethodNotFound(format!("method not found: {name}"))
    }

    /// Returns the JSON-RPC error code.
    #[must_use]
    pub const fn jsonrpc_code(&self) -> i64 {
        match self {
            Self::InvalidRequest(_) => -32600,
            Self::Unauthenticated(_) => -32001,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Call(_) => -32010,
            Self::Panic(_) => -32011,
            Self::Serialization(_) => -32060,
        }
    }

    /// Returns the native transport error code.
    #[must_use]
    pub const fn wire_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 1,
            Self::MethodNotFound(_) => 2,
            Self::InvalidParams(_) => 3,
            Self::Call(_) => 4,
            Self::Panic(_) => 5,
            Self::Serialization(_) => 6,
            Self::InvalidRequest(_) => 7,
        }
    }

    /// Rebuilds an error from a JSON-RPC code and message.
    #[must_use]
    pub fn from_jsonrpc_code(code: i64, message: String) -> Self {
        match code {
            -32600 => Self::InvalidRequest(message),
            -32001 => Self::Unauthenticated(message),
            -32601 => Self::MethodNotFound(message),
            -32602 => Self::InvalidParams(message),
            -32011 => Self::Panic(message),
            -32060 => Self::Serialization(message),
            _ => Self::Call(message),
        }
    }

    /// Rebuilds an error from a native code and message.
    #[must_use]
    pub fn from_wire_code(code: u16, message: String) -> Self {
        match code {
            1 => Self::Unauthenticated(message),
            2 => Self::MethodNotFound(message),
            3 => Self::InvalidParams(message),
            5 => Self::Panic(message),
            6 => Self::Serialization(message),
            7 => Self::InvalidRequest(message),
            _ => Self::Call(message),
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        Self::InvalidParams(err.to_string())
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Typed RPC request.
#[derive(Debug, Clone)]
pub enum RpcRequest {
    /// Presents the session token.
    Authenticate {
        /// Session token from the handshake.
        token: String,
    },
    /// Liveness probe.
    Ping,
    /// Clean shutdown request.
    Kill {
        /// Reason recorded in the plugin log.
        reason: String,
    },
    /// Lists collectable metrics.
    GetMetricTypes,
    /// Collects metric values.
    CollectMetrics {
        /// Requested metrics with processed configs.
        metrics: Vec<PluginMetricType>,
    },
    /// Returns the collector policy tree.
    GetConfigPolicyTree,
    /// Transforms content.
    Process {
        /// Content type of `content`.
        content_type: String,
        /// Raw content.
        content: Vec<u8>,
        /// Processed config.
        config: ConfigMap,
    },
    /// Returns the processor policy node.
    GetConfigPolicyNode,
}

/// JSON params for `SessionState.Authenticate`.
#[derive(Debug, Serialize, Deserialize)]
struct AuthenticateParams {
    /// Session token.
    token: String,
}

/// JSON params for `SessionState.Kill`.
#[derive(Debug, Serialize, Deserialize)]
struct KillParams {
    /// Shutdown reason.
    #[serde(default)]
    reason: String,
}

/// JSON params for `Collector.CollectMetrics`.
#[derive(Debug, Serialize, Deserialize)]
struct CollectMetricsParams {
    /// Requested metrics.
    metrics: Vec<PluginMetricType>,
}

/// JSON params for `Processor.Process` and its result.
#[derive(Debug, Serialize, Deserialize)]
struct ContentPayload {
    /// Content type.
    content_type: String,
    /// Raw content, base64 encoded in JSON.
    #[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
    content: Vec<u8>,
    /// Processed config; absent in results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<ConfigMap>,
}

impl RpcRequest {
    /// Returns the method this request addresses.
    #[must_use]
    pub const fn method(&self) -> RpcMethod {
        match self {
            Self::Authenticate {
                ..
            } => RpcMethod::Authenticate,
            Self::Ping => RpcMethod::Ping,
            Self::Kill {
                ..
            } => RpcMethod::Kill,
            Self::GetMetricTypes => RpcMethod::GetMetricTypes,
            Self::CollectMetrics {
                ..
            } => RpcMethod::CollectMetrics,
            Self::GetConfigPolicyTree => RpcMethod::GetConfigPolicyTree,
            Self::Process {
                ..
            } => RpcMethod::Process,
            Self::GetConfigPolicyNode => RpcMethod::GetConfigPolicyNode,
        }
    }

    /// Writes the binary arguments of this request.
    pub fn encode_args(&self, buf: &mut BytesMut) {
        match self {
            Self::Authenticate {
                token,
            } => put_str(buf, token),
            Self::Kill {
                reason,
            } => put_str(buf, reason),
            Self::CollectMetrics {
                metrics,
            } => metrics.encode(buf),
            Self::Process {
                content_type,
                content,
                config,
            } => {
                put_str(buf, content_type);
                put_bytes(buf, content);
                config.encode(buf);
            }
            Self::Ping
            | Self::GetMetricTypes
            | Self::GetConfigPolicyTree
            | Self::GetConfigPolicyNode => {}
        }
    }

    /// Reads the binary arguments for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the arguments are malformed.
    pub fn decode_args(method: RpcMethod, buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(match method {
            RpcMethod::Authenticate => Self::Authenticate {
                token: get_string(buf)?,
            },
            RpcMethod::Ping => Self::Ping,
            RpcMethod::Kill => Self::Kill {
                reason: get_string(buf)?,
            },
            RpcMethod::GetMetricTypes => Self::GetMetricTypes,
            RpcMethod::CollectMetrics => Self::CollectMetrics {
                metrics: Vec::decode(buf)?,
            },
            RpcMethod::GetConfigPolicyTree => Self::GetConfigPolicyTree,
            RpcMethod::Process => Self::Process {
                content_type: get_string(buf)?,
                content: get_bytes(buf)?.to_vec(),
                config: ConfigMap::decode(buf)?,
            },
            RpcMethod::GetConfigPolicyNode => Self::GetConfigPolicyNode,
        })
    }

    /// Returns the JSON-RPC params for this request.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_json_params(&self) -> Result<Option<Value>, serde_json::Error> {
        match self {
            Self::Authenticate {
                token,
            } => serde_json::to_value(AuthenticateParams {
                token: token.clone(),
            })
            .map(Some),
            Self::Kill {
                reason,
            } => serde_json::to_value(KillParams {
                reason: reason.clone(),
            })
            .map(Some),
            Self::CollectMetrics {
                metrics,
            } => serde_json::to_value(CollectMetricsParams {
                metrics: metrics.clone(),
            })
            .map(Some),
            Self::Process {
                content_type,
                content,
                config,
            } => serde_json::to_value(ContentPayload {
                content_type: content_type.clone(),
                content: content.clone(),
                config: Some(config.clone()),
            })
            .map(Some),
            Self::Ping
            | Self::GetMetricTypes
            | Self::GetConfigPolicyTree
            | Self::GetConfigPolicyNode => Ok(None),
        }
    }

    /// Parses JSON-RPC params for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidParams`] when the params do not match.
    pub fn from_json_params(method: RpcMethod, params: Option<Value>) -> Result<Self, RpcError> {
        let params = params.unwrap_or(Value::Null);
        Ok(match method {
            RpcMethod::Authenticate => {
                let params: AuthenticateParams = parse_params(params)?;
                Self::Authenticate {
                    token: params.token,
                }
            }
            RpcMethod::Ping => Self::Ping,
            RpcMethod::Kill => {
                let params = if params.is_null() {
                    KillParams {
                        reason: String::new(),
                    }
                } else {
                    parse_params(params)?
                };
                Self::Kill {
                    reason: params.reason,
                }
            }
            RpcMethod::GetMetricTypes => Self::GetMetricTypes,
            RpcMethod::CollectMetrics => {
                let params: CollectMetricsParams = parse_params(params)?;
                Self::CollectMetrics {
                    metrics: params.metrics,
                }
            }
            RpcMethod::GetConfigPolicyTree => Self::GetConfigPolicyTree,
            RpcMethod::Process => {
                let params: ContentPayload = parse_params(params)?;
                Self::Process {
                    content_type: params.content_type,
                    content: params.content,
                    config: params.config.unwrap_or_default(),
                }
            }
            RpcMethod::GetConfigPolicyNode => Self::GetConfigPolicyNode,
        })
    }
}

/// Deserializes params, mapping failures to [`RpcError::InvalidParams`].
fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|err| RpcError::InvalidParams(format!("invalid params: {err}")))
}

// ============================================================================
// SECTION: Replies
// ============================================================================

/// Typed RPC reply.
#[derive(Debug, Clone)]
pub enum RpcReply {
    /// Acknowledgement with no payload.
    Ack,
    /// Result of `Collector.GetMetricTypes`.
    MetricTypes(Vec<PluginMetricType>),
    /// Result of `Collector.CollectMetrics`.
    Metrics(Vec<PluginMetricType>),
    /// Result of `Collector.GetConfigPolicyTree`.
    PolicyTree(ConfigPolicyTree),
    /// Result of `Processor.Process`.
    Processed {
        /// Content type of the output.
        content_type: String,
        /// Output content.
        content: Vec<u8>,
    },
    /// Result of `Processor.GetConfigPolicyNode`.
    PolicyNode(ConfigPolicyNode),
}

impl RpcReply {
    /// Writes the binary form of this reply.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Ack => {}
            Self::MetricTypes(metrics) | Self::Metrics(metrics) => metrics.encode(buf),
            Self::PolicyTree(tree) => tree.encode(buf),
            Self::Processed {
                content_type,
                content,
            } => {
                put_str(buf, content_type);
                put_bytes(buf, content);
            }
            Self::PolicyNode(node) => node.encode(buf),
        }
    }

    /// Reads the binary reply for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the reply is malformed.
    pub fn decode(method: RpcMethod, buf: &mut Bytes) -> Result<Self, CodecError> {
        Ok(match method {
            RpcMethod::Authenticate | RpcMethod::Ping | RpcMethod::Kill => Self::Ack,
            RpcMethod::GetMetricTypes => Self::MetricTypes(Vec::decode(buf)?),
            RpcMethod::CollectMetrics => Self::Metrics(Vec::decode(buf)?),
            RpcMethod::GetConfigPolicyTree => Self::PolicyTree(ConfigPolicyTree::decode(buf)?),
            RpcMethod::Process => Self::Processed {
                content_type: get_string(buf)?,
                content: get_bytes(buf)?.to_vec(),
            },
            RpcMethod::GetConfigPolicyNode => Self::PolicyNode(ConfigPolicyNode::decode(buf)?),
        })
    }

    /// Returns the JSON-RPC result value.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails.
    pub fn to_json_result(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Ack => Ok(Value::Null),
            Self::MetricTypes(metrics) | Self::Metrics(metrics) => serde_json::to_value(metrics),
            Self::PolicyTree(tree) => serde_json::to_value(tree),
            Self::Processed {
                content_type,
                content,
            } => serde_json::to_value(ContentPayload {
                content_type: content_type.clone(),
                content: content.clone(),
                config: None,
            }),
            Self::PolicyNode(node) => serde_json::to_value(node),
        }
    }

    /// Parses a JSON-RPC result for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`] when the result does not match.
    pub fn from_json_result(method: RpcMethod, result: Value) -> Result<Self, RpcError> {
        Ok(match method {
            RpcMethod::Authenticate | RpcMethod::Ping | RpcMethod::Kill => Self::Ack,
            RpcMethod::GetMetricTypes => Self::MetricTypes(parse_result(result)?),
            RpcMethod::CollectMetrics => Self::Metrics(parse_result(result)?),
            RpcMethod::GetConfigPolicyTree => Self::PolicyTree(parse_result(result)?),
            RpcMethod::Process => {
                let payload: ContentPayload = parse_result(result)?;
                Self::Processed {
                    content_type: payload.content_type,
                    content: payload.content,
                }
            }
            RpcMethod::GetConfigPolicyNode => Self::PolicyNode(parse_result(result)?),
        })
    }
}

/// Deserializes a result, mapping failures to [`RpcError::Serialization`].
fn parse_result<T: for<'de> Deserialize<'de>>(result: Value) -> Result<T, RpcError> {
    serde_json::from_value(result)
        .map_err(|err| RpcError::Serialization(format!("invalid result: {err}")))
}

// ============================================================================
// SECTION: Base64 Content
// ============================================================================

/// Serializes bytes as standard base64.
fn serialize_base64<S: Serializer>(content: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(content))
}

/// Deserializes standard base64 into bytes.
fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        reason = "Test-only assertions."
    )]

    use bytes::Bytes;
    use bytes::BytesMut;
    use serde_json::json;
    use tally_policy::ConfigMap;
    use tally_policy::ConfigValue;

    use super::RpcError;
    use super::RpcMethod;
    use super::RpcReply;
    use super::RpcRequest;

    #[test]
    fn method_names_parse_back() {
        for method in RpcMethod::ALL {
            assert_eq!(RpcMethod::from_name(method.as_str()), Some(method));
        }
        assert_eq!(RpcMethod::CollectMetrics.service(), "Collector");
        assert_eq!(RpcMethod::CollectMetrics.operation(), "CollectMetrics");
        assert_eq!(RpcMethod::from_name("Collector.Missing"), None);
        assert_eq!(RpcMethod::from_name("collector.collectmetrics"), None);
    }

    #[test]
    fn error_codes_rebuild_the_same_variant() {
        let errors = [
            RpcError::InvalidRequest("bad envelope".to_string()),
            RpcError::unauthenticated(),
            RpcError::method_not_found("X.Y"),
            RpcError::InvalidParams("bad".to_string()),
            RpcError::Call("CollectMetrics call error : boom".to_string()),
            RpcError::Panic("plugin panicked".to_string()),
            RpcError::Serialization("nope".to_string()),
        ];
        for error in errors {
            let message = error.to_string();
            assert_eq!(RpcError::from_jsonrpc_code(error.jsonrpc_code(), message.clone()), error);
            assert_eq!(RpcError::from_wire_code(error.wire_code(), message), error);
        }
    }

    #[test]
    fn process_params_carry_base64_content() {
        let mut config = ConfigMap::new();
        config.insert("factor".to_string(), ConfigValue::Float(2.0));
        let request = RpcRequest::Process {
            content_type: "text/plain".to_string(),
            content: b"hello".to_vec(),
            config,
        };
        let params = request.to_json_params().unwrap().unwrap();
        assert_eq!(params["content"], "aGVsbG8=");
        assert_eq!(params["config"]["factor"], json!({"type": "float", "value": 2.0}));

        let parsed = RpcRequest::from_json_params(RpcMethod::Process, Some(params)).unwrap();
        let RpcRequest::Process {
            content,
            config,
            ..
        } = parsed
        else {
            panic!("expected process request");
        };
        assert_eq!(content, b"hello");
        assert_eq!(config.get("factor"), Some(&ConfigValue::Float(2.0)));
    }

    #[test]
    fn missing_params_are_invalid_for_methods_with_arguments() {
        let err = RpcRequest::from_json_params(RpcMethod::CollectMetrics, None).unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams(_)), "{err:?}");
        let bad = json!({"content_type": "a", "content": "!!not base64!!"});
        let err = RpcRequest::from_json_params(RpcMethod::Process, Some(bad)).unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams(_)), "{err:?}");
        assert!(matches!(
            RpcRequest::from_json_params(RpcMethod::Kill, None).unwrap(),
            RpcRequest::Kill { .. }
        ));
    }

    #[test]
    fn process_args_and_reply_decode_from_binary() {
        let request = RpcRequest::Process {
            content_type: "application/json".to_string(),
            content: vec![0, 1, 2, 255],
            config: ConfigMap::new(),
        };
        let mut buf = BytesMut::new();
        request.encode_args(&mut buf);
        let mut bytes = buf.freeze();
        let RpcRequest::Process {
            content,
            ..
        } = RpcRequest::decode_args(RpcMethod::Process, &mut bytes).unwrap()
        else {
            panic!("expected process request");
        };
        assert_eq!(content, vec![0, 1, 2, 255]);
        assert!(bytes.is_empty());

        let reply = RpcReply::Processed {
            content_type: "text/plain".to_string(),
            content: b"out".to_vec(),
        };
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        let mut bytes: Bytes = buf.freeze();
        let RpcReply::Processed {
            content_type,
            content,
        } = RpcReply::decode(RpcMethod::Process, &mut bytes).unwrap()
        else {
            panic!("expected processed reply");
        };
        assert_eq!(content_type, "text/plain");
        assert_eq!(content, b"out");
    }

    #[test]
    fn ack_result_is_null() {
        assert_eq!(RpcReply::Ack.to_json_result().unwrap(), serde_json::Value::Null);
        assert!(matches!(
            RpcReply::from_json_result(RpcMethod::Ping, serde_json::Value::Null).unwrap(),
            RpcReply::Ack
        ));
    }
}
