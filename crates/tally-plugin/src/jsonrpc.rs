// crates/tally-plugin/src/jsonrpc.rs
// ============================================================================
// Module: JSON-RPC Transport
// Description: JSON-RPC 2.0 over HTTP for plugin calls.
// Purpose: Serve `POST /rpc` with bearer-token auth and body limits.
// Dependencies: axum, serde, serde_json, tokio
// ============================================================================

//! ## Overview
//! Each request is one JSON-RPC 2.0 envelope posted to `/rpc` with an
//! `Authorization: Bearer <token>` header carrying the session token. Bodies
//! above the configured limit are rejected with 413 before parsing. Envelope
//! errors map to 400, auth failures to 401, and call failures travel as
//! JSON-RPC errors on a 200 response.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;

use crate::log::PluginLogEvent;
use crate::proxy::PluginService;
use crate::proxy::call_blocking;
use crate::rpc::RpcError;
use crate::rpc::RpcMethod;
use crate::rpc::RpcRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Route serving JSON-RPC requests.
pub const RPC_PATH: &str = "/rpc";
/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";
/// Largest accepted `Authorization` header.
const MAX_AUTH_HEADER_BYTES: usize = 1024;

// ============================================================================
// SECTION: Envelopes
// ============================================================================

/// JSON-RPC request envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Optional parameters payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: Value,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

impl JsonRpcResponse {
    /// Builds a success response.
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: error.jsonrpc_code(),
                message: error.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Shared state for the `/rpc` handler.
struct RpcState {
    /// Service receiving decoded calls.
    service: Arc<dyn PluginService>,
}

/// Builds the JSON-RPC router.
pub fn router(service: Arc<dyn PluginService>, max_body_bytes: usize) -> Router {
    let state = Arc::new(RpcState {
        service,
    });
    Router::new()
        .route(RPC_PATH, post(handle_rpc))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Serves JSON-RPC requests on `listener` until the process ends.
///
/// # Errors
///
/// Returns an error when the HTTP server fails.
pub async fn serve_jsonrpc(
    listener: TcpListener,
    service: Arc<dyn PluginService>,
    max_body_bytes: usize,
) -> io::Result<()> {
    axum::serve(listener, router(service, max_body_bytes)).await
}

/// Handles one JSON-RPC request.
async fn handle_rpc(
    State(state): State<Arc<RpcState>>,
    headers: HeaderMap,
    bytes: Bytes,
) -> impl IntoResponse {
    let (status, response) = respond(&state, &headers, &bytes).await;
    (status, axum::Json(response))
}

/// Authenticates, parses, and dispatches a request body.
async fn respond(
    state: &RpcState,
    headers: &HeaderMap,
    bytes: &Bytes,
) -> (StatusCode, JsonRpcResponse) {
    let session = state.service.session();
    let auth_header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    if let Err(reason) = check_bearer(auth_header, |token| session.authenticate(token)) {
        session.log(&PluginLogEvent::warn("auth_rejected", reason));
        return error_response(Value::Null, &RpcError::unauthenticated());
    }
    let Ok(request) = serde_json::from_slice::<JsonRpcRequest>(bytes) else {
        let err = RpcError::InvalidRequest("invalid json-rpc request".to_string());
        return error_response(Value::Null, &err);
    };
    if request.jsonrpc != JSONRPC_VERSION {
        let err = RpcError::InvalidRequest("unsupported json-rpc version".to_string());
        return error_response(request.id, &err);
    }
    let Some(method) = RpcMethod::from_name(&request.method) else {
        return error_response(request.id, &RpcError::method_not_found(&request.method));
    };
    let call = match RpcRequest::from_json_params(method, request.params) {
        Ok(call) => call,
        Err(err) => return error_response(request.id, &err),
    };
    let outcome = call_blocking(&state.service, call).await;
    match outcome.and_then(|reply| {
        reply.to_json_result().map_err(|err| RpcError::Serialization(err.to_string()))
    }) {
        Ok(result) => (StatusCode::OK, JsonRpcResponse::success(request.id, result)),
        Err(err) => error_response(request.id, &err),
    }
}

/// Maps an RPC error to its HTTP status and envelope.
fn error_response(id: Value, error: &RpcError) -> (StatusCode, JsonRpcResponse) {
    let status = match error {
        RpcError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        RpcError::InvalidRequest(_) | RpcError::MethodNotFound(_) | RpcError::InvalidParams(_) => {
            StatusCode::BAD_REQUEST
        }
        RpcError::Call(_) | RpcError::Panic(_) | RpcError::Serialization(_) => StatusCode::OK,
    };
    (status, JsonRpcResponse::failure(id, error))
}

/// Validates a bearer `Authorization` header with `verify`.
fn check_bearer(
    auth_header: Option<&str>,
    verify: impl FnOnce(&str) -> bool,
) -> Result<(), &'static str> {
    let header = auth_header.ok_or("missing authorization")?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err("authorization header too large");
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err("invalid authorization scheme");
    }
    if verify(token) { Ok(()) } else { Err("session token mismatch") }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
