// crates/tally-plugin/src/native.rs
// ============================================================================
// Module: Native RPC Transport
// Description: Length-prefixed binary RPC over TCP.
// Purpose: Serve plugin calls on accepted connections with frame limits and
//          token authentication on the first frame.
// Dependencies: bytes, tally-policy, thiserror, tokio
// ============================================================================

//! ## Overview
//! A frame is a big-endian `u32` length followed by the payload. Requests
//! carry `u64 id, string method, args`; responses carry `u64 id, u8 status`
//! followed by the reply (status 0) or `u16 code, string message`
//! (status 1). Oversized frames end the connection. The first frame on every
//! connection must be `SessionState.Authenticate`; any other first frame, or
//! a wrong token, is answered with an unauthenticated error and the
//! connection is closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tally_policy::CodecError;
use tally_policy::wire::get_string;
use tally_policy::wire::get_u8;
use tally_policy::wire::get_u16;
use tally_policy::wire::get_u64;
use tally_policy::wire::put_str;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

use crate::log::PluginLogEvent;
use crate::proxy::PluginService;
use crate::proxy::call_blocking;
use crate::rpc::RpcError;
use crate::rpc::RpcMethod;
use crate::rpc::RpcReply;
use crate::rpc::RpcRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Response status for a successful reply.
const STATUS_OK: u8 = 0;
/// Response status for an error reply.
const STATUS_ERROR: u8 = 1;
/// Pause after a failed accept before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the native framing layer.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket read or write failed.
    #[error("frame io error: {0}")]
    Io(#[from] io::Error),
    /// Frame length exceeds the configured limit.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge {
        /// Announced or actual frame length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Frame payload could not be decoded.
    #[error("frame decode error: {0}")]
    Codec(#[from] CodecError),
}

// ============================================================================
// SECTION: Framing
// ============================================================================

/// Reads one frame; returns `None` on a clean end of stream.
///
/// # Errors
///
/// Returns [`FrameError`] on I/O failure, a stream ending mid-frame, or a
/// length above `max_frame_bytes`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Option<Bytes>, FrameError> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += read;
    }
    let len = usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX);
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Returns [`FrameError`] on I/O failure or a payload above
/// `max_frame_bytes`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<(), FrameError> {
    let too_large = FrameError::TooLarge {
        len: payload.len(),
        max: max_frame_bytes,
    };
    if payload.len() > max_frame_bytes {
        return Err(too_large);
    }
    let len = u32::try_from(payload.len()).map_err(|_| too_large)?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Encodes a request payload.
#[must_use]
pub fn encode_request(id: u64, request: &RpcRequest) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u64(id);
    put_str(&mut buf, request.method().as_str());
    request.encode_args(&mut buf);
    buf.freeze()
}

/// Decodes a request payload into its id and request.
///
/// The inner result carries per-call failures that are answered with an
/// error reply under the same id.
///
/// # Errors
///
/// Returns [`CodecError`] when not even the id can be read.
pub fn decode_request(
    payload: Bytes,
) -> Result<(u64, Result<RpcRequest, RpcError>), CodecError> {
    let mut buf = payload;
    let id = get_u64(&mut buf)?;
    Ok((id, decode_call(&mut buf)))
}

/// Decodes the method name and arguments that follow a request id.
fn decode_call(buf: &mut Bytes) -> Result<RpcRequest, RpcError> {
    let name = get_string(buf)
        .map_err(|err| RpcError::InvalidRequest(format!("invalid method name: {err}")))?;
    let method = RpcMethod::from_name(&name).ok_or_else(|| RpcError::method_not_found(&name))?;
    let request = RpcRequest::decode_args(method, buf)?;
    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes(buf.len()).into());
    }
    Ok(request)
}

/// Encodes a response payload.
#[must_use]
pub fn encode_response(id: u64, outcome: &Result<RpcReply, RpcError>) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u64(id);
    match outcome {
        Ok(reply) => {
            buf.put_u8(STATUS_OK);
            reply.encode(&mut buf);
        }
        Err(err) => {
            buf.put_u8(STATUS_ERROR);
            buf.put_u16(err.wire_code());
            put_str(&mut buf, &err.to_string());
        }
    }
    buf.freeze()
}

/// Decodes a response payload for `method`.
///
/// # Errors
///
/// Returns [`CodecError`] when the payload is malformed.
pub fn decode_response(
    method: RpcMethod,
    payload: Bytes,
) -> Result<(u64, Result<RpcReply, RpcError>), CodecError> {
    let mut buf = payload;
    let id = get_u64(&mut buf)?;
    let outcome = match get_u8(&mut buf)? {
        STATUS_OK => Ok(RpcReply::decode(method, &mut buf)?),
        STATUS_ERROR => {
            let code = get_u16(&mut buf)?;
            Err(RpcError::from_wire_code(code, get_string(&mut buf)?))
        }
        other => return Err(CodecError::InvalidMarker(other)),
    };
    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes(buf.len()));
    }
    Ok((id, outcome))
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Accepts connections and serves each on its own task until the process
/// ends.
pub async fn serve_native(
    listener: TcpListener,
    service: Arc<dyn PluginService>,
    max_frame_bytes: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(err) =
                        serve_connection(stream, Arc::clone(&service), max_frame_bytes).await
                    {
                        service
                            .session()
                            .log(&PluginLogEvent::warn("connection_closed", err.to_string()));
                    }
                });
            }
            Err(err) => {
                service.session().log(&PluginLogEvent::warn("accept_failed", err.to_string()));
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Serves one connection until the peer closes it or authentication fails.
async fn serve_connection(
    stream: TcpStream,
    service: Arc<dyn PluginService>,
    max_frame_bytes: usize,
) -> Result<(), FrameError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut authenticated = false;
    while let Some(payload) = read_frame(&mut reader, max_frame_bytes).await? {
        let (id, decoded) = decode_request(payload)?;
        let outcome = match decoded {
            Ok(request)
                if authenticated || matches!(request, RpcRequest::Authenticate { .. }) =>
            {
                call_blocking(&service, request).await
            }
            Ok(request) => {
                service.session().log(
                    &PluginLogEvent::warn("auth_rejected", "first frame must authenticate")
                        .with_method(request.method().as_str()),
                );
                Err(RpcError::unauthenticated())
            }
            Err(err) => Err(err),
        };
        let accepted = authenticated || outcome.is_ok();
        let mut response = encode_response(id, &outcome);
        if response.len() > max_frame_bytes {
            let err = RpcError::Serialization("reply exceeds frame limit".to_string());
            response = encode_response(id, &Err(err));
        }
        write_frame(&mut writer, &response, max_frame_bytes).await?;
        if !accepted {
            return Ok(());
        }
        authenticated = true;
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
