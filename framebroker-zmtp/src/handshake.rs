//! ZMTP handshake that completes before any application traffic.
//!
//! Both sides send their greeting and READY without waiting for the peer, so
//! the exchange is four writes/reads regardless of who connected:
//!
//! ```text
//! → greeting (64)      ← greeting (64)
//! → READY              ← READY
//! ```
//!
//! Fixed-size protocol buffers are stack arrays; only the peer's READY body
//! is heap allocated, bounded by `MAX_READY_SIZE`.

use crate::codec::{encode_frame, Result, ZmtpError, FLAG_COMMAND, FLAG_LONG};
use crate::command::{build_ready, parse_ready};
use crate::greeting::{build_greeting, ZmtpGreeting, GREETING_SIZE};
use crate::socket_type::SocketType;
use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::time::Duration;
use tracing::debug;

/// Generous bound for a READY body (socket type + 255-byte identity + extras).
const MAX_READY_SIZE: usize = 1024;

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub peer_identity: Option<Bytes>,
    pub peer_socket_type: SocketType,
    pub peer_minor_version: u8,
}

/// Perform the handshake, giving up after `timeout` when one is set.
pub async fn perform_handshake_with_timeout<S>(
    stream: &mut S,
    local_socket_type: SocketType,
    identity: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout {
        None => perform_handshake(stream, local_socket_type, identity).await,
        Some(limit) => compio::time::timeout(
            limit,
            perform_handshake(stream, local_socket_type, identity),
        )
        .await
        .map_err(|_| ZmtpError::HandshakeTimeout(limit))?,
    }
}

/// Performs the complete ZMTP handshake on the stream.
///
/// Completes once:
/// 1. Greeting exchange is done (NULL mechanism, ZMTP 3.x)
/// 2. READY exchange is done and the peer's socket type is compatible
pub async fn perform_handshake<S>(
    stream: &mut S,
    local_socket_type: SocketType,
    identity: Option<&[u8]>,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let BufResult(res, _) = stream.write_all(build_greeting()).await;
    res?;

    let BufResult(res, raw) = stream.read_exact([0u8; GREETING_SIZE]).await;
    res?;
    let greeting = ZmtpGreeting::parse(&raw)?;
    greeting.require_null()?;
    debug!(
        version = %format_args!("{}.{}", greeting.major, greeting.minor),
        "received peer greeting"
    );

    let mut ready = Vec::with_capacity(64);
    encode_frame(FLAG_COMMAND, &build_ready(local_socket_type, identity), &mut ready);
    let BufResult(res, _) = stream.write_all(ready).await;
    res?;

    let body = read_command_body(stream).await?;
    let meta = parse_ready(&body)?;

    if !local_socket_type.is_compatible(meta.socket_type) {
        return Err(ZmtpError::IncompatiblePeer {
            local: local_socket_type.as_str(),
            peer: meta.socket_type.as_str(),
        });
    }

    debug!(
        local = %local_socket_type,
        peer = %meta.socket_type,
        "handshake complete"
    );

    Ok(HandshakeResult {
        peer_identity: meta.identity,
        peer_socket_type: meta.socket_type,
        peer_minor_version: greeting.minor,
    })
}

async fn read_command_body<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let BufResult(res, header) = stream.read_exact([0u8; 2]).await;
    res?;

    let flags = header[0];
    if (flags & FLAG_COMMAND) == 0 {
        return Err(ZmtpError::Protocol("expected READY, got a data frame"));
    }

    let body_len = if (flags & FLAG_LONG) != 0 {
        // header[1] is the first byte of the 8-byte size
        let BufResult(res, rest) = stream.read_exact([0u8; 7]).await;
        res?;
        let mut size = [0u8; 8];
        size[0] = header[1];
        size[1..].copy_from_slice(&rest);
        u64::from_be_bytes(size)
    } else {
        u64::from(header[1])
    };

    let body_len = usize::try_from(body_len)
        .ok()
        .filter(|len| *len <= MAX_READY_SIZE)
        .ok_or(ZmtpError::SizeTooLarge {
            size: body_len,
            max: MAX_READY_SIZE,
        })?;

    let BufResult(res, body) = stream.read_exact(vec![0u8; body_len]).await;
    res?;
    Ok(body)
}
