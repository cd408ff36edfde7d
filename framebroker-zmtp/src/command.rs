//! ZMTP commands exchanged after the greeting: READY, PING, PONG.
//!
//! Command body grammar:
//! ```text
//! command      = name-len name data
//! ready-data   = *(prop-name-len prop-name value-len(u32 BE) value)
//! ping-data    = ttl(u16 BE) context(0..16 bytes)
//! pong-data    = context
//! ```

use crate::codec::{Result, ZmtpError};
use crate::socket_type::SocketType;
use bytes::{BufMut, Bytes, BytesMut};

pub const READY: &[u8] = b"READY";
pub const PING: &[u8] = b"PING";
pub const PONG: &[u8] = b"PONG";

/// Longest PING context a peer may send.
pub const MAX_PING_CONTEXT: usize = 16;

/// Parsed ZMTP command (borrowed views into the payload).
#[derive(Debug, Clone, Copy)]
pub struct ZmtpCommand<'a> {
    pub name: &'a [u8],
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZmtpProp<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

/// Metadata announced by a peer's READY command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMetadata {
    pub socket_type: SocketType,
    pub identity: Option<Bytes>,
}

impl<'a> ZmtpCommand<'a> {
    pub fn is(&self, name: &[u8]) -> bool {
        self.name == name
    }

    /// Properties of a READY-style command body.
    pub fn properties(&self) -> Result<Vec<ZmtpProp<'a>>> {
        let mut props = Vec::new();
        let mut rest = self.data;

        while !rest.is_empty() {
            let (name, tail) = take_prefixed(rest, 1)?;
            let (value, tail) = take_prefixed(tail, 4)?;
            props.push(ZmtpProp { name, value });
            rest = tail;
        }
        Ok(props)
    }

    /// Context bytes of a PING command, to be echoed in the PONG.
    pub fn ping_context(&self) -> Result<&'a [u8]> {
        if self.data.len() < 2 {
            return Err(ZmtpError::Protocol("PING without TTL"));
        }
        let context = &self.data[2..];
        if context.len() > MAX_PING_CONTEXT {
            return Err(ZmtpError::Protocol("PING context too long"));
        }
        Ok(context)
    }
}

// Split a length-prefixed field (`width`-byte BE length) off the front.
fn take_prefixed(b: &[u8], width: usize) -> Result<(&[u8], &[u8])> {
    if b.len() < width {
        return Err(ZmtpError::Protocol("truncated property length"));
    }
    let len = b[..width]
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));
    let b = &b[width..];
    if b.len() < len {
        return Err(ZmtpError::Protocol("truncated property"));
    }
    Ok(b.split_at(len))
}

/// Parse a command frame body into name + data.
pub fn parse_command(payload: &[u8]) -> Result<ZmtpCommand<'_>> {
    let (name, data) = take_prefixed(payload, 1)
        .map_err(|_| ZmtpError::Protocol("truncated command name"))?;
    if name.is_empty() {
        return Err(ZmtpError::Protocol("empty command name"));
    }
    Ok(ZmtpCommand { name, data })
}

/// Parse a READY command body into the peer's metadata.
///
/// `Socket-Type` is mandatory. Property names are matched case-insensitively,
/// as libzmq does.
pub fn parse_ready(payload: &[u8]) -> Result<PeerMetadata> {
    let cmd = parse_command(payload)?;
    if !cmd.is(READY) {
        return Err(ZmtpError::Protocol("expected READY command"));
    }

    let mut socket_type = None;
    let mut identity = None;
    for prop in cmd.properties()? {
        if prop.name.eq_ignore_ascii_case(b"Socket-Type") {
            socket_type = Some(
                SocketType::from_bytes(prop.value)
                    .ok_or(ZmtpError::Protocol("unknown Socket-Type"))?,
            );
        } else if prop.name.eq_ignore_ascii_case(b"Identity") {
            if prop.value.len() > 255 {
                return Err(ZmtpError::Protocol("Identity longer than 255 bytes"));
            }
            identity = Some(Bytes::copy_from_slice(prop.value));
        }
    }

    Ok(PeerMetadata {
        socket_type: socket_type.ok_or(ZmtpError::Protocol("READY without Socket-Type"))?,
        identity,
    })
}

/// Build a READY command body (ZMTP/37).
///
/// Mandatory:
/// - Socket-Type
///
/// Optional:
/// - Identity (only DEALER/REQ/ROUTER peers announce one)
pub fn build_ready(socket_type: SocketType, identity: Option<&[u8]>) -> Bytes {
    let mut body = BytesMut::with_capacity(64);
    body.put_u8(READY.len() as u8);
    body.put_slice(READY);

    put_property(&mut body, b"Socket-Type", socket_type.as_str().as_bytes());
    if let Some(id) = identity {
        put_property(&mut body, b"Identity", id);
    }
    body.freeze()
}

/// Build the PONG answering a PING with `context`.
pub fn build_pong(context: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(1 + PONG.len() + context.len());
    body.put_u8(PONG.len() as u8);
    body.put_slice(PONG);
    body.put_slice(context);
    body.freeze()
}

/// Build a PING with a TTL in deciseconds and an opaque context.
pub fn build_ping(ttl_deciseconds: u16, context: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(1 + PING.len() + 2 + context.len());
    body.put_u8(PING.len() as u8);
    body.put_slice(PING);
    body.put_u16(ttl_deciseconds);
    body.put_slice(context);
    body.freeze()
}

fn put_property(dst: &mut BytesMut, name: &[u8], value: &[u8]) {
    dst.put_u8(name.len() as u8);
    dst.put_slice(name);
    dst.put_u32(value.len() as u32);
    dst.put_slice(value);
}
