//! One ROUTER-side client connection.
//!
//! After the handshake the peer asks the `RouterHub` to route its identity and
//! waits for the answer; a refused connection is closed before anything is
//! read from it. Once accepted the stream is split: the reader decodes frames
//! and forwards `[identity, frames...]` to the socket's inbound queue, the
//! writer drains the peer's command channel fed by the hub. Neither half waits
//! on the other, so a slow reply never stalls reading the next request.

use crate::codec::{encode_frame, encode_multipart, encoded_len, ZmtpDecoder, ZmtpError, FLAG_COMMAND};
use crate::command::{build_pong, parse_command, PING};
use crate::handshake::perform_handshake_with_timeout;
use crate::multipart::{Assembled, MultipartBuffer};
use crate::router::RouterEvent;
use crate::socket_type::SocketType;
use bytes::{BufMut, Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use compio::net::TcpStream;
use flume::{Receiver, Sender};
use framebroker_core::identity::fmt_identity;
use framebroker_core::options::TransportOptions;
use framebroker_core::router::{HubEvent, PeerCmd};
use framebroker_core::tcp::set_nodelay;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// libzmq-style generated routing ids: `0x00` + big-endian u32 counter.
#[derive(Debug)]
pub(crate) struct IdentityAllocator {
    next: Cell<u32>,
}

impl IdentityAllocator {
    pub(crate) fn new() -> Self {
        Self::starting_at(rand::random())
    }

    pub(crate) fn starting_at(seed: u32) -> Self {
        Self {
            next: Cell::new(seed),
        }
    }

    pub(crate) fn allocate(&self) -> Bytes {
        let n = self.next.get();
        self.next.set(n.wrapping_add(1));
        let mut id = BytesMut::with_capacity(5);
        id.put_u8(0);
        id.put_u32(n);
        id.freeze()
    }

    /// Keep a peer-announced identity unless it is empty or uses the
    /// reserved `0x00` lead byte.
    pub(crate) fn resolve(&self, announced: Option<Bytes>) -> Bytes {
        match announced {
            Some(id) if id.first().is_some_and(|b| *b != 0) => id,
            _ => self.allocate(),
        }
    }
}

/// State shared by every connection of one `RouterSocket`.
pub(crate) struct PeerContext {
    pub(crate) hub_tx: Sender<HubEvent>,
    pub(crate) inbound_tx: Sender<RouterEvent>,
    pub(crate) ids: IdentityAllocator,
    pub(crate) options: TransportOptions,
}

/// Drive one accepted connection from handshake to close.
pub(crate) async fn serve_peer(
    mut stream: TcpStream,
    addr: SocketAddr,
    conn: u64,
    ctx: Rc<PeerContext>,
) {
    if ctx.options.tcp_nodelay {
        if let Err(e) = set_nodelay(&stream, true) {
            debug!(%addr, error = %e, "failed to set TCP_NODELAY");
        }
    }

    let handshake = perform_handshake_with_timeout(
        &mut stream,
        SocketType::Router,
        None,
        ctx.options.handshake_deadline(),
    )
    .await;
    let handshake = match handshake {
        Ok(hs) => hs,
        Err(e) => {
            warn!(%addr, error = %e, "handshake failed, closing connection");
            return;
        }
    };

    let identity = ctx.ids.resolve(handshake.peer_identity);
    debug!(
        %addr,
        conn,
        identity = %fmt_identity(&identity),
        peer = %handshake.peer_socket_type,
        "client connected"
    );

    let (cmd_tx, cmd_rx) = flume::unbounded();
    let (accepted_tx, accepted_rx) = flume::bounded(1);
    let announced = ctx.hub_tx.send(HubEvent::PeerUp {
        routing_id: identity.clone(),
        conn,
        tx: cmd_tx.clone(),
        accepted: accepted_tx,
    });
    if announced.is_err() {
        return;
    }
    match accepted_rx.recv_async().await {
        Ok(true) => {}
        Ok(false) => {
            debug!(%addr, conn, "identity refused, closing connection");
            return;
        }
        // Hub stopped.
        Err(_) => return,
    }

    let (reader, writer) = stream.into_split();
    compio::runtime::spawn(write_loop(writer, cmd_rx, conn)).detach();

    match read_loop(reader, &identity, &cmd_tx, &ctx).await {
        Ok(()) => debug!(%addr, conn, "client disconnected"),
        Err(e) => warn!(%addr, conn, error = %e, "dropping client connection"),
    }

    let _ = ctx
        .inbound_tx
        .send(RouterEvent::Disconnected(identity.clone()));
    let _ = ctx.hub_tx.send(HubEvent::PeerDown {
        routing_id: identity,
        conn,
    });
}

async fn read_loop<R>(
    mut reader: R,
    identity: &Bytes,
    cmd_tx: &Sender<PeerCmd>,
    ctx: &PeerContext,
) -> Result<(), ZmtpError>
where
    R: AsyncRead,
{
    let opts = &ctx.options;
    let mut decoder = ZmtpDecoder::with_max_frame_size(opts.max_message_bytes).skip_oversized();
    let mut multipart = MultipartBuffer::new(opts.max_message_frames, opts.max_message_bytes)
        .with_prefix(identity.clone());
    let mut buf = BytesMut::with_capacity(opts.read_buffer_size);

    loop {
        while let Some(frame) = decoder.decode(&mut buf)? {
            if frame.is_command() {
                handle_command(&frame.payload, cmd_tx)?;
                continue;
            }
            let event = match multipart.push_frame(frame)? {
                None => continue,
                Some(Assembled::Message(msg)) => {
                    trace!(parts = msg.len(), "inbound message");
                    RouterEvent::Message(msg)
                }
                Some(Assembled::Oversized { size }) => {
                    warn!(
                        identity = %fmt_identity(identity),
                        size,
                        limit = opts.max_message_bytes,
                        "dropped oversized message"
                    );
                    RouterEvent::Oversized {
                        identity: identity.clone(),
                        size,
                    }
                }
            };
            if ctx.inbound_tx.send(event).is_err() {
                // Socket dropped; nobody is listening any more.
                return Ok(());
            }
        }

        let chunk = Vec::with_capacity(opts.read_buffer_size);
        let BufResult(res, chunk) = reader.read(chunk).await;
        if res? == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk);
    }
}

fn handle_command(body: &[u8], cmd_tx: &Sender<PeerCmd>) -> Result<(), ZmtpError> {
    let cmd = parse_command(body)?;
    if cmd.is(PING) {
        let _ = cmd_tx.send(PeerCmd::SendCommand(build_pong(cmd.ping_context()?)));
    } else {
        trace!(name = %String::from_utf8_lossy(cmd.name), "ignoring command");
    }
    Ok(())
}

async fn write_loop<W>(mut writer: W, cmd_rx: Receiver<PeerCmd>, conn: u64)
where
    W: AsyncWrite,
{
    let mut closing = false;
    while !closing {
        let Ok(first) = cmd_rx.recv_async().await else {
            break;
        };

        // Coalesce whatever is already queued into one write.
        let mut out = Vec::new();
        for cmd in std::iter::once(first).chain(cmd_rx.try_iter()) {
            match cmd {
                PeerCmd::SendBody(parts) => {
                    out.reserve(encoded_len(&parts));
                    encode_multipart(&parts, &mut out);
                }
                PeerCmd::SendCommand(body) => encode_frame(FLAG_COMMAND, &body, &mut out),
                PeerCmd::Close => {
                    closing = true;
                    break;
                }
            }
        }

        if out.is_empty() {
            continue;
        }
        let BufResult(res, _) = writer.write_all(out).await;
        if let Err(e) = res {
            debug!(conn, error = %e, "write failed");
            return;
        }
    }

    let _ = writer.shutdown().await;
    trace!(conn, "writer stopped");
}
