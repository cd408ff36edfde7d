//! ROUTER socket
//!
//! Architecture: Application → `RouterSocket` → `RouterHub` → peer tasks → `TcpStream`
//!
//! ```text
//!               ┌──────────── accept loop ────────────┐
//!               │ spawn serve_peer per connection      │
//!               └──────────────┬───────────────────────┘
//!     inbound_rx ◄── [id, frames..] ── reader ┐
//!                                             │ one pair per client
//!     cmd_tx ──► RouterHub ── PeerCmd ──► writer ┘
//! ```
//!
//! Received messages are multipart `[identity, ...frames]`; the first frame is
//! always the connection identity. Sending `[identity, ...frames]` routes the
//! frames to that connection only, or drops them if it is gone.
//!
//! [`recv_event`](RouterSocket::recv_event) also reports messages that went
//! over the size limit (dropped unread, connection kept) and connections that
//! closed, in order with the messages of the same connection.

use crate::peer::{serve_peer, IdentityAllocator, PeerContext};
use bytes::Bytes;
use compio::net::TcpListener;
use compio::runtime::Task;
use flume::{unbounded, Receiver, Sender};
use framebroker_core::options::TransportOptions;
use framebroker_core::router::{HubStats, RouterCmd, RouterHub};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// What a ROUTER socket hands to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// `[identity, ...frames]`
    Message(Vec<Bytes>),
    /// A message from `identity` went over the size limit. Its frames were
    /// dropped as they arrived; `size` is their total declared size.
    Oversized { identity: Bytes, size: u64 },
    /// The connection owning `identity` closed. Nothing more arrives from it.
    Disconnected(Bytes),
}

/// Listening ROUTER socket with async send/recv API.
///
/// Must be used from inside a compio runtime; it spawns its accept, hub and
/// per-connection tasks onto the current one.
pub struct RouterSocket {
    local_addr: SocketAddr,
    inbound_rx: Receiver<RouterEvent>,
    cmd_tx: Sender<RouterCmd>,
    _task_handles: (Task<()>, Task<HubStats>),
}

impl RouterSocket {
    /// Bind with default transport options.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with_options(addr, TransportOptions::default()).await
    }

    /// Bind and start accepting connections.
    pub async fn bind_with_options(addr: SocketAddr, options: TransportOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (hub_tx, hub_rx) = unbounded();
        let (cmd_tx, cmd_rx) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();

        let hub_task = compio::runtime::spawn(RouterHub::new(hub_rx, cmd_rx).run());
        let ctx = Rc::new(PeerContext {
            hub_tx,
            inbound_tx,
            ids: IdentityAllocator::new(),
            options,
        });
        let accept_task = compio::runtime::spawn(accept_loop(listener, ctx));

        info!(%local_addr, "ROUTER listening");
        Ok(Self {
            local_addr,
            inbound_rx,
            cmd_tx,
            _task_handles: (accept_task, hub_task),
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive the next `[identity, ...frames]` message from any client,
    /// skipping other events.
    ///
    /// Returns `Ok(None)` once the socket can no longer produce messages.
    pub async fn recv(&self) -> io::Result<Option<Vec<Bytes>>> {
        loop {
            match self.recv_event().await? {
                Some(RouterEvent::Message(msg)) => return Ok(Some(msg)),
                Some(_) => {}
                None => return Ok(None),
            }
        }
    }

    /// Receive the next event from any client.
    pub async fn recv_event(&self) -> io::Result<Option<RouterEvent>> {
        Ok(self.inbound_rx.recv_async().await.ok())
    }

    /// Route `[identity, ...frames]` to the named client.
    ///
    /// Unknown identities are dropped silently, as libzmq does by default.
    pub async fn send(&self, msg: Vec<Bytes>) -> io::Result<()> {
        self.cmd_tx
            .send(RouterCmd::Send(msg))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "router hub stopped"))
    }

    /// Close every client connection. Pending replies already handed to
    /// `send` are flushed first.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(RouterCmd::Close);
    }
}

async fn accept_loop(listener: TcpListener, ctx: Rc<PeerContext>) {
    let mut next_conn: u64 = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_conn += 1;
                debug!(%addr, conn = next_conn, "accepted connection");
                compio::runtime::spawn(serve_peer(stream, addr, next_conn, Rc::clone(&ctx))).detach();
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                compio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
