//! ROUTER hub
//!
//! One hub per listening ROUTER endpoint. It owns the routing table
//! (identity → peer command channel) and nothing else:
//!
//! - peer tasks announce themselves with `PeerUp` / `PeerDown`
//! - the application sends `[identity, frames...]`; the hub strips the
//!   identity and forwards `frames...` to that peer only
//! - unknown identities are dropped silently (libzmq behavior)
//! - a second connection claiming an identity that is already routed is
//!   refused (libzmq behavior without ROUTER_HANDOVER); the peer task learns
//!   the verdict through `PeerUp::accepted` before it reads anything
//!
//! Runtime-agnostic: the loop only needs `flume` + `futures::select!`.

use crate::identity::fmt_identity;
use bytes::Bytes;
use flume::{Receiver, Sender};
use hashbrown::HashMap;
use tracing::{debug, trace, warn};

/// Commands sent from application to Router Hub
#[derive(Debug)]
pub enum RouterCmd {
    /// Route `[identity, frames...]` to the peer named by the first frame.
    Send(Vec<Bytes>),
    /// Close all peers
    Close,
}

/// Commands sent from Hub -> Peer (identity already stripped)
#[derive(Debug)]
pub enum PeerCmd {
    /// Write a multipart data message.
    SendBody(Vec<Bytes>),
    /// Write one protocol command frame (already-encoded command body).
    SendCommand(Bytes),
    Close,
}

/// Lifecycle events sent from peer tasks -> Hub.
///
/// `conn` is unique per connection and disambiguates two connections that
/// claimed the same identity.
#[derive(Debug)]
pub enum HubEvent {
    PeerUp {
        routing_id: Bytes,
        conn: u64,
        tx: Sender<PeerCmd>,
        /// Receives `true` once the peer is routable, `false` if refused.
        accepted: Sender<bool>,
    },
    PeerDown {
        routing_id: Bytes,
        conn: u64,
    },
}

/// Counters reported when the hub stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub routed: u64,
    pub unroutable: u64,
    pub refused_peers: u64,
}

struct PeerEntry {
    conn: u64,
    tx: Sender<PeerCmd>,
}

pub struct RouterHub {
    peers: HashMap<Bytes, PeerEntry>,
    stats: HubStats,
    hub_rx: Receiver<HubEvent>,
    cmd_rx: Receiver<RouterCmd>,
}

impl RouterHub {
    pub fn new(hub_rx: Receiver<HubEvent>, cmd_rx: Receiver<RouterCmd>) -> Self {
        Self {
            peers: HashMap::new(),
            stats: HubStats::default(),
            hub_rx,
            cmd_rx,
        }
    }

    /// Run until the application side (`cmd_rx`) or all peer senders close.
    pub async fn run(mut self) -> HubStats {
        use futures::select;
        use futures::FutureExt;

        loop {
            select! {
                ev = self.hub_rx.recv_async().fuse() => match ev {
                    Ok(ev) => self.handle_peer_event(ev),
                    Err(_) => break,
                },
                cmd = self.cmd_rx.recv_async().fuse() => match cmd {
                    Ok(RouterCmd::Send(parts)) => {
                        // A reply can race the PeerUp of the connection it
                        // answers; apply pending lifecycle events first.
                        self.drain_peer_events();
                        self.route_outbound(parts);
                    }
                    Ok(RouterCmd::Close) | Err(_) => break,
                },
            }
        }

        for entry in self.peers.values() {
            let _ = entry.tx.send(PeerCmd::Close);
        }
        debug!(stats = ?self.stats, "router hub stopped");
        self.stats
    }

    fn drain_peer_events(&mut self) {
        while let Ok(ev) = self.hub_rx.try_recv() {
            self.handle_peer_event(ev);
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stats(&self) -> HubStats {
        self.stats
    }

    pub fn handle_peer_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::PeerUp {
                routing_id,
                conn,
                tx,
                accepted,
            } => {
                if self.peers.contains_key(&routing_id) {
                    warn!(
                        identity = %fmt_identity(&routing_id),
                        conn,
                        "refusing connection: identity already in use"
                    );
                    self.stats.refused_peers += 1;
                    let _ = accepted.send(false);
                    return;
                }
                debug!(identity = %fmt_identity(&routing_id), conn, "peer up");
                self.peers.insert(routing_id, PeerEntry { conn, tx });
                let _ = accepted.send(true);
            }

            HubEvent::PeerDown { routing_id, conn } => {
                // Only the connection that owns the identity may release it.
                let owned = self
                    .peers
                    .get(&routing_id)
                    .is_some_and(|entry| entry.conn == conn);
                if owned {
                    self.peers.remove(&routing_id);
                    debug!(identity = %fmt_identity(&routing_id), conn, "peer down");
                }
            }
        }
    }

    pub fn route_outbound(&mut self, parts: Vec<Bytes>) {
        let mut parts = parts.into_iter();
        let Some(target_id) = parts.next() else {
            return;
        };
        let body: Vec<Bytes> = parts.collect();

        match self.peers.get(&target_id) {
            Some(entry) if entry.tx.send(PeerCmd::SendBody(body)).is_ok() => {
                self.stats.routed += 1;
                trace!(identity = %fmt_identity(&target_id), "routed message");
            }
            _ => {
                self.stats.unroutable += 1;
                debug!(
                    identity = %fmt_identity(&target_id),
                    "dropping message for unknown peer"
                );
            }
        }
    }
}
