//! Dispatcher: load-balancing bridge between clients and workers.
//!
//! ```text
//! Clients ─► Frontend (ROUTER) ─► pending: FairQueue<identity> ─► idle worker
//!    ▲                                                                 │
//!    └──────────── Frontend.send([identity, "", text]) ◄── reply ◄─────┘
//! ```
//!
//! Credit based: a worker receives a request only while `Idle`, i.e. after
//! its READY or after it replied. Requests wait in a per-identity fair queue;
//! identities are served round-robin and idle workers first come, first
//! served.
//!
//! A message the frontend dropped for its size is answered here with a
//! rejection, without using a worker. When a client disconnects its queued
//! requests are discarded.

use crate::protocol::{
    encode_reply, reject_text, DecodeError, DEFAULT_MAX_FRAME_BYTES, WORKER_LOST,
};
use crate::worker::WORKER_READY;
use async_trait::async_trait;
use bytes::Bytes;
use flume::{Receiver, Sender};
use framebroker_core::fair_queue::FairQueue;
use framebroker_core::identity::fmt_identity;
use framebroker_core::inproc::{InprocEvent, InprocListener, InprocMessage, PeerId};
use framebroker_zmtp::{RouterEvent, RouterSocket};
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::io;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Sequence number of a request within one dispatcher.
pub type RequestId = u64;

/// Client-facing side of the dispatcher.
///
/// Designed for single-threaded async runtimes like compio; no `Send` bound.
#[async_trait(?Send)]
pub trait Frontend {
    /// Next client event; `None` once closed.
    async fn recv_event(&mut self) -> io::Result<Option<RouterEvent>>;

    /// Route `[identity, ...frames]` back to a client.
    async fn send_multipart(&mut self, msg: Vec<Bytes>) -> io::Result<()>;

    /// Description for logs.
    fn describe(&self) -> String;
}

#[async_trait(?Send)]
impl Frontend for RouterSocket {
    async fn recv_event(&mut self) -> io::Result<Option<RouterEvent>> {
        RouterSocket::recv_event(self).await
    }

    async fn send_multipart(&mut self, msg: Vec<Bytes>) -> io::Result<()> {
        self.send(msg).await
    }

    fn describe(&self) -> String {
        format!("ROUTER tcp://{}", self.local_addr())
    }
}

#[derive(Debug, Error)]
pub enum DispatcherFault {
    #[error("frontend failed: {0}")]
    Frontend(#[from] io::Error),

    #[error("frontend closed")]
    FrontendClosed,

    #[error("worker endpoint closed")]
    BackendClosed,
}

/// The dispatcher's view of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Connected, READY not seen yet.
    Connecting,
    Idle,
    Busy(RequestId),
    /// Disconnected or unreachable; kept only until it is forgotten.
    Terminated,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages accepted from the frontend.
    pub received: u64,
    /// Requests handed to a worker.
    pub dispatched: u64,
    /// Worker replies forwarded to the frontend.
    pub replied: u64,
    /// Requests answered with the failure text because their worker died.
    pub rejected_in_flight: u64,
    /// Messages over the size limit, answered without a worker.
    pub rejected_oversized: u64,
    /// Queued requests discarded because their client disconnected.
    pub abandoned: u64,
}

#[derive(Debug)]
struct PendingRequest {
    id: RequestId,
    parts: InprocMessage,
}

#[derive(Debug)]
struct WorkerSlot {
    tx: Sender<InprocMessage>,
    state: WorkerState,
    // Client owed a reply while Busy.
    client: Option<Bytes>,
}

enum Event {
    Client(io::Result<Option<RouterEvent>>),
    Worker(Option<InprocEvent>),
    Shutdown,
}

pub struct Dispatcher<F: Frontend> {
    frontend: F,
    backend: InprocListener,
    shutdown: Receiver<()>,
    workers: HashMap<PeerId, WorkerSlot>,
    idle: VecDeque<PeerId>,
    pending: FairQueue<Bytes, PendingRequest>,
    next_request: RequestId,
    max_frame_bytes: usize,
    stats: DispatchStats,
}

impl<F: Frontend> Dispatcher<F> {
    /// `shutdown` fires on a message or when every sender is dropped.
    pub fn new(frontend: F, backend: InprocListener, shutdown: Receiver<()>) -> Self {
        Self {
            frontend,
            backend,
            shutdown,
            workers: HashMap::new(),
            idle: VecDeque::new(),
            pending: FairQueue::new(),
            next_request: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            stats: DispatchStats::default(),
        }
    }

    /// Limit quoted in the rejection of an oversized message.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn worker_state(&self, peer: PeerId) -> Option<WorkerState> {
        self.workers.get(&peer).map(|slot| slot.state)
    }

    pub fn idle_workers(&self) -> usize {
        self.idle.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Requests queued for one client.
    pub fn pending_for(&self, identity: &Bytes) -> usize {
        self.pending.queued_for(identity)
    }

    /// Run until shutdown (`Ok`) or until the frontend or backend fails.
    pub async fn run(mut self) -> Result<DispatchStats, DispatcherFault> {
        use futures::{pin_mut, select, FutureExt};

        info!(
            frontend = %self.frontend.describe(),
            backend = %self.backend.endpoint(),
            "dispatcher running"
        );

        loop {
            let event = {
                let client = self.frontend.recv_event().fuse();
                let worker = self.backend.recv().fuse();
                let stop = self.shutdown.recv_async().fuse();
                pin_mut!(client, worker, stop);

                select! {
                    msg = client => Event::Client(msg),
                    ev = worker => Event::Worker(ev),
                    _ = stop => Event::Shutdown,
                }
            };

            match event {
                Event::Client(Ok(Some(ev))) => {
                    if let Some(reply) = self.on_client_event(ev) {
                        self.frontend.send_multipart(reply).await?;
                    }
                }
                Event::Client(Ok(None)) => return Err(DispatcherFault::FrontendClosed),
                Event::Client(Err(e)) => return Err(DispatcherFault::Frontend(e)),
                Event::Worker(Some(ev)) => {
                    if let Some(reply) = self.on_worker_event(ev) {
                        self.frontend.send_multipart(reply).await?;
                    }
                }
                Event::Worker(None) => return Err(DispatcherFault::BackendClosed),
                Event::Shutdown => break,
            }
        }

        info!(
            received = self.stats.received,
            dispatched = self.stats.dispatched,
            replied = self.stats.replied,
            rejected_in_flight = self.stats.rejected_in_flight,
            rejected_oversized = self.stats.rejected_oversized,
            pending = self.pending.len(),
            waiting_clients = self.pending.active_keys(),
            "dispatcher stopped"
        );
        Ok(self.stats)
    }

    /// Apply one frontend event. Returns a message for the frontend, if any.
    pub fn on_client_event(&mut self, event: RouterEvent) -> Option<Vec<Bytes>> {
        match event {
            RouterEvent::Message(parts) => {
                self.on_client_message(parts);
                None
            }
            RouterEvent::Oversized { identity, size } => {
                self.stats.received += 1;
                self.stats.rejected_oversized += 1;
                let err = DecodeError::FrameTooLarge {
                    size: usize::try_from(size).unwrap_or(usize::MAX),
                    limit: self.max_frame_bytes,
                };
                warn!(client = %fmt_identity(&identity), error = %err, "rejecting request");
                Some(encode_reply(identity, reject_text(&err)))
            }
            RouterEvent::Disconnected(identity) => {
                let dropped = self.pending.remove_key(&identity);
                if !dropped.is_empty() {
                    debug!(
                        client = %fmt_identity(&identity),
                        requests = dropped.len(),
                        "client gone, queued requests discarded"
                    );
                    self.stats.abandoned += dropped.len() as u64;
                }
                None
            }
        }
    }

    /// Queue a client request under its identity and dispatch what we can.
    pub fn on_client_message(&mut self, parts: Vec<Bytes>) {
        let Some(identity) = parts.first().cloned() else {
            return;
        };
        self.stats.received += 1;
        let id = self.next_request;
        self.next_request += 1;

        trace!(request = id, client = %fmt_identity(&identity), "request queued");
        self.pending.push(identity, PendingRequest { id, parts });
        self.dispatch();
    }

    /// Apply one backend event. Returns a message for the frontend, if any.
    pub fn on_worker_event(&mut self, event: InprocEvent) -> Option<Vec<Bytes>> {
        match event {
            InprocEvent::Connected { peer, tx } => {
                debug!(worker = peer, "worker connected");
                self.workers.insert(
                    peer,
                    WorkerSlot {
                        tx,
                        state: WorkerState::Connecting,
                        client: None,
                    },
                );
                None
            }

            InprocEvent::Message { peer, parts } if is_ready(&parts) => {
                self.mark_idle(peer);
                self.dispatch();
                None
            }

            InprocEvent::Message { peer, parts } => {
                let Some(slot) = self.workers.get_mut(&peer) else {
                    warn!(worker = peer, "reply from unknown worker dropped");
                    return None;
                };
                if !matches!(slot.state, WorkerState::Busy(_)) {
                    warn!(worker = peer, state = ?slot.state, "unsolicited reply dropped");
                    return None;
                }
                slot.client = None;
                self.stats.replied += 1;
                self.mark_idle(peer);
                self.dispatch();
                Some(parts)
            }

            InprocEvent::Disconnected { peer } => self.on_worker_lost(peer),
        }
    }

    fn on_worker_lost(&mut self, peer: PeerId) -> Option<Vec<Bytes>> {
        let mut slot = self.workers.remove(&peer)?;
        self.idle.retain(|p| *p != peer);

        let was = std::mem::replace(&mut slot.state, WorkerState::Terminated);
        match (was, slot.client.take()) {
            (WorkerState::Busy(request), Some(client)) => {
                warn!(
                    worker = peer,
                    request,
                    client = %fmt_identity(&client),
                    "worker terminated with a request in flight"
                );
                self.stats.rejected_in_flight += 1;
                Some(encode_reply(client, WORKER_LOST))
            }
            _ => {
                debug!(worker = peer, "worker disconnected");
                None
            }
        }
    }

    fn mark_idle(&mut self, peer: PeerId) {
        let Some(slot) = self.workers.get_mut(&peer) else {
            return;
        };
        if matches!(slot.state, WorkerState::Idle | WorkerState::Terminated) {
            return;
        }
        slot.state = WorkerState::Idle;
        self.idle.push_back(peer);
    }

    /// Hand pending requests to idle workers, oldest idle first.
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let Some(peer) = self.idle.pop_front() else {
                return;
            };
            let Some(slot) = self.workers.get_mut(&peer) else {
                continue;
            };
            let Some((client, request)) = self.pending.pop() else {
                self.idle.push_front(peer);
                return;
            };

            match slot.tx.send(request.parts) {
                Ok(()) => {
                    trace!(
                        request = request.id,
                        worker = peer,
                        client = %fmt_identity(&client),
                        "request dispatched"
                    );
                    slot.state = WorkerState::Busy(request.id);
                    slot.client = Some(client);
                    self.stats.dispatched += 1;
                }
                Err(flume::SendError(parts)) => {
                    // Worker vanished; its Disconnected event is on the way.
                    slot.state = WorkerState::Terminated;
                    self.pending.push_front(
                        client,
                        PendingRequest {
                            id: request.id,
                            parts,
                        },
                    );
                }
            }
        }
    }
}

fn is_ready(parts: &[Bytes]) -> bool {
    matches!(parts, [only] if &only[..] == WORKER_READY)
}
