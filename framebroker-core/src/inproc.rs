//! In-process transport between threads of the same process.
//!
//! An `inproc://name` endpoint is bound once and connected to any number of
//! times. It never touches the network: messages are `Vec<Bytes>` moved
//! through `flume` channels.
//!
//! The bound side sees every connection as a stream of [`InprocEvent`]s:
//!
//! ```text
//! Connected { peer, tx }   - a new connection, `tx` reaches its private inbox
//! Message   { peer, parts } - a multipart message sent by that connection
//! Disconnected { peer }     - the connection was dropped
//! ```
//!
//! The registry is process-global; names must be unique while bound.
//!
//! # Usage
//!
//! ```rust
//! use framebroker_core::inproc::{bind_inproc, connect_inproc, InprocEvent};
//! use bytes::Bytes;
//!
//! # fn example() -> std::io::Result<()> {
//! let listener = bind_inproc("inproc://doc-example")?;
//! let conn = connect_inproc("inproc://doc-example")?;
//! conn.send(vec![Bytes::from_static(b"hello")])?;
//!
//! match listener.try_recv() {
//!     Some(InprocEvent::Connected { peer, .. }) => assert_eq!(peer, conn.peer_id()),
//!     other => panic!("unexpected event: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Message type for inproc transport (multipart message)
pub type InprocMessage = Vec<Bytes>;

/// Process-unique id of one inproc connection.
pub type PeerId = u64;

/// How often a blocked receiver re-checks whether the bound side still exists.
const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// Events delivered to the bound side of an endpoint.
#[derive(Debug)]
pub enum InprocEvent {
    /// A peer connected. `tx` delivers messages into that peer's inbox.
    Connected {
        peer: PeerId,
        tx: Sender<InprocMessage>,
    },
    /// A peer sent a message.
    Message { peer: PeerId, parts: InprocMessage },
    /// A peer went away.
    Disconnected { peer: PeerId },
}

/// Global registry of inproc endpoints
static INPROC_REGISTRY: once_cell::sync::Lazy<DashMap<String, Sender<InprocEvent>>> =
    once_cell::sync::Lazy::new(DashMap::new);

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Bound side of an inproc endpoint.
///
/// Dropping the listener unbinds the name.
#[derive(Debug)]
pub struct InprocListener {
    name: String,
    tx: Sender<InprocEvent>,
    events: Receiver<InprocEvent>,
}

impl InprocListener {
    /// Full endpoint URI, e.g. `inproc://backend`.
    pub fn endpoint(&self) -> String {
        format!("{PREFIX}{}", self.name)
    }

    /// Wait for the next event.
    ///
    /// Never returns `None` while the listener is alive, since it keeps the
    /// registry entry (and with it a sender) in place.
    pub async fn recv(&self) -> Option<InprocEvent> {
        self.events.recv_async().await.ok()
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&self) -> Option<InprocEvent> {
        self.events.try_recv().ok()
    }

    /// Blocking receive with a deadline.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<InprocEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        // Only remove our own binding; the name may have been rebound after
        // an explicit unbind.
        INPROC_REGISTRY.remove_if(&self.name, |_, tx| tx.same_channel(&self.tx));
    }
}

/// Connected side of an inproc endpoint.
///
/// Dropping the connection notifies the bound side with
/// [`InprocEvent::Disconnected`].
#[derive(Debug)]
pub struct InprocConnection {
    peer: PeerId,
    to_bound: Sender<InprocEvent>,
    inbox: Receiver<InprocMessage>,
}

impl InprocConnection {
    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    /// Send a multipart message to the bound side.
    ///
    /// # Errors
    ///
    /// `BrokenPipe` if the bound side has been dropped.
    pub fn send(&self, parts: InprocMessage) -> io::Result<()> {
        self.to_bound
            .send(InprocEvent::Message {
                peer: self.peer,
                parts,
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "inproc endpoint closed"))
    }

    /// Block until the bound side delivers a message.
    ///
    /// # Errors
    ///
    /// `ConnectionAborted` once the bound side has released this connection
    /// or has been dropped.
    pub fn recv(&self) -> io::Result<InprocMessage> {
        loop {
            match self.inbox.recv_timeout(LIVENESS_POLL) {
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => {
                    if self.to_bound.is_disconnected() {
                        return Err(aborted());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(aborted()),
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// `TimedOut` when nothing arrived in time, `ConnectionAborted` when the
    /// bound side is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> io::Result<InprocMessage> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) if !self.to_bound.is_disconnected() => Err(
                io::Error::new(io::ErrorKind::TimedOut, "inproc receive timed out"),
            ),
            Err(_) => Err(aborted()),
        }
    }
}

impl Drop for InprocConnection {
    fn drop(&mut self) {
        let _ = self
            .to_bound
            .send(InprocEvent::Disconnected { peer: self.peer });
    }
}

fn aborted() -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "inproc endpoint released this connection",
    )
}

/// Bind to an inproc endpoint.
///
/// # Errors
///
/// - `InvalidInput` if the endpoint doesn't start with `inproc://` or the name is empty
/// - `AddrInUse` if the endpoint is already bound
pub fn bind_inproc(endpoint: &str) -> io::Result<InprocListener> {
    let name = validate_and_extract_name(endpoint)?;
    let (tx, events) = flume::unbounded();

    match INPROC_REGISTRY.entry(name.to_string()) {
        dashmap::mapref::entry::Entry::Occupied(_) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("inproc endpoint '{name}' is already bound"),
        )),
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(tx.clone());
            Ok(InprocListener {
                name: name.to_string(),
                tx,
                events,
            })
        }
    }
}

/// Connect to a bound inproc endpoint.
///
/// # Errors
///
/// - `InvalidInput` for a malformed endpoint
/// - `NotFound` if nothing is bound under that name (bind before connect)
pub fn connect_inproc(endpoint: &str) -> io::Result<InprocConnection> {
    let name = validate_and_extract_name(endpoint)?;

    let to_bound = INPROC_REGISTRY
        .get(name)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("inproc endpoint '{name}' not found (must bind before connect)"),
            )
        })?;

    let peer = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, inbox) = flume::unbounded();

    to_bound
        .send(InprocEvent::Connected { peer, tx })
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("inproc endpoint '{name}' is shutting down"),
            )
        })?;

    Ok(InprocConnection {
        peer,
        to_bound,
        inbox,
    })
}

/// Remove an endpoint from the registry.
///
/// The listener stays usable for already connected peers; new connects fail.
pub fn unbind_inproc(endpoint: &str) -> io::Result<()> {
    let name = validate_and_extract_name(endpoint)?;
    INPROC_REGISTRY.remove(name);
    Ok(())
}

/// Whether a name is currently bound.
pub fn is_bound(endpoint: &str) -> bool {
    validate_and_extract_name(endpoint)
        .map(|name| INPROC_REGISTRY.contains_key(name))
        .unwrap_or(false)
}

const PREFIX: &str = "inproc://";

fn validate_and_extract_name(endpoint: &str) -> io::Result<&str> {
    let name = endpoint.strip_prefix(PREFIX).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("inproc endpoint must start with '{PREFIX}', got: '{endpoint}'"),
        )
    })?;

    if name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "inproc endpoint name cannot be empty",
        ));
    }

    Ok(name)
}
