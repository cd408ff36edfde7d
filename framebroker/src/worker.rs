//! Worker: one OS thread, one inproc connection, one request at a time.
//!
//! ```text
//! connect ─► send READY ─► recv request ─► decode ─► handler ─► send reply ─┐
//!                              ▲                                           │
//!                              └───────────────────────────────────────────┘
//! ```
//!
//! Decode failures are answered with a rejection and the loop continues. A
//! handler error (or panic) ends the worker; the dispatcher notices the
//! disconnect and answers the in-flight request on its behalf.

use crate::protocol::{
    decode_request_with_limit, encode_reply, reject_text, reply_identity, Request, ACK_OK,
};
use bytes::Bytes;
use framebroker_core::identity::fmt_identity;
use framebroker_core::inproc::{connect_inproc, InprocConnection};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// One-frame message a worker sends when it is ready for its first request.
pub const WORKER_READY: &[u8] = b"\x01";

/// Worker identifier, unique within one pool (replacements get fresh ids).
pub type WorkerId = usize;

/// Errors that end a worker.
#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error("frame handler failed: {0}")]
    Handler(String),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("distribution channel failed: {0}")]
    Transport(#[from] io::Error),
}

/// What a worker does with a decoded frame.
///
/// Shared by every worker of a pool, so implementations take `&self`.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle(&self, worker: WorkerId, request: &Request) -> Result<(), WorkerFault>;
}

impl<F> FrameHandler for F
where
    F: Fn(WorkerId, &Request) -> Result<(), WorkerFault> + Send + Sync + 'static,
{
    fn handle(&self, worker: WorkerId, request: &Request) -> Result<(), WorkerFault> {
        self(worker, request)
    }
}

/// Default handler: log the frame and accept it unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptFrames;

impl FrameHandler for AcceptFrames {
    fn handle(&self, worker: WorkerId, request: &Request) -> Result<(), WorkerFault> {
        info!(
            worker,
            client = %fmt_identity(&request.identity),
            width = request.frame.width(),
            height = request.frame.height(),
            bytes = request.frame.len(),
            "frame accepted"
        );
        Ok(())
    }
}

pub struct Worker {
    id: WorkerId,
    conn: InprocConnection,
    handler: Arc<dyn FrameHandler>,
    max_frame_bytes: usize,
}

impl Worker {
    /// Connect to the distribution endpoint. The endpoint must be bound.
    pub fn connect(
        id: WorkerId,
        endpoint: &str,
        handler: Arc<dyn FrameHandler>,
        max_frame_bytes: usize,
    ) -> io::Result<Self> {
        let conn = connect_inproc(endpoint)?;
        debug!(worker = id, %endpoint, "worker connected");
        Ok(Self {
            id,
            conn,
            handler,
            max_frame_bytes,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Serve requests until the dispatcher goes away or a fault occurs.
    ///
    /// `Ok(())` is a clean shutdown.
    pub fn run(self) -> Result<(), WorkerFault> {
        if self.conn.send(vec![Bytes::from_static(WORKER_READY)]).is_err() {
            debug!(worker = self.id, "dispatcher gone before READY");
            return Ok(());
        }
        debug!(worker = self.id, "worker ready");

        loop {
            let parts = match self.conn.recv() {
                Ok(parts) => parts,
                Err(e) if is_shutdown(&e) => {
                    debug!(worker = self.id, "distribution channel closed, worker exiting");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let reply = self.process(parts)?;
            if let Err(e) = self.conn.send(reply) {
                if is_shutdown(&e) {
                    return Ok(());
                }
                return Err(e.into());
            }
        }
    }

    /// Turn one routed request into its reply.
    pub fn process(&self, parts: Vec<Bytes>) -> Result<Vec<Bytes>, WorkerFault> {
        let identity = reply_identity(&parts).unwrap_or_default();
        trace!(worker = self.id, parts = parts.len(), "request received");

        match decode_request_with_limit(parts, self.max_frame_bytes) {
            Ok(request) => {
                self.handler.handle(self.id, &request)?;
                Ok(encode_reply(request.identity, ACK_OK))
            }
            Err(e) => {
                warn!(
                    worker = self.id,
                    client = %fmt_identity(&identity),
                    error = %e,
                    "rejecting request"
                );
                Ok(encode_reply(identity, reject_text(&e)))
            }
        }
    }
}

fn is_shutdown(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
    use framebroker_core::inproc::{bind_inproc, InprocEvent};
    use std::time::Duration;

    fn request(payload_len: usize) -> Vec<Bytes> {
        vec![
            Bytes::from_static(b"cam"),
            Bytes::new(),
            Bytes::from_static(b"2"),
            Bytes::from_static(b"1"),
            Bytes::from(vec![9u8; payload_len]),
        ]
    }

    fn worker(endpoint: &str, handler: Arc<dyn FrameHandler>) -> Worker {
        Worker::connect(0, endpoint, handler, DEFAULT_MAX_FRAME_BYTES).unwrap()
    }

    #[test]
    fn valid_frame_is_acknowledged() {
        let _listener = bind_inproc("inproc://worker-test-ack").unwrap();
        let w = worker("inproc://worker-test-ack", Arc::new(AcceptFrames));

        let reply = w.process(request(6)).unwrap();
        assert_eq!(reply, encode_reply(Bytes::from_static(b"cam"), ACK_OK));
    }

    #[test]
    fn short_payload_is_rejected_not_fatal() {
        let _listener = bind_inproc("inproc://worker-test-reject").unwrap();
        let w = worker("inproc://worker-test-reject", Arc::new(AcceptFrames));

        let reply = w.process(request(5)).unwrap();
        assert_eq!(&reply[0][..], b"cam");
        assert_eq!(
            &reply[2][..],
            b"request rejected: payload is 5 bytes, expected 6"
        );
    }

    #[test]
    fn handler_error_is_a_fault() {
        let _listener = bind_inproc("inproc://worker-test-fault").unwrap();
        let failing = |_: WorkerId, _: &Request| -> Result<(), WorkerFault> {
            Err(WorkerFault::Handler("boom".into()))
        };
        let w = worker("inproc://worker-test-fault", Arc::new(failing));

        assert!(matches!(
            w.process(request(6)),
            Err(WorkerFault::Handler(msg)) if msg == "boom"
        ));
    }

    #[test]
    fn run_announces_ready_and_exits_when_released() {
        let listener = bind_inproc("inproc://worker-test-run").unwrap();
        let w = worker("inproc://worker-test-run", Arc::new(AcceptFrames));
        let handle = std::thread::spawn(move || w.run());

        let tx = match listener.recv_timeout(Duration::from_secs(1)) {
            Some(InprocEvent::Connected { tx, .. }) => tx,
            other => panic!("expected Connected, got {other:?}"),
        };
        match listener.recv_timeout(Duration::from_secs(1)) {
            Some(InprocEvent::Message { parts, .. }) => {
                assert_eq!(parts, vec![Bytes::from_static(WORKER_READY)]);
            }
            other => panic!("expected READY, got {other:?}"),
        }

        tx.send(request(6)).unwrap();
        match listener.recv_timeout(Duration::from_secs(1)) {
            Some(InprocEvent::Message { parts, .. }) => assert_eq!(&parts[2][..], ACK_OK.as_bytes()),
            other => panic!("expected reply, got {other:?}"),
        }

        // Releasing the inbox sender is how the dispatcher retires a worker.
        drop(tx);
        assert!(handle.join().unwrap().is_ok());
    }
}
