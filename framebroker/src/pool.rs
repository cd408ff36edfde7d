//! Worker pool and its supervisor.
//!
//! Every worker runs on its own joinable OS thread. The supervisor thread owns
//! the join handles and learns about each exit through a channel:
//!
//! - a clean exit (dispatcher gone) just retires the worker
//! - a fault (handler error, transport error, panic) is counted and, when
//!   respawning is enabled and the pool is not stopping, replaced by a fresh
//!   worker on the same endpoint
//!
//! Panics are caught by an [`ExitGuard`] that reports a fault unless the worker
//! returned normally.

use crate::worker::{FrameHandler, Worker, WorkerFault, WorkerId};
use flume::{Receiver, Sender};
use hashbrown::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// What the pool is asked to run.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub endpoint: String,
    pub respawn: bool,
    pub max_frame_bytes: usize,
}

/// Counters returned by [`WorkerPool::join`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    /// Workers started, including replacements.
    pub spawned: usize,
    pub faulted: usize,
    pub respawned: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    spawned: AtomicUsize,
    faulted: AtomicUsize,
    respawned: AtomicUsize,
}

/// Live view of a pool's counters, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct PoolMonitor {
    counters: Arc<PoolCounters>,
}

impl PoolMonitor {
    pub fn report(&self) -> PoolReport {
        PoolReport {
            spawned: self.counters.spawned.load(Ordering::SeqCst),
            faulted: self.counters.faulted.load(Ordering::SeqCst),
            respawned: self.counters.respawned.load(Ordering::SeqCst),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {id} could not connect: {source}")]
    Connect { id: WorkerId, source: io::Error },

    #[error("failed to spawn thread: {0}")]
    Spawn(io::Error),

    #[error("pool supervisor panicked")]
    SupervisorPanicked,
}

struct WorkerExit {
    id: WorkerId,
    fault: Option<WorkerFault>,
}

/// Reports a worker's exit to the supervisor, as a fault unless disarmed by
/// [`finish`](Self::finish).
struct ExitGuard {
    id: WorkerId,
    tx: Sender<WorkerExit>,
    armed: bool,
}

impl ExitGuard {
    fn new(id: WorkerId, tx: Sender<WorkerExit>) -> Self {
        Self { id, tx, armed: true }
    }

    fn finish(mut self, outcome: Result<(), WorkerFault>) {
        self.armed = false;
        let _ = self.tx.send(WorkerExit {
            id: self.id,
            fault: outcome.err(),
        });
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.tx.send(WorkerExit {
                id: self.id,
                fault: Some(WorkerFault::Panicked(
                    "worker thread unwound while serving a request".to_string(),
                )),
            });
        }
    }
}

pub struct WorkerPool {
    stopping: Arc<AtomicBool>,
    monitor: PoolMonitor,
    supervisor: JoinHandle<PoolReport>,
}

impl WorkerPool {
    /// Connect and start `config.workers` workers, then the supervisor.
    ///
    /// The endpoint must already be bound.
    pub fn start(config: PoolConfig, handler: Arc<dyn FrameHandler>) -> Result<Self, PoolError> {
        let (exit_tx, exit_rx) = flume::unbounded();
        let stopping = Arc::new(AtomicBool::new(false));
        let monitor = PoolMonitor::default();

        let mut supervisor = Supervisor {
            config,
            handler,
            exit_tx,
            exit_rx,
            stopping: Arc::clone(&stopping),
            handles: HashMap::new(),
            next_id: 0,
            monitor: monitor.clone(),
        };
        for _ in 0..supervisor.config.workers {
            supervisor.spawn_worker()?;
        }

        let workers = supervisor.config.workers;
        let supervisor = thread::Builder::new()
            .name("framebroker-supervisor".to_string())
            .spawn(move || supervisor.run())
            .map_err(PoolError::Spawn)?;

        info!(workers, "worker pool started");
        Ok(Self {
            stopping,
            monitor,
            supervisor,
        })
    }

    pub fn monitor(&self) -> PoolMonitor {
        self.monitor.clone()
    }

    /// Stop replacing faulted workers. Running workers are not interrupted.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Wait for every worker to exit.
    ///
    /// Workers exit once the dispatcher releases them, so the dispatcher must
    /// be gone (or going) before this is called.
    pub fn join(self) -> Result<PoolReport, PoolError> {
        self.stop();
        self.supervisor
            .join()
            .map_err(|_| PoolError::SupervisorPanicked)
    }
}

struct Supervisor {
    config: PoolConfig,
    handler: Arc<dyn FrameHandler>,
    exit_tx: Sender<WorkerExit>,
    exit_rx: Receiver<WorkerExit>,
    stopping: Arc<AtomicBool>,
    handles: HashMap<WorkerId, JoinHandle<()>>,
    next_id: WorkerId,
    monitor: PoolMonitor,
}

impl Supervisor {
    fn spawn_worker(&mut self) -> Result<WorkerId, PoolError> {
        let id = self.next_id;
        self.next_id += 1;

        let worker = Worker::connect(
            id,
            &self.config.endpoint,
            Arc::clone(&self.handler),
            self.config.max_frame_bytes,
        )
        .map_err(|source| PoolError::Connect { id, source })?;

        let tx = self.exit_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("framebroker-worker-{id}"))
            .spawn(move || {
                let guard = ExitGuard::new(id, tx);
                guard.finish(worker.run());
            })
            .map_err(PoolError::Spawn)?;

        self.handles.insert(id, handle);
        PoolMonitor::bump(&self.monitor.counters.spawned);
        Ok(id)
    }

    fn run(mut self) -> PoolReport {
        while !self.handles.is_empty() {
            // `self.exit_tx` keeps the channel open, so this only returns
            // when a worker reports.
            let Ok(exit) = self.exit_rx.recv() else {
                break;
            };

            if let Some(handle) = self.handles.remove(&exit.id) {
                let _ = handle.join();
            }

            let Some(fault) = exit.fault else {
                debug!(worker = exit.id, "worker exited");
                continue;
            };

            PoolMonitor::bump(&self.monitor.counters.faulted);
            error!(worker = exit.id, error = %fault, "worker faulted");

            if !self.config.respawn || self.stopping.load(Ordering::SeqCst) {
                warn!(
                    remaining = self.handles.len(),
                    "worker not replaced, pool capacity reduced"
                );
                continue;
            }
            match self.spawn_worker() {
                Ok(id) => {
                    PoolMonitor::bump(&self.monitor.counters.respawned);
                    info!(worker = id, replaces = exit.id, "worker respawned");
                }
                Err(e) => warn!(error = %e, "could not respawn worker"),
            }
        }

        let report = self.monitor.report();
        info!(
            spawned = report.spawned,
            faulted = report.faulted,
            respawned = report.respawned,
            "worker pool stopped"
        );
        report
    }
}
