//! Broker task: wires the ROUTER frontend, the dispatcher and the worker pool
//! together on a dedicated thread.
//!
//! Startup order is listener, worker endpoint, pool, dispatcher. Teardown runs
//! the other way round: the dispatcher returns and releases every worker
//! queue, the endpoint unbinds, and the pool is joined once its workers have
//! drained.

use crate::config::{BrokerConfig, ConfigError};
use crate::dispatcher::{DispatchStats, Dispatcher, DispatcherFault};
use crate::pool::{PoolConfig, PoolError, PoolMonitor, PoolReport, WorkerPool};
use crate::worker::{AcceptFrames, FrameHandler};
use compio::runtime::Runtime;
use flume::{Receiver, Sender};
use framebroker_core::inproc::{bind_inproc, InprocListener};
use framebroker_zmtp::RouterSocket;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build runtime: {0}")]
    Runtime(io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to bind worker endpoint {endpoint}: {source}")]
    Endpoint { endpoint: String, source: io::Error },

    #[error("dispatcher stopped: {0}")]
    Dispatcher(#[from] DispatcherFault),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("broker thread panicked")]
    ThreadPanicked,

    #[error("broker did not start")]
    NotStarted,
}

/// What a broker did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BrokerReport {
    pub dispatch: DispatchStats,
    pub pool: PoolReport,
}

pub struct Broker {
    config: BrokerConfig,
    handler: Arc<dyn FrameHandler>,
}

impl Broker {
    /// Broker whose workers accept every well-formed frame.
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_handler(config, Arc::new(AcceptFrames))
    }

    pub fn with_handler(config: BrokerConfig, handler: Arc<dyn FrameHandler>) -> Self {
        Self { config, handler }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Start the broker thread and wait until it listens (or fails to).
    pub fn spawn(self) -> Result<BrokerHandle, BrokerError> {
        self.config.validate()?;

        let (ready_tx, ready_rx) = flume::bounded(1);
        let (shutdown_tx, shutdown_rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::bounded::<()>(1);

        let Self { config, handler } = self;
        let thread = thread::Builder::new()
            .name("framebroker-broker".to_string())
            .spawn(move || {
                // Dropped when the thread ends, waking `finished()`.
                let _done = done_tx;
                run_broker(config, handler, shutdown_rx, ready_tx)
            })
            .map_err(BrokerError::Runtime)?;

        match ready_rx.recv() {
            Ok(Ok((local_addr, pool))) => Ok(BrokerHandle {
                local_addr,
                pool,
                shutdown: shutdown_tx,
                done: done_rx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => match thread.join() {
                Ok(Err(e)) => Err(e),
                Ok(Ok(_)) => Err(BrokerError::NotStarted),
                Err(_) => Err(BrokerError::ThreadPanicked),
            },
        }
    }
}

/// Handle to a running broker.
///
/// Dropping it asks the broker to stop without waiting for it.
pub struct BrokerHandle {
    local_addr: SocketAddr,
    pool: PoolMonitor,
    shutdown: Sender<()>,
    done: Receiver<()>,
    thread: Option<JoinHandle<Result<BrokerReport, BrokerError>>>,
}

impl BrokerHandle {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Worker pool counters so far.
    pub fn pool_report(&self) -> PoolReport {
        self.pool.report()
    }

    /// Ask the dispatcher to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Resolves when the broker thread has ended, for any reason.
    pub async fn finished(&self) {
        let _ = self.done.recv_async().await;
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_disconnected()
    }

    /// Stop the broker and wait for it.
    pub fn join(mut self) -> Result<BrokerReport, BrokerError> {
        self.shutdown();
        let thread = self.thread.take().ok_or(BrokerError::NotStarted)?;
        thread.join().map_err(|_| BrokerError::ThreadPanicked)?
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_broker(
    config: BrokerConfig,
    handler: Arc<dyn FrameHandler>,
    shutdown: Receiver<()>,
    ready: Sender<Result<(SocketAddr, PoolMonitor), BrokerError>>,
) -> Result<BrokerReport, BrokerError> {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(BrokerError::Runtime(e)));
            return Err(BrokerError::NotStarted);
        }
    };

    let (outcome, pool) = runtime.block_on(async move {
        let (frontend, backend, pool) = match start(&config, handler).await {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "broker failed to start");
                let _ = ready.send(Err(e));
                return Err(BrokerError::NotStarted);
            }
        };

        info!(
            addr = %frontend.local_addr(),
            backend = %config.backend_endpoint,
            workers = config.workers,
            respawn = config.respawn_workers,
            "broker started"
        );
        let _ = ready.send(Ok((frontend.local_addr(), pool.monitor())));

        // Consumes the dispatcher: on return every worker queue is closed and
        // the endpoint is unbound.
        let outcome = Dispatcher::new(frontend, backend, shutdown)
            .with_max_frame_bytes(config.max_frame_bytes)
            .run()
            .await;
        pool.stop();
        Ok((outcome, pool))
    })?;

    if let Err(fault) = &outcome {
        error!(error = %fault, "dispatcher failed");
    }
    let pool = pool.join()?;
    let dispatch = outcome?;

    info!(
        received = dispatch.received,
        replied = dispatch.replied,
        faulted = pool.faulted,
        "broker stopped"
    );
    Ok(BrokerReport { dispatch, pool })
}

async fn start(
    config: &BrokerConfig,
    handler: Arc<dyn FrameHandler>,
) -> Result<(RouterSocket, InprocListener, WorkerPool), BrokerError> {
    let addr = config.listen_addr();
    let frontend = RouterSocket::bind_with_options(addr, config.transport.clone())
        .await
        .map_err(|source| BrokerError::Bind { addr, source })?;

    let backend = bind_inproc(&config.backend_endpoint).map_err(|source| BrokerError::Endpoint {
        endpoint: config.backend_endpoint.clone(),
        source,
    })?;

    let pool_config = PoolConfig {
        workers: config.workers,
        endpoint: config.backend_endpoint.clone(),
        respawn: config.respawn_workers,
        max_frame_bytes: config.max_frame_bytes,
    };
    let pool = WorkerPool::start(pool_config, handler)?;
    Ok((frontend, backend, pool))
}
