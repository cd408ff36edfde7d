//! # framebroker
//!
//! A load-balancing broker for image frames.
//!
//! Clients connect over ZMTP (any ZeroMQ DEALER or REQ socket works) and send
//! `["", width, height, payload]`. The broker spreads requests fairly across a
//! fixed pool of worker threads and routes each reply back to the client that
//! sent the request.
//!
//! ```text
//!  clients ──tcp──► RouterSocket ──► Dispatcher ──inproc──► Worker × N
//!     ▲                                  │                     │
//!     └──────────── reply by identity ◄──┴──── reply ◄─────────┘
//! ```
//!
//! ## Layers
//!
//! - [`protocol`]: request decoding and reply encoding (pure)
//! - [`worker`]: one thread, one request at a time, pluggable [`FrameHandler`]
//! - [`pool`]: worker threads plus a supervisor that replaces faulted workers
//! - [`dispatcher`]: credit-based, per-client fair queue between both sides
//! - [`broker`]: wires everything onto a dedicated compio runtime thread
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use framebroker::{Broker, BrokerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = Broker::new(BrokerConfig::new(5555).with_workers(4)).spawn()?;
//! println!("listening on {}", handle.local_addr());
//!
//! // ... later
//! let report = handle.join()?;
//! println!("{} requests served", report.dispatch.replied);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod worker;

pub use broker::{Broker, BrokerError, BrokerHandle, BrokerReport};
pub use config::{BrokerConfig, Cli, ConfigError};
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherFault, Frontend, WorkerState};
pub use pool::{PoolConfig, PoolError, PoolMonitor, PoolReport, WorkerPool};
pub use protocol::{decode_request, encode_reply, DecodeError, Frame, Request, ACK_OK};
pub use worker::{AcceptFrames, FrameHandler, Worker, WorkerFault, WorkerId};

pub use bytes::Bytes;
