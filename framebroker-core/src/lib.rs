//! framebroker core
//!
//! Transport-agnostic building blocks shared by the protocol and broker crates:
//! - In-process named endpoints (`inproc`)
//! - ROUTER hub + identity → peer table (`router`)
//! - Per-identity fair queue (`fair_queue`)
//! - Transport options (`options`)
//! - TCP socket tuning (`tcp`)
//! - Identity formatting for logs (`identity`)

// The tcp module needs raw fd/socket access for socket configuration
#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::must_use_candidate)]

pub mod fair_queue;
pub mod identity;
pub mod inproc;
pub mod options;
pub mod router;
pub mod tcp;

pub mod prelude {
    pub use crate::fair_queue::FairQueue;
    pub use crate::identity::fmt_identity;
    pub use crate::inproc::{
        bind_inproc, connect_inproc, unbind_inproc, InprocConnection, InprocEvent,
        InprocListener, InprocMessage, PeerId,
    };
    pub use crate::options::TransportOptions;
    pub use crate::router::{HubEvent, PeerCmd, RouterCmd, RouterHub};
    pub use crate::tcp::set_nodelay;
}
