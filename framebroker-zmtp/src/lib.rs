//! # framebroker ZMTP
//!
//! ZMTP 3.x wire protocol for the framebroker listener, interoperable with
//! libzmq DEALER and REQ clients.
//!
//! - **Codec**: incremental frame decoder, multipart encoder
//! - **Handshake**: greeting + READY exchange, NULL mechanism only
//! - **ROUTER**: listening socket that tags every message with the
//!   connection identity and routes replies by it
//! - **DEALER**: client socket for tools and tests
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use framebroker_zmtp::{DealerSocket, RouterSocket};
//!
//! #[compio::main]
//! async fn main() -> std::io::Result<()> {
//!     let router = RouterSocket::bind("127.0.0.1:0".parse().unwrap()).await?;
//!     let mut dealer = DealerSocket::connect(router.local_addr()).await?;
//!
//!     dealer.send(vec![Bytes::new(), Bytes::from("hi")]).await?;
//!     if let Some(mut msg) = router.recv().await? {
//!         msg.truncate(2);
//!         msg.push(Bytes::from("hello back"));
//!         router.send(msg).await?;
//!     }
//!     let _reply = dealer.recv().await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

pub mod codec;
pub mod command;
pub mod greeting;
pub mod handshake;
pub mod multipart;
mod peer;
pub mod socket_type;

mod dealer;
mod router;

pub use codec::{ZmtpDecoder, ZmtpError, ZmtpFrame};
pub use multipart::{Assembled, MultipartBuffer};
pub use dealer::DealerSocket;
pub use handshake::{perform_handshake, perform_handshake_with_timeout, HandshakeResult};
pub use router::{RouterEvent, RouterSocket};
pub use socket_type::SocketType;
