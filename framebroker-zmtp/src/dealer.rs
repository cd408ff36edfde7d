//! DEALER socket (client side).
//!
//! A single connection with sequential `send` / `recv`. Used by the demo
//! client and the integration tests to talk to a `RouterSocket` the way a
//! libzmq DEALER would.

use crate::codec::{encode_frame, encode_multipart, encoded_len, ZmtpDecoder, ZmtpError, FLAG_COMMAND};
use crate::command::{build_pong, parse_command, PING};
use crate::handshake::perform_handshake_with_timeout;
use crate::multipart::{Assembled, MultipartBuffer};
use crate::socket_type::SocketType;
use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWriteExt};
use compio::net::TcpStream;
use framebroker_core::options::TransportOptions;
use framebroker_core::tcp::set_nodelay;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, trace};

pub struct DealerSocket {
    stream: TcpStream,
    decoder: ZmtpDecoder,
    multipart: MultipartBuffer,
    recv_buf: BytesMut,
    options: TransportOptions,
}

impl DealerSocket {
    /// Connect without announcing an identity; the ROUTER assigns one.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        Self::connect_with_options(addr, None, TransportOptions::default()).await
    }

    /// Connect and announce `identity` (ZMQ_ROUTING_ID).
    pub async fn connect_with_identity(addr: SocketAddr, identity: &[u8]) -> io::Result<Self> {
        Self::connect_with_options(addr, Some(identity), TransportOptions::default()).await
    }

    pub async fn connect_with_options(
        addr: SocketAddr,
        identity: Option<&[u8]>,
        options: TransportOptions,
    ) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        if options.tcp_nodelay {
            set_nodelay(&stream, true)?;
        }

        let hs = perform_handshake_with_timeout(
            &mut stream,
            SocketType::Dealer,
            identity,
            options.handshake_deadline(),
        )
        .await?;
        debug!(%addr, peer = %hs.peer_socket_type, "DEALER connected");

        Ok(Self {
            stream,
            decoder: ZmtpDecoder::with_max_frame_size(options.max_message_bytes),
            multipart: MultipartBuffer::new(options.max_message_frames, options.max_message_bytes),
            recv_buf: BytesMut::with_capacity(options.read_buffer_size),
            options,
        })
    }

    /// Send one multipart message.
    pub async fn send(&mut self, msg: Vec<Bytes>) -> io::Result<()> {
        if msg.is_empty() {
            return Ok(());
        }
        let mut out = Vec::with_capacity(encoded_len(&msg));
        encode_multipart(&msg, &mut out);
        let BufResult(res, _) = self.stream.write_all(out).await;
        res
    }

    /// Receive the next multipart message. `Ok(None)` when the peer closed
    /// the connection.
    pub async fn recv(&mut self) -> io::Result<Option<Vec<Bytes>>> {
        loop {
            while let Some(frame) = self.decoder.decode(&mut self.recv_buf)? {
                if frame.is_command() {
                    self.answer_command(&frame.payload).await?;
                    continue;
                }
                match self.multipart.push_frame(frame)? {
                    Some(Assembled::Message(msg)) => return Ok(Some(msg)),
                    Some(Assembled::Oversized { .. }) => {
                        return Err(ZmtpError::MessageTooLarge {
                            max: self.options.max_message_bytes,
                        }
                        .into());
                    }
                    None => {}
                }
            }

            let chunk = Vec::with_capacity(self.options.read_buffer_size);
            let BufResult(res, chunk) = self.stream.read(chunk).await;
            if res? == 0 {
                trace!("DEALER connection closed by peer");
                return Ok(None);
            }
            self.recv_buf.extend_from_slice(&chunk);
        }
    }

    /// `recv` bounded by `limit`; times out with `ErrorKind::TimedOut`.
    ///
    /// Bytes of a partially received message may be lost on timeout, so a
    /// timed-out socket should be dropped.
    pub async fn recv_timeout(&mut self, limit: Duration) -> io::Result<Option<Vec<Bytes>>> {
        compio::time::timeout(limit, self.recv())
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Receive operation timed out after {limit:?}"),
                )
            })?
    }

    async fn answer_command(&mut self, body: &[u8]) -> io::Result<()> {
        let cmd = parse_command(body)?;
        if !cmd.is(PING) {
            return Ok(());
        }
        let mut out = Vec::new();
        encode_frame(FLAG_COMMAND, &build_pong(cmd.ping_context()?), &mut out);
        let BufResult(res, _) = self.stream.write_all(out).await;
        res
    }
}
