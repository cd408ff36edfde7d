//! Send Frame Example
//!
//! A DEALER client that sends synthetic BGR frames to a running broker and
//! prints each reply.
//!
//! ```bash
//! cargo run --bin framebroker -- 5555
//! cargo run --example send_frame -- 127.0.0.1:5555 --width 64 --height 48 --count 3
//! cargo run --example send_frame -- 127.0.0.1:5555 --truncate   # rejected
//! ```

use bytes::Bytes;
use clap::Parser;
use framebroker::protocol::CHANNELS;
use framebroker_zmtp::DealerSocket;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Send synthetic frames to a framebroker")]
struct Args {
    /// Broker address
    #[arg(default_value = "127.0.0.1:5555")]
    addr: SocketAddr,

    #[arg(long, default_value_t = 2)]
    width: u32,

    #[arg(long, default_value_t = 1)]
    height: u32,

    /// Frames to send, one after the other
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Routing identity to announce (the broker assigns one otherwise)
    #[arg(long)]
    identity: Option<String>,

    /// Drop the last payload byte so the broker rejects the frame
    #[arg(long)]
    truncate: bool,
}

#[compio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut socket = match &args.identity {
        Some(id) => DealerSocket::connect_with_identity(args.addr, id.as_bytes()).await?,
        None => DealerSocket::connect(args.addr).await?,
    };
    info!(addr = %args.addr, "connected");

    for n in 0..args.count {
        let mut payload = gradient(args.width, args.height, n);
        if args.truncate {
            payload.pop();
        }

        socket
            .send(vec![
                Bytes::new(),
                Bytes::from(args.width.to_string()),
                Bytes::from(args.height.to_string()),
                Bytes::from(payload),
            ])
            .await?;

        match socket.recv_timeout(Duration::from_secs(5)).await? {
            Some(reply) => {
                let text = reply.last().map(|t| String::from_utf8_lossy(t).into_owned());
                info!(frame = n, reply = text.as_deref().unwrap_or(""), "reply");
            }
            None => {
                warn!(frame = n, "broker closed the connection");
                break;
            }
        }
    }

    Ok(())
}

/// A horizontal gradient, shifted by `seed` so consecutive frames differ.
fn gradient(width: u32, height: u32, seed: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
    for _y in 0..height {
        for x in 0..width {
            let v = ((x as usize * 255 / width.max(1) as usize) + seed) as u8;
            data.extend_from_slice(&[v, v / 2, 255 - v]);
        }
    }
    data
}
