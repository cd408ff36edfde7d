//! Broker configuration.
//!
//! Built once at process entry (from [`Cli`] in the binary, or directly in
//! tests) and moved into the broker.

use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
use clap::Parser;
use framebroker_core::options::TransportOptions;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_BACKEND: &str = "inproc://backend";

/// Room left in a transport message for identity, delimiter and dimensions.
const ENVELOPE_HEADROOM: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command line could not be parsed (missing or invalid PORT, bad flag).
    #[error("{0}")]
    Usage(String),

    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("backend endpoint must look like inproc://<name>, got {0:?}")]
    InvalidBackend(String),

    #[error("max frame size must be at least {min} bytes, got {got}")]
    FrameLimitTooSmall { min: usize, got: usize },

    #[error("transport message limit of {message} bytes is below the {frame} byte frame limit")]
    TransportLimitTooSmall { frame: usize, message: usize },
}

/// Command-line arguments for the broker binary
#[derive(Parser, Debug, Clone)]
#[command(name = "framebroker", author, version, about, long_about = None)]
pub struct Cli {
    /// TCP port clients connect to
    #[arg(value_name = "PORT NUMBER")]
    pub port: u16,

    /// Number of worker threads
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Address to bind the client-facing listener on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// In-process endpoint connecting the dispatcher to the workers
    #[arg(long, default_value = DEFAULT_BACKEND)]
    pub backend: String,

    /// Do not replace workers that fault
    #[arg(long)]
    pub no_respawn: bool,

    /// Largest accepted frame payload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Seconds a client has to complete the protocol handshake (0 disables)
    #[arg(long, default_value_t = 30)]
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bind_addr: IpAddr,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub workers: usize,
    pub backend_endpoint: String,
    pub respawn_workers: bool,
    pub max_frame_bytes: usize,
    pub transport: TransportOptions,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            backend_endpoint: DEFAULT_BACKEND.to_string(),
            respawn_workers: true,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            transport: transport_for(DEFAULT_MAX_FRAME_BYTES, TransportOptions::default()),
        }
    }
}

impl BrokerConfig {
    /// Defaults, listening on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_backend(mut self, endpoint: impl Into<String>) -> Self {
        self.backend_endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_respawn(mut self, respawn: bool) -> Self {
        self.respawn_workers = respawn;
        self
    }

    /// Also raises the transport message limit to fit the frame.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self.transport = transport_for(bytes, self.transport);
        self
    }

    /// Replaces the transport options as given; `validate` checks that the
    /// message limit still fits the frame limit.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let named = self
            .backend_endpoint
            .strip_prefix("inproc://")
            .is_some_and(|name| !name.is_empty());
        if !named {
            return Err(ConfigError::InvalidBackend(self.backend_endpoint.clone()));
        }

        // The smallest frame is 1x1 with 3 channels.
        if self.max_frame_bytes < 3 {
            return Err(ConfigError::FrameLimitTooSmall {
                min: 3,
                got: self.max_frame_bytes,
            });
        }

        if self.transport.max_message_bytes < self.max_frame_bytes {
            return Err(ConfigError::TransportLimitTooSmall {
                frame: self.max_frame_bytes,
                message: self.transport.max_message_bytes,
            });
        }
        Ok(())
    }
}

impl TryFrom<Cli> for BrokerConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let transport = TransportOptions::default()
            .with_handshake_timeout(Duration::from_secs(cli.handshake_timeout_secs));

        let config = Self::new(cli.port)
            .with_bind_addr(cli.bind)
            .with_workers(cli.workers)
            .with_backend(cli.backend)
            .with_respawn(!cli.no_respawn)
            .with_transport(transport)
            .with_max_frame_bytes(cli.max_frame_bytes);
        config.validate()?;
        Ok(config)
    }
}

fn transport_for(max_frame_bytes: usize, transport: TransportOptions) -> TransportOptions {
    transport.with_max_message_bytes(max_frame_bytes.saturating_add(ENVELOPE_HEADROOM))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<BrokerConfig, ConfigError> {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Usage(e.to_string()))?;
        BrokerConfig::try_from(cli)
    }

    #[test]
    fn port_only_uses_defaults() {
        let config = parse(&["framebroker", "5555"]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5555".parse().unwrap());
        assert_eq!(config.workers, 5);
        assert_eq!(config.backend_endpoint, "inproc://backend");
        assert!(config.respawn_workers);
        assert_eq!(config.transport.handshake_timeout, Duration::from_secs(30));
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "framebroker",
            "7000",
            "--workers",
            "2",
            "--bind",
            "127.0.0.1",
            "--backend",
            "inproc://frames",
            "--no-respawn",
            "--max-frame-bytes",
            "1024",
            "--handshake-timeout-secs",
            "0",
        ])
        .unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.workers, 2);
        assert_eq!(config.backend_endpoint, "inproc://frames");
        assert!(!config.respawn_workers);
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.transport.max_message_bytes, 1024 + ENVELOPE_HEADROOM);
        assert_eq!(config.transport.handshake_deadline(), None);
    }

    #[test]
    fn missing_or_bad_port_is_a_usage_error() {
        assert!(matches!(parse(&["framebroker"]), Err(ConfigError::Usage(_))));
        assert!(matches!(
            parse(&["framebroker", "not-a-port"]),
            Err(ConfigError::Usage(_))
        ));
        assert!(matches!(
            parse(&["framebroker", "70000"]),
            Err(ConfigError::Usage(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(matches!(
            BrokerConfig::new(1).with_workers(0).validate(),
            Err(ConfigError::NoWorkers)
        ));
        assert!(matches!(
            BrokerConfig::new(1).with_backend("tcp://backend").validate(),
            Err(ConfigError::InvalidBackend(_))
        ));
        assert!(matches!(
            BrokerConfig::new(1).with_backend("inproc://").validate(),
            Err(ConfigError::InvalidBackend(_))
        ));
        assert!(matches!(
            BrokerConfig::new(1).with_max_frame_bytes(2).validate(),
            Err(ConfigError::FrameLimitTooSmall { min: 3, got: 2 })
        ));
    }

    #[test]
    fn transport_set_after_frame_limit_must_still_fit_it() {
        let shrunk = BrokerConfig::new(1)
            .with_max_frame_bytes(1 << 20)
            .with_transport(TransportOptions::default().with_max_message_bytes(1024));
        assert!(matches!(
            shrunk.validate(),
            Err(ConfigError::TransportLimitTooSmall {
                frame: 1_048_576,
                message: 1024
            })
        ));

        let reordered = BrokerConfig::new(1)
            .with_transport(TransportOptions::default().with_max_message_bytes(1024))
            .with_max_frame_bytes(1 << 20);
        assert!(reordered.validate().is_ok());
        assert_eq!(reordered.transport.max_message_bytes, (1 << 20) + ENVELOPE_HEADROOM);
    }
}
