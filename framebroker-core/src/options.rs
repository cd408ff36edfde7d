//! Transport options
//!
//! Limits and timeouts applied to every client connection, in the spirit of
//! libzmq's socket options.

use std::time::Duration;

/// Per-connection transport configuration.
///
/// # Examples
///
/// ```
/// use framebroker_core::options::TransportOptions;
/// use std::time::Duration;
///
/// let opts = TransportOptions::default()
///     .with_handshake_timeout(Duration::from_secs(5))
///     .with_max_message_bytes(4 * 1024 * 1024);
/// assert_eq!(opts.max_message_frames, 16);
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Handshake timeout (ZMQ_HANDSHAKE_IVL)
    ///
    /// Maximum time to complete greeting + READY exchange after accept.
    /// `Duration::ZERO` disables the timeout.
    pub handshake_timeout: Duration,

    /// Maximum number of frames in one multipart message.
    ///
    /// A request is five frames including the identity added by the ROUTER,
    /// so the default leaves generous headroom.
    pub max_message_frames: usize,

    /// Maximum size of one multipart message in bytes (ZMQ_MAXMSGSIZE).
    ///
    /// A peer exceeding it is disconnected.
    pub max_message_bytes: usize,

    /// Read buffer size (bytes) for each socket read.
    pub read_buffer_size: usize,

    /// Disable Nagle's algorithm on TCP connections.
    pub tcp_nodelay: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            max_message_frames: 16,
            max_message_bytes: 64 * 1024 * 1024,
            read_buffer_size: 64 * 1024,
            tcp_nodelay: true,
        }
    }
}

impl TransportOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_message_frames(mut self, frames: usize) -> Self {
        self.max_message_frames = frames;
        self
    }

    #[must_use]
    pub const fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Handshake deadline, `None` when disabled.
    pub fn handshake_deadline(&self) -> Option<Duration> {
        (!self.handshake_timeout.is_zero()).then_some(self.handshake_timeout)
    }
}
