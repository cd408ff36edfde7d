use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// ZMTP frame flags
pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_LONG: u8 = 0x02;
pub const FLAG_COMMAND: u8 = 0x04;
const RESERVED_BITS: u8 = 0xF8;

/// ZMTP protocol errors
#[derive(Debug, Error)]
pub enum ZmtpError {
    #[error("Incomplete data")]
    Incomplete,

    #[error("Protocol violation: reserved bits set")]
    ReservedBits,

    #[error("Protocol violation: frame of {size} bytes exceeds limit of {max}")]
    SizeTooLarge { size: u64, max: usize },

    #[error("Protocol violation: {0}")]
    Protocol(&'static str),

    #[error("unsupported security mechanism {0:?}")]
    UnsupportedMechanism(String),

    #[error("peer socket type {peer} cannot talk to {local}")]
    IncompatiblePeer {
        local: &'static str,
        peer: &'static str,
    },

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("multipart message exceeds {max} frames")]
    TooManyFrames { max: usize },

    #[error("multipart message exceeds {max} bytes")]
    MessageTooLarge { max: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type alias for ZMTP operations
pub type Result<T> = std::result::Result<T, ZmtpError>;

impl From<ZmtpError> for io::Error {
    fn from(err: ZmtpError) -> Self {
        match err {
            ZmtpError::Io(e) => e,
            ZmtpError::HandshakeTimeout(_) => io::Error::new(io::ErrorKind::TimedOut, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// A decoded ZMTP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    pub flags: u8,
    pub payload: Bytes,
    /// Declared body size of a data frame whose body was over the decoder
    /// limit and skipped. `payload` is empty in that case.
    pub oversized: Option<u64>,
}

impl ZmtpFrame {
    /// Create a data frame
    pub fn data(payload: Bytes, more: bool) -> Self {
        let flags = if more { FLAG_MORE } else { 0 };
        Self {
            flags,
            payload,
            oversized: None,
        }
    }

    /// Create a command frame
    pub fn command(payload: Bytes) -> Self {
        Self {
            flags: FLAG_COMMAND,
            payload,
            oversized: None,
        }
    }

    #[inline]
    pub const fn more(&self) -> bool {
        (self.flags & FLAG_MORE) != 0
    }

    #[inline]
    pub const fn is_command(&self) -> bool {
        (self.flags & FLAG_COMMAND) != 0
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// The LONG flag is derived from the payload length, never trusted from
    /// `flags`.
    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        encode_frame(self.flags, &self.payload, dst);
    }
}

/// Incremental ZMTP frame decoder.
///
/// Bytes are accumulated by the caller in a `BytesMut`; each call to
/// [`decode`](Self::decode) consumes at most one complete frame from the front.
/// A complete frame is split off without copying.
///
/// By default a frame over the size limit is a protocol error. With
/// [`skip_oversized`](Self::skip_oversized) an oversized *data* frame is
/// reported with an empty payload and its body is dropped as it arrives, so
/// the connection stays usable.
#[derive(Debug, Clone)]
pub struct ZmtpDecoder {
    max_frame_size: usize,
    skip_oversized: bool,
    // Body bytes of a skipped frame still to be dropped.
    skipping: u64,
}

impl Default for ZmtpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZmtpDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_frame_size(usize::MAX)
    }

    /// Reject frames whose declared body is larger than `max` bytes before
    /// buffering them.
    #[must_use]
    pub const fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: max,
            skip_oversized: false,
            skipping: 0,
        }
    }

    /// Skip oversized data frames instead of failing. Oversized command
    /// frames are still an error.
    #[must_use]
    pub const fn skip_oversized(mut self) -> Self {
        self.skip_oversized = true;
        self
    }

    /// True while the body of a skipped frame is still being dropped.
    pub const fn is_skipping(&self) -> bool {
        self.skipping > 0
    }

    /// Decode a single frame from `src`
    ///
    /// Returns:
    /// - Ok(Some(frame)) → frame decoded and removed from `src`
    /// - Ok(None) → need more data (only skipped body bytes are consumed)
    /// - Err → protocol violation
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ZmtpFrame>> {
        if self.skipping > 0 {
            let n = usize::try_from(self.skipping).map_or(src.len(), |left| left.min(src.len()));
            src.advance(n);
            self.skipping -= n as u64;
            if self.skipping > 0 {
                return Ok(None);
            }
        }

        if src.len() < 2 {
            return Ok(None);
        }

        let flags = src[0];
        if (flags & RESERVED_BITS) != 0 {
            return Err(ZmtpError::ReservedBits);
        }

        let is_long = (flags & FLAG_LONG) != 0;
        let header_len = if is_long { 9 } else { 2 };
        if src.len() < header_len {
            return Ok(None);
        }

        let declared = if is_long {
            let mut size = &src[1..9];
            size.get_u64()
        } else {
            u64::from(src[1])
        };

        let too_large = ZmtpError::SizeTooLarge {
            size: declared,
            max: self.max_frame_size,
        };
        // MSB must be zero in ZMTP 3.x.
        if declared > 0x7FFF_FFFF_FFFF_FFFF {
            return Err(too_large);
        }
        let within_limit = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= self.max_frame_size);
        let Some(body_len) = within_limit else {
            if !self.skip_oversized || (flags & FLAG_COMMAND) != 0 {
                return Err(too_large);
            }
            src.advance(header_len);
            self.skipping = declared;
            return Ok(Some(ZmtpFrame {
                flags: flags & FLAG_MORE,
                payload: Bytes::new(),
                oversized: Some(declared),
            }));
        };

        let total_len = header_len + body_len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(body_len).freeze();
        // Only MORE and COMMAND carry meaning once the size is known.
        Ok(Some(ZmtpFrame {
            flags: flags & (FLAG_MORE | FLAG_COMMAND),
            payload,
            oversized: None,
        }))
    }
}

/// Encode one frame (header + body) into `dst`.
///
/// Layout:
/// - Flags (1 byte)
/// - Size (1 byte if <= 255, else 8 bytes BE with LONG set)
/// - Body
pub fn encode_frame<B: BufMut>(flags: u8, body: &[u8], dst: &mut B) {
    let len = body.len();
    if len <= 255 {
        dst.put_u8(flags & !FLAG_LONG);
        dst.put_u8(len as u8);
    } else {
        dst.put_u8(flags | FLAG_LONG);
        dst.put_u64(len as u64);
    }
    dst.put_slice(body);
}

/// Encode a multipart message: MORE on every part except the last.
///
/// An empty message encodes to nothing.
pub fn encode_multipart<B: BufMut>(parts: &[Bytes], dst: &mut B) {
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.iter().enumerate() {
        let flags = if i < last { FLAG_MORE } else { 0 };
        encode_frame(flags, part, dst);
    }
}

/// Bytes needed to encode `parts`, for pre-sizing write buffers.
pub fn encoded_len(parts: &[Bytes]) -> usize {
    parts
        .iter()
        .map(|p| p.len() + if p.len() <= 255 { 2 } else { 9 })
        .sum()
}
