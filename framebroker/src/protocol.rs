//! Frame request protocol.
//!
//! A request, as routed to a worker, is five parts:
//!
//! ```text
//! [0] identity   connection identity added by the ROUTER
//! [1] ""         empty delimiter
//! [2] width      decimal ASCII ("640"), or 4-byte big-endian u32
//! [3] height     decimal ASCII ("480"), or 4-byte big-endian u32
//! [4] payload    width * height * 3 bytes, row-major, BGR interleaved
//! ```
//!
//! The reply is `[identity, "", text]`.

use bytes::Bytes;
use thiserror::Error;

/// Acknowledgment for an accepted frame.
pub const ACK_OK: &str = "request received ok";

/// Prefix of the reply sent for a request that failed to decode.
pub const REJECT_PREFIX: &str = "request rejected: ";

/// Reply sent when the worker holding a request went away before answering.
pub const WORKER_LOST: &str = "request failed: worker terminated";

/// 8-bit, 3-channel pixels.
pub const CHANNELS: usize = 3;

pub const REQUEST_PARTS: usize = 5;

/// Default upper bound on a frame payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid {axis} {value:?}: expected a positive integer")]
    InvalidDimensions { axis: &'static str, value: String },

    #[error("payload is {actual} bytes, expected {expected}")]
    PayloadSizeMismatch { expected: usize, actual: usize },

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
}

/// A pixel buffer viewed over the request payload without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl Frame {
    /// Wrap `data` as a `width` x `height` frame, checking its length.
    pub fn new(width: u32, height: u32, data: Bytes) -> Result<Self, DecodeError> {
        let expected = frame_len(width, height)?;
        if data.len() != expected {
            return Err(DecodeError::PayloadSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        CHANNELS
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    fn stride(&self) -> usize {
        self.width as usize * CHANNELS
    }

    /// Row `y`, or `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride();
        self.data.get(start..start + self.stride())
    }

    /// Channel values of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; CHANNELS]> {
        if x >= self.width {
            return None;
        }
        let start = x as usize * CHANNELS;
        let px = self.row(y)?.get(start..start + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }
}

/// A decoded request: the client it came from and its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub identity: Bytes,
    pub frame: Frame,
}

/// Decode a routed request with the default payload limit.
pub fn decode_request(parts: Vec<Bytes>) -> Result<Request, DecodeError> {
    decode_request_with_limit(parts, DEFAULT_MAX_FRAME_BYTES)
}

/// Decode a routed request, refusing payloads over `max_payload` bytes.
pub fn decode_request_with_limit(
    parts: Vec<Bytes>,
    max_payload: usize,
) -> Result<Request, DecodeError> {
    let [identity, delimiter, width, height, payload]: [Bytes; REQUEST_PARTS] =
        parts.try_into().map_err(|parts: Vec<Bytes>| {
            DecodeError::MalformedEnvelope(format!(
                "expected {REQUEST_PARTS} parts, got {}",
                parts.len()
            ))
        })?;

    if !delimiter.is_empty() {
        return Err(DecodeError::MalformedEnvelope(
            "delimiter part is not empty".to_string(),
        ));
    }

    let width = parse_dimension("width", &width)?;
    let height = parse_dimension("height", &height)?;

    if payload.len() > max_payload {
        return Err(DecodeError::FrameTooLarge {
            size: payload.len(),
            limit: max_payload,
        });
    }

    Ok(Request {
        identity,
        frame: Frame::new(width, height, payload)?,
    })
}

/// Parse one dimension part.
///
/// Decimal text is tried first; surrounding ASCII whitespace and a trailing
/// NUL (C clients often send `strlen + 1` bytes) are tolerated. A 4-byte part
/// that is not decimal text is read as a big-endian `u32`. Zero is invalid.
pub fn parse_dimension(axis: &'static str, raw: &[u8]) -> Result<u32, DecodeError> {
    let invalid = || DecodeError::InvalidDimensions {
        axis,
        value: String::from_utf8_lossy(raw).into_owned(),
    };

    let text = trim_ascii_whitespace(raw.strip_suffix(b"\0").unwrap_or(raw));
    let value = if !text.is_empty() && text.iter().all(u8::is_ascii_digit) {
        std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(invalid)?
    } else if let Ok(be) = <[u8; 4]>::try_from(raw) {
        u32::from_be_bytes(be)
    } else {
        return Err(invalid());
    };

    if value == 0 {
        return Err(invalid());
    }
    Ok(value)
}

fn trim_ascii_whitespace(mut b: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = b {
        if !first.is_ascii_whitespace() {
            break;
        }
        b = rest;
    }
    while let [rest @ .., last] = b {
        if !last.is_ascii_whitespace() {
            break;
        }
        b = rest;
    }
    b
}

/// Payload length implied by the dimensions.
pub fn frame_len(width: u32, height: u32) -> Result<usize, DecodeError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(CHANNELS))
        .ok_or_else(|| DecodeError::InvalidDimensions {
            axis: "frame",
            value: format!("{width}x{height}"),
        })
}

/// Build `[identity, "", text]`.
pub fn encode_reply(identity: Bytes, text: impl Into<Bytes>) -> Vec<Bytes> {
    vec![identity, Bytes::new(), text.into()]
}

/// Reply text for a request that failed to decode.
pub fn reject_text(err: &DecodeError) -> Bytes {
    Bytes::from(format!("{REJECT_PREFIX}{err}"))
}

/// Best-effort identity of a request, so even an undecodable one can be
/// answered. `None` for an empty message.
pub fn reply_identity(parts: &[Bytes]) -> Option<Bytes> {
    parts.first().cloned()
}
