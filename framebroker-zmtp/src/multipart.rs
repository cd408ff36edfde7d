use crate::codec::{Result, ZmtpError, ZmtpFrame};
use bytes::Bytes;
use smallvec::SmallVec;

// A routed request is five parts; keep them inline.
type Parts = SmallVec<[Bytes; 6]>;

/// A completed multipart message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// All frames, behind the prefix if one is set.
    Message(Vec<Bytes>),
    /// The message went over the byte limit. Its frames were dropped; `size`
    /// is the total declared size of its frames.
    Oversized { size: u64 },
}

/// Collects data frames until a complete multipart message is formed.
///
/// Invariants:
/// - Frames are appended in-order
/// - A message completes when `MORE == false`
/// - Too many frames is an error and discards the partial message
/// - Going over the byte limit stops buffering; the rest of the message is
///   still consumed and completes as [`Assembled::Oversized`]
///
/// An optional prefix (the ROUTER's peer identity) is placed in front of every
/// completed message and does not count against the limits.
#[derive(Debug)]
pub struct MultipartBuffer {
    frames: Parts,
    frame_count: usize,
    byte_count: u64,
    max_frames: usize,
    max_bytes: usize,
    prefix: Option<Bytes>,
}

impl MultipartBuffer {
    pub fn new(max_frames: usize, max_bytes: usize) -> Self {
        Self {
            frames: SmallVec::new(),
            frame_count: 0,
            byte_count: 0,
            max_frames,
            max_bytes,
            prefix: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: Bytes) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Push a data frame into the buffer.
    ///
    /// Returns:
    /// - `Ok(None)` if the message is not complete
    /// - `Ok(Some(..))` once the last frame of a message arrived
    /// - `Err(TooManyFrames)` when the frame limit was exceeded
    pub fn push_frame(&mut self, frame: ZmtpFrame) -> Result<Option<Assembled>> {
        if self.frame_count >= self.max_frames {
            self.reset();
            return Err(ZmtpError::TooManyFrames {
                max: self.max_frames,
            });
        }
        self.frame_count += 1;

        let size = frame
            .oversized
            .unwrap_or_else(|| frame.payload.len() as u64);
        self.byte_count = self.byte_count.saturating_add(size);
        let more = frame.more();

        if self.is_over_limit() {
            self.frames.clear();
        } else {
            self.frames.push(frame.payload);
        }
        if more {
            return Ok(None);
        }

        let done = if self.is_over_limit() {
            Assembled::Oversized {
                size: self.byte_count,
            }
        } else {
            let mut msg = Vec::with_capacity(self.frames.len() + 1);
            msg.extend(self.prefix.iter().cloned());
            msg.extend(self.frames.drain(..));
            Assembled::Message(msg)
        };
        self.reset();
        Ok(Some(done))
    }

    /// Frames buffered for the message in progress.
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    fn is_over_limit(&self) -> bool {
        self.byte_count > self.max_bytes as u64
    }

    #[inline]
    fn reset(&mut self) {
        self.frames.clear();
        self.frame_count = 0;
        self.byte_count = 0;
    }
}
