//! Incremental codec for the newline-delimited JSON wire format.
//!
//! TCP reads hand the relay arbitrary byte chunks: a single read may carry
//! half a frame or several frames back to back. [`FrameCodec`] buffers the
//! chunks and yields one parsed [`Message`] per complete line, so frame
//! boundaries never depend on read boundaries.

use thiserror::Error;

use crate::message::{Message, ParseError};

/// Default cap on the bytes buffered for a single frame (1 MiB).
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Errors surfaced while buffering wire bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer grew past the configured cap without a line delimiter.
    /// The connection feeding the codec should be closed.
    #[error("frame exceeds {max} bytes ({buffered} buffered without a delimiter)")]
    FrameTooLarge {
        /// Configured frame cap in bytes.
        max: usize,
        /// Bytes currently buffered.
        buffered: usize,
    },
}

/// Buffering frame reader for one connection.
///
/// Feed raw chunks with [`push`](Self::push), then drain complete frames
/// with [`next_message`](Self::next_message) until it returns `None`.
///
/// # Examples
///
/// ```
/// use burrow_common::codec::FrameCodec;
/// use burrow_common::message::Message;
///
/// let mut codec = FrameCodec::new(1024);
/// let line = Message::ping(7).to_line().unwrap();
///
/// codec.push(&line[..4]).unwrap();
/// assert!(codec.next_message().is_none());
///
/// codec.push(&line[4..]).unwrap();
/// let msg = codec.next_message().unwrap().unwrap();
/// assert_eq!(msg, Message::ping(7));
/// ```
#[derive(Debug)]
pub struct FrameCodec {
    buf: Vec<u8>,
    max_frame: usize,
}

impl FrameCodec {
    /// Creates a codec that fails once `max_frame` bytes accumulate without
    /// a delimiter.
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Appends a chunk of raw bytes to the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FrameTooLarge`] when the buffered bytes exceed
    /// the cap and contain no delimiter. The cap does not fire while a
    /// delimiter is present, since complete frames are extractable.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), CodecError> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max_frame && !self.buf.contains(&b'\n') {
            return Err(CodecError::FrameTooLarge {
                max: self.max_frame,
                buffered: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Removes and parses the next complete line, if one is buffered.
    ///
    /// Returns `None` when no full line is available yet. A line that is
    /// not valid JSON yields `Some(Err(_))` and is consumed, so the caller
    /// can log it and keep going.
    pub fn next_message(&mut self) -> Option<Result<Message, ParseError>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(Message::from_line(&line[..line.len() - 1]))
    }

    /// Number of bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}
