// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delimited frame reader.
//!
//! Wire format emitted by the sink node:
//!
//! ```text
//! [noise] '#' <json payload> '$'
//! ```
//!
//! The reader only looks for the stop delimiter; locating the start
//! delimiter is the parser's job. There is no escaping: a `$` inside the
//! payload ends the frame early.

use crate::link::{ByteLink, LinkError};
use std::fmt;

/// Start-of-frame marker.
pub const FRAME_START: u8 = b'#';

/// End-of-frame marker. Never included in a [`RawFrame`].
pub const FRAME_END: u8 = b'$';

/// Default upper bound on a frame, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Everything received up to (not including) a stop delimiter.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Frame content as text, with invalid UTF-8 replaced.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawFrame({:?})", self.to_text())
    }
}

impl From<&str> for RawFrame {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Accumulates bytes from a link into frames.
///
/// A partial frame survives [`LinkError::Timeout`]: the next call to
/// [`FrameReader::read_frame`] continues where the previous one stopped.
pub struct FrameReader<L: ByteLink> {
    link: L,
    buffer: Vec<u8>,
    max_len: usize,
}

impl<L: ByteLink> FrameReader<L> {
    /// Create a reader with the default frame length limit.
    pub fn new(link: L) -> Self {
        Self::with_max_len(link, DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a reader with an explicit frame length limit.
    pub fn with_max_len(link: L, max_len: usize) -> Self {
        Self {
            link,
            buffer: Vec::with_capacity(max_len.min(DEFAULT_MAX_FRAME_LEN)),
            max_len,
        }
    }

    /// Read the next complete frame.
    ///
    /// # Errors
    /// - [`LinkError::Timeout`] when the link stays silent for one read
    ///   timeout; the partial frame is kept.
    /// - [`LinkError::Overrun`] when the frame grows past the limit; the
    ///   partial frame is dropped. If the byte that overflowed it is a
    ///   start delimiter, it is kept as the beginning of the next frame.
    /// - Any other [`LinkError`] when the link fails.
    pub fn read_frame(&mut self) -> Result<RawFrame, LinkError> {
        loop {
            let byte = self.link.read_byte()?;

            if byte == FRAME_END {
                let frame = RawFrame(std::mem::take(&mut self.buffer));
                tracing::debug!(len = frame.len(), "Frame received");
                return Ok(frame);
            }

            if self.buffer.len() >= self.max_len {
                self.buffer.clear();
                // A start delimiter here opens the next frame
                if byte == FRAME_START {
                    self.buffer.push(byte);
                }
                return Err(LinkError::Overrun {
                    limit: self.max_len,
                });
            }

            self.buffer.push(byte);
        }
    }

    /// Number of bytes of the frame currently being assembled.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Borrow the underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Take the link back, discarding any partial frame.
    pub fn into_link(self) -> L {
        self.link
    }
}
