//! Newline-delimited JSON frame decoder
//!
//! Turns a growing inbound byte buffer into discrete protocol messages.
//! One frame is one line: a complete UTF-8 JSON object terminated by
//! `\n`. The decoder reassembles messages that arrive split across
//! reads and yields every complete message found in a single read, so
//! decoding is independent of how the transport chunks the stream.
//!
//! A malformed frame (bad JSON, or JSON that is not an object) is
//! reported per-frame; the decoder state stays valid and subsequent
//! frames decode normally. Framing never closes the connection.
//!
//! Frames are capped at [`MAX_FRAME_LEN`] bytes. A line that exceeds
//! the cap is reported as a parse error and its remaining bytes are
//! discarded up to the next newline, so a peer that never terminates a
//! line cannot grow the buffer without bound.

use bytes::{Buf, BytesMut};

use crate::error::RelayError;
use crate::protocol::Event;

/// Maximum length of a single frame in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Incremental decoder over a byte stream.
///
/// Feed raw chunks with [`FrameDecoder::extend`], then drain complete
/// frames with [`FrameDecoder::next_frame`] until it returns `None`.
///
/// # Examples
///
/// ```
/// use evrelay::frame::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// decoder.extend(br#"{"type":"ping"}"#);
/// assert!(decoder.next_frame().is_none()); // no newline yet
/// decoder.extend(b"\n");
/// let event = decoder.next_frame().unwrap().unwrap();
/// assert_eq!(event.kind(), Some("ping"));
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// An oversized line was reported; skip bytes until its newline.
    discarding: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            discarding: false,
        }
    }

    /// Append a chunk of raw bytes received from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// Returns `None` when no full line is available yet. Returns
    /// `Some(Err(RelayError::Parse))` when a complete line is not a
    /// valid JSON object, or when a line exceeds [`MAX_FRAME_LEN`]; the
    /// offending bytes are consumed so the next call moves on to the
    /// following frame.
    pub fn next_frame(&mut self) -> Option<Result<Event, RelayError>> {
        loop {
            let newline = self.buf.iter().position(|&b| b == b'\n');

            // Skipping the tail of a line already reported as oversized.
            if self.discarding {
                match newline {
                    Some(n) => {
                        self.buf.advance(n + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.advance(self.buf.len());
                        return None;
                    }
                }
            }

            let Some(newline) = newline else {
                if self.buf.len() > MAX_FRAME_LEN {
                    // Unterminated and already over the cap: report once
                    // and discard until the newline eventually arrives.
                    self.buf.advance(self.buf.len());
                    self.discarding = true;
                    return Some(Err(RelayError::Parse(format!(
                        "frame exceeds {MAX_FRAME_LEN} bytes"
                    ))));
                }
                return None;
            };

            if newline > MAX_FRAME_LEN {
                self.buf.advance(newline + 1);
                return Some(Err(RelayError::Parse(format!(
                    "frame exceeds {MAX_FRAME_LEN} bytes"
                ))));
            }

            let mut line = self.buf.split_to(newline + 1);
            line.truncate(newline);

            // Tolerate CRLF peers and skip blank keep-alive lines.
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Some(
                serde_json::from_slice::<Event>(&line)
                    .map_err(|e| RelayError::Parse(e.to_string())),
            );
        }
    }

    /// Discard all buffered bytes. Used when a connection is torn down.
    pub fn clear(&mut self) {
        self.buf.advance(self.buf.len());
        self.discarding = false;
    }
}
