//! Wire framing for the research event stream.
//!
//! The producer writes `data:` lines terminated by a blank line. Network
//! chunks are cut anywhere, including inside a multi-byte character, so the
//! bytes go through [`TextDecoder`] first and the text is then buffered in
//! [`FrameAccumulator`] until a full frame is available.

/// Payload that marks the intentional end of data.
pub const TERMINATOR: &str = "[DONE]";

use serde_json::json;

use crate::decoder::DecoderLimits;
use crate::error::{ResearchError, Result};

const DATA_PREFIX: &str = "data:";
const SEPARATOR: &str = "\n\n";

// ============================================================================
// Incremental UTF-8 decoding
// ============================================================================

/// Streaming UTF-8 decoder that carries an incomplete trailing sequence over
/// to the next chunk. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    tail: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.tail);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.tail = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes a dangling partial sequence at end of stream.
    pub fn finish(&mut self) -> String {
        if self.tail.is_empty() {
            return String::new();
        }
        let tail = std::mem::take(&mut self.tail);
        String::from_utf8_lossy(&tail).into_owned()
    }
}

// ============================================================================
// Frame Accumulator
// ============================================================================

/// Buffers text until a blank line closes a frame. The unterminated part is
/// bounded by `max_bytes`.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: String,
    /// Offset before which the buffer holds no separator.
    scanned: usize,
    max_bytes: usize,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::with_limit(DecoderLimits::default().max_pending_bytes)
    }
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            scanned: 0,
            max_bytes,
        }
    }

    /// Buffers `chunk` and returns the payload of every frame completed by it.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<String>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        // JSON never carries a raw CR, so dropping them normalises CRLF framing
        // even when the pair is split across chunks.
        self.buffer.extend(chunk.chars().filter(|c| *c != '\r'));

        let mut payloads = Vec::new();
        while let Some(end) = self.next_separator() {
            let frame: String = self.buffer.drain(..end + SEPARATOR.len()).collect();
            self.scanned = 0;
            if let Some(payload) = extract_payload(&frame[..end]) {
                payloads.push(payload);
            }
        }
        // a trailing '\n' may still pair with the next chunk
        self.scanned = self.buffer.len().saturating_sub(SEPARATOR.len() - 1);

        if self.buffer.len() > self.max_bytes {
            let bytes = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(ResearchError::malformed(format!(
                "frame exceeded {} bytes without a separator",
                self.max_bytes
            ))
            .with_details(json!({ "bytes": bytes })));
        }
        Ok(payloads)
    }

    fn next_separator(&self) -> Option<usize> {
        self.buffer.as_bytes()[self.scanned..]
            .windows(SEPARATOR.len())
            .position(|window| window == SEPARATOR.as_bytes())
            .map(|pos| self.scanned + pos)
    }

    /// Emits whatever is left once the transport reports end of stream.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.trim().is_empty() {
            return None;
        }
        log::debug!("flushing {} unterminated bytes", rest.len());
        extract_payload(&rest)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Joins the `data:` lines of one frame. Other fields and comments are
/// ignored; empty and terminator payloads yield nothing.
fn extract_payload(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();

    let payload = lines.join("\n");
    let payload = payload.trim();
    if payload.is_empty() || payload == TERMINATOR {
        None
    } else {
        Some(payload.to_string())
    }
}
