use serde_json::json;

use crate::error::{ResearchError, Result};
use crate::events::StreamEvent;

/// Bounds on how long a partial payload may be carried forward.
///
/// Payloads split by the transport are reassembled speculatively, so the
/// bounds stay tunable rather than fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Largest number of frames one payload may span.
    pub max_pending_frames: usize,
    pub max_pending_bytes: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_pending_frames: 8,
            max_pending_bytes: 64 * 1024,
        }
    }
}

/// Content that was given up on, kept so it can be reported.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedFragment {
    pub fragment: String,
    pub reason: String,
}

/// Turns frame payloads into [`StreamEvent`]s, concatenating payloads that
/// fail to parse with the frames that follow them.
#[derive(Debug, Default)]
pub struct EventDecoder {
    limits: DecoderLimits,
    pending: String,
    pending_frames: usize,
    dropped: Vec<DroppedFragment>,
}

impl EventDecoder {
    pub fn new(limits: DecoderLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Decodes `frame` on top of any pending partial payload.
    ///
    /// `Ok(None)` means the candidate is still incomplete, or was dropped and
    /// reported. Only a payload that ends early is carried forward; a syntax
    /// error drops the carried text and the frame is retried on its own. An
    /// error is returned once the carried payload exceeds [`DecoderLimits`].
    pub fn decode(&mut self, frame: &str) -> Result<Option<StreamEvent>> {
        self.decode_bounded(frame, true)
    }

    /// Decodes the unterminated tail flushed at end of stream. Never fails:
    /// whatever cannot be completed is left for [`finish`](Self::finish) to
    /// report.
    pub fn decode_last(&mut self, frame: &str) -> Option<StreamEvent> {
        self.decode_bounded(frame, false).ok().flatten()
    }

    fn decode_bounded(&mut self, frame: &str, bounded: bool) -> Result<Option<StreamEvent>> {
        self.pending.push_str(frame);
        self.pending_frames += 1;

        let err = match serde_json::from_str::<serde_json::Value>(&self.pending) {
            Ok(value) => {
                let candidate = std::mem::take(&mut self.pending);
                if self.pending_frames > 1 {
                    log::debug!("reassembled payload from {} frames", self.pending_frames);
                }
                self.pending_frames = 0;
                return match serde_json::from_value::<StreamEvent>(value) {
                    Ok(event) => Ok(Some(event)),
                    Err(err) => {
                        self.drop_fragment(candidate, format!("not an event: {}", err));
                        Ok(None)
                    }
                };
            }
            Err(err) => err,
        };

        if !err.is_eof() {
            let candidate = std::mem::take(&mut self.pending);
            let carried = self.pending_frames > 1;
            self.pending_frames = 0;
            if carried {
                let previous = candidate[..candidate.len() - frame.len()].to_string();
                self.drop_fragment(previous, format!("interrupted by a new frame: {}", err));
                return self.decode_bounded(frame, bounded);
            }
            self.drop_fragment(candidate, format!("not JSON: {}", err));
            return Ok(None);
        }

        if bounded
            && (self.pending_frames >= self.limits.max_pending_frames
                || self.pending.len() > self.limits.max_pending_bytes)
        {
            let frames = self.pending_frames;
            let bytes = self.pending.len();
            self.pending.clear();
            self.pending_frames = 0;
            return Err(ResearchError::malformed(format!(
                "payload could not be reassembled after {} frames ({} bytes)",
                frames, bytes
            ))
            .with_details(json!({
                "frames": frames,
                "bytes": bytes,
                "last_error": err.to_string(),
            })));
        }
        log::debug!(
            "carrying partial payload forward ({} frames, {} bytes): {}",
            self.pending_frames,
            self.pending.len(),
            err
        );
        Ok(None)
    }

    /// Final parse attempt at end of stream. A leftover that still does not
    /// parse is recorded as dropped.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let candidate = std::mem::take(&mut self.pending);
        self.pending_frames = 0;

        match serde_json::from_str::<StreamEvent>(&candidate) {
            Ok(event) => Some(event),
            Err(err) => {
                self.drop_fragment(candidate, format!("incomplete at end of stream: {}", err));
                None
            }
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn dropped(&self) -> &[DroppedFragment] {
        &self.dropped
    }

    fn drop_fragment(&mut self, fragment: String, reason: String) {
        log::warn!("dropping stream fragment ({}): {:.200}", reason, fragment);
        self.dropped.push(DroppedFragment { fragment, reason });
    }
}
