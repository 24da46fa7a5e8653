use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cancel::{CancellationCheck, CancellationToken};
use crate::decoder::{DecoderLimits, DroppedFragment, EventDecoder};
use crate::error::{ResearchError, Result, log_error};
use crate::events::StreamEvent;
use crate::frame::{FrameAccumulator, TextDecoder};
use crate::models::ResearchRequest;
use crate::transport::ResearchTransport;

// ============================================================================
// STATE & CONFIG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Draining,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Overall deadline, from opening the request to the end of the body.
    pub timeout: Duration,
    pub limits: DecoderLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            limits: DecoderLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub events_delivered: usize,
    /// Whether a `report_complete` event went through the handler.
    pub saw_completion: bool,
    pub dropped_fragments: Vec<DroppedFragment>,
}

// ============================================================================
// STREAM SESSION
// ============================================================================

/// One streaming request, from opening the transport to the drained body.
///
/// Events are handed to the caller's handler synchronously and in producer
/// order; the next chunk is only read once every event of the previous one
/// has been dispatched.
pub struct StreamSession {
    id: Uuid,
    config: SessionConfig,
    token: CancellationToken,
    state: SessionState,
    text: TextDecoder,
    frames: FrameAccumulator,
    decoder: EventDecoder,
    summary: SessionSummary,
}

impl StreamSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_token(config, CancellationToken::new())
    }

    pub fn with_token(config: SessionConfig, token: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            config,
            token,
            state: SessionState::Idle,
            text: TextDecoder::new(),
            frames: FrameAccumulator::with_limit(config.limits.max_pending_bytes),
            decoder: EventDecoder::new(config.limits),
            summary: SessionSummary::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token that aborts the session; cancelling it fails the session with a
    /// timeout classification.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn run<T, F>(
        &mut self,
        transport: &T,
        request: &ResearchRequest,
        mut on_update: F,
    ) -> Result<SessionSummary>
    where
        T: ResearchTransport,
        F: FnMut(&StreamEvent),
    {
        if self.state != SessionState::Idle {
            return Err(ResearchError::unknown(format!(
                "session {} already ran (state {})",
                self.id, self.state
            )));
        }

        let token = self.token.clone();
        let timeout = self.config.timeout;
        let deadline = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(deadline);

        self.transition(SessionState::Opening);
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => Err(cancelled_error()),
            _ = &mut deadline => {
                token.cancel();
                Err(deadline_error(timeout))
            }
            opened = transport.open_stream(request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(err) => return Err(self.fail(err)),
        };

        self.transition(SessionState::Streaming);
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(self.fail(cancelled_error())),
                _ = &mut deadline => {
                    token.cancel();
                    return Err(self.fail(deadline_error(timeout)));
                }
                chunk = futures::StreamExt::next(&mut body) => chunk,
            };

            match next {
                Some(Ok(bytes)) => {
                    let text = self.text.decode(&bytes);
                    if let Err(err) = self.dispatch(&text, &mut on_update) {
                        return Err(self.fail(err));
                    }
                }
                Some(Err(err)) => return Err(self.fail(err)),
                None => break,
            }
        }
        drop(body);

        self.transition(SessionState::Draining);
        let tail = self.text.finish();
        if let Err(err) = self.dispatch(&tail, &mut on_update) {
            return Err(self.fail(err));
        }
        if let Some(payload) = self.frames.flush() {
            if let Some(event) = self.decoder.decode_last(&payload) {
                self.deliver(event, &mut on_update);
            }
        }
        if let Some(event) = self.decoder.finish() {
            self.deliver(event, &mut on_update);
        }

        self.summary.dropped_fragments = self.decoder.dropped().to_vec();
        self.transition(SessionState::Completed);
        log::info!(
            "research stream {} completed: {} events, {} dropped fragments",
            self.id,
            self.summary.events_delivered,
            self.summary.dropped_fragments.len()
        );
        Ok(self.summary.clone())
    }

    fn dispatch<F: FnMut(&StreamEvent)>(&mut self, text: &str, on_update: &mut F) -> Result<()> {
        for payload in self.frames.feed(text)? {
            self.token.check()?;
            if let Some(event) = self.decoder.decode(&payload)? {
                self.deliver(event, on_update);
            }
        }
        Ok(())
    }

    fn deliver<F: FnMut(&StreamEvent)>(&mut self, event: StreamEvent, on_update: &mut F) {
        if event.is_completion() {
            self.summary.saw_completion = true;
        }
        self.summary.events_delivered += 1;
        on_update(&event);
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: ResearchError) -> ResearchError {
        self.transition(SessionState::Failed);
        self.summary.dropped_fragments = self.decoder.dropped().to_vec();
        log_error(&err);
        err
    }
}

fn cancelled_error() -> ResearchError {
    ResearchError::cancelled("research stream cancelled")
}

fn deadline_error(timeout: Duration) -> ResearchError {
    ResearchError::timeout(format!("research stream exceeded its {:?} deadline", timeout))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::EventKind;
    use crate::testing::ScriptedTransport;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn request() -> ResearchRequest {
        ResearchRequest::streaming("rust")
    }

    async fn collect(transport: &ScriptedTransport) -> (StreamSession, Result<SessionSummary>, Vec<StreamEvent>) {
        let mut session = StreamSession::new(SessionConfig::default());
        let mut events = Vec::new();
        let result = session
            .run(transport, &request(), |event| events.push(event.clone()))
            .await;
        (session, result, events)
    }

    fn kinds(events: &[StreamEvent]) -> Vec<String> {
        events.iter().map(|e| e.kind.to_string()).collect()
    }

    #[tokio::test]
    async fn test_plan_then_done_yields_one_event() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"kind\":\"plan\",\"message\":\"ok\"}\n\n",
            "data: [DONE]\n\n",
        ]);
        let (session, result, events) = collect(&transport).await;

        let summary = result.unwrap();
        assert_eq!(summary.events_delivered, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Plan);
        assert_eq!(events[0].message.as_deref(), Some("ok"));
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_any_byte_chunking_yields_same_events() {
        let stream = concat!(
            "data: {\"type\":\"planning\",\"message\":\"正在制定研究计划...\",\"data\":null}\n\n",
            "data: {\"type\":\"plan\",\"data\":[{\"title\":\"背景\"}]}\n\n",
            "data: {\"type\":\"report_complete\",\"data\":{\"report\":\"# 报告\"}}\n\n",
        );
        let reference = {
            let (_, _, events) = collect(&ScriptedTransport::with_chunks([stream])).await;
            events
        };
        assert_eq!(kinds(&reference), vec!["planning", "plan", "report_complete"]);

        let bytes = stream.as_bytes();
        for size in [1, 2, 3, 5, 7, 64] {
            let transport = ScriptedTransport {
                chunks: bytes
                    .chunks(size)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect(),
                ..ScriptedTransport::default()
            };
            let (_, result, events) = collect(&transport).await;
            assert!(result.unwrap().saw_completion);
            assert_eq!(events, reference, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn test_payload_split_across_frames() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"kind\":\"plan\n\n",
            "data: \",\"message\":\"joined\"}\n\n",
        ]);
        let (_, result, events) = collect(&transport).await;
        assert_eq!(result.unwrap().events_delivered, 1);
        assert_eq!(events[0].message.as_deref(), Some("joined"));
    }

    #[tokio::test]
    async fn test_events_after_completion_are_still_read() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"kind\":\"report_complete\"}\n\n",
            "data: {\"kind\":\"telemetry\"}\n\n",
        ]);
        let (_, result, events) = collect(&transport).await;
        assert!(result.unwrap().saw_completion);
        assert_eq!(kinds(&events), vec!["report_complete", "telemetry"]);
    }

    #[tokio::test]
    async fn test_error_event_is_data_not_failure() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"type\":\"error\",\"message\":\"报告生成失败\",\"data\":null}\n\n",
        ]);
        let (session, result, events) = collect(&transport).await;
        tokio_test::assert_ok!(result);
        assert!(events[0].is_error());
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_unterminated_last_frame_is_recovered() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"kind\":\"step_start\"}\n\n",
            "data: {\"kind\":\"report_complete\"}",
        ]);
        let (_, result, events) = collect(&transport).await;
        assert!(result.unwrap().saw_completion);
        assert_eq!(kinds(&events), vec!["step_start", "report_complete"]);
    }

    #[tokio::test]
    async fn test_unterminated_tail_past_frame_bound_is_not_fatal() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"kind\":\n\n",
            "data: \"plan\",\n\n",
            "data: \"message\":",
        ]);
        let mut session = StreamSession::new(SessionConfig {
            timeout: Duration::from_secs(5),
            limits: DecoderLimits {
                max_pending_frames: 3,
                max_pending_bytes: 1024,
            },
        });
        let summary = session.run(&transport, &request(), |_| {}).await.unwrap();
        assert_eq!(summary.events_delivered, 0);
        assert_eq!(summary.dropped_fragments.len(), 1);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_keep_alive_and_truncated_frames_do_not_hide_the_report() {
        let transport = ScriptedTransport::with_chunks([
            "data: keep-alive\n\n",
            "data: {\"kind\":\"pla\n\n",
            "data: {\"kind\":\"plan\"}\n\n",
            "data: {\"kind\":\"report_complete\"}\n\n",
        ]);
        let (_, result, events) = collect(&transport).await;
        let summary = result.unwrap();
        assert!(summary.saw_completion);
        assert_eq!(kinds(&events), vec!["plan", "report_complete"]);
        assert_eq!(summary.dropped_fragments.len(), 2);
    }

    #[tokio::test]
    async fn test_frame_without_separator_hits_byte_bound() {
        let (xs, ys) = ("x".repeat(64), "y".repeat(64));
        let transport = ScriptedTransport::with_chunks(["data: ", xs.as_str(), ys.as_str()]);
        let mut session = StreamSession::new(SessionConfig {
            timeout: Duration::from_secs(5),
            limits: DecoderLimits {
                max_pending_frames: 8,
                max_pending_bytes: 100,
            },
        });
        let err = session.run(&transport, &request(), |_| {}).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedStream);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_leftover_fragment_is_reported() {
        let transport = ScriptedTransport::with_chunks(["data: {\"kind\":\"step_sta\n\n"]);
        let (session, result, events) = collect(&transport).await;
        let summary = result.unwrap();
        assert!(events.is_empty());
        assert_eq!(summary.dropped_fragments.len(), 1);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_connection_reset_fails_session() {
        let transport = ScriptedTransport::with_chunks(["data: {\"kind\":\"planning\"}\n\n"])
            .then_error(ResearchError::connection("connection reset by peer"));
        let (session, result, events) = collect(&transport).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectionFailure);
        assert_eq!(kinds(&events), vec!["planning"]);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_open_failure_keeps_http_status() {
        let transport = ScriptedTransport::failing_open(ResearchError::http_status(500, "boom"));
        let (session, result, events) = collect(&transport).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::HttpStatusFailure);
        assert_eq!(err.status, Some(500));
        assert!(events.is_empty());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_malformed_stream_fails_session() {
        let transport = ScriptedTransport::with_chunks([
            "data: {\"kind\":\n\n",
            "data: [1,\n\n",
            "data: [2,\n\n",
        ]);
        let mut session = StreamSession::new(SessionConfig {
            timeout: Duration::from_secs(5),
            limits: DecoderLimits {
                max_pending_frames: 2,
                max_pending_bytes: 1024,
            },
        });
        let err = session.run(&transport, &request(), |_| {}).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedStream);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_pending_read() {
        let transport =
            ScriptedTransport::with_chunks(["data: {\"kind\":\"planning\"}\n\n"]).stalled();
        let mut session = StreamSession::new(SessionConfig {
            timeout: Duration::from_secs(30),
            limits: DecoderLimits::default(),
        });
        let token = session.cancellation_token();
        let mut delivered = 0;

        let err = session
            .run(&transport, &request(), |_| delivered += 1)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(!err.is_cancelled());
        assert_eq!(delivered, 1);
        assert!(token.is_cancelled());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_caller_cancellation_from_handler() {
        let transport =
            ScriptedTransport::with_chunks(["data: {\"kind\":\"planning\"}\n\n"]).stalled();
        let mut session = StreamSession::new(SessionConfig::default());
        let token = session.cancellation_token();

        let err = session
            .run(&transport, &request(), |_| token.cancel())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_cancelled());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let transport = ScriptedTransport::with_chunks(["data: [DONE]\n\n"]);
        let mut session = StreamSession::new(SessionConfig::default());
        session.run(&transport, &request(), |_| {}).await.unwrap();
        let err = session.run(&transport, &request(), |_| {}).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
    }
}
