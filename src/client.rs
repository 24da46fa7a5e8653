use crate::cancel::SessionRegistry;
use crate::error::{ResearchError, Result, log_error};
use crate::events::StreamEvent;
use crate::history::{HistoryStore, RecordPatch, RecordStatus, ResearchRecord};
use crate::models::{
    HealthStatus, MessageResponse, RemoteHistory, ResearchRequest, ResearchResponse,
    ResearchStatus,
};
use crate::persistence::HistoryBackend;
use crate::retry::RetryPolicy;
use crate::session::{SessionConfig, SessionSummary, StreamSession};
use crate::transport::{HttpTransport, ResearchTransport};

/// UI context used when the caller does not name one.
pub const DEFAULT_CONTEXT: &str = "default";

const INCOMPLETE_STREAM: &str = "stream ended before a report was produced";

// ============================================================================
// Research Client
// ============================================================================

/// Entry point for running research tasks against a backend.
///
/// Streams go through a [`SessionRegistry`], so starting a new stream in a
/// context cancels the one already running there. Non-streaming calls are
/// retried with the configured [`RetryPolicy`].
pub struct ResearchClient<T: ResearchTransport = HttpTransport> {
    transport: T,
    session: SessionConfig,
    retry: RetryPolicy,
    registry: SessionRegistry,
}

impl<T: ResearchTransport> ResearchClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            session: SessionConfig::default(),
            retry: RetryPolicy::default(),
            registry: SessionRegistry::new(),
        }
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    pub async fn start_research_stream<F>(&self, query: &str, on_update: F) -> Result<SessionSummary>
    where
        F: FnMut(&StreamEvent),
    {
        self.start_research_stream_in(DEFAULT_CONTEXT, query, on_update)
            .await
    }

    /// Streams a research task in `context`, cancelling any stream still
    /// active there.
    pub async fn start_research_stream_in<F>(
        &self,
        context: &str,
        query: &str,
        on_update: F,
    ) -> Result<SessionSummary>
    where
        F: FnMut(&StreamEvent),
    {
        let ticket = self.registry.register(context).await;
        let mut session = StreamSession::with_token(self.session, ticket.token.clone());
        log::info!(
            "starting research stream {} in context '{}': {}",
            session.id(),
            context,
            query
        );

        let request = ResearchRequest::streaming(query);
        let result = session.run(&self.transport, &request, on_update).await;
        self.registry.unregister(&ticket).await;
        result
    }

    /// Cancels the stream running in `context`, if any.
    pub async fn cancel(&self, context: &str) -> bool {
        self.registry.cancel(context).await
    }

    // ========================================================================
    // Non-streaming
    // ========================================================================

    pub async fn start_research(&self, query: &str) -> Result<ResearchResponse> {
        let request = ResearchRequest::blocking(query);
        self.retry
            .run(|| self.transport.fetch_report(&request))
            .await
    }

    pub async fn health_check(&self) -> Result<HealthStatus> {
        self.retry.run(|| self.transport.health()).await
    }

    // ========================================================================
    // Tracked run
    // ========================================================================

    /// Runs a research task and keeps its history record up to date.
    ///
    /// Every event goes to `on_update` first; the record update it implies is
    /// then applied to `store`. A network failure before completion triggers
    /// one non-streaming attempt. Cancelled runs are not retried.
    pub async fn run_tracked<B, F>(
        &self,
        store: &mut HistoryStore<B>,
        query: &str,
        mut on_update: F,
    ) -> Result<ResearchRecord>
    where
        B: HistoryBackend,
        F: FnMut(&StreamEvent),
    {
        let id = store.add_record(query, RecordStatus::InProgress).id;

        let outcome = self
            .start_research_stream(query, |event| {
                on_update(event);
                let Some(patch) = RecordPatch::from_event(event) else {
                    return;
                };
                let unchanged = patch == RecordPatch::in_progress()
                    && store.get(&id).is_some_and(|r| r.status == RecordStatus::InProgress);
                if !unchanged {
                    store.update_record(&id, patch);
                }
            })
            .await;

        let status = store.get(&id).map(|r| r.status);
        match outcome {
            Ok(_) if status.is_some_and(|s| s.is_terminal()) => {}
            Ok(_) => {
                log::warn!("research {} {}", id, INCOMPLETE_STREAM);
                store.update_record(&id, RecordPatch::failed(INCOMPLETE_STREAM));
            }
            Err(err) if status.is_some_and(|s| s.is_terminal()) => {
                log::debug!("research {} already settled, ignoring stream failure: {}", id, err);
            }
            Err(err) if err.is_network() && !err.is_cancelled() => {
                log::warn!("stream for research {} failed ({}), falling back to a single request", id, err);
                match self.transport.fetch_report(&ResearchRequest::blocking(query)).await {
                    Ok(response) => {
                        store.update_record(&id, RecordPatch::completed(response.final_result()));
                    }
                    Err(fallback) => {
                        log_error(&fallback);
                        store.update_record(&id, RecordPatch::failed(fallback.user_message()));
                        return Err(fallback);
                    }
                }
            }
            Err(err) => {
                store.update_record(&id, RecordPatch::failed(err.user_message()));
                return Err(err);
            }
        }

        store
            .get(&id)
            .cloned()
            .ok_or_else(|| ResearchError::unknown(format!("research {} disappeared from history", id)))
    }
}

// ============================================================================
// HTTP-only endpoints
// ============================================================================

impl ResearchClient<HttpTransport> {
    pub async fn research_status(&self) -> Result<ResearchStatus> {
        self.retry.run(|| self.transport.research_status()).await
    }

    pub async fn remote_history(&self) -> Result<RemoteHistory> {
        self.retry.run(|| self.transport.remote_history()).await
    }

    pub async fn clear_remote_history(&self) -> Result<MessageResponse> {
        self.retry.run(|| self.transport.clear_remote_history()).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
