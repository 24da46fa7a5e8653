use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{ErrorContext, ResearchError, Result};
use crate::models::{
    HealthStatus, MessageResponse, RemoteHistory, ResearchRequest, ResearchResponse,
    ResearchStatus,
};

pub const RESEARCH_PATH: &str = "/api/research";
pub const STATUS_PATH: &str = "/api/research/status";
pub const HISTORY_PATH: &str = "/api/research/history";
pub const HEALTH_PATH: &str = "/api/health";

/// Cancellable response body of a streaming request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

// ============================================================================
// Transport Seam
// ============================================================================

/// What the client needs from the research backend.
pub trait ResearchTransport: Send + Sync {
    /// Opens the streaming request. A non-success status is an error; the
    /// returned body has not been read yet.
    fn open_stream(
        &self,
        request: &ResearchRequest,
    ) -> impl Future<Output = Result<ByteStream>> + Send;

    /// Single non-streaming request, no retries.
    fn fetch_report(
        &self,
        request: &ResearchRequest,
    ) -> impl Future<Output = Result<ResearchResponse>> + Send;

    fn health(&self) -> impl Future<Output = Result<HealthStatus>> + Send;
}

// ============================================================================
// HTTP Transport
// ============================================================================

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /api/research/status`
    pub async fn research_status(&self) -> Result<ResearchStatus> {
        self.get_json(STATUS_PATH).await
    }

    /// `GET /api/research/history`
    pub async fn remote_history(&self) -> Result<RemoteHistory> {
        self.get_json(HISTORY_PATH).await
    }

    /// `DELETE /api/research/history`
    pub async fn clear_remote_history(&self) -> Result<MessageResponse> {
        log::debug!("API request: DELETE {}", HISTORY_PATH);
        let response = self
            .client
            .delete(self.url(HISTORY_PATH))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = check_status(response, HISTORY_PATH).await?;
        Ok(response.json().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        log::debug!("API request: GET {}", path);
        let response = self
            .client
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = check_status(response, path).await?;
        Ok(response.json().await?)
    }
}

impl ResearchTransport for HttpTransport {
    async fn open_stream(&self, request: &ResearchRequest) -> Result<ByteStream> {
        log::debug!("API request: POST {} (stream)", RESEARCH_PATH);
        // No request timeout here: the session owns the deadline.
        let response = self
            .client
            .post(self.url(RESEARCH_PATH))
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response, RESEARCH_PATH).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ResearchError::from))
            .boxed())
    }

    async fn fetch_report(&self, request: &ResearchRequest) -> Result<ResearchResponse> {
        log::debug!("API request: POST {}", RESEARCH_PATH);
        let response = self
            .client
            .post(self.url(RESEARCH_PATH))
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await?;
        let response = check_status(response, RESEARCH_PATH).await?;
        Ok(response.json().await?)
    }

    async fn health(&self) -> Result<HealthStatus> {
        self.get_json(HEALTH_PATH).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn check_status(response: reqwest::Response, path: &str) -> Result<reqwest::Response> {
    let status = response.status();
    log::debug!("API response: {} {}", status.as_u16(), path);
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    let mut err = ResearchError::http_status(status.as_u16(), detail);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        err = err.with_details(value);
    }
    Err(err)
}

/// Server-provided failure detail: FastAPI's `detail`, a `message` field, or
/// the raw body.
fn extract_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            let field = value.get("detail").or_else(|| value.get("message"))?;
            Some(match field.as_str() {
                Some(text) => text.to_string(),
                None => field.to_string(),
            })
        }
        Err(_) => Some(body.to_string()),
    }
}
