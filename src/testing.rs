//! Scripted transport used by the unit tests.

use bytes::Bytes;
use futures::StreamExt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{ResearchError, Result};
use crate::models::{HealthStatus, ResearchRequest, ResearchResponse};
use crate::transport::{ByteStream, ResearchTransport};

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    pub chunks: Vec<Result<Bytes>>,
    pub open_error: Option<ResearchError>,
    /// Keep the body open forever after the scripted chunks.
    pub stall: bool,
    pub reports: Mutex<Vec<Result<ResearchResponse>>>,
    pub stream_calls: AtomicUsize,
    pub report_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn with_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c.into())))
                .collect(),
            ..Self::default()
        }
    }

    pub fn then_error(mut self, err: ResearchError) -> Self {
        self.chunks.push(Err(err));
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn failing_open(err: ResearchError) -> Self {
        Self {
            open_error: Some(err),
            ..Self::default()
        }
    }

    pub fn with_report(self, report: Result<ResearchResponse>) -> Self {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report);
        self
    }
}

impl ResearchTransport for ScriptedTransport {
    async fn open_stream(&self, _request: &ResearchRequest) -> Result<ByteStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        let body = futures::stream::iter(self.chunks.clone());
        if self.stall {
            Ok(body.chain(futures::stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }

    async fn fetch_report(&self, _request: &ResearchRequest) -> Result<ResearchResponse> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        if reports.is_empty() {
            Err(ResearchError::connection("no scripted report"))
        } else {
            reports.remove(0)
        }
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::healthy())
    }
}
