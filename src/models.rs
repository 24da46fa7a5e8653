use serde::{Deserialize, Serialize};

use crate::events::{EventKind, StreamEvent};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchRequest {
    pub query: String,
    pub stream: bool,
}

impl ResearchRequest {
    pub fn streaming(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            stream: true,
        }
    }

    pub fn blocking(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            stream: false,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Final artifact of a research task: the report plus the structures it was
/// built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResearchResult {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub plan: Vec<serde_json::Value>,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    #[serde(default)]
    pub report: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ResearchResult {
    /// Placeholder used when the backend finished but returned no report.
    pub fn summary_only(query: &str) -> Self {
        Self {
            query: query.to_string(),
            report: format!(
                "# {} - Research report\n\nResearch completed, but detailed results are not available.",
                query
            ),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            ..Self::default()
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        if !payload.is_object() {
            return None;
        }
        serde_json::from_value(payload.clone()).ok()
    }
}

/// Body of a non-streaming `POST /api/research`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchResponse {
    pub query: String,
    pub status: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ResearchResponse {
    /// Every update the backend collected while running the task.
    pub fn updates(&self) -> Vec<StreamEvent> {
        self.data
            .get("updates")
            .and_then(|u| u.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The report carried by the last `report_complete` update, or a
    /// placeholder when there is none.
    pub fn final_result(&self) -> ResearchResult {
        self.updates()
            .iter()
            .rev()
            .find(|event| event.kind == EventKind::ReportComplete)
            .and_then(|event| ResearchResult::from_payload(&event.payload))
            .unwrap_or_else(|| ResearchResult::summary_only(&self.query))
    }
}

// ============================================================================
// Service Endpoints
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            message: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchStatus {
    pub status: String,
    #[serde(default)]
    pub steps: Vec<serde_json::Value>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteHistory {
    #[serde(default)]
    pub history: Vec<serde_json::Value>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}
