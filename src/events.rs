use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ============================================================================
// Event Kinds
// ============================================================================

/// Tag of a pipeline notification.
///
/// The set is open: tags this client does not know about are kept verbatim in
/// [`EventKind::Other`] and forwarded like any other event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Planning stage
    Planning,
    PlanningStep,
    Plan,

    // Execution stage
    StepStart,
    SearchProgress,
    SearchResult,
    AnalysisProgress,
    StepComplete,

    // Reporting stage
    ReportGenerating,
    ReportComplete,

    Error,

    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Planning => "planning",
            Self::PlanningStep => "planning_step",
            Self::Plan => "plan",
            Self::StepStart => "step_start",
            Self::SearchProgress => "search_progress",
            Self::SearchResult => "search_result",
            Self::AnalysisProgress => "analysis_progress",
            Self::StepComplete => "step_complete",
            Self::ReportGenerating => "report_generating",
            Self::ReportComplete => "report_complete",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "planning" => Self::Planning,
            "planning_step" => Self::PlanningStep,
            "plan" => Self::Plan,
            "step_start" => Self::StepStart,
            "search_progress" => Self::SearchProgress,
            "search_result" => Self::SearchResult,
            "analysis_progress" => Self::AnalysisProgress,
            "step_complete" => Self::StepComplete,
            "report_generating" => Self::ReportGenerating,
            "report_complete" => Self::ReportComplete,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        Self::from_tag(tag)
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

// ============================================================================
// Stream Event
// ============================================================================

/// One notification from the research pipeline.
///
/// The producer writes `type`/`data`; both spellings are accepted on input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    #[serde(alias = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, alias = "data", skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl StreamEvent {
    pub fn new(kind: impl Into<EventKind>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// `report_complete` is the caller-level completion marker. It does not
    /// end the session; the transport does.
    pub fn is_completion(&self) -> bool {
        self.kind == EventKind::ReportComplete
    }

    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }

    /// Ordered plan steps carried by a `plan` event.
    pub fn plan_steps(&self) -> Option<&[serde_json::Value]> {
        match self.kind {
            EventKind::Plan => self.payload.as_array().map(Vec::as_slice),
            _ => None,
        }
    }
}
