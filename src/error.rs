// src/error.rs

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

/// Failure surfaced by both request paths.
///
/// Raw transport and parse failures are funnelled through the `From` impls
/// below so callers only ever see one of the [`ErrorKind`] variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ResearchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // Convenience constructors
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailure, message)
    }

    pub fn http_status(status: u16, detail: impl Into<String>) -> Self {
        let mut err = Self::new(
            ErrorKind::HttpStatusFailure,
            format!("HTTP {}: {}", status, detail.into()),
        );
        err.status = Some(status);
        err
    }

    /// Caller-requested abort. Classified as a timeout, but tagged so that
    /// callers can tell it apart from an expired deadline.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::timeout(message).with_details(serde_json::json!({ "cancelled": true }))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedStream, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Network-classified failures are the ones that trigger the
    /// non-streaming fallback.
    pub fn is_network(&self) -> bool {
        self.kind.is_network()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Timeout
            && self
                .details
                .as_ref()
                .and_then(|d| d.get("cancelled"))
                .and_then(|c| c.as_bool())
                .unwrap_or(false)
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Timeout => {
                "The research service took too long to respond. Please try again.".to_string()
            }
            ErrorKind::ConnectionFailure => {
                "Network error, please check your connection to the research service.".to_string()
            }
            ErrorKind::HttpStatusFailure => match self.status {
                Some(status) => format!("The research service rejected the request ({}): {}", status, self.message),
                None => format!("The research service rejected the request: {}", self.message),
            },
            ErrorKind::MalformedStream => {
                "The research service sent data that could not be understood.".to_string()
            }
            ErrorKind::Unknown => format!("Unexpected error: {}", self.message),
        }
    }
}

impl fmt::Display for ResearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ResearchError {}

// ============================================================================
// Error Kinds
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Timeout,
    ConnectionFailure,
    HttpStatusFailure,
    MalformedStream,
    Unknown,
}

impl ErrorKind {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailure)
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

pub type Result<T> = std::result::Result<T, ResearchError>;

// ============================================================================
// Store Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("history storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Error Classification
// ============================================================================

impl From<reqwest::Error> for ResearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("Request timed out: {}", err))
        } else if let Some(status) = err.status() {
            Self::http_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Self::malformed(format!("Response decode failed: {}", err))
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::connection(format!("Connection failed: {}", err))
        } else {
            Self::unknown(err.to_string())
        }
    }
}

impl From<std::io::Error> for ResearchError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        match err.kind() {
            Io::TimedOut => Self::timeout(format!("IO timeout: {}", err)),
            Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::ConnectionRefused
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::UnexpectedEof => Self::connection(format!("Connection lost: {}", err)),
            _ => Self::unknown(format!("IO error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for ResearchError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(format!("JSON error: {}", err))
    }
}

// ============================================================================
// Error Context Extension
// ============================================================================

pub trait ErrorContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<ResearchError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let mut err = e.into();
            err.message = format!("{}: {}", context.into(), err.message);
            err
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn log_error(error: &ResearchError) {
    match error.kind {
        ErrorKind::Timeout | ErrorKind::ConnectionFailure | ErrorKind::Unknown => {
            log::error!("{}", error)
        }
        ErrorKind::HttpStatusFailure if error.status.is_some_and(|s| s >= 500) => {
            log::error!("{}", error)
        }
        _ => log::warn!("{}", error),
    }
}

// ============================================================================
// Tests
// ============================================================================
