//! Error types for the collection pipeline.
//!
//! Per-source errors (`FetchError`, `ExtractionError`) never escape a pass:
//! the orchestrator turns them into `ScrapeOutcome` failures. Registry errors
//! are startup-time and fatal.

use std::time::Duration;

use thiserror::Error;

use crate::hospitals::{adapter::SourceKind, codes::SourceId};

/// Why a retrieval attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchCause {
    /// Non-success HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),
    /// The request did not finish within its timeout.
    #[error("timed out")]
    Timeout,
    /// Connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The body arrived but could not be read or decoded.
    #[error("unreadable body: {0}")]
    Body(String),
}

impl FetchCause {
    /// Timeouts, transport failures, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Status(code) => *code == 429 || (500..600).contains(code),
            FetchCause::Timeout | FetchCause::Connect(_) | FetchCause::Transport(_) => true,
            FetchCause::Body(_) => false,
        }
    }
}

/// Retrieval failed, either permanently or after exhausting retries.
#[derive(Debug, Clone, Error)]
#[error("GET {url} failed after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    pub cause: FetchCause,
}

/// An expected field was missing or malformed in a successful response.
#[derive(Debug, Clone, Error)]
#[error("{source_id}: cannot extract {field}: {detail}")]
pub struct ExtractionError {
    pub source_id: SourceId,
    pub field: String,
    pub detail: String,
    /// Start of the response body, kept for diagnosing format drift.
    pub excerpt: String,
}

impl ExtractionError {
    pub fn new(source_id: SourceId, field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source_id,
            field: field.into(),
            detail: detail.into(),
            excerpt: String::new(),
        }
    }

    /// Arithmetic on extracted counts left the `i64` range.
    pub fn overflow(source_id: SourceId, field: impl Into<String>) -> Self {
        Self::new(source_id, field, CountOverflow.to_string())
    }

    pub fn with_excerpt(mut self, body: &str) -> Self {
        self.excerpt = crate::util::excerpt(body, 240);
        self
    }
}

/// A patient count or a value derived from counts does not fit in `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("patient count out of range")]
pub struct CountOverflow;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a collector is already registered for {0}")]
    DuplicateRegistration(SourceId),

    #[error("collector registered as {registered} declares identity {declared}")]
    MissingIdentity {
        registered: SourceId,
        declared: SourceId,
    },

    #[error("{source_id} registered as {registered} but its collector reports {declared}")]
    KindMismatch {
        source_id: SourceId,
        registered: SourceKind,
        declared: SourceKind,
    },

    #[error("no collector registered for {0}")]
    NotRegistered(SourceId),

    #[error("the process-wide registry is already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    #[error("a collection pass is already in progress")]
    PassAlreadyInProgress,
}

/// Formats a duration for log lines and failure messages.
pub(crate) fn secs(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}
