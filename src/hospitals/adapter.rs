use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::CollectorError,
    http::RetrievalClient,
    hospitals::codes::SourceId,
    schema::Reading,
};

/// How a source publishes its data.
///
/// Fixed at registration time; the orchestrator never branches on it,
/// it is kept for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Markup page parsed with CSS selectors
    Html,

    /// Structured JSON endpoint
    Api,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Html => f.write_str("html"),
            SourceKind::Api => f.write_str("api"),
        }
    }
}

/// Outcome of post-hoc reading checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Validation::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Collector is the abstraction layer between:
/// - The generic pass runner
/// - Source-specific pages and APIs
///
/// Each implementation must:
/// - Fetch its source through the shared `RetrievalClient`
/// - Extract the raw fields it needs
/// - Normalize them (wait time, colors) into a `Reading`
///
/// DESIGN GOALS:
/// - Zero source-specific logic outside collectors
/// - One collector instance per source per pass
/// - Uniform output across HTML and API sources
///
/// THREAD SAFETY:
/// - Must be Send + Sync; an instance is moved into its own task
///
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// The source this collector reads.
    ///
    /// CONTRACT:
    /// - Must equal the SourceId it is registered under
    fn source_id(&self) -> SourceId;

    fn kind(&self) -> SourceKind;

    /// Whether a reading without a determinate color is invalid.
    ///
    /// Sources that legitimately report an empty department
    /// (no patients, hence no color) keep the default.
    fn expects_color(&self) -> bool {
        false
    }

    /// Fetches and normalizes the current status.
    ///
    /// ERRORS:
    /// - `Fetch`: network / HTTP failure after retries
    /// - `Extraction`: expected field missing or malformed
    ///
    /// An unparseable wait time is not an error: it yields
    /// `waiting_minutes = None`.
    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError>;

    /// Checks a reading before it is accepted.
    ///
    /// Never fails hard: an invalid reading is reported with the
    /// offending field and logged at warning level.
    fn validate(&self, reading: &Reading) -> Validation {
        let verdict = check_reading(reading, self.source_id(), self.expects_color());
        if let Validation::Invalid { field, reason } = &verdict {
            log::warn!(
                "{}: reading rejected, field {field}: {reason}",
                self.source_id()
            );
        }
        verdict
    }
}

/// Shared reading checks used by `Collector::validate`.
pub fn check_reading(reading: &Reading, expected: SourceId, expects_color: bool) -> Validation {
    if reading.source != expected {
        return Validation::invalid(
            "source",
            format!("reading is for {}, expected {expected}", reading.source),
        );
    }

    if let Some(minutes) = reading.waiting_minutes {
        if minutes < 0 {
            return Validation::invalid("waiting_minutes", format!("negative value {minutes}"));
        }
    }

    if reading.available_beds < 0 {
        return Validation::invalid(
            "available_beds",
            format!("negative value {}", reading.available_beds),
        );
    }

    if let Some(waiting) = reading.patients_waiting {
        if waiting < 0 {
            return Validation::invalid("patients_waiting", format!("negative value {waiting}"));
        }
    }

    if expects_color && !reading.color.is_determinate() {
        return Validation::invalid("color", "source must report a determinate color");
    }

    if let Some(dist) = &reading.color_distribution {
        if let Some(color) = dist.first_negative() {
            return Validation::invalid(
                "color_distribution",
                format!("negative count {} for {color}", dist.get(color)),
            );
        }
    }

    Validation::Valid
}
