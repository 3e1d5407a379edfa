use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CountOverflow;
use crate::hospitals::codes::SourceId;

// ------------------------------------------------------------
// Canonical triage color
// ------------------------------------------------------------
//
// Every source vocabulary (rosso, giallo, azzurro, grey, ...)
// is folded into this closed set by `normalize::color`.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalColor {
    White,
    Green,
    Blue,
    Orange,
    Red,
    Unknown,
}

impl CanonicalColor {
    /// Determinate colors, most critical first.
    pub const PRIORITY: [CanonicalColor; 5] = [
        CanonicalColor::Red,
        CanonicalColor::Orange,
        CanonicalColor::Blue,
        CanonicalColor::Green,
        CanonicalColor::White,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalColor::White => "white",
            CanonicalColor::Green => "green",
            CanonicalColor::Blue => "blue",
            CanonicalColor::Orange => "orange",
            CanonicalColor::Red => "red",
            CanonicalColor::Unknown => "unknown",
        }
    }

    pub fn is_determinate(self) -> bool {
        self != CanonicalColor::Unknown
    }
}

impl fmt::Display for CanonicalColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------
// Color distribution
// ------------------------------------------------------------
//
// Patient counts per canonical color. Counts are signed so that a
// malformed upstream value survives extraction and is rejected by
// validation instead of being silently clamped.
//
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorDistribution {
    pub white: i64,
    pub green: i64,
    pub blue: i64,
    pub orange: i64,
    pub red: i64,
}

impl ColorDistribution {
    /// Adds `count` patients to `color`. Unknown colors are not tracked.
    pub fn add(&mut self, color: CanonicalColor, count: i64) -> Result<(), CountOverflow> {
        let slot = match color {
            CanonicalColor::White => &mut self.white,
            CanonicalColor::Green => &mut self.green,
            CanonicalColor::Blue => &mut self.blue,
            CanonicalColor::Orange => &mut self.orange,
            CanonicalColor::Red => &mut self.red,
            CanonicalColor::Unknown => return Ok(()),
        };
        *slot = slot.checked_add(count).ok_or(CountOverflow)?;
        Ok(())
    }

    pub fn get(&self, color: CanonicalColor) -> i64 {
        match color {
            CanonicalColor::White => self.white,
            CanonicalColor::Green => self.green,
            CanonicalColor::Blue => self.blue,
            CanonicalColor::Orange => self.orange,
            CanonicalColor::Red => self.red,
            CanonicalColor::Unknown => 0,
        }
    }

    pub fn total(&self) -> Result<i64, CountOverflow> {
        CanonicalColor::PRIORITY
            .iter()
            .try_fold(0i64, |acc, c| acc.checked_add(self.get(*c)).ok_or(CountOverflow))
    }

    /// Most critical color with at least one patient, `Unknown` if empty.
    pub fn most_critical(&self) -> CanonicalColor {
        CanonicalColor::PRIORITY
            .into_iter()
            .find(|c| self.get(*c) > 0)
            .unwrap_or(CanonicalColor::Unknown)
    }

    /// First color (in priority order) with a negative count.
    pub fn first_negative(&self) -> Option<CanonicalColor> {
        CanonicalColor::PRIORITY
            .into_iter()
            .find(|c| self.get(*c) < 0)
    }

    pub fn merged(mut self, other: &ColorDistribution) -> Result<Self, CountOverflow> {
        for color in CanonicalColor::PRIORITY {
            self.add(color, other.get(color))?;
        }
        Ok(self)
    }
}

// ------------------------------------------------------------
// Reading
// ------------------------------------------------------------
//
// One normalized snapshot of a single source. This is the only
// shape handed to the persistence layer.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub source: SourceId,

    /// Minutes; `None` when the source text could not be parsed
    /// or the source does not publish a wait time.
    pub waiting_minutes: Option<i64>,

    pub color: CanonicalColor,

    pub available_beds: i64,

    /// Patients currently waiting to be seen, when published.
    pub patients_waiting: Option<i64>,

    pub color_distribution: Option<ColorDistribution>,

    /// When this process fetched the data.
    pub retrieved_at: DateTime<Utc>,

    /// When the source claims its data was last updated.
    pub external_last_update: Option<DateTime<Utc>>,
}

impl Reading {
    /// Starts a reading with no wait time, unknown color and zero beds.
    pub fn new(source: SourceId, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            source,
            waiting_minutes: None,
            color: CanonicalColor::Unknown,
            available_beds: 0,
            patients_waiting: None,
            color_distribution: None,
            retrieved_at,
            external_last_update: None,
        }
    }
}

// ------------------------------------------------------------
// Scrape outcome
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Fetch,
    Extraction,
    ValidationFailed,
    TimedOut,
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Fetch => "fetch_error",
            FailureKind::Extraction => "extraction_error",
            FailureKind::ValidationFailed => "validation_failed",
            FailureKind::TimedOut => "timed_out",
            FailureKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one collector in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub source: SourceId,
    pub result: Result<Reading, ScrapeFailure>,
}

impl ScrapeOutcome {
    pub fn success(reading: Reading) -> Self {
        Self {
            source: reading.source,
            result: Ok(reading),
        }
    }

    pub fn failure(source: SourceId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            source,
            result: Err(ScrapeFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn reading(&self) -> Option<&Reading> {
        self.result.as_ref().ok()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result.as_ref().err().map(|f| f.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_critical_follows_priority() {
        let mut d = ColorDistribution::default();
        d.add(CanonicalColor::Green, 4).unwrap();
        d.add(CanonicalColor::Blue, 1).unwrap();
        assert_eq!(d.most_critical(), CanonicalColor::Blue);
        assert_eq!(d.total(), Ok(5));

        assert_eq!(ColorDistribution::default().most_critical(), CanonicalColor::Unknown);
    }

    #[test]
    fn unknown_color_is_not_counted() {
        let mut d = ColorDistribution::default();
        d.add(CanonicalColor::Unknown, 7).unwrap();
        assert_eq!(d.total(), Ok(0));
    }

    #[test]
    fn out_of_range_counts_are_reported() {
        let mut d = ColorDistribution::default();
        d.add(CanonicalColor::Red, i64::MAX).unwrap();
        assert_eq!(d.add(CanonicalColor::Red, 1), Err(CountOverflow));
        assert_eq!(d.red, i64::MAX);

        d.add(CanonicalColor::Green, 1).unwrap();
        assert_eq!(d.total(), Err(CountOverflow));
        assert_eq!(d.merged(&d), Err(CountOverflow));
    }

    #[test]
    fn colors_serialize_lowercase() {
        let json = serde_json::to_string(&CanonicalColor::Orange).unwrap();
        assert_eq!(json, "\"orange\"");
    }
}
