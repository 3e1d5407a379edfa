/// Utility helpers used by all collectors.
///
/// This module contains:
/// - Time helpers
/// - Whitespace / number cleanup for scraped text
/// - Log excerpts of response bodies
///
/// IMPORTANT:
/// - No source-specific logic should live here.
/// - This module must remain lightweight and deterministic.
///

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Returns the current UTC timestamp.
///
/// Used as the retrieval timestamp of every fetch.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Converts a wall-clock timestamp published by a source into UTC.
///
/// Sources publish Italian local time without an offset; the process is
/// expected to run with `TZ=Europe/Rome`. Ambiguous times (DST fall-back)
/// resolve to the earlier instant.
pub fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Collapses runs of whitespace (including NBSP) into single spaces and trims.
///
/// Examples:
/// - "  PS\u{a0} SCIACCA \n" -> "PS SCIACCA"
///
pub fn collapse_ws(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a patient-count cell.
///
/// Cells often carry a label before the number ("Rosso 3") or are
/// empty when the count is zero.
///
/// Examples:
/// - ""         -> Some(0)
/// - "4"        -> Some(4)
/// - "Rosso 3"  -> Some(3)
/// - "n.d."     -> None
///
pub fn parse_count(cell: &str) -> Option<i64> {
    let cleaned = collapse_ws(cell);
    if cleaned.is_empty() {
        return Some(0);
    }
    cleaned.split(' ').next_back()?.parse::<i64>().ok()
}

/// Returns at most `max_chars` characters of `body`, whitespace collapsed.
///
/// Used when logging upstream format drift.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let flat = collapse_ws(body);
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
