use once_cell::sync::Lazy;
use regex::Regex;

use crate::metrics::{METRICS, RuntimeMetrics};

// Matchers, evaluated in this order; the first match wins. All are
// anchored on both ends, so partial matches inside longer text are
// not accepted.

static CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}):([0-5]\d)$").expect("clock pattern"));

static HOURS_MINUTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d+)\s*(?:hours|hour|hrs|hr|ore|ora|h)\.?\s*(?:(?:e|and|,)\s*)?(?:(\d+)\s*(?:minutes|minute|minuti|minuto|mins|min|m)\.?)?$",
    )
    .expect("hours/minutes pattern")
});

static MINUTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s*(?:minutes|minute|minuti|minuto|mins|min|m|')\.?$")
        .expect("minutes pattern")
});

static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)$").expect("bare pattern"));

/// Converts a free-text wait time into minutes.
///
/// Recognized shapes, in priority order:
/// 1. "2:30"                         -> 150
/// 2. "2 ore e 30 minuti", "1h 30m"  -> 150, 90
/// 3. "45 min", "150 minuti"         -> 45, 150
/// 4. "90"                           -> 90
///
/// Anything else yields `None` (logged at warning level). Callers are
/// expected to apply source-specific rewrites (e.g. "e mezza") first.
pub fn parse_waiting_time(raw: &str) -> Option<i64> {
    let text = raw.trim().to_lowercase();

    let minutes = if text.is_empty() {
        None
    } else {
        parse_normalized(&text)
    };

    match minutes {
        Some(m) => {
            log::debug!("parsed wait time {raw:?} as {m} min");
            Some(m)
        }
        None => {
            RuntimeMetrics::incr(&METRICS.unparsed_wait_times);
            log::warn!("unrecognized wait time {raw:?}");
            None
        }
    }
}

fn parse_normalized(text: &str) -> Option<i64> {
    if let Some(caps) = CLOCK.captures(text) {
        return hours_and_minutes(&caps[1], Some(&caps[2]));
    }
    if let Some(caps) = HOURS_MINUTES.captures(text) {
        return hours_and_minutes(&caps[1], caps.get(2).map(|m| m.as_str()));
    }
    if let Some(caps) = MINUTES.captures(text) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = BARE.captures(text) {
        return caps[1].parse().ok();
    }
    None
}

fn hours_and_minutes(hours: &str, minutes: Option<&str>) -> Option<i64> {
    let h: i64 = hours.parse().ok()?;
    let m: i64 = match minutes {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    h.checked_mul(60)?.checked_add(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsed_text_is_counted() {
        let before = METRICS.snapshot().unparsed_wait_times;
        assert_eq!(parse_waiting_time("n/d"), None);
        // other tests share the counter, so only a lower bound holds
        assert!(METRICS.snapshot().unparsed_wait_times >= before + 1);
    }

    #[test]
    fn documented_examples() {
        assert_eq!(parse_waiting_time("2 ore e 30 minuti"), Some(150));
        assert_eq!(parse_waiting_time("45 min"), Some(45));
        assert_eq!(parse_waiting_time("1h 30m"), Some(90));
        assert_eq!(parse_waiting_time("2:30"), Some(150));
        assert_eq!(parse_waiting_time("150 minuti"), Some(150));
        assert_eq!(parse_waiting_time("n/a"), None);
    }

    #[test]
    fn hours_without_minutes() {
        assert_eq!(parse_waiting_time("1 ora"), Some(60));
        assert_eq!(parse_waiting_time("3 hours"), Some(180));
        assert_eq!(parse_waiting_time("2h"), Some(120));
    }

    #[test]
    fn compact_and_spaced_forms() {
        assert_eq!(parse_waiting_time("3h  13m"), Some(193));
        assert_eq!(parse_waiting_time("1h30m"), Some(90));
        assert_eq!(parse_waiting_time("1 hour and 5 minutes"), Some(65));
        assert_eq!(parse_waiting_time("  45 MIN  "), Some(45));
        assert_eq!(parse_waiting_time("20'"), Some(20));
        assert_eq!(parse_waiting_time("0:05"), Some(5));
    }

    #[test]
    fn bare_integer_is_minutes() {
        assert_eq!(parse_waiting_time("90"), Some(90));
        assert_eq!(parse_waiting_time("0"), Some(0));
    }

    #[test]
    fn other_structures_are_absent() {
        assert_eq!(parse_waiting_time(""), None);
        assert_eq!(parse_waiting_time("   "), None);
        assert_eq!(parse_waiting_time("circa 2 ore"), None);
        assert_eq!(parse_waiting_time("2 ore e mezza"), None);
        assert_eq!(parse_waiting_time("-5"), None);
        assert_eq!(parse_waiting_time("2:75"), None);
        assert_eq!(parse_waiting_time("99999999999999999999"), None);
    }

    #[test]
    fn clock_takes_priority() {
        // would also look like hours to a looser matcher
        assert_eq!(parse_waiting_time("1:05"), Some(65));
    }
}
