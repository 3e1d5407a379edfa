use crate::metrics::{METRICS, RuntimeMetrics};
use crate::schema::CanonicalColor;

/// Known raw tokens, lowercase. Yellow is folded into orange: the
/// regional triage scale replaced "giallo" with "arancione" and some
/// sources still publish the old name.
const COLOR_TABLE: &[(&str, CanonicalColor)] = &[
    // canonical
    ("white", CanonicalColor::White),
    ("green", CanonicalColor::Green),
    ("blue", CanonicalColor::Blue),
    ("orange", CanonicalColor::Orange),
    ("red", CanonicalColor::Red),
    ("unknown", CanonicalColor::Unknown),
    // italian
    ("bianco", CanonicalColor::White),
    ("bianca", CanonicalColor::White),
    ("verde", CanonicalColor::Green),
    ("blu", CanonicalColor::Blue),
    ("azzurro", CanonicalColor::Blue),
    ("azzurra", CanonicalColor::Blue),
    ("celeste", CanonicalColor::Blue),
    ("arancione", CanonicalColor::Orange),
    ("arancio", CanonicalColor::Orange),
    ("giallo", CanonicalColor::Orange),
    ("gialla", CanonicalColor::Orange),
    ("rosso", CanonicalColor::Red),
    ("rossa", CanonicalColor::Red),
    // english synonyms
    ("yellow", CanonicalColor::Orange),
    ("azure", CanonicalColor::Blue),
    ("light blue", CanonicalColor::Blue),
    ("grey", CanonicalColor::White),
    ("gray", CanonicalColor::White),
];

/// Maps a raw triage-color token to its canonical color.
///
/// Case-insensitive and whitespace-tolerant. Tokens outside the table
/// map to `Unknown` and are logged with the original text.
///
/// Examples:
/// - "verde"   -> Green
/// - "BIANCO"  -> White
/// - "giallo"  -> Orange
/// - "purple"  -> Unknown
///
pub fn normalize_color(raw: &str) -> CanonicalColor {
    let token = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    if let Some((_, color)) = COLOR_TABLE.iter().find(|(name, _)| *name == token) {
        return *color;
    }

    RuntimeMetrics::incr(&METRICS.unknown_colors);
    log::warn!("unrecognized triage color token {raw:?}");
    CanonicalColor::Unknown
}
