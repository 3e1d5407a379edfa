use serde_json::{Map, Value};

use crate::{
    error::{CollectorError, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::{normalize_color, parse_waiting_time},
    schema::{CanonicalColor, ColorDistribution, Reading},
};

use super::adapter::{Collector, SourceKind};
use super::codes::SourceId;
use super::registry::Registry;

/// Policlinico "Paolo Giaccone" exposes two JSON endpoints:
///
/// `/ProntoSoccorso`
///   {
///     "pazientiInAttesa": { "Rosso (1)": 0, "Arancione (2)": "2.0", ... , "Nero": 0 },
///     "carichiUrgenza":   { "Rosso (1)": 1, ... },
///     "tempiMediAttesa":  { "Rosso (1)": "0h  5m", "Arancione (2)": "3h  13m", ... }
///   }
///
/// `/ProntoSoccorsoIndici`
///   {
///     "postiTecniciPresidiati": 24,
///     "permanenza24H": "7 pazienti",
///     "permanenzaOltre24H": "3 pazienti"
///   }
///
/// Color keys carry the triage level in parentheses. "Nero" (deceased)
/// is not a triage color and is skipped.
pub const BASE_URL: &str = "https://www.policlinico.pa.it/o/PoliclinicoPaRestBuilder/v1.0";

const STATUS_ENDPOINT: &str = "/ProntoSoccorso";
const INDICES_ENDPOINT: &str = "/ProntoSoccorsoIndici";

pub struct PoliclinicoPalermoCollector {
    base_url: String,
}

impl PoliclinicoPalermoCollector {
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl Default for PoliclinicoPalermoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for PoliclinicoPalermoCollector {
    fn source_id(&self) -> SourceId {
        SourceId::PoliclinicoPalermo
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let opts = RequestOptions::default().with_header("Accept", "application/json");
        let status_url = format!("{}{STATUS_ENDPOINT}", self.base_url);
        let indices_url = format!("{}{INDICES_ENDPOINT}", self.base_url);

        let (status, indices) = tokio::try_join!(
            client.get_json(&status_url, &opts),
            client.get_json(&indices_url, &opts),
        )?;

        let source = self.source_id();
        let excerpt_of = |body: &Value, e: ExtractionError| e.with_excerpt(&body.to_string());

        let waiting = color_counts(&status.body, "pazientiInAttesa").map_err(|e| excerpt_of(&status.body, e))?;
        let load = color_counts(&status.body, "carichiUrgenza").unwrap_or_default();

        let color = match waiting.most_critical() {
            CanonicalColor::Unknown => load.most_critical(),
            c => c,
        };
        let waiting_minutes = mean_wait_for(&status.body, color);
        let waiting_total = waiting
            .total()
            .map_err(|_| excerpt_of(&status.body, ExtractionError::overflow(source, "pazientiInAttesa")))?;
        let beds = available_beds(&indices.body).map_err(|e| excerpt_of(&indices.body, e))?;

        let mut reading = Reading::new(source, status.retrieved_at);
        reading.color = color;
        reading.waiting_minutes = waiting_minutes;
        reading.patients_waiting = Some(waiting_total);
        reading.available_beds = beds;
        reading.color_distribution = Some(waiting);
        Ok(reading)
    }
}

fn missing(field: &str, detail: impl Into<String>) -> ExtractionError {
    ExtractionError::new(SourceId::PoliclinicoPalermo, field, detail)
}

/// Reads a `{ "Colore (n)": count }` object into a distribution.
fn color_counts(body: &Value, field: &str) -> Result<ColorDistribution, ExtractionError> {
    let map = body
        .get(field)
        .and_then(Value::as_object)
        .ok_or_else(|| missing(field, "object missing"))?;

    let mut dist = ColorDistribution::default();
    for (key, value) in map {
        let name = color_name(key);
        if name.eq_ignore_ascii_case("nero") {
            continue;
        }
        let count = as_count(value)
            .ok_or_else(|| missing(&format!("{field}.{key}"), format!("not a count: {value}")))?;
        dist.add(normalize_color(name), count)
            .map_err(|_| ExtractionError::overflow(SourceId::PoliclinicoPalermo, format!("{field}.{key}")))?;
    }
    Ok(dist)
}

/// "Arancione (2)" -> "Arancione"
fn color_name(key: &str) -> &str {
    key.split('(').next().unwrap_or(key).trim()
}

/// Counts come as integers, floats or numeric strings ("2.0").
///
/// Floats outside the `i64` range are rejected rather than saturated.
fn as_count(value: &Value) -> Option<i64> {
    match value {
        Value::Null => Some(0),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_count)),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(float_count),
        _ => None,
    }
}

fn float_count(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f as i64)
}

/// Published mean wait of `color`, `None` if absent or unparseable.
fn mean_wait_for(body: &Value, color: CanonicalColor) -> Option<i64> {
    if !color.is_determinate() {
        return None;
    }
    let times: &Map<String, Value> = body.get("tempiMediAttesa")?.as_object()?;

    let (_, value) = times.iter().find(|(key, _)| {
        let name = color_name(key);
        !name.eq_ignore_ascii_case("nero") && normalize_color(name) == color
    })?;

    match value {
        Value::String(text) => parse_waiting_time(text),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Staffed places minus patients held under and over 24h, floored at 0.
fn available_beds(indices: &Value) -> Result<i64, ExtractionError> {
    let staffed = indices
        .get("postiTecniciPresidiati")
        .and_then(as_count)
        .ok_or_else(|| missing("postiTecniciPresidiati", "missing or not a number"))?;

    let held = |field: &str| -> Result<i64, ExtractionError> {
        let value = indices.get(field).ok_or_else(|| missing(field, "missing"))?;
        let parsed = match value {
            Value::String(s) => s.split_whitespace().next().and_then(|t| t.parse::<i64>().ok()),
            other => as_count(other),
        };
        parsed.ok_or_else(|| missing(field, format!("no leading count in {value}")))
    };

    let under_24h = held("permanenza24H")?;
    let over_24h = held("permanenzaOltre24H")?;
    let beds = staffed
        .checked_sub(under_24h)
        .and_then(|b| b.checked_sub(over_24h))
        .ok_or_else(|| missing("available beds", "patient count out of range"))?;
    Ok(beds.max(0))
}

pub fn policlinico() -> Box<dyn Collector> {
    Box::new(PoliclinicoPalermoCollector::new())
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PoliclinicoPalermo, SourceKind::Api, policlinico)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::test_support::{Reply, ScriptedServer};
    use serde_json::json;

    fn status() -> Value {
        json!({
            "pazientiInAttesa": {
                "Rosso (1)": 0, "Arancione (2)": "2.0", "Azzurro (3)": 1,
                "Verde (4)": 4, "Bianco (5)": 0, "Nero": 1
            },
            "carichiUrgenza": { "Rosso (1)": 1 },
            "tempiMediAttesa": {
                "Rosso (1)": "0h  5m", "Arancione (2)": "3h  13m", "Azzurro (3)": "1h  2m"
            }
        })
    }

    #[test]
    fn waiting_counts_skip_black() {
        let dist = color_counts(&status(), "pazientiInAttesa").unwrap();
        assert_eq!(dist.orange, 2);
        assert_eq!(dist.total(), Ok(7));
        assert_eq!(dist.most_critical(), CanonicalColor::Orange);
    }

    #[test]
    fn wait_time_follows_color() {
        assert_eq!(mean_wait_for(&status(), CanonicalColor::Orange), Some(193));
        assert_eq!(mean_wait_for(&status(), CanonicalColor::White), None);
        assert_eq!(mean_wait_for(&status(), CanonicalColor::Unknown), None);
    }

    #[test]
    fn beds_subtract_long_stays() {
        let indices = json!({
            "postiTecniciPresidiati": "24",
            "permanenza24H": "7 pazienti",
            "permanenzaOltre24H": "3 pazienti"
        });
        assert_eq!(available_beds(&indices).unwrap(), 14);

        let crowded = json!({
            "postiTecniciPresidiati": 4,
            "permanenza24H": "7",
            "permanenzaOltre24H": 3
        });
        assert_eq!(available_beds(&crowded).unwrap(), 0);
    }

    #[test]
    fn out_of_range_counts_are_extraction_errors() {
        let err = available_beds(&json!({
            "postiTecniciPresidiati": -1e30,
            "permanenza24H": "1 pazienti",
            "permanenzaOltre24H": "0 pazienti"
        }))
        .unwrap_err();
        assert_eq!(err.field, "postiTecniciPresidiati");

        let err = available_beds(&json!({
            "postiTecniciPresidiati": i64::MIN,
            "permanenza24H": "1 pazienti",
            "permanenzaOltre24H": "0 pazienti"
        }))
        .unwrap_err();
        assert_eq!(err.field, "available beds");

        let err = color_counts(&json!({ "x": { "Rosso (1)": "9e30" } }), "x").unwrap_err();
        assert_eq!(err.field, "x.Rosso (1)");

        let dist = color_counts(&json!({ "x": { "Rosso (1)": "9e18", "Verde (4)": "9e18" } }), "x").unwrap();
        assert!(dist.total().is_err());
    }

    #[test]
    fn missing_fields_are_extraction_errors() {
        let err = available_beds(&json!({ "postiTecniciPresidiati": 10 })).unwrap_err();
        assert_eq!(err.field, "permanenza24H");

        let err = color_counts(&json!({}), "pazientiInAttesa").unwrap_err();
        assert_eq!(err.field, "pazientiInAttesa");
    }

    #[tokio::test]
    async fn scrape_both_endpoints() {
        let server = ScriptedServer::routes(vec![
            ("/v1.0/ProntoSoccorso", vec![Reply::json(&status().to_string())]),
            (
                "/v1.0/ProntoSoccorsoIndici",
                vec![Reply::json(
                    r#"{"postiTecniciPresidiati": 20, "permanenza24H": "5 pazienti", "permanenzaOltre24H": "1 paziente"}"#,
                )],
            ),
        ])
        .await;
        let client = RetrievalClient::new(&HttpConfig::default()).unwrap();
        let collector = PoliclinicoPalermoCollector::new().with_base_url(server.url("/v1.0"));

        let reading = collector.scrape(&client).await.unwrap();

        assert_eq!(reading.source, SourceId::PoliclinicoPalermo);
        assert_eq!(reading.color, CanonicalColor::Orange);
        assert_eq!(reading.waiting_minutes, Some(193));
        assert_eq!(reading.patients_waiting, Some(7));
        assert_eq!(reading.available_beds, 14);
        assert!(reading.external_last_update.is_none());
        assert!(collector.validate(&reading).is_valid());
    }

    #[tokio::test]
    async fn empty_queue_falls_back_to_urgency_load() {
        let body = json!({
            "pazientiInAttesa": { "Rosso (1)": 0, "Verde (4)": 0 },
            "carichiUrgenza": { "Verde (4)": 2 },
            "tempiMediAttesa": { "Verde (4)": "45 min" }
        });
        let server = ScriptedServer::routes(vec![
            ("/ProntoSoccorso", vec![Reply::json(&body.to_string())]),
            (
                "/ProntoSoccorsoIndici",
                vec![Reply::json(
                    r#"{"postiTecniciPresidiati": 10, "permanenza24H": "0", "permanenzaOltre24H": "0"}"#,
                )],
            ),
        ])
        .await;
        let client = RetrievalClient::new(&HttpConfig::default()).unwrap();
        let collector = PoliclinicoPalermoCollector::new().with_base_url(server.url(""));

        let reading = collector.scrape(&client).await.unwrap();

        assert_eq!(reading.color, CanonicalColor::Green);
        assert_eq!(reading.waiting_minutes, Some(45));
        assert_eq!(reading.patients_waiting, Some(0));
    }
}
