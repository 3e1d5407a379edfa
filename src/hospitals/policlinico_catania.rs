use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::{
    error::{CollectorError, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::normalize_color,
    schema::{ColorDistribution, Reading},
    util,
};

use super::adapter::{Collector, SourceKind};
use super::codes::SourceId;
use super::estimate_wait_minutes;
use super::registry::Registry;

/// Policlinico "G. Rodolico - San Marco" serves one JSON document per
/// emergency department at `/api/smarteus/getpsinfo/{ps_id}`:
///
///   {
///     "dataOraInviante": "01/02/2025 19:27:00",
///     "pazientiInAttesa":      { "totale": 6, "rossi": 0, "gialli": 2, "verdi": 3, "bianchi": 1 },
///     "pazientiInTrattamento": { "totale": 9, ... },
///     "pazientiInObi":         { "totale": 2, ... }
///   }
///
/// Counts may be numbers or numeric strings. There is no blue group.
pub const BASE_URL: &str = "https://www.policlinicorodolicosanmarco.it";

/// Plural keys of the API and their singular color names.
const COLUMNS: [(&str, &str); 4] = [
    ("rossi", "rosso"),
    ("gialli", "giallo"),
    ("verdi", "verde"),
    ("bianchi", "bianco"),
];

const GROUPS: [&str; 3] = ["pazientiInAttesa", "pazientiInTrattamento", "pazientiInObi"];

pub struct PoliclinicoCataniaCollector {
    source: SourceId,
    ps_id: &'static str,
    total_beds: i64,
    base_url: String,
}

/// One patient group: its published total and per-color counts.
#[derive(Debug, Default, Clone, Copy)]
struct Group {
    total: i64,
    dist: ColorDistribution,
}

impl PoliclinicoCataniaCollector {
    pub fn new(source: SourceId, ps_id: &'static str, total_beds: i64) -> Self {
        Self {
            source,
            ps_id,
            total_beds,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl Collector for PoliclinicoCataniaCollector {
    fn source_id(&self) -> SourceId {
        self.source
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let url = format!("{}/api/smarteus/getpsinfo/{}", self.base_url, self.ps_id);
        let opts = RequestOptions::default().with_header("Accept", "application/json");
        let fetched = client.get_json(&url, &opts).await?;

        let reading = to_reading(&fetched.body, self.source, self.total_beds, fetched.retrieved_at)
            .map_err(|e| e.with_excerpt(&fetched.body.to_string()))?;
        Ok(reading)
    }
}

fn to_reading(
    body: &Value,
    source: SourceId,
    total_beds: i64,
    retrieved_at: DateTime<Utc>,
) -> Result<Reading, ExtractionError> {
    let sent_at = body
        .get("dataOraInviante")
        .and_then(Value::as_str)
        .ok_or_else(|| ExtractionError::new(source, "dataOraInviante", "missing"))?;
    let updated_at = parse_sent_at(sent_at).ok_or_else(|| {
        ExtractionError::new(source, "dataOraInviante", format!("unexpected format {sent_at:?}"))
    })?;

    let [waiting, treatment, obi] = GROUPS.map(|name| group(body, source, name));
    let (waiting, treatment, obi) = (waiting?, treatment?, obi?);

    let everyone = waiting
        .total
        .checked_add(treatment.total)
        .and_then(|n| n.checked_add(obi.total))
        .ok_or_else(|| ExtractionError::overflow(source, "totale"))?;
    let beds = total_beds
        .checked_sub(everyone)
        .ok_or_else(|| ExtractionError::overflow(source, "available beds"))?;
    let distribution = waiting
        .dist
        .merged(&treatment.dist)
        .and_then(|d| d.merged(&obi.dist))
        .map_err(|_| ExtractionError::overflow(source, "patients"))?;

    let mut reading = Reading::new(source, retrieved_at);
    reading.color = waiting.dist.most_critical();
    reading.patients_waiting = Some(waiting.total);
    reading.waiting_minutes = Some(estimate_wait_minutes(waiting.total));
    reading.available_beds = beds.max(0);
    reading.color_distribution = Some(distribution);
    reading.external_last_update = Some(updated_at);
    Ok(reading)
}

fn group(body: &Value, source: SourceId, name: &str) -> Result<Group, ExtractionError> {
    let obj = body
        .get(name)
        .and_then(Value::as_object)
        .ok_or_else(|| ExtractionError::new(source, name, "object missing"))?;

    let count = |key: &str| -> Result<i64, ExtractionError> {
        let field = format!("{name}.{key}");
        let value = obj
            .get(key)
            .ok_or_else(|| ExtractionError::new(source, field.as_str(), "missing"))?;
        as_count(value).ok_or_else(|| ExtractionError::new(source, field.as_str(), format!("not a count: {value}")))
    };

    let mut g = Group {
        total: count("totale")?,
        ..Group::default()
    };
    for (key, color) in COLUMNS {
        g.dist
            .add(normalize_color(color), count(key)?)
            .map_err(|_| ExtractionError::overflow(source, format!("{name}.{key}")))?;
    }
    Ok(g)
}

fn as_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => util::parse_count(s),
        _ => None,
    }
}

/// "01/02/2025 19:27:00"
fn parse_sent_at(text: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), "%d/%m/%Y %H:%M:%S").ok()?;
    util::local_to_utc(naive)
}

pub fn rodolico() -> Box<dyn Collector> {
    Box::new(PoliclinicoCataniaCollector::new(SourceId::PoRodolico, "105", 40))
}

pub fn san_marco() -> Box<dyn Collector> {
    Box::new(PoliclinicoCataniaCollector::new(SourceId::PoSanMarco, "106", 35))
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PoRodolico, SourceKind::Api, rodolico)?;
    registry.register(SourceId::PoSanMarco, SourceKind::Api, san_marco)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::schema::CanonicalColor;
    use crate::test_support::{Reply, ScriptedServer};
    use serde_json::json;

    fn body() -> Value {
        json!({
            "dataOraInviante": "01/02/2025 19:27:00",
            "pazientiInAttesa": { "totale": 6, "rossi": 0, "gialli": "2", "verdi": 3, "bianchi": 1 },
            "pazientiInTrattamento": { "totale": "9", "rossi": 1, "gialli": 2, "verdi": 5, "bianchi": 1 },
            "pazientiInObi": { "totale": 2, "rossi": 0, "gialli": 0, "verdi": 2, "bianchi": 0 }
        })
    }

    #[test]
    fn groups_are_summed() {
        let reading = to_reading(&body(), SourceId::PoRodolico, 40, util::now()).unwrap();

        assert_eq!(reading.color, CanonicalColor::Orange);
        assert_eq!(reading.patients_waiting, Some(6));
        assert_eq!(reading.waiting_minutes, Some(180));
        // 40 - (6 + 9 + 2)
        assert_eq!(reading.available_beds, 23);

        let dist = reading.color_distribution.unwrap();
        assert_eq!(dist.red, 1);
        assert_eq!(dist.orange, 4);
        assert_eq!(dist.green, 10);
        assert_eq!(dist.blue, 0);
        assert!(reading.external_last_update.is_some());
    }

    #[test]
    fn beds_floor_at_zero() {
        let reading = to_reading(&body(), SourceId::PoSanMarco, 10, util::now()).unwrap();
        assert_eq!(reading.available_beds, 0);
    }

    #[test]
    fn missing_update_time_fails() {
        let mut b = body();
        b.as_object_mut().unwrap().remove("dataOraInviante");
        let err = to_reading(&b, SourceId::PoRodolico, 40, util::now()).unwrap_err();
        assert_eq!(err.field, "dataOraInviante");

        b["dataOraInviante"] = json!("2025-02-01T19:27");
        let err = to_reading(&b, SourceId::PoRodolico, 40, util::now()).unwrap_err();
        assert_eq!(err.field, "dataOraInviante");
    }

    #[test]
    fn malformed_counts_fail() {
        let mut b = body();
        b["pazientiInObi"]["verdi"] = json!("tanti");
        let err = to_reading(&b, SourceId::PoRodolico, 40, util::now()).unwrap_err();
        assert_eq!(err.field, "pazientiInObi.verdi");

        let mut b = body();
        b["pazientiInTrattamento"].as_object_mut().unwrap().remove("totale");
        let err = to_reading(&b, SourceId::PoRodolico, 40, util::now()).unwrap_err();
        assert_eq!(err.field, "pazientiInTrattamento.totale");
    }

    #[test]
    fn out_of_range_totals_fail() {
        let mut b = body();
        b["pazientiInTrattamento"]["totale"] = json!(i64::MAX);
        let err = to_reading(&b, SourceId::PoRodolico, 40, util::now()).unwrap_err();
        assert_eq!(err.field, "totale");

        let mut b = body();
        b["pazientiInAttesa"]["totale"] = json!(i64::MIN);
        let err = to_reading(&b, SourceId::PoRodolico, 40, util::now()).unwrap_err();
        assert_eq!(err.field, "available beds");
    }

    #[tokio::test]
    async fn scrape_hits_the_department_endpoint() {
        let server = ScriptedServer::routes(vec![(
            "/api/smarteus/getpsinfo/106",
            vec![Reply::json(&body().to_string())],
        )])
        .await;
        let client = RetrievalClient::new(&HttpConfig::default()).unwrap();
        let collector = PoliclinicoCataniaCollector::new(SourceId::PoSanMarco, "106", 35)
            .with_base_url(server.url(""));

        let reading = collector.scrape(&client).await.unwrap();

        assert_eq!(reading.source, SourceId::PoSanMarco);
        assert_eq!(reading.available_beds, 18);
        assert!(collector.validate(&reading).is_valid());
        assert_eq!(server.hits(), 1);
    }
}
