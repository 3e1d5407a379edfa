use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::{
    error::{CollectorError, CountOverflow, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::normalize_color,
    schema::{CanonicalColor, ColorDistribution, Reading},
    util,
};

use super::adapter::{Collector, SourceKind};
use super::codes::SourceId;
use super::registry::Registry;

/// Policlinico "G. Martino" of Messina. A bordered table, one row per
/// area after the header, where cells 1..=5 count bianco, verde,
/// azzurro, arancione and rosso patients; a large-font cell carries
/// "01/02/2025 - 19:27".
///
/// Neither waits nor beds are published: the wait is estimated from
/// the color mix, beds stay at 0.
pub const BASE_URL: &str = "https://www.polime.it/ps_view.php?PS=1";

const COLUMNS: [&str; 5] = ["bianco", "verde", "azzurro", "arancione", "rosso"];

static TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"table[border="1"]"#).expect("table selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("cell selector"));
static STAMP: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"td[style="font-size:30px;"]"#).expect("stamp selector"));

pub struct PoliclinicoMessinaCollector {
    url: String,
}

impl PoliclinicoMessinaCollector {
    pub fn new() -> Self {
        Self {
            url: BASE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl Default for PoliclinicoMessinaCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for PoliclinicoMessinaCollector {
    fn source_id(&self) -> SourceId {
        SourceId::PoliclinicoMessina
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;
        let source = self.source_id();

        let (dist, updated_at) = extract_table(&page.body).map_err(|e| e.with_excerpt(&page.body))?;
        let waiting_minutes = weighted_wait(&dist)
            .map_err(|_| ExtractionError::overflow(source, "estimated wait").with_excerpt(&page.body))?;

        let mut reading = Reading::new(source, page.retrieved_at);
        reading.color = dist.most_critical();
        reading.waiting_minutes = waiting_minutes;
        reading.color_distribution = Some(dist);
        reading.external_last_update = updated_at;
        Ok(reading)
    }
}

fn extract_table(html: &str) -> Result<(ColorDistribution, Option<DateTime<Utc>>), ExtractionError> {
    let source = SourceId::PoliclinicoMessina;
    let doc = Html::parse_document(html);

    let updated_at = doc
        .select(&STAMP)
        .next()
        .and_then(|el| parse_update_stamp(&util::collapse_ws(&el.text().collect::<String>())));

    let table = doc
        .select(&TABLE)
        .next()
        .ok_or_else(|| ExtractionError::new(source, "table", "bordered data table not found"))?;

    let mut dist = ColorDistribution::default();
    for row in table.select(&ROW).skip(1) {
        let cells: Vec<String> = row
            .select(&CELL)
            .map(|c| util::collapse_ws(&c.text().collect::<String>()))
            .collect();
        if cells.len() < COLUMNS.len() + 1 {
            continue;
        }

        for (raw_color, cell) in COLUMNS.iter().zip(&cells[1..]) {
            let field = format!("{} {raw_color}", cells[0].to_lowercase());
            let count = util::parse_count(cell)
                .ok_or_else(|| ExtractionError::new(source, field.as_str(), format!("not a number: {cell:?}")))?;
            dist.add(normalize_color(raw_color), count)
                .map_err(|_| ExtractionError::overflow(source, field.as_str()))?;
        }
    }

    if updated_at.is_none() {
        log::warn!("{source}: no update time on page");
    }
    Ok((dist, updated_at))
}

/// Mean of per-color weights over the patients present, rounded.
/// `Ok(None)` for an empty department.
fn weighted_wait(dist: &ColorDistribution) -> Result<Option<i64>, CountOverflow> {
    let weight = |color: CanonicalColor| match color {
        CanonicalColor::Red => 60,
        CanonicalColor::Orange => 45,
        CanonicalColor::Blue => 30,
        CanonicalColor::Green => 20,
        CanonicalColor::White => 10,
        CanonicalColor::Unknown => 0,
    };

    let total = dist.total()?;
    if total <= 0 {
        return Ok(None);
    }
    let weighted = CanonicalColor::PRIORITY
        .iter()
        .try_fold(0i64, |acc, c| acc.checked_add(dist.get(*c).checked_mul(weight(*c))?))
        .ok_or(CountOverflow)?;

    Ok(Some((weighted as f64 / total as f64).round() as i64))
}

/// "01/02/2025 - 19:27"
fn parse_update_stamp(text: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text, "%d/%m/%Y - %H:%M").ok()?;
    util::local_to_utc(naive)
}

pub fn policlinico() -> Box<dyn Collector> {
    Box::new(PoliclinicoMessinaCollector::new())
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PoliclinicoMessina, SourceKind::Html, policlinico)
}
