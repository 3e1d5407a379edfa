use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::{
    error::{CollectorError, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::normalize_color,
    schema::{ColorDistribution, Reading},
    util,
};

use super::adapter::{Collector, SourceKind};
use super::census_reading;
use super::codes::SourceId;
use super::registry::Registry;

/// ASP Caltanissetta dashboard for the Sant'Elia emergency department.
///
/// Two table rows, "In attesa" and "In trattamento", each ending with
/// five count cells (rosso, arancione, azzurro, verde, bianco), and an
/// `.update-time` element reading "Aggiornamento: 01-02-2025 19:27".
pub const BASE_URL: &str = "https://cruscottops.asp.cl.it/caltanissetta.php";

const COLUMNS: [&str; 5] = ["rosso", "arancione", "azzurro", "verde", "bianco"];

/// Nominal capacity; the dashboard publishes no bed data.
const TOTAL_BEDS: i64 = 30;

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("cell selector"));
static UPDATED: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".update-time").expect("update selector"));

static UPDATE_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}-\d{2}-\d{4})\s+(\d{2}:\d{2})").expect("update stamp pattern")
});

pub struct AspCaltanissettaCollector {
    url: String,
}

#[derive(Debug, Default)]
struct Dashboard {
    waiting: Option<ColorDistribution>,
    treatment: ColorDistribution,
    updated_at: Option<DateTime<Utc>>,
}

impl AspCaltanissettaCollector {
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

impl Default for AspCaltanissettaCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for AspCaltanissettaCollector {
    fn source_id(&self) -> SourceId {
        SourceId::PsSantelia
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;
        let source = self.source_id();

        let board = extract_dashboard(&page.body).map_err(|e| e.with_excerpt(&page.body))?;

        let mut reading = census_reading(
            source,
            page.retrieved_at,
            board.waiting.unwrap_or_default(),
            &[board.treatment],
            TOTAL_BEDS,
        )
        .map_err(|e| e.with_excerpt(&page.body))?;
        reading.external_last_update = board.updated_at;
        Ok(reading)
    }
}

fn extract_dashboard(html: &str) -> Result<Dashboard, ExtractionError> {
    let source = SourceId::PsSantelia;
    let doc = Html::parse_document(html);

    let mut board = Dashboard {
        updated_at: doc
            .select(&UPDATED)
            .next()
            .and_then(|el| parse_update_stamp(&el.text().collect::<String>())),
        ..Dashboard::default()
    };

    for row in doc.select(&ROW) {
        let label = util::collapse_ws(&row.text().collect::<String>()).to_lowercase();
        let target = if label.contains("in attesa") {
            "in attesa"
        } else if label.contains("in trattamento") {
            "in trattamento"
        } else {
            continue;
        };

        let cells: Vec<String> = row
            .select(&CELL)
            .map(|c| util::collapse_ws(&c.text().collect::<String>()))
            .collect();
        if cells.len() < COLUMNS.len() {
            return Err(ExtractionError::new(
                source,
                target,
                format!("expected {} cells, found {}", COLUMNS.len(), cells.len()),
            ));
        }

        // a label cell, when present, comes first
        let counts = &cells[cells.len() - COLUMNS.len()..];
        let mut dist = ColorDistribution::default();
        for (raw_color, cell) in COLUMNS.iter().zip(counts) {
            let field = format!("{target} {raw_color}");
            let count = util::parse_count(cell)
                .ok_or_else(|| ExtractionError::new(source, field.as_str(), format!("not a number: {cell:?}")))?;
            dist.add(normalize_color(raw_color), count)
                .map_err(|_| ExtractionError::overflow(source, field.as_str()))?;
        }

        if target == "in attesa" {
            board.waiting = Some(dist);
        } else {
            board.treatment = dist;
        }
    }

    if board.waiting.is_none() {
        return Err(ExtractionError::new(source, "in attesa", "waiting row not found"));
    }
    Ok(board)
}

/// "Aggiornamento: 01-02-2025 19:27"
fn parse_update_stamp(text: &str) -> Option<DateTime<Utc>> {
    let caps = UPDATE_STAMP.captures(text)?;
    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", &caps[1], &caps[2]), "%d-%m-%Y %H:%M").ok()?;
    util::local_to_utc(naive)
}

pub fn sant_elia() -> Box<dyn Collector> {
    Box::new(AspCaltanissettaCollector::new())
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PsSantelia, SourceKind::Html, sant_elia)
}
