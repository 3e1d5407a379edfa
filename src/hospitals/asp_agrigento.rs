use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::{
    error::{CollectorError, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::normalize_color,
    schema::{ColorDistribution, Reading},
    util,
};

use super::adapter::{Collector, SourceKind};
use super::codes::SourceId;
use super::registry::Registry;

/// ASP Agrigento publishes every emergency department of the province
/// in one HTML table ("lista attesa"), one row per department:
///
///   | PS SCIACCA | Rosso 0 | Arancione 1 | Giallo 0 | Verde 4 | Azzurro 2 | Bianco 0 |
///
/// No wait time and no bed count are published.
pub const BASE_URL: &str = "http://pswall.aspag.it/ps/listaattesa.php";

/// Raw color of each count column, left to right after the name cell.
const COLUMNS: [&str; 6] = ["rosso", "arancione", "giallo", "verde", "azzurro", "bianco"];

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("cell selector"));

pub struct AspAgrigentoCollector {
    source: SourceId,
    row_label: &'static str,
    url: String,
}

impl AspAgrigentoCollector {
    pub fn new(source: SourceId, row_label: &'static str) -> Self {
        Self {
            source,
            row_label,
            url: BASE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl Collector for AspAgrigentoCollector {
    fn source_id(&self) -> SourceId {
        self.source
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;

        let dist = extract_row(&page.body, self.source, self.row_label)
            .map_err(|e| e.with_excerpt(&page.body))?;

        let waiting = dist.total().map_err(|_| {
            ExtractionError::overflow(self.source, "patients").with_excerpt(&page.body)
        })?;

        let mut reading = Reading::new(self.source, page.retrieved_at);
        reading.color = dist.most_critical();
        reading.patients_waiting = Some(waiting);
        reading.color_distribution = Some(dist);
        Ok(reading)
    }
}

/// Finds the department row and reads its six color counts.
fn extract_row(
    html: &str,
    source: SourceId,
    row_label: &str,
) -> Result<ColorDistribution, ExtractionError> {
    let doc = Html::parse_document(html);

    for row in doc.select(&ROW) {
        let cells: Vec<String> = row
            .select(&CELL)
            .map(|c| util::collapse_ws(&c.text().collect::<String>()))
            .collect();

        let Some(name) = cells.first() else {
            continue;
        };
        if !name.eq_ignore_ascii_case(row_label) {
            continue;
        }

        if cells.len() < COLUMNS.len() + 1 {
            return Err(ExtractionError::new(
                source,
                "count cells",
                format!("expected {} cells, found {}", COLUMNS.len() + 1, cells.len()),
            ));
        }

        let mut dist = ColorDistribution::default();
        for (raw_color, cell) in COLUMNS.iter().zip(&cells[1..]) {
            let count = util::parse_count(cell).ok_or_else(|| {
                ExtractionError::new(source, format!("{raw_color} count"), format!("not a number: {cell:?}"))
            })?;
            dist.add(normalize_color(raw_color), count)
                .map_err(|_| ExtractionError::overflow(source, format!("{raw_color} count")))?;
        }
        return Ok(dist);
    }

    Err(ExtractionError::new(
        source,
        "department row",
        format!("no row labelled {row_label:?}"),
    ))
}

pub fn sciacca() -> Box<dyn Collector> {
    Box::new(AspAgrigentoCollector::new(SourceId::PsSciacca, "PS SCIACCA"))
}

pub fn ribera() -> Box<dyn Collector> {
    Box::new(AspAgrigentoCollector::new(SourceId::PsRibera, "PS RIBERA"))
}

pub fn agrigento() -> Box<dyn Collector> {
    Box::new(AspAgrigentoCollector::new(SourceId::PsAgrigento, "PS AGRIGENTO"))
}

pub fn canicatti() -> Box<dyn Collector> {
    Box::new(AspAgrigentoCollector::new(SourceId::PsCanicatti, "PS CANICATTI'"))
}

pub fn licata() -> Box<dyn Collector> {
    Box::new(AspAgrigentoCollector::new(SourceId::PsLicata, "PS LICATA"))
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PsSciacca, SourceKind::Html, sciacca)?;
    registry.register(SourceId::PsRibera, SourceKind::Html, ribera)?;
    registry.register(SourceId::PsAgrigento, SourceKind::Html, agrigento)?;
    registry.register(SourceId::PsCanicatti, SourceKind::Html, canicatti)?;
    registry.register(SourceId::PsLicata, SourceKind::Html, licata)?;
    Ok(())
}
