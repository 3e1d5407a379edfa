use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::{
    error::{CollectorError, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::normalize_color,
    schema::{CanonicalColor, ColorDistribution, Reading},
    util,
};

use super::adapter::{Collector, SourceKind};
use super::codes::SourceId;
use super::census_reading;
use super::registry::Registry;

/// ARNAS Civico publishes both departments inside one article body,
/// as two `table.gridtable` (adults first, pediatric second):
///
///   | Codice   | In attesa | In trattamento | In osservazione |
///   | ROSSO    | 0         | 2              | 1               |
///   | ...                                                     |
///   | Totale pazienti al P.S. ...                             |
///
/// The article text carries the update time in a few wordings.
pub const BASE_URL: &str =
    "https://www.arnascivico.it/index.php/assistenza-ospedaliera/3415-attesa-al-pronto-soccorso";

static ARTICLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"div[itemprop="articleBody"]"#).expect("article selector"));
static TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.gridtable").expect("table selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("cell selector"));

/// (regex, date group, time group)
static UPDATE_STAMPS: Lazy<Vec<(Regex, usize, usize)>> = Lazy::new(|| {
    let pattern = |p: &str| Regex::new(p).expect("update stamp pattern");
    vec![
        (
            pattern(r"(?i)aggiornat[oa]\s+al\s+(\d{2}/\d{2}/\d{4})\s+(?:ore\s+)?(\d{2}[:.]\d{2}(?:[:.]\d{2})?)"),
            1,
            2,
        ),
        (
            pattern(r"(?i)aggiornat[oa]\s+alle\s+ore\s+(\d{2}[:.]\d{2}(?:[:.]\d{2})?)\s+del\s+(\d{2}/\d{2}/\d{4})"),
            2,
            1,
        ),
        (
            pattern(r"(?i)(?:situazione|dati)\s+al\s+(\d{2}/\d{2}/\d{4})\s+(?:ore\s+)?(\d{2}[:.]\d{2}(?:[:.]\d{2})?)"),
            1,
            2,
        ),
    ]
});

pub struct ArnasCivicoCollector {
    source: SourceId,
    table_index: usize,
    total_beds: i64,
    url: String,
}

#[derive(Debug, Default)]
struct Counts {
    waiting: ColorDistribution,
    treatment: ColorDistribution,
    observation: ColorDistribution,
    updated_at: Option<DateTime<Utc>>,
}

impl ArnasCivicoCollector {
    pub fn new(source: SourceId, table_index: usize, total_beds: i64) -> Self {
        Self {
            source,
            table_index,
            total_beds,
            url: BASE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl Collector for ArnasCivicoCollector {
    fn source_id(&self) -> SourceId {
        self.source
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;

        let counts = extract_table(&page.body, self.source, self.table_index)
            .map_err(|e| e.with_excerpt(&page.body))?;

        if counts.updated_at.is_none() {
            log::warn!("{}: no update time on page", self.source);
        }

        let mut reading = census_reading(
            self.source,
            page.retrieved_at,
            counts.waiting,
            &[counts.treatment, counts.observation],
            self.total_beds,
        )
        .map_err(|e| e.with_excerpt(&page.body))?;
        reading.external_last_update = counts.updated_at;
        Ok(reading)
    }
}

fn extract_table(html: &str, source: SourceId, index: usize) -> Result<Counts, ExtractionError> {
    let doc = Html::parse_document(html);

    let article = doc
        .select(&ARTICLE)
        .next()
        .ok_or_else(|| ExtractionError::new(source, "article body", "itemprop=articleBody not found"))?;

    let table = article.select(&TABLE).nth(index).ok_or_else(|| {
        ExtractionError::new(source, "gridtable", format!("table #{index} not found"))
    })?;

    let mut counts = Counts {
        updated_at: parse_update_stamp(&util::collapse_ws(&article.text().collect::<String>())),
        ..Counts::default()
    };

    let rows: Vec<_> = table.select(&ROW).collect();
    let mut seen = 0;
    // first row is the header, last one the totals
    for row in rows.iter().skip(1).take(rows.len().saturating_sub(2)) {
        let cells: Vec<String> = row
            .select(&CELL)
            .map(|c| util::collapse_ws(&c.text().collect::<String>()))
            .collect();
        if cells.len() < 4 {
            continue;
        }

        let color = normalize_color(&cells[0]);
        if color == CanonicalColor::Unknown {
            continue;
        }

        let column = |i: usize, what: &str| {
            util::parse_count(&cells[i]).ok_or_else(|| {
                ExtractionError::new(
                    source,
                    format!("{what} {}", cells[0].to_lowercase()),
                    format!("not a number: {:?}", cells[i]),
                )
            })
        };

        let overflow = |_| ExtractionError::overflow(source, format!("counts {}", cells[0].to_lowercase()));
        counts.waiting.add(color, column(1, "in attesa")?).map_err(overflow)?;
        counts.treatment.add(color, column(2, "in trattamento")?).map_err(overflow)?;
        counts.observation.add(color, column(3, "in osservazione")?).map_err(overflow)?;
        seen += 1;
    }

    if seen == 0 {
        return Err(ExtractionError::new(source, "color rows", "table has no color rows"));
    }
    Ok(counts)
}

fn parse_update_stamp(text: &str) -> Option<DateTime<Utc>> {
    UPDATE_STAMPS.iter().find_map(|(re, date_group, time_group)| {
        let caps = re.captures(text)?;
        let date = NaiveDate::parse_from_str(&caps[*date_group], "%d/%m/%Y").ok()?;
        let time = caps[*time_group].replace('.', ":");
        let time = NaiveTime::parse_from_str(&time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&time, "%H:%M"))
            .ok()?;
        util::local_to_utc(NaiveDateTime::new(date, time))
    })
}

pub fn adults() -> Box<dyn Collector> {
    Box::new(ArnasCivicoCollector::new(SourceId::PoCivicoAdulti, 0, 30))
}

pub fn pediatric() -> Box<dyn Collector> {
    Box::new(ArnasCivicoCollector::new(SourceId::PoCivicoPediatrico, 1, 15))
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PoCivicoAdulti, SourceKind::Html, adults)?;
    registry.register(SourceId::PoCivicoPediatrico, SourceKind::Html, pediatric)?;
    Ok(())
}
