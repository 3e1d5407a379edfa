use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

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
use super::census_reading;

/// ASP Palermo renders one `div.container` per emergency department.
/// Each block has:
/// - a heading with the department name
/// - `.alert-dark` with "Aggiornato al 01/02/25 - 19:27:03"
/// - a table whose rows (`th` + 5 `td`) are
///   "in attesa", "in trattamento", "in osservazione"
///   and whose columns are rosso, arancione, azzurro, verde, bianco
///
pub const BASE_URL: &str = "https://www.asppalermo.org/attese_ps/index_mod2.php";

const COLUMNS: [&str; 5] = ["rosso", "arancione", "azzurro", "verde", "bianco"];

static CONTAINER: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.container").expect("container selector"));
static UPDATED: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".alert-dark").expect("update selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("table tr").expect("row selector"));
static HEAD: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("th selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("td selector"));

static UPDATE_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}/\d{2}/\d{2})\s*-\s*(\d{2}:\d{2}:\d{2})").expect("update stamp pattern")
});

pub struct AspPalermoCollector {
    source: SourceId,
    heading: &'static str,
    total_beds: i64,
    url: String,
}

/// Patient counts of one department block.
#[derive(Debug, Default)]
struct Department {
    waiting: Option<ColorDistribution>,
    treatment: ColorDistribution,
    observation: ColorDistribution,
    updated_at: Option<DateTime<Utc>>,
}

impl AspPalermoCollector {
    pub fn new(source: SourceId, heading: &'static str, total_beds: i64) -> Self {
        Self {
            source,
            heading,
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
impl Collector for AspPalermoCollector {
    fn source_id(&self) -> SourceId {
        self.source
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;

        let dept = extract_department(&page.body, self.source, self.heading)
            .map_err(|e| e.with_excerpt(&page.body))?;

        let mut reading = census_reading(
            self.source,
            page.retrieved_at,
            dept.waiting.unwrap_or_default(),
            &[dept.treatment, dept.observation],
            self.total_beds,
        )
        .map_err(|e| e.with_excerpt(&page.body))?;
        reading.external_last_update = dept.updated_at;
        Ok(reading)
    }
}

fn extract_department(
    html: &str,
    source: SourceId,
    heading: &str,
) -> Result<Department, ExtractionError> {
    let doc = Html::parse_document(html);
    let wanted = heading.to_uppercase();

    let block = doc
        .select(&CONTAINER)
        .find(|c| util::collapse_ws(&c.text().collect::<String>()).to_uppercase().contains(&wanted))
        .ok_or_else(|| {
            ExtractionError::new(source, "department block", format!("no container for {heading:?}"))
        })?;

    let mut dept = Department {
        updated_at: block.select(&UPDATED).next().and_then(|el| parse_update_stamp(&text_of(el))),
        ..Department::default()
    };

    for row in block.select(&ROW) {
        let Some(label) = row.select(&HEAD).next().map(|th| text_of(th).to_lowercase()) else {
            continue;
        };
        let cells: Vec<String> = row.select(&CELL).map(text_of).collect();
        if cells.is_empty() {
            continue;
        }

        let target = if label.contains("attesa") {
            "in attesa"
        } else if label.contains("trattam") {
            "in trattamento"
        } else if label.contains("osservaz") {
            "in osservazione"
        } else {
            continue;
        };

        if cells.len() < COLUMNS.len() {
            return Err(ExtractionError::new(
                source,
                target,
                format!("expected {} cells, found {}", COLUMNS.len(), cells.len()),
            ));
        }

        let mut dist = ColorDistribution::default();
        for (raw_color, cell) in COLUMNS.iter().zip(&cells) {
            let count = util::parse_count(cell).ok_or_else(|| {
                ExtractionError::new(source, format!("{target} {raw_color}"), format!("not a number: {cell:?}"))
            })?;
            dist.add(normalize_color(raw_color), count)
                .map_err(|_| ExtractionError::overflow(source, format!("{target} {raw_color}")))?;
        }

        match target {
            "in attesa" => dept.waiting = Some(dist),
            "in trattamento" => dept.treatment = dist,
            _ => dept.observation = dist,
        }
    }

    if dept.waiting.is_none() {
        return Err(ExtractionError::new(source, "in attesa", "waiting row not found"));
    }
    Ok(dept)
}

fn text_of(el: ElementRef<'_>) -> String {
    util::collapse_ws(&el.text().collect::<String>())
}

fn parse_update_stamp(text: &str) -> Option<DateTime<Utc>> {
    let caps = UPDATE_STAMP.captures(text)?;
    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", &caps[1], &caps[2]), "%d/%m/%y %H:%M:%S").ok()?;
    util::local_to_utc(naive)
}

pub fn ingrassia() -> Box<dyn Collector> {
    Box::new(AspPalermoCollector::new(
        SourceId::PsIngrassia,
        "PRONTO SOCCORSO - INGRASSIA DI PALERMO",
        13,
    ))
}

pub fn partinico() -> Box<dyn Collector> {
    Box::new(AspPalermoCollector::new(
        SourceId::PsPartinico,
        "PRONTO SOCCORSO - CIVICO DI PARTINICO",
        11,
    ))
}

pub fn corleone() -> Box<dyn Collector> {
    Box::new(AspPalermoCollector::new(
        SourceId::PsCorleone,
        "PRONTO SOCCORSO - P.O. 'DEI BIANCHI' DI CORLEONE",
        6,
    ))
}

pub fn petralia() -> Box<dyn Collector> {
    Box::new(AspPalermoCollector::new(
        SourceId::PsPetralia,
        "PRONTO SOCCORSO - MADONNA SS. DELL'ALTO DI PETRALIA SOTTANA",
        10,
    ))
}

pub fn termini() -> Box<dyn Collector> {
    Box::new(AspPalermoCollector::new(
        SourceId::PsTermini,
        "PRONTO SOCCORSO - CIMINO DI TERMINI IMERESE",
        8,
    ))
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PsIngrassia, SourceKind::Html, ingrassia)?;
    registry.register(SourceId::PsPartinico, SourceKind::Html, partinico)?;
    registry.register(SourceId::PsCorleone, SourceKind::Html, corleone)?;
    registry.register(SourceId::PsPetralia, SourceKind::Html, petralia)?;
    registry.register(SourceId::PsTermini, SourceKind::Html, termini)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::schema::CanonicalColor;
    use crate::test_support::{Reply, ScriptedServer};

    const PAGE: &str = r#"
      <html><body>
        <div class="container">
          <h4>PRONTO SOCCORSO - INGRASSIA DI PALERMO</h4>
          <div class="alert alert-dark">Aggiornato al 01/02/25 - 19:27:03</div>
          <table>
            <tr><th></th><th>Rosso</th><th>Arancione</th><th>Azzurro</th><th>Verde</th><th>Bianco</th></tr>
            <tr><th>In attesa</th><td>0</td><td>1</td><td>2</td><td>3</td><td>0</td></tr>
            <tr><th>In trattamento</th><td>1</td><td>0</td><td>1</td><td>2</td><td></td></tr>
            <tr><th>In osservazione</th><td>0</td><td>0</td><td>0</td><td>1</td><td>0</td></tr>
          </table>
        </div>
        <div class="container">
          <h4>PRONTO SOCCORSO - CIMINO DI TERMINI IMERESE</h4>
          <table>
            <tr><th>In trattamento</th><td>1</td><td>0</td><td>0</td><td>0</td><td>0</td></tr>
          </table>
        </div>
      </body></html>
    "#;

    #[test]
    fn department_rows_are_read() {
        let dept = extract_department(PAGE, SourceId::PsIngrassia, "PRONTO SOCCORSO - INGRASSIA DI PALERMO")
            .unwrap();
        let waiting = dept.waiting.unwrap();
        assert_eq!(waiting.total(), Ok(6));
        assert_eq!(waiting.most_critical(), CanonicalColor::Orange);
        assert_eq!(dept.treatment.total(), Ok(4));
        assert_eq!(dept.observation.green, 1);
        assert!(dept.updated_at.is_some());
    }

    #[test]
    fn update_stamp_format() {
        assert!(parse_update_stamp("Aggiornato al 31/12/24 - 23:59:59").is_some());
        assert!(parse_update_stamp("Aggiornato al 31/12/2024").is_none());
    }

    #[test]
    fn block_without_waiting_row_fails() {
        let err = extract_department(PAGE, SourceId::PsTermini, "PRONTO SOCCORSO - CIMINO DI TERMINI IMERESE")
            .unwrap_err();
        assert_eq!(err.field, "in attesa");
    }

    #[test]
    fn missing_block_fails() {
        let err = extract_department(PAGE, SourceId::PsCorleone, "PRONTO SOCCORSO - P.O. 'DEI BIANCHI' DI CORLEONE")
            .unwrap_err();
        assert_eq!(err.field, "department block");
    }

    #[tokio::test]
    async fn scrape_estimates_wait_and_beds() {
        let server = ScriptedServer::sequence(vec![Reply::html(PAGE)]).await;
        let client = RetrievalClient::new(&HttpConfig::default()).unwrap();
        let collector = AspPalermoCollector::new(
            SourceId::PsIngrassia,
            "PRONTO SOCCORSO - INGRASSIA DI PALERMO",
            13,
        )
        .with_url(server.url("/attese_ps/index_mod2.php"));

        let reading = collector.scrape(&client).await.unwrap();

        assert_eq!(reading.patients_waiting, Some(6));
        assert_eq!(reading.waiting_minutes, Some(180));
        // 6 waiting + 4 in treatment + 1 in observation
        assert_eq!(reading.available_beds, 2);
        assert_eq!(reading.color_distribution.unwrap().total(), Ok(11));
        assert!(collector.validate(&reading).is_valid());
    }
}
