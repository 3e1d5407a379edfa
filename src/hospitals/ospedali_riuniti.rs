use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::{
    error::{CollectorError, ExtractionError, RegistryError},
    http::{RequestOptions, RetrievalClient},
    normalize::{normalize_color, parse_waiting_time},
    schema::{CanonicalColor, ColorDistribution, Reading},
    util,
};

use super::adapter::{Collector, SourceKind};
use super::codes::SourceId;
use super::registry::Registry;

/// Ospedali Riuniti Villa Sofia-Cervello: one page, one
/// `.olo-container-single-hospital` block per department. The Cervello
/// and Villa Sofia adult blocks carry an extra class; the pediatric
/// block carries neither.
pub const BASE_URL: &str = "https://www.ospedaliriunitipalermo.it/amministrazione-trasparente/servizi-erogati/liste-di-attesa/pazienti-in-attesa-al-pronto-soccorso/";

/// Nominal capacity used for the bed estimate; the page has no bed data.
const NOMINAL_BEDS: i64 = 100;

/// Counter class suffix and its raw color name.
const COUNTERS: [(&str, &str); 5] = [
    ("red", "red"),
    ("orange", "orange"),
    ("azure", "azure"),
    ("green", "green"),
    ("grey", "grey"),
];

static BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".olo-container-single-hospital").expect("block selector"));
static UPDATED: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".olo-row-dati-aggiornati-al").expect("update selector"));
static TOTAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".olo-number-pazienti.tot").expect("total selector"));
static WAITING: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".olo-number-pazienti.wait").expect("waiting selector"));
static OVERCROWDING: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".olo-row-indice-sovraffollamento span").expect("overcrowding selector")
});
static WAIT_TEXT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".olo-tempo-attesa").expect("wait selector"));
static COUNTER_SELECTORS: Lazy<Vec<(Selector, &'static str)>> = Lazy::new(|| {
    COUNTERS
        .iter()
        .map(|(class, raw)| {
            let sel = Selector::parse(&format!(".olo-codice-{class} .olo-number-codice"))
                .expect("counter selector");
            (sel, *raw)
        })
        .collect()
});

static UPDATE_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2})\s+([[:alpha:]]+)\s+(\d{4})\s+(\d{1,2}):(\d{2})").expect("update stamp pattern")
});

const MONTHS: [&str; 12] = [
    "gennaio", "febbraio", "marzo", "aprile", "maggio", "giugno", "luglio", "agosto",
    "settembre", "ottobre", "novembre", "dicembre",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Cervello,
    VillaSofia,
    Pediatric,
}

impl Block {
    fn matches(self, el: ElementRef<'_>) -> bool {
        let classes: Vec<&str> = el.value().classes().collect();
        let cervello = classes.contains(&"cervello");
        let villa_sofia = classes.contains(&"villaSofia");
        match self {
            Block::Cervello => cervello,
            Block::VillaSofia => villa_sofia,
            Block::Pediatric => !cervello && !villa_sofia,
        }
    }
}

pub struct OspedaliRiunitiCollector {
    source: SourceId,
    block: Block,
    url: String,
}

#[derive(Debug)]
struct Snapshot {
    dist: ColorDistribution,
    total: i64,
    waiting: i64,
    overcrowding: f64,
    wait_text: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl OspedaliRiunitiCollector {
    pub fn new(source: SourceId, block: Block) -> Self {
        Self {
            source,
            block,
            url: BASE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl Collector for OspedaliRiunitiCollector {
    fn source_id(&self) -> SourceId {
        self.source
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    fn expects_color(&self) -> bool {
        true
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;

        let snap = extract_block(&page.body, self.source, self.block)
            .map_err(|e| e.with_excerpt(&page.body))?;

        let published = snap
            .wait_text
            .as_deref()
            .and_then(|text| parse_waiting_time(&spell_out_half_hours(text)));

        let waiting_minutes = match published {
            Some(minutes) => minutes,
            None => estimate_from_mix(&snap.dist, snap.overcrowding)
                .ok_or_else(|| ExtractionError::overflow(self.source, "estimated wait"))?,
        };
        let beds = NOMINAL_BEDS
            .checked_sub(snap.total)
            .ok_or_else(|| ExtractionError::overflow(self.source, "available beds"))?;

        log::debug!(
            "{}: total={} waiting={} overcrowding={:.2} wait={}min ({})",
            self.source,
            snap.total,
            snap.waiting,
            snap.overcrowding,
            waiting_minutes,
            if published.is_some() { "published" } else { "estimated" }
        );

        let mut reading = Reading::new(self.source, page.retrieved_at);
        reading.color = snap.dist.most_critical();
        reading.patients_waiting = Some(snap.waiting);
        reading.waiting_minutes = Some(waiting_minutes);
        reading.available_beds = beds.max(0);
        reading.color_distribution = Some(snap.dist);
        reading.external_last_update = snap.updated_at;
        Ok(reading)
    }
}

fn extract_block(html: &str, source: SourceId, block: Block) -> Result<Snapshot, ExtractionError> {
    let doc = Html::parse_document(html);

    let updated_at = doc
        .select(&UPDATED)
        .next()
        .and_then(|el| parse_update_stamp(&util::collapse_ws(&el.text().collect::<String>())));

    let container = doc
        .select(&BLOCK)
        .find(|el| block.matches(*el))
        .ok_or_else(|| ExtractionError::new(source, "hospital block", format!("{block:?} block not found")))?;

    let number = |sel: &Selector, field: &str| -> Result<i64, ExtractionError> {
        match container.select(sel).next() {
            None => Ok(0),
            Some(el) => {
                let text = util::collapse_ws(&el.text().collect::<String>());
                util::parse_count(&text)
                    .ok_or_else(|| ExtractionError::new(source, field, format!("not a number: {text:?}")))
            }
        }
    };

    let mut dist = ColorDistribution::default();
    for (sel, raw) in COUNTER_SELECTORS.iter() {
        let field = format!("{raw} counter");
        dist.add(normalize_color(raw), number(sel, &field)?)
            .map_err(|_| ExtractionError::overflow(source, field))?;
    }

    let overcrowding = container
        .select(&OVERCROWDING)
        .next()
        .and_then(|el| parse_percent(&el.text().collect::<String>()))
        .unwrap_or(1.0);

    let wait_text = container
        .select(&WAIT_TEXT)
        .next()
        .map(|el| util::collapse_ws(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    Ok(Snapshot {
        dist,
        total: number(&TOTAL, "total patients")?,
        waiting: number(&WAITING, "waiting patients")?,
        overcrowding,
        wait_text,
        updated_at,
    })
}

/// "145 %" -> 1.45
fn parse_percent(text: &str) -> Option<f64> {
    let cleaned = text.replace('%', "").replace(',', ".");
    cleaned.trim().parse::<f64>().ok().map(|p| p / 100.0)
}

/// "1 ora e mezza" -> "1 ora e 30 minuti", "mezz'ora" -> "30 minuti"
fn spell_out_half_hours(text: &str) -> String {
    text.to_lowercase()
        .replace("mezz'ora", "30 minuti")
        .replace("e mezza", "e 30 minuti")
        .replace("e mezzo", "e 30 minuti")
}

/// Expected wait when the page publishes none: base time per color
/// weighted by the current mix, scaled by the overcrowding index.
///
/// `None` when the weighted sum leaves the `i64` range.
fn estimate_from_mix(dist: &ColorDistribution, overcrowding: f64) -> Option<i64> {
    let total = dist.total().ok()?;
    if total <= 0 {
        return Some(0);
    }

    let base = |color: CanonicalColor| match color {
        CanonicalColor::Red => 0,
        CanonicalColor::Orange => 15,
        CanonicalColor::Blue => 60,
        CanonicalColor::Green => 120,
        CanonicalColor::White => 240,
        CanonicalColor::Unknown => 0,
    };

    let weighted = CanonicalColor::PRIORITY
        .iter()
        .try_fold(0i64, |acc, c| acc.checked_add(dist.get(*c).checked_mul(base(*c))?))?;

    let minutes = (weighted as f64 / total as f64) * overcrowding;
    minutes.is_finite().then(|| minutes.max(0.0) as i64)
}

/// "Situazione aggiornata al 1 Febbraio 2025 19:27"
fn parse_update_stamp(text: &str) -> Option<DateTime<Utc>> {
    let caps = UPDATE_STAMP.captures(text)?;
    let month_name = caps[2].to_lowercase();
    let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;

    let naive = NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[1].parse().ok()?)?
        .and_hms_opt(caps[4].parse().ok()?, caps[5].parse().ok()?, 0)?;
    util::local_to_utc(naive)
}

pub fn cervello_adults() -> Box<dyn Collector> {
    Box::new(OspedaliRiunitiCollector::new(SourceId::PoCervelloAdulti, Block::Cervello))
}

pub fn villa_sofia_adults() -> Box<dyn Collector> {
    Box::new(OspedaliRiunitiCollector::new(SourceId::PoVillaSofiaAdulti, Block::VillaSofia))
}

pub fn cervello_pediatric() -> Box<dyn Collector> {
    Box::new(OspedaliRiunitiCollector::new(SourceId::PoCervelloPediatrico, Block::Pediatric))
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::PoCervelloAdulti, SourceKind::Html, cervello_adults)?;
    registry.register(SourceId::PoVillaSofiaAdulti, SourceKind::Html, villa_sofia_adults)?;
    registry.register(SourceId::PoCervelloPediatrico, SourceKind::Html, cervello_pediatric)?;
    Ok(())
}
