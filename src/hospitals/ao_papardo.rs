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
use super::census_reading;
use super::codes::SourceId;
use super::registry::Registry;

/// AO Papardo shows one "traffic light" per triage color on its home
/// page. The color is only in the inline style, the count sits in a
/// `span` of the div that follows:
///
///   <div class="semaforo_ps" style="background-color: #36DB00"></div>
///   <div><span>4</span></div>
///
/// Every counted patient is treated as waiting.
pub const BASE_URL: &str = "https://www.aopapardo.it/";

/// Nominal capacity; the page publishes no bed data.
const TOTAL_BEDS: i64 = 30;

/// Light colors and the triage color they stand for.
const LIGHTS: [(&str, &str); 5] = [
    ("#FFFFFF", "bianco"),
    ("#36DB00", "verde"),
    ("#04E1F7", "azzurro"),
    ("#F77A04", "arancione"),
    ("#FF0000", "rosso"),
];

static DIV: Lazy<Selector> = Lazy::new(|| Selector::parse("div").expect("div selector"));
static SPAN: Lazy<Selector> = Lazy::new(|| Selector::parse("span").expect("span selector"));
static UPDATED: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.hidden-sm.hidden-xs.pull-right.small").expect("update selector")
});

static BACKGROUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"background-color:\s*(#[0-9A-Fa-f]{6})").expect("background pattern")
});
static UPDATE_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}/\d{2}/\d{4}).*?(\d{2}:\d{2})").expect("update stamp pattern")
});

pub struct AoPapardoCollector {
    url: String,
}

impl AoPapardoCollector {
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

impl Default for AoPapardoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for AoPapardoCollector {
    fn source_id(&self) -> SourceId {
        SourceId::AoPapardo
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Html
    }

    async fn scrape(&self, client: &RetrievalClient) -> Result<Reading, CollectorError> {
        let page = client.get_text(&self.url, &RequestOptions::default()).await?;

        let (dist, updated_at) = extract_lights(&page.body).map_err(|e| e.with_excerpt(&page.body))?;
        if updated_at.is_none() {
            log::warn!("{}: no update time on page", self.source_id());
        }

        let mut reading = census_reading(self.source_id(), page.retrieved_at, dist, &[], TOTAL_BEDS)
            .map_err(|e| e.with_excerpt(&page.body))?;
        reading.external_last_update = updated_at;
        Ok(reading)
    }
}

fn extract_lights(html: &str) -> Result<(ColorDistribution, Option<DateTime<Utc>>), ExtractionError> {
    let source = SourceId::AoPapardo;
    let doc = Html::parse_document(html);

    let updated_at = doc
        .select(&UPDATED)
        .next()
        .and_then(|el| parse_update_stamp(&util::collapse_ws(&el.text().collect::<String>())));

    // document order, so the div after a light is the one holding its count
    let divs: Vec<ElementRef<'_>> = doc.select(&DIV).collect();
    let mut dist = ColorDistribution::default();
    let mut lights = 0;

    for (i, div) in divs.iter().enumerate() {
        if !div.value().classes().any(|c| c == "semaforo_ps") {
            continue;
        }
        let Some(hex) = div
            .value()
            .attr("style")
            .and_then(|style| BACKGROUND.captures(style))
            .map(|caps| caps[1].to_uppercase())
        else {
            continue;
        };
        let Some((_, raw_color)) = LIGHTS.iter().find(|(h, _)| *h == hex) else {
            log::warn!("{source}: unrecognized light color {hex}");
            continue;
        };
        let Some(cell) = divs.get(i + 1).and_then(|next| next.select(&SPAN).next()) else {
            continue;
        };

        let text = util::collapse_ws(&cell.text().collect::<String>());
        let field = format!("{raw_color} light");
        let count = util::parse_count(&text)
            .ok_or_else(|| ExtractionError::new(source, field.as_str(), format!("not a number: {text:?}")))?;
        dist.add(normalize_color(raw_color), count)
            .map_err(|_| ExtractionError::overflow(source, field.as_str()))?;
        lights += 1;
    }

    if lights == 0 {
        return Err(ExtractionError::new(source, "semaforo_ps", "no triage lights found"));
    }
    Ok((dist, updated_at))
}

/// "Aggiornato il 11/02/2025 alle 12:19"
fn parse_update_stamp(text: &str) -> Option<DateTime<Utc>> {
    let caps = UPDATE_STAMP.captures(text)?;
    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", &caps[1], &caps[2]), "%d/%m/%Y %H:%M").ok()?;
    util::local_to_utc(naive)
}

pub fn papardo() -> Box<dyn Collector> {
    Box::new(AoPapardoCollector::new())
}

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(SourceId::AoPapardo, SourceKind::Html, papardo)
}
