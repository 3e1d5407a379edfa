use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::{
    collector::PassReport,
    config::SinkConfig,
    hospitals::codes::SourceId,
    schema::Reading,
};

/// ============================================================
/// ReadingSink
/// ============================================================
///
/// Destination of accepted readings.
///
/// Two writes per reading:
/// - `insert_live`:    replaces the current status of the source
/// - `insert_history`: appends to the time series
///
/// CONTRACT:
/// - Only valid readings are handed to a sink
/// - A failing write affects only that reading
#[async_trait::async_trait]
pub trait ReadingSink: Send + Sync {
    async fn insert_live(&self, reading: &Reading) -> Result<()>;

    async fn insert_history(&self, reading: &Reading) -> Result<()>;
}

/// Demo sink: readings are logged as JSON, nothing is stored.
pub struct LogSink;

#[async_trait::async_trait]
impl ReadingSink for LogSink {
    async fn insert_live(&self, reading: &Reading) -> Result<()> {
        log::info!("DEMO live → {}", serde_json::to_string(reading)?);
        Ok(())
    }

    async fn insert_history(&self, reading: &Reading) -> Result<()> {
        log::debug!("DEMO history → {} @ {}", reading.source, reading.retrieved_at);
        Ok(())
    }
}

/// Keeps the latest reading per source and the full history in memory.
#[derive(Default)]
pub struct MemorySink {
    live: Mutex<BTreeMap<SourceId, Reading>>,
    history: Mutex<Vec<Reading>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self, source: SourceId) -> Option<Reading> {
        self.live.lock().await.get(&source).cloned()
    }

    pub async fn history(&self) -> Vec<Reading> {
        self.history.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ReadingSink for MemorySink {
    async fn insert_live(&self, reading: &Reading) -> Result<()> {
        self.live.lock().await.insert(reading.source, reading.clone());
        Ok(())
    }

    async fn insert_history(&self, reading: &Reading) -> Result<()> {
        self.history.lock().await.push(reading.clone());
        Ok(())
    }
}

/// Picks the sink for the configured mode.
pub fn from_config(cfg: &SinkConfig) -> Arc<dyn ReadingSink> {
    if cfg.demo {
        log::warn!("sink running in DEMO mode, readings are only logged");
        Arc::new(LogSink)
    } else {
        Arc::new(MemorySink::new())
    }
}

/// Counts of one `publish_report` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub stored: usize,
    pub failed: usize,
}

/// Writes every successful reading of `report` to `sink`.
///
/// Sink errors are logged per reading and never abort the loop.
pub async fn publish_report(sink: &dyn ReadingSink, report: &PassReport) -> PublishSummary {
    let mut summary = PublishSummary::default();

    for reading in report.readings() {
        let live = sink.insert_live(reading).await;
        let history = sink.insert_history(reading).await;

        match live.and(history) {
            Ok(()) => summary.stored += 1,
            Err(e) => {
                summary.failed += 1;
                log::error!("{}: storing reading failed: {e:#}", reading.source);
            }
        }
    }

    log::info!(
        "published {} reading(s), {} failed",
        summary.stored,
        summary.failed
    );
    summary
}
