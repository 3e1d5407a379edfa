use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};

use crate::{
    config::PassConfig,
    error::{secs, CollectorError, PassError},
    hospitals::{
        adapter::Validation,
        codes::SourceId,
        registry::{Registry, RegistryEntry},
    },
    http::RetrievalClient,
    metrics::{RuntimeMetrics, METRICS},
    schema::{FailureKind, Reading, ScrapeOutcome},
    util,
};

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassState {
    /// Every collector produced an outcome on its own
    Completed,

    /// The pass deadline expired; unfinished collectors were aborted
    Cancelled,
}

/// Observable orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
}

/// Result of one pass: exactly one outcome per registered source.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub outcomes: Vec<ScrapeOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
    pub state: PassState,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn readings(&self) -> impl Iterator<Item = &Reading> + '_ {
        self.outcomes.iter().filter_map(ScrapeOutcome::reading)
    }

    pub fn outcome(&self, source: SourceId) -> Option<&ScrapeOutcome> {
        self.outcomes.iter().find(|o| o.source == source)
    }
}

/// Runs collection passes over every registered collector.
///
/// RESPONSIBILITIES:
/// - One task per registry entry, at most `concurrency_limit` in flight
/// - Per-collector timeout, pass deadline
/// - Turning every per-source failure (including panics) into data
///
/// GUARANTEES:
/// - Passes never overlap: a second `run_pass` while one is running
///   is rejected immediately and does not disturb the running pass
/// - A failing collector never affects the others
///
/// NOT RESPONSIBLE FOR:
/// - Scheduling (the binary drives passes on an interval)
/// - Persistence (see `sink`)
///
pub struct Orchestrator {
    registry: Arc<Registry>,
    client: Arc<RetrievalClient>,

    concurrency_limit: usize,
    collector_timeout: Duration,
    pass_timeout: Duration,

    gate: Mutex<()>,
    running: AtomicBool,
}

/// Clears the running flag even if the pass future is dropped.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, client: Arc<RetrievalClient>, cfg: &PassConfig) -> Self {
        Self {
            registry,
            client,
            concurrency_limit: cfg.concurrency_limit.max(1),
            collector_timeout: cfg.collector_timeout(),
            pass_timeout: cfg.pass_timeout(),
            gate: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        if self.running.load(Ordering::SeqCst) {
            OrchestratorState::Running
        } else {
            OrchestratorState::Idle
        }
    }

    /// Runs one pass over all registered sources.
    ///
    /// ERRORS:
    /// - `PassAlreadyInProgress` if another pass holds the gate
    ///
    /// Per-source failures are reported inside the `PassReport`,
    /// never as an error of the pass itself.
    pub async fn run_pass(&self) -> Result<PassReport, PassError> {
        let Ok(_gate) = self.gate.try_lock() else {
            RuntimeMetrics::incr(&METRICS.passes_rejected);
            log::warn!("pass rejected: previous pass still running");
            return Err(PassError::PassAlreadyInProgress);
        };
        let _running = RunningFlag::raise(&self.running);

        Ok(self.execute().await)
    }

    async fn execute(&self) -> PassReport {
        RuntimeMetrics::incr(&METRICS.passes_started);

        let started_at = util::now();
        let clock = Instant::now();
        let deadline = clock + self.pass_timeout;

        let permits = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, SourceId> = HashMap::new();

        log::info!(
            "pass started: {} sources, concurrency {}, deadline {}",
            self.registry.len(),
            self.concurrency_limit,
            secs(self.pass_timeout)
        );

        for entry in self.registry.list_all().copied() {
            let permits = permits.clone();
            let client = self.client.clone();
            let limit = self.collector_timeout;

            let handle = tasks.spawn(async move {
                // Semaphore is never closed; a failed acquire only
                // loses the bound, not the outcome.
                let _permit = permits.acquire_owned().await.ok();
                run_collector(entry, &client, limit).await
            });
            pending.insert(handle.id(), entry.source);
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        let mut state = PassState::Completed;

        loop {
            match timeout_at(deadline, tasks.join_next_with_id()).await {
                Err(_) => {
                    state = PassState::Cancelled;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok((id, outcome)))) => {
                    pending.remove(&id);
                    outcomes.push(outcome);
                }
                Ok(Some(Err(e))) => {
                    let Some(source) = pending.remove(&e.id()) else {
                        continue;
                    };
                    if e.is_panic() {
                        log::error!("{source}: collector panicked");
                        outcomes.push(ScrapeOutcome::failure(
                            source,
                            FailureKind::Panicked,
                            "collector task panicked",
                        ));
                    } else {
                        outcomes.push(ScrapeOutcome::failure(
                            source,
                            FailureKind::TimedOut,
                            "collector task cancelled",
                        ));
                    }
                }
            }
        }

        if state == PassState::Cancelled {
            tasks.abort_all();
            log::warn!(
                "pass deadline {} reached, aborting {} collector(s)",
                secs(self.pass_timeout),
                pending.len()
            );
            for source in pending.into_values() {
                RuntimeMetrics::incr(&METRICS.timeouts);
                outcomes.push(ScrapeOutcome::failure(
                    source,
                    FailureKind::TimedOut,
                    format!("pass deadline of {} reached", secs(self.pass_timeout)),
                ));
            }
        }

        outcomes.sort_by_key(|o| o.source);

        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        let failure_count = outcomes.len() - success_count;
        for _ in 0..success_count {
            RuntimeMetrics::incr(&METRICS.sources_succeeded);
        }
        for _ in 0..failure_count {
            RuntimeMetrics::incr(&METRICS.sources_failed);
        }

        match state {
            PassState::Completed => RuntimeMetrics::incr(&METRICS.passes_completed),
            PassState::Cancelled => RuntimeMetrics::incr(&METRICS.passes_cancelled),
        }

        let elapsed = clock.elapsed();
        log::info!(
            "pass {state:?}: {success_count} ok, {failure_count} failed in {}",
            secs(elapsed)
        );

        PassReport {
            outcomes,
            success_count,
            failure_count,
            state,
            started_at,
            elapsed,
        }
    }
}

/// Runs one collector to an outcome.
///
/// Fresh instance per pass; the instance dies with its task.
async fn run_collector(entry: RegistryEntry, client: &RetrievalClient, limit: Duration) -> ScrapeOutcome {
    let source = entry.source;
    let collector = (entry.constructor)();
    let began = Instant::now();

    let scraped = match timeout(limit, collector.scrape(client)).await {
        Ok(result) => result,
        Err(_) => {
            RuntimeMetrics::incr(&METRICS.timeouts);
            log::warn!("{source}: no result within {}", secs(limit));
            return ScrapeOutcome::failure(
                source,
                FailureKind::TimedOut,
                format!("collector exceeded {}", secs(limit)),
            );
        }
    };

    match scraped {
        Err(CollectorError::Fetch(e)) => {
            log::warn!("{source}: {e}");
            ScrapeOutcome::failure(source, FailureKind::Fetch, e.to_string())
        }

        Err(CollectorError::Extraction(e)) => {
            log::error!("{e}; body: {:?}", e.excerpt);
            ScrapeOutcome::failure(source, FailureKind::Extraction, e.to_string())
        }

        Ok(reading) => match collector.validate(&reading) {
            Validation::Valid => {
                log::debug!(
                    "{source} ({}): {} wait={:?} beds={} in {}",
                    source.label(),
                    reading.color,
                    reading.waiting_minutes,
                    reading.available_beds,
                    secs(began.elapsed())
                );
                ScrapeOutcome::success(reading)
            }
            Validation::Invalid { field, reason } => {
                RuntimeMetrics::incr(&METRICS.validation_failures);
                ScrapeOutcome::failure(
                    source,
                    FailureKind::ValidationFailed,
                    format!("{field}: {reason}"),
                )
            }
        },
    }
}
