use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track passes (started, completed, cancelled, rejected)
/// - Track per-source outcomes
/// - Track retrieval attempts and retries
/// - Track degraded parsing (unknown colors, unparsed wait times)
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Passes
    pub passes_started: AtomicUsize,
    pub passes_completed: AtomicUsize,
    pub passes_cancelled: AtomicUsize,
    pub passes_rejected: AtomicUsize,

    // Sources
    pub sources_succeeded: AtomicUsize,
    pub sources_failed: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub validation_failures: AtomicUsize,

    // Retrieval
    pub fetch_attempts: AtomicUsize,
    pub fetch_retries: AtomicUsize,
    pub fetch_failures: AtomicUsize,

    // Normalization
    pub unknown_colors: AtomicUsize,
    pub unparsed_wait_times: AtomicUsize,
}

/// Point-in-time copy of the counters, for logging.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsSnapshot {
    pub passes_started: usize,
    pub passes_completed: usize,
    pub passes_cancelled: usize,
    pub passes_rejected: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub timeouts: usize,
    pub validation_failures: usize,
    pub fetch_attempts: usize,
    pub fetch_retries: usize,
    pub fetch_failures: usize,
    pub unknown_colors: usize,
    pub unparsed_wait_times: usize,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            passes_started: get(&self.passes_started),
            passes_completed: get(&self.passes_completed),
            passes_cancelled: get(&self.passes_cancelled),
            passes_rejected: get(&self.passes_rejected),
            sources_succeeded: get(&self.sources_succeeded),
            sources_failed: get(&self.sources_failed),
            timeouts: get(&self.timeouts),
            validation_failures: get(&self.validation_failures),
            fetch_attempts: get(&self.fetch_attempts),
            fetch_retries: get(&self.fetch_retries),
            fetch_failures: get(&self.fetch_failures),
            unknown_colors: get(&self.unknown_colors),
            unparsed_wait_times: get(&self.unparsed_wait_times),
        }
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
