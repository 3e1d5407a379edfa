use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::{interval, sleep, MissedTickBehavior};

use er_wait_collector::{
    collector::Orchestrator,
    config::load_config,
    error::PassError,
    hospitals::{self, registry},
    http::RetrievalClient,
    metrics::METRICS,
    sink,
};

/// Environment variable naming the config file when no argument is given.
const CONFIG_ENV: &str = "ER_COLLECTOR_CONFIG";

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Load configuration
// - Initialize logging
// - Register every collector and freeze the registry
// - Drive collection passes on a fixed interval
// - Hand accepted readings to the sink
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // Load configuration from disk
    //
    // Path: first CLI argument, then $ER_COLLECTOR_CONFIG,
    // then ./config.json. Loaded before logging is set up
    // because `debug.log` picks the default level.
    // --------------------------------------------------------
    let path = config_path();
    let config = load_config(&path);

    let debug = config.as_ref().is_ok_and(|c| c.debug_log());
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug { "debug" } else { "info" }),
    )
    .init();

    let config = config.with_context(|| format!("loading {}", path.display()))?;
    if !path.exists() {
        log::info!("no config at {}, running with defaults", path.display());
    }

    // --------------------------------------------------------
    // Registry
    //
    // Misconfiguration here (duplicate source, wrong identity)
    // is fatal: no pass may run against a broken registry.
    // --------------------------------------------------------
    let mut reg = registry::Registry::new();
    hospitals::register_all(&mut reg).context("registering collectors")?;
    let reg = registry::install_global(reg)?;

    let client = Arc::new(RetrievalClient::new(&config.http).context("building HTTP client")?);
    let orchestrator = Orchestrator::new(reg, client, &config.pass);
    let sink = sink::from_config(&config.sink);

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(60)).await;

            match serde_json::to_string(&METRICS.snapshot()) {
                Ok(line) => log::info!("[METRICS] {line}"),
                Err(e) => log::warn!("metrics snapshot not serializable: {e}"),
            }
        }
    });

    // --------------------------------------------------------
    // Pass loop
    //
    // The first tick fires immediately. Ticks missed while a
    // pass overruns are skipped, never queued.
    // --------------------------------------------------------
    let mut ticker = interval(Duration::from_secs(config.pass.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!(
        "collecting every {}s (concurrency {}, collector timeout {}s, pass timeout {}s)",
        config.pass.interval_secs,
        config.pass.concurrency_limit,
        config.pass.collector_timeout_secs,
        config.pass.pass_timeout_secs,
    );

    loop {
        ticker.tick().await;

        match orchestrator.run_pass().await {
            Ok(report) => {
                for outcome in &report.outcomes {
                    if let Err(failure) = &outcome.result {
                        log::warn!("{} → {}: {}", outcome.source, failure.kind, failure.message);
                    }
                }
                sink::publish_report(sink.as_ref(), &report).await;
            }
            Err(PassError::PassAlreadyInProgress) => {
                log::warn!("tick skipped: pass already in progress");
            }
        }
    }
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"))
}
