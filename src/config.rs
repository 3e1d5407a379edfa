use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

/// Upper bound for every configured duration, in seconds (one day).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Seconds from the file as a `Duration`, clamped to
/// `MAX_DURATION_SECS`; negative values become zero.
fn duration_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - Retrieval client settings (timeouts, retries, user agent)
// - Pass settings (concurrency, timeouts, cadence)
// - Where readings go
// - Optional debug configuration
//
// Every field has a default, so a partial file (or none) is valid.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub pass: PassConfig,
    pub sink: SinkConfig,
    pub debug: Option<DebugConfig>,
}

// ------------------------------------------------------------
// Retrieval client configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds, unless overridden per call
    pub timeout_secs: f64,

    /// Retries after the first attempt for transient failures
    pub max_retries: u32,

    /// Backoff base in seconds: delay = factor * 2^attempt
    pub retry_backoff_factor: f64,

    /// Adds up to 50% random jitter to each backoff delay
    pub retry_jitter: bool,

    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            max_retries: 3,
            retry_backoff_factor: 0.5,
            retry_jitter: true,
            user_agent: "SpitAlert/1.0".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        duration_from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        duration_from_secs(self.retry_backoff_factor)
    }
}

// ------------------------------------------------------------
// Pass configuration
// ------------------------------------------------------------
//
// Controls how one collection pass runs.
//
// NOTE:
// `interval_secs` is only read by the binary's scheduling loop;
// the orchestrator itself never sleeps between passes.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PassConfig {
    /// Maximum collectors in flight at any instant
    pub concurrency_limit: usize,

    /// Budget for one collector's scrape, in seconds
    pub collector_timeout_secs: f64,

    /// Budget for the whole pass, in seconds
    pub pass_timeout_secs: f64,

    /// Seconds between pass triggers
    pub interval_secs: u64,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            collector_timeout_secs: 60.0,
            pass_timeout_secs: 240.0,
            interval_secs: 300,
        }
    }
}

impl PassConfig {
    pub fn collector_timeout(&self) -> Duration {
        duration_from_secs(self.collector_timeout_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        duration_from_secs(self.pass_timeout_secs)
    }
}

// ------------------------------------------------------------
// Sink configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkConfig {
    /// Demo mode: readings are logged instead of persisted
    pub demo: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { demo: true }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables debug-level logging when RUST_LOG is not set
    pub log: Option<bool>,
}

impl Config {
    pub fn debug_log(&self) -> bool {
        self.debug
            .as_ref()
            .is_some_and(|d| d.log.unwrap_or(false))
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let seconds = |name: &str, v: f64, allow_zero: bool| -> anyhow::Result<()> {
            let d = Duration::try_from_secs_f64(v)
                .with_context(|| format!("{name} is not a valid duration: {v}"))?;
            if d.is_zero() && !allow_zero {
                bail!("{name} must be > 0");
            }
            if v > MAX_DURATION_SECS {
                bail!("{name} must not exceed {MAX_DURATION_SECS} seconds");
            }
            Ok(())
        };

        seconds("http.timeout_secs", self.http.timeout_secs, false)?;
        seconds("http.retry_backoff_factor", self.http.retry_backoff_factor, true)?;
        if self.pass.concurrency_limit == 0 {
            bail!("pass.concurrency_limit must be at least 1");
        }
        seconds("pass.collector_timeout_secs", self.pass.collector_timeout_secs, false)?;
        seconds("pass.pass_timeout_secs", self.pass.pass_timeout_secs, false)?;
        if self.pass.pass_timeout_secs < self.pass.collector_timeout_secs {
            bail!("pass.pass_timeout_secs must not be shorter than pass.collector_timeout_secs");
        }
        if self.pass.interval_secs == 0 {
            bail!("pass.interval_secs must be > 0");
        }
        Ok(())
    }
}

/// Reads a JSON configuration file and validates it.
///
/// A missing file is not an error: defaults are used.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let cfg = if path.exists() {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str::<Config>(&data)
            .with_context(|| format!("parsing config {}", path.display()))?
    } else {
        log::warn!("config file {} not found, using defaults", path.display());
        Config::default()
    };

    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{ "pass": { "concurrency_limit": 8 } }"#).unwrap();
        assert_eq!(cfg.pass.concurrency_limit, 8);
        assert_eq!(cfg.pass.interval_secs, 300);
        assert_eq!(cfg.http.max_retries, 3);
        assert_eq!(cfg.http.user_agent, "SpitAlert/1.0");
        assert!(cfg.sink.demo);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = Config::default();
        cfg.pass.concurrency_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pass_timeout_shorter_than_collector_timeout_is_rejected() {
        let mut cfg = Config::default();
        cfg.pass.pass_timeout_secs = 10.0;
        cfg.pass.collector_timeout_secs = 20.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unrepresentable_durations_are_rejected() {
        for bad in [1e20, f64::INFINITY, f64::NAN, -1.0, 0.0, MAX_DURATION_SECS + 1.0] {
            let mut cfg = Config::default();
            cfg.http.timeout_secs = bad;
            assert!(cfg.validate().is_err(), "timeout_secs {bad} accepted");
        }

        let mut cfg = Config::default();
        cfg.http.retry_backoff_factor = 1e20;
        assert!(cfg.validate().is_err());
        cfg.http.retry_backoff_factor = 0.0;
        assert!(cfg.validate().is_ok());

        let mut cfg = Config::default();
        cfg.pass.collector_timeout_secs = -5.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duration_accessors_never_panic() {
        let mut cfg = Config::default();
        cfg.http.timeout_secs = 1e20;
        cfg.http.retry_backoff_factor = f64::NAN;
        cfg.pass.pass_timeout_secs = -3.0;

        assert_eq!(cfg.http.timeout(), Duration::from_secs(86_400));
        assert_eq!(cfg.http.backoff_base(), Duration::from_secs(86_400));
        assert_eq!(cfg.pass.pass_timeout(), Duration::ZERO);
        assert_eq!(Config::default().pass.collector_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_config(Path::new("/definitely/not/here/config.json")).unwrap();
        assert_eq!(cfg.pass.concurrency_limit, 5);
    }

    #[test]
    fn debug_flag() {
        let cfg: Config = serde_json::from_str(r#"{ "debug": { "log": true } }"#).unwrap();
        assert!(cfg.debug_log());
        assert!(!Config::default().debug_log());
    }
}
