use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::sleep;

use crate::{
    config::HttpConfig,
    error::{FetchCause, FetchError},
    metrics::{METRICS, RuntimeMetrics},
    util,
};

/// ============================================================
/// RetrievalClient
/// ============================================================
///
/// Shared HTTP client used by every collector.
///
/// Responsibilities:
/// - GET text / JSON with a per-request timeout
/// - Retry transient failures with exponential backoff
/// - Log each attempt (number, outcome, latency)
///
/// THREADING:
/// - Wrap in `Arc` and share across tasks; the underlying
///   `reqwest::Client` pools connections internally.
///
pub struct RetrievalClient {
    http: reqwest::Client,
    timeout: Duration,
    policy: RetryPolicy,
}

/// When and how long to wait before retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// delay = base * 2^retry_index
    pub base: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(cfg: &HttpConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base: cfg.backoff_base(),
            jitter: cfg.retry_jitter,
        }
    }

    /// Delay before retry number `retry_index` (0-based).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index.min(16));
        let delay = self.base.saturating_mul(factor);
        if self.jitter && !delay.is_zero() {
            let scaled = delay.as_secs_f64() * (1.0 + rand::random_range(0.0..=0.5));
            Duration::try_from_secs_f64(scaled).unwrap_or(delay)
        } else {
            delay
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A retrieved body. Lives only for one collector invocation.
#[derive(Debug, Clone)]
pub struct RawFetchResult<T> {
    pub body: T,
    pub retrieved_at: DateTime<Utc>,
    pub attempts: u32,
}

impl RetrievalClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.timeout())
            .build()?;

        Ok(Self {
            http,
            timeout: cfg.timeout(),
            policy: RetryPolicy::from_config(cfg),
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn get_text(
        &self,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<RawFetchResult<String>, FetchError> {
        self.fetch(url, opts).await
    }

    /// Like `get_text`, then decodes the body as JSON.
    ///
    /// A body that is not JSON is a permanent failure.
    pub async fn get_json(
        &self,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<RawFetchResult<Value>, FetchError> {
        let raw = self.fetch(url, opts).await?;

        match serde_json::from_str::<Value>(&raw.body) {
            Ok(body) => Ok(RawFetchResult {
                body,
                retrieved_at: raw.retrieved_at,
                attempts: raw.attempts,
            }),
            Err(e) => {
                log::error!(
                    "GET {url}: invalid JSON ({e}); body starts with {:?}",
                    util::excerpt(&raw.body, 160)
                );
                Err(FetchError {
                    url: url.to_string(),
                    attempts: raw.attempts,
                    cause: FetchCause::Body(format!("invalid JSON: {e}")),
                })
            }
        }
    }

    async fn fetch(
        &self,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<RawFetchResult<String>, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            RuntimeMetrics::incr(&METRICS.fetch_attempts);

            let started = Instant::now();
            let result = self.attempt_once(url, opts).await;
            let latency_ms = started.elapsed().as_millis();

            let cause = match result {
                Ok(body) => {
                    log::debug!("GET {url} attempt={attempt} ok latency_ms={latency_ms}");
                    return Ok(RawFetchResult {
                        body,
                        retrieved_at: util::now(),
                        attempts: attempt,
                    });
                }
                Err(cause) => cause,
            };

            let retries_used = attempt - 1;
            if !cause.is_transient() || retries_used >= self.policy.max_retries {
                log::warn!(
                    "GET {url} attempt={attempt} failed latency_ms={latency_ms}: {cause} (giving up)"
                );
                RuntimeMetrics::incr(&METRICS.fetch_failures);
                return Err(FetchError {
                    url: url.to_string(),
                    attempts: attempt,
                    cause,
                });
            }

            let delay = self.policy.delay_for(retries_used);
            log::warn!(
                "GET {url} attempt={attempt} failed latency_ms={latency_ms}: {cause} (retry in {}ms)",
                delay.as_millis()
            );
            RuntimeMetrics::incr(&METRICS.fetch_retries);
            sleep(delay).await;
        }
    }

    async fn attempt_once(&self, url: &str, opts: &RequestOptions) -> Result<String, FetchCause> {
        let mut req = self
            .http
            .get(url)
            .timeout(opts.timeout.unwrap_or(self.timeout));

        for (name, value) in &opts.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        resp.text().await.map_err(classify)
    }
}

fn classify(err: reqwest::Error) -> FetchCause {
    if err.is_timeout() {
        FetchCause::Timeout
    } else if err.is_connect() {
        FetchCause::Connect(err.to_string())
    } else if err.is_decode() {
        FetchCause::Body(err.to_string())
    } else {
        FetchCause::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, ScriptedServer};

    fn client(max_retries: u32) -> RetrievalClient {
        let cfg = HttpConfig {
            timeout_secs: 2.0,
            max_retries,
            retry_backoff_factor: 0.01,
            retry_jitter: false,
            user_agent: "test-agent".into(),
        };
        RetrievalClient::new(&cfg).unwrap()
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(100),
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_half_the_delay() {
        let policy = RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(100),
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn jitter_on_a_saturated_delay_keeps_the_delay() {
        let policy = RetryPolicy {
            max_retries: 20,
            base: Duration::MAX,
            jitter: true,
        };
        for retry in [0, 3, 16] {
            assert_eq!(policy.delay_for(retry), Duration::MAX);
        }
    }

    #[tokio::test]
    async fn transient_503_then_ok_uses_two_attempts() {
        let server = ScriptedServer::sequence(vec![
            Reply::status(503, "busy"),
            Reply::ok("hello"),
        ])
        .await;

        let raw = client(3)
            .get_text(&server.url("/"), &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(raw.body, "hello");
        assert_eq!(raw.attempts, 2);
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn permanent_404_is_not_retried() {
        let server = ScriptedServer::sequence(vec![Reply::status(404, "nope")]).await;

        let err = client(3)
            .get_text(&server.url("/"), &RequestOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.cause, FetchCause::Status(404));
        assert_eq!(err.attempts, 1);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn too_many_requests_is_retried() {
        let server = ScriptedServer::sequence(vec![
            Reply::status(429, "slow down"),
            Reply::ok("fine"),
        ])
        .await;

        let raw = client(2)
            .get_text(&server.url("/"), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(raw.attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_report_last_cause_and_attempts() {
        let server = ScriptedServer::sequence(vec![Reply::status(502, "bad gateway")]).await;

        let err = client(2)
            .get_text(&server.url("/"), &RequestOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.cause, FetchCause::Status(502));
        assert_eq!(err.attempts, 3);
        assert_eq!(server.hits(), 3);
    }

    #[tokio::test]
    async fn per_call_timeout_is_transient() {
        let server = ScriptedServer::sequence(vec![
            Reply::ok("late").delayed(Duration::from_millis(500)),
            Reply::ok("on time"),
        ])
        .await;

        let opts = RequestOptions::default().with_timeout(Duration::from_millis(100));
        let raw = client(1).get_text(&server.url("/"), &opts).await.unwrap();

        assert_eq!(raw.body, "on time");
        assert_eq!(raw.attempts, 2);
    }

    #[tokio::test]
    async fn json_is_decoded_and_garbage_is_permanent() {
        let server = ScriptedServer::sequence(vec![
            Reply::json(r#"{"a": 1}"#),
            Reply::ok("<html>not json</html>"),
        ])
        .await;
        let c = client(3);

        let raw = c.get_json(&server.url("/"), &RequestOptions::default()).await.unwrap();
        assert_eq!(raw.body["a"], 1);

        let err = c
            .get_json(&server.url("/"), &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err.cause, FetchCause::Body(_)));
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn extra_headers_are_sent() {
        let server = ScriptedServer::sequence(vec![Reply::ok("x")]).await;
        let opts = RequestOptions::default().with_header("X-Department", "42");

        client(0).get_text(&server.url("/"), &opts).await.unwrap();

        let head = server.last_request().unwrap().to_lowercase();
        assert!(head.contains("x-department: 42"));
        assert!(head.contains("user-agent: test-agent"));
    }

    #[tokio::test]
    async fn connection_refused_exhausts_retries() {
        // bind then drop, so the port is (very likely) closed
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let err = client(1)
            .get_text(&format!("http://127.0.0.1:{port}/"), &RequestOptions::default())
            .await
            .unwrap_err();

        assert!(err.cause.is_transient());
        assert_eq!(err.attempts, 2);
    }
}
