//! Shared HTTP plumbing for provider calls.
//!
//! Every outbound request goes through [`HttpTransport`], which owns the
//! `reqwest` client (with an explicit timeout), a token-bucket limiter per
//! provider and the retry policy. Transient failures (429, 5xx, timeouts,
//! connection errors) are retried with exponential backoff; anything else is
//! returned on the first attempt.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::ProviderKind;
use crate::config::{AppConfig, RetryConfig};
use crate::error::{ExtractError, Result};

type ProviderRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            min_delay: Duration::from_millis(cfg.min_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.min_delay_ms)),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }

    /// Run `op` until it succeeds, fails permanently or the budget is spent.
    pub async fn run<T, F, Fut>(&self, provider: ProviderKind, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        op.retry(self.backoff())
            .when(ExtractError::is_transient)
            .notify(|err: &ExtractError, delay: Duration| {
                warn!(
                    name: "provider.retry",
                    provider = %provider,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transient provider failure, retrying"
                );
            })
            .await
    }
}

/// HTTP client, limiter and retry policy for one provider.
#[derive(Clone)]
pub struct HttpTransport {
    provider: ProviderKind,
    http: reqwest::Client,
    limiter: Arc<ProviderRateLimiter>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("provider", &self.provider)
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        provider: ProviderKind,
        timeout: Duration,
        requests_per_second: u32,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Config(format!("HTTP client setup failed: {e}")))?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            provider,
            http,
            limiter,
            retry,
        })
    }

    /// Transport configured from the application settings.
    pub fn from_config(provider: ProviderKind, config: &AppConfig) -> Result<Self> {
        Self::new(
            provider,
            config.http_timeout(),
            config.http.requests_per_second,
            RetryPolicy::from(&config.retry),
        )
    }

    /// POST a JSON body and decode a JSON answer, retrying transient failures.
    pub async fn post_json<B, R>(&self, url: &str, auth: Auth<'_>, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.retry
            .run(self.provider, || async {
                self.limiter.until_ready().await;
                let rb = auth.apply(self.http.post(url)).json(body);
                self.execute(rb).await
            })
            .await
    }

    /// GET a JSON document, retrying transient failures.
    pub async fn get_json<R>(&self, url: &str, auth: Auth<'_>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.retry
            .run(self.provider, || async {
                self.limiter.until_ready().await;
                let rb = auth.apply(self.http.get(url));
                self.execute(rb).await
            })
            .await
    }

    async fn execute<R: DeserializeOwned>(&self, rb: reqwest::RequestBuilder) -> Result<R> {
        let response = rb.send().await.map_err(|e| self.network_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractError::ProviderCall {
                provider: self.provider,
                status: Some(status.as_u16()),
                timed_out: false,
                message: truncate(&error_text, 500),
            });
        }

        let body = response.text().await.map_err(|e| self.network_error(&e))?;
        debug!(
            provider = %self.provider,
            bytes = body.len(),
            "Provider response received"
        );

        // A 2xx with an undecodable envelope is a protocol mismatch, not a
        // transient fault: report it without a status so it is not retried.
        serde_json::from_str(&body).map_err(|e| {
            ExtractError::InvalidResponseFormat(format!(
                "{} returned an unexpected envelope: {e}",
                self.provider
            ))
        })
    }

    fn network_error(&self, err: &reqwest::Error) -> ExtractError {
        ExtractError::ProviderCall {
            provider: self.provider,
            status: err.status().map(|s| s.as_u16()),
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// How a request authenticates.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    Bearer(&'a str),
    Header(&'static str, &'a str),
}

impl Auth<'_> {
    fn apply(self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => rb.bearer_auth(token),
            Self::Header(name, value) => rb.header(name, value),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn server_error() -> ExtractError {
        ExtractError::ProviderCall {
            provider: ProviderKind::Mistral,
            status: Some(500),
            timed_out: false,
            message: "down".into(),
        }
    }

    #[tokio::test]
    async fn test_retry_stops_after_budget() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast_policy(3)
            .run(ProviderKind::Mistral, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            })
            .await;

        assert!(matches!(
            result,
            Err(ExtractError::ProviderCall {
                status: Some(500),
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast_policy(3)
            .run(ProviderKind::Gemini, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExtractError::InvalidResponseFormat("nope".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(3)
            .run(ProviderKind::Mistral, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(server_error())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_from_config_keeps_one_attempt() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            min_delay_ms: 10,
            max_delay_ms: 5,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("ééé", 3), "é…");
    }
}
