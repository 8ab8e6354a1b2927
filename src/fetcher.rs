//! HTTP fetching with outcome classification and exponential backoff.
//!
//! # Architecture
//!
//! - [`PageFetch`]: core trait, one URL in, body text or a tagged [`FetchError`] out
//! - [`HttpFetcher`]: reqwest-backed implementation gated by the shared
//!   [`HostRateLimiter`]
//! - [`RetryFetch`]: decorator retrying transient failures
//!
//! # Classification
//!
//! | Outcome | Result |
//! |---------|--------|
//! | 2xx | body returned |
//! | 4xx | `Permanent`, never retried |
//! | 5xx | `Transient` |
//! | timeout / transport error | `Transient` |
//! | anything else | `Permanent` |
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! A transient failure on the last attempt is escalated to `Permanent`.

use crate::config::CrawlConfig;
use crate::errors::FetchError;
use crate::ratelimit::HostRateLimiter;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Fetch the body of one URL.
pub trait PageFetch {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP GET with a bounded timeout and a shared rate limiter.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    limiter: HostRateLimiter,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        limiter: HostRateLimiter,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client, limiter })
    }
}

impl PageFetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.limiter.acquire(url).await;
        let t0 = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(url, &e))?;

        let status = response.status();
        if let Some(err) = classify_status(url, status) {
            debug!(status = status.as_u16(), elapsed_ms = t0.elapsed().as_millis(), "Non-success status");
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(url, &e))?;
        debug!(bytes = body.len(), elapsed_ms = t0.elapsed().as_millis(), "Fetched");
        Ok(body)
    }
}

fn classify_transport(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::Permanent {
            url: url.to_string(),
            status: None,
            reason: format!("invalid request: {e}"),
        }
    } else if e.is_timeout() {
        FetchError::Transient {
            url: url.to_string(),
            reason: "request timed out".to_string(),
        }
    } else {
        FetchError::Transient {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// `None` for 2xx, otherwise the tagged failure.
fn classify_status(url: &str, status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status.is_server_error() {
        Some(FetchError::Transient {
            url: url.to_string(),
            reason: format!("server returned {status}"),
        })
    } else {
        Some(FetchError::Permanent {
            url: url.to_string(),
            status: Some(status.as_u16()),
            reason: format!("server returned {status}"),
        })
    }
}

/// Wrapper that retries transient failures of any [`PageFetch`] implementation.
pub struct RetryFetch<T> {
    inner: T,
    /// Total attempts, first try included.
    max_attempts: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    max_delay: Duration,
    /// Upper bound on the random jitter added to each delay.
    jitter: Duration,
}

impl<T> RetryFetch<T>
where
    T: PageFetch,
{
    pub fn new(inner: T, max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Duration::from_millis(250),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> PageFetch for RetryFetch<T>
where
    T: PageFetch,
{
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e @ FetchError::Permanent { .. }) => return Err(e),
                Err(FetchError::Transient { reason, .. }) => {
                    if attempt >= self.max_attempts {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis(),
                            %reason,
                            "fetch exhausted retries"
                        );
                        return Err(FetchError::Permanent {
                            url: url.to_string(),
                            status: None,
                            reason: format!("gave up after {attempt} attempts: {reason}"),
                        });
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        ?delay,
                        %reason,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// The production fetcher: HTTP with rate limiting, wrapped in retries.
pub fn build_fetcher(
    config: &CrawlConfig,
    limiter: HostRateLimiter,
) -> Result<RetryFetch<HttpFetcher>, reqwest::Error> {
    let http = HttpFetcher::new(&config.user_agent, config.request_timeout(), limiter)?;
    Ok(RetryFetch::new(
        http,
        config.max_attempts,
        config.base_backoff(),
        config.max_backoff(),
    ))
}
