//! Outbound HTTP with pacing, exponential backoff and cancellation.
//!
//! Every page and article request made by a harvest goes through a
//! [`Fetcher`]; nothing else in the crate touches the network.
//!
//! # Architecture
//!
//! - [`Fetch`]: one attempt at retrieving a resource body
//! - [`HttpFetch`]: the `reqwest`-backed implementation, configured once from
//!   [`FetcherConfig`] (user agent, extra headers, timeout)
//! - [`Fetcher`]: decorator that adds pacing, retries and cancellation to any
//!   [`Fetch`] implementation
//!
//! # Retry Strategy
//!
//! Before every attempt the fetcher sleeps a random interval between the
//! configured pacing bounds. A failed attempt is followed by
//!
//! ```text
//! delay = min(backoff_base * 2^(attempt-1), backoff_max) + random_jitter(0..=jitter_max)
//! ```
//!
//! and after the last attempt the error is returned as
//! [`FetchError::Exhausted`] carrying the final cause.

use crate::config::FetcherConfig;
use crate::error::{ConfigError, FetchError};
use rand::{Rng, rng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// A single attempt at retrieving the body behind a URL.
///
/// Implementors must not retry or sleep; that is the job of [`Fetcher`].
pub trait Fetch: Send + Sync {
    fn fetch(&self, target: &Url) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Pacing and retry parameters for a [`Fetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per target, at least 1.
    pub attempts: usize,
    pub pacing_min: StdDuration,
    pub pacing_max: StdDuration,
    pub backoff_base: StdDuration,
    pub backoff_max: StdDuration,
    pub jitter_max: StdDuration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            pacing_min: StdDuration::from_millis(config.pacing_min_ms),
            pacing_max: StdDuration::from_millis(config.pacing_max_ms),
            backoff_base: StdDuration::from_millis(config.backoff_base_ms),
            backoff_max: StdDuration::from_millis(config.backoff_max_ms),
            jitter_max: StdDuration::from_millis(config.jitter_max_ms),
        }
    }

    /// No pacing and no backoff; for in-process fakes.
    #[cfg(test)]
    pub fn immediate(attempts: usize) -> Self {
        Self {
            attempts: attempts.max(1),
            pacing_min: StdDuration::ZERO,
            pacing_max: StdDuration::ZERO,
            backoff_base: StdDuration::ZERO,
            backoff_max: StdDuration::ZERO,
            jitter_max: StdDuration::ZERO,
        }
    }

    fn pacing_delay(&self) -> StdDuration {
        random_between(self.pacing_min, self.pacing_max)
    }

    fn backoff_delay(&self, attempt: usize) -> StdDuration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let mut delay = self.backoff_base.saturating_mul(1 << shift);
        if delay > self.backoff_max {
            delay = self.backoff_max;
        }
        delay + random_between(StdDuration::ZERO, self.jitter_max)
    }
}

fn random_between(low: StdDuration, high: StdDuration) -> StdDuration {
    if high <= low {
        return low;
    }
    let ms = rng().random_range(low.as_millis() as u64..=high.as_millis() as u64);
    StdDuration::from_millis(ms)
}

/// Decorator adding pacing, exponential backoff and cancellation to a [`Fetch`].
pub struct Fetcher<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Fetcher<T>
where
    T: Fetch,
{
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[cfg(test)]
    pub fn inner_ref(&self) -> &T {
        &self.inner
    }

    /// Fetch `target`, retrying per the policy.
    ///
    /// Cancellation is checked during the pacing sleep, the request itself and
    /// the backoff sleep; a cancelled fetch returns [`FetchError::Cancelled`]
    /// without further attempts.
    #[instrument(level = "debug", skip_all, fields(url = %target))]
    pub async fn get(&self, target: &Url, cancel: &CancellationToken) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled(target.to_string())),
                _ = sleep(self.policy.pacing_delay()) => {}
            }

            let attempt_t0 = Instant::now();
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled(target.to_string())),
                res = self.inner.fetch(target) => res,
            };

            match res {
                Ok(body) => {
                    debug!(
                        attempt,
                        bytes = body.len(),
                        elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                        "fetched"
                    );
                    return Ok(body);
                }
                Err(e) => {
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt >= self.policy.attempts {
                        warn!(
                            attempt,
                            max = self.policy.attempts,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(FetchError::Exhausted {
                            target: target.to_string(),
                            attempts: attempt,
                            cause: Box::new(e),
                        });
                    }

                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max = self.policy.attempts,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled(target.to_string())),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

impl<T> fmt::Debug for Fetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("attempts", &self.policy.attempts)
            .field("pacing_min", &self.policy.pacing_min)
            .field("pacing_max", &self.policy.pacing_max)
            .field("backoff_base", &self.policy.backoff_base)
            .finish()
    }
}

/// `reqwest`-backed [`Fetch`] sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(config: &FetcherConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::Header {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| ConfigError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetch {
    async fn fetch(&self, target: &Url) -> Result<String, FetchError> {
        let resp = self.client.get(target.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: target.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }
}
