//! Retry, backoff and rate-limit handling around a [`Transport`].
//!
//! [`RetryTransport`] decorates any transport, so the archive layer in
//! [`HttpClient`](crate::client::HttpClient) only ever sees the final
//! response of a retried call.
//!
//! Retry strategy:
//! - network error → retry with exponential backoff (`backoff`, `2 × backoff`, ...)
//! - status in the force list (408, 423, 504 by default) → retry with backoff
//! - status in the retry-after list (413, 429, 503 by default) → retry after
//!   the delay in the `Retry-After` header, or with backoff when it is absent
//! - anything else → returned as is
//!
//! When retries run out the last response is returned, so the caller
//! records the status it actually got.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::client::{RawResponse, Request, Transport};
use crate::config::{HttpConfig, RateLimitConfig};
use crate::error::HttpError;

pub const DEFAULT_STATUS_FORCELIST: &[u16] = &[408, 423, 504];
pub const DEFAULT_RETRY_AFTER_STATUS: &[u16] = &[413, 429, 503];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub status_forcelist: Vec<u16>,
    pub retry_after_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_secs(1),
            status_forcelist: DEFAULT_STATUS_FORCELIST.to_vec(),
            retry_after_status: DEFAULT_RETRY_AFTER_STATUS.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        let mut policy = Self {
            max_retries: config.max_retries,
            backoff: Duration::from_secs(config.backoff_secs),
            ..Self::default()
        };
        policy
            .status_forcelist
            .extend(config.status_forcelist.iter().copied());
        policy
            .retry_after_status
            .extend(config.retry_after_status.iter().copied());
        policy
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        // 1×, 2×, 4×, ... capped at 32×
        self.backoff * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
    rate_limit: Option<RateLimitHandler>,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, handler: RateLimitHandler) -> Self {
        self.rate_limit = Some(handler);
        self
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    async fn send(&self, request: &Request) -> Result<RawResponse, HttpError> {
        let mut attempt = 0;

        loop {
            if let Some(handler) = &self.rate_limit {
                handler.sleep_for_rate_limit().await?;
            }

            let retries_left = attempt < self.policy.max_retries;
            attempt += 1;

            let delay = match self.inner.send(request).await {
                Ok(response) => {
                    if let Some(handler) = &self.rate_limit {
                        handler.update(&response);
                    }
                    if !retries_left {
                        return Ok(response);
                    }
                    if self.policy.retry_after_status.contains(&response.status) {
                        retry_after(&response).unwrap_or_else(|| self.policy.backoff_for(attempt))
                    } else if self.policy.status_forcelist.contains(&response.status) {
                        self.policy.backoff_for(attempt)
                    } else {
                        return Ok(response);
                    }
                }
                Err(HttpError::Network { url, message }) if retries_left => {
                    debug!(url = %url, message = %message, "network error");
                    self.policy.backoff_for(attempt)
                }
                Err(e) => return Err(e),
            };

            warn!(
                url = %request.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Delay requested by a `Retry-After` header, in seconds or as an HTTP date.
fn retry_after(response: &RawResponse) -> Option<Duration> {
    let value = response.header("Retry-After")?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((date - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

// ═══════════════════════════════════════════════════════════════════════
// Rate limit
// ═══════════════════════════════════════════════════════════════════════

pub const MIN_RATE_LIMIT: u64 = 10;
pub const MAX_RATE_LIMIT: u64 = 500;
pub const RATE_LIMIT_HEADER: &str = "X-RateLimit-Remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

#[derive(Debug, Default)]
struct RateLimitState {
    remaining: Option<u64>,
    /// UNIX timestamp of the next reset.
    reset_ts: Option<i64>,
}

/// Tracks the server's remaining request budget.
///
/// Once the budget drops to `min_rate_to_sleep` the next request either
/// waits for the reset or fails with [`HttpError::RateLimit`].
#[derive(Debug)]
pub struct RateLimitHandler {
    sleep_for_rate: bool,
    min_rate_to_sleep: u64,
    remaining_header: String,
    reset_header: String,
    state: Mutex<RateLimitState>,
}

impl RateLimitHandler {
    pub fn new(sleep_for_rate: bool, min_rate_to_sleep: u64) -> Self {
        let min_rate_to_sleep = if min_rate_to_sleep > MAX_RATE_LIMIT {
            warn!(
                requested = min_rate_to_sleep,
                max = MAX_RATE_LIMIT,
                "minimum rate to sleep exceeded; high values might make the client sleep forever"
            );
            MAX_RATE_LIMIT
        } else {
            min_rate_to_sleep
        };

        Self {
            sleep_for_rate,
            min_rate_to_sleep,
            remaining_header: RATE_LIMIT_HEADER.to_string(),
            reset_header: RATE_LIMIT_RESET_HEADER.to_string(),
            state: Mutex::new(RateLimitState::default()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.sleep_for_rate, config.min_rate_to_sleep)
            .with_headers(&config.remaining_header, &config.reset_header)
    }

    /// Read the budget from different header names.
    pub fn with_headers(mut self, remaining: &str, reset: &str) -> Self {
        self.remaining_header = remaining.to_string();
        self.reset_header = reset.to_string();
        self
    }

    pub fn min_rate_to_sleep(&self) -> u64 {
        self.min_rate_to_sleep
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RateLimitState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refresh the budget from a response.
    pub fn update(&self, response: &RawResponse) {
        let mut state = self.state();
        state.remaining = response
            .header(&self.remaining_header)
            .and_then(|v| v.trim().parse().ok());
        state.reset_ts = response
            .header(&self.reset_header)
            .and_then(|v| v.trim().parse().ok());
        debug!(remaining = ?state.remaining, reset = ?state.reset_ts, "rate limit");
    }

    fn seconds_to_reset(&self) -> i64 {
        match self.state().reset_ts {
            Some(ts) => ts - Utc::now().timestamp(),
            None => 0,
        }
    }

    /// Wait for the budget to reset, or fail, when it is exhausted.
    pub async fn sleep_for_rate_limit(&self) -> Result<(), HttpError> {
        let exhausted = matches!(self.state().remaining, Some(r) if r <= self.min_rate_to_sleep);
        if !exhausted {
            return Ok(());
        }

        let mut seconds_to_reset = self.seconds_to_reset();
        if seconds_to_reset < 0 {
            warn!("value of sleep for rate limit is negative, reset it to 0");
            seconds_to_reset = 0;
        }
        let seconds_to_reset = seconds_to_reset as u64;

        if !self.sleep_for_rate {
            return Err(HttpError::RateLimit { seconds_to_reset });
        }

        info!(seconds_to_reset, "rate limit exhausted; waiting for reset");
        tokio::time::sleep(Duration::from_secs(seconds_to_reset)).await;
        self.state().remaining = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Sequence {
        statuses: Mutex<Vec<Result<u16, ()>>>,
        calls: Mutex<u32>,
        headers: BTreeMap<String, String>,
    }

    impl Sequence {
        fn new(mut statuses: Vec<Result<u16, ()>>) -> Self {
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                calls: Mutex::new(0),
                headers: BTreeMap::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for Sequence {
        async fn send(&self, request: &Request) -> Result<RawResponse, HttpError> {
            *self.calls.lock().unwrap() += 1;
            match self.statuses.lock().unwrap().pop() {
                Some(Ok(status)) => Ok(RawResponse {
                    url: request.url.clone(),
                    status,
                    headers: self.headers.clone(),
                    body: Vec::new(),
                }),
                _ => Err(HttpError::Network {
                    url: request.url.clone(),
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(20), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_retries_forcelist_then_succeeds() {
        let transport = RetryTransport::new(
            Sequence::new(vec![Ok(504), Err(()), Ok(200)]),
            instant_policy(5),
        );
        let response = transport.send(&Request::get("http://x")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(*transport.inner.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_other_statuses_not_retried() {
        let transport = RetryTransport::new(Sequence::new(vec![Ok(500), Ok(200)]), instant_policy(5));
        let response = transport.send(&Request::get("http://x")).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(*transport.inner.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_response() {
        let transport = RetryTransport::new(
            Sequence::new(vec![Ok(503), Ok(503), Ok(503), Ok(200)]),
            instant_policy(2),
        );
        let response = transport.send(&Request::get("http://x")).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(*transport.inner.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_network_error_after_retries() {
        let transport = RetryTransport::new(Sequence::new(vec![]), instant_policy(1));
        let err = transport.send(&Request::get("http://x")).await.unwrap_err();
        assert!(matches!(err, HttpError::Network { .. }));
        assert_eq!(*transport.inner.calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = BTreeMap::new();
        headers.insert("retry-after".to_string(), "7".to_string());
        let response = RawResponse {
            url: "http://x".to_string(),
            status: 429,
            headers,
            body: Vec::new(),
        };
        assert_eq!(retry_after(&response), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_min_rate_capped() {
        assert_eq!(RateLimitHandler::new(false, 1000).min_rate_to_sleep(), MAX_RATE_LIMIT);
        assert_eq!(RateLimitHandler::new(false, 20).min_rate_to_sleep(), 20);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted_raises() {
        let handler = RateLimitHandler::new(false, 10);
        let mut headers = BTreeMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "5".to_string());
        headers.insert(
            "X-RateLimit-Reset".to_string(),
            (Utc::now().timestamp() + 100).to_string(),
        );
        handler.update(&RawResponse {
            url: "http://x".to_string(),
            status: 200,
            headers,
            body: Vec::new(),
        });

        match handler.sleep_for_rate_limit().await {
            Err(HttpError::RateLimit { seconds_to_reset }) => {
                assert!(seconds_to_reset > 90 && seconds_to_reset <= 100)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_sleeps_when_enabled() {
        let handler = RateLimitHandler::new(true, 10);
        let mut headers = BTreeMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "0".to_string());
        headers.insert(
            "X-RateLimit-Reset".to_string(),
            (Utc::now().timestamp() - 5).to_string(),
        );
        handler.update(&RawResponse {
            url: "http://x".to_string(),
            status: 200,
            headers,
            body: Vec::new(),
        });

        handler.sleep_for_rate_limit().await.unwrap();
        handler.sleep_for_rate_limit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_with_budget_left() {
        let handler = RateLimitHandler::new(false, 10);
        let mut headers = BTreeMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "4000".to_string());
        handler.update(&RawResponse {
            url: "http://x".to_string(),
            status: 200,
            headers,
            body: Vec::new(),
        });
        handler.sleep_for_rate_limit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_headers_from_config() {
        let config = RateLimitConfig {
            sleep_for_rate: false,
            min_rate_to_sleep: 10,
            remaining_header: "RateLimit-Remaining".to_string(),
            reset_header: "RateLimit-Reset".to_string(),
        };
        let handler = RateLimitHandler::from_config(&config);

        // The default header names are no longer read.
        let mut headers = BTreeMap::new();
        headers.insert("X-RateLimit-Remaining".to_string(), "0".to_string());
        headers.insert("ratelimit-remaining".to_string(), "3".to_string());
        headers.insert(
            "ratelimit-reset".to_string(),
            (Utc::now().timestamp() + 60).to_string(),
        );
        handler.update(&RawResponse {
            url: "http://x".to_string(),
            status: 200,
            headers,
            body: Vec::new(),
        });

        assert!(matches!(
            handler.sleep_for_rate_limit().await,
            Err(HttpError::RateLimit { .. })
        ));
    }
}
