//! Blocking HTTP fetcher with a politeness delay between requests and bounded retries.

use super::{Fetch, FetchError};
use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; webbook/0.1)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_SECS: u64 = 1;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts per page (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 4;
/// Default backoff delays in seconds after each failed attempt.
const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 2, 4];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Blocking HTTP client that enforces a delay between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Polite client with default User-Agent, timeout and delay.
    pub fn new() -> Result<Self, FetchError> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET `url` and return the body as text. Transient failures are retried with backoff;
    /// anything else, or the last failed attempt, is returned as is.
    pub fn get_text(&mut self, url: &str) -> Result<String, FetchError> {
        let max_attempts = self.retry_count;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url) {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let backoff = self.backoff_for(&e, attempt - 1);
                    tracing::warn!(
                        url,
                        attempt,
                        backoff_secs = backoff,
                        error = %e,
                        "Transient fetch failure; retrying"
                    );
                    std::thread::sleep(Duration::from_secs(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_once(&mut self, url: &str) -> Result<String, FetchError> {
        self.wait_delay();
        let sent = self.inner.get(url).send();
        self.last_request = Some(Instant::now());
        let response = sent.map_err(|source| FetchError::Network { source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
            });
        }
        response
            .text()
            .map_err(|source| FetchError::BodyRead { source })
    }

    fn backoff_for(&self, err: &FetchError, retry: u32) -> u64 {
        if matches!(err, FetchError::HttpStatus { status: 429 }) {
            return BACKOFF_429_SECS
                .get(retry as usize)
                .copied()
                .unwrap_or(BACKOFF_429_SECS[BACKOFF_429_SECS.len() - 1]);
        }
        self.backoff_secs
            .get(retry as usize)
            .copied()
            .unwrap_or_else(|| *self.backoff_secs.last().unwrap_or(&1))
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

impl Fetch for PoliteClient {
    fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        tracing::debug!(url, "GET");
        self.get_text(url)
    }
}

/// Builder for [PoliteClient] with optional User-Agent, delay, timeout and retry settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay between requests in seconds. Default 1.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Attempts per page for transient failures (at least 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff before each retry. If shorter than `retry_count - 1`, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, FetchError> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|source| FetchError::Network { source })?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            // Exponential: 1, 2, 4, ... for (retry_count - 1) steps
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}
