//! Polite HTTP client wrapping reqwest.
//!
//! Not a browser, just HTTP requests that look like one: rotating user
//! agents, browser-like headers, a short random pause before each request,
//! retry on 5xx and backoff on 429 honouring `Retry-After`.

use async_trait::async_trait;
use jobscout::{FetchResponse, ScoutError, ScoutResult, Transport};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Browser signatures rotated between requests.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Longest `Retry-After` we are willing to sleep inside one fetch.
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Tunables for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    /// Bounds of the random pause before each request.
    pub think_min: Duration,
    pub think_max: Duration,
    /// Retries after the first attempt for 5xx, 429 and transport errors.
    pub max_retries: u32,
    /// First backoff; doubles on each retry.
    pub backoff: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            think_min: Duration::from_secs(2),
            think_max: Duration::from_secs(5),
            max_retries: 2,
            backoff: Duration::from_secs(5),
        }
    }
}

impl HttpClientConfig {
    /// No pauses or backoff, for tests against local servers.
    pub fn immediate() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            think_min: Duration::ZERO,
            think_max: Duration::ZERO,
            max_retries: 2,
            backoff: Duration::ZERO,
        }
    }
}

/// HTTP transport for the crawl core.
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpClientConfig,
    identity: AtomicUsize,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> ScoutResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ScoutError::Transport(format!("failed to build HTTP client: {e}")))?;
        let identity = AtomicUsize::new(rand::thread_rng().gen_range(0..USER_AGENTS.len()));
        Ok(Self {
            client,
            config,
            identity,
        })
    }

    pub fn user_agent(&self) -> &'static str {
        USER_AGENTS[self.identity.load(Ordering::Relaxed) % USER_AGENTS.len()]
    }

    fn request(&self, url: &str, referer: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .header("Upgrade-Insecure-Requests", "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-User", "?1")
            .header("Cache-Control", "max-age=0");
        builder = match referer {
            Some(referer) => builder
                .header("Referer", referer)
                .header("Sec-Fetch-Site", "same-origin"),
            None => builder.header("Sec-Fetch-Site", "none"),
        };
        builder
    }

    async fn think(&self) {
        let (min, max) = (self.config.think_min, self.config.think_max);
        if max.is_zero() {
            return;
        }
        let pause = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        tokio::time::sleep(pause).await;
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[async_trait]
impl Transport for HttpClient {
    /// GET with retry on 5xx and backoff on 429. The final status is
    /// returned as-is once retries run out.
    async fn fetch(&self, url: &str, referer: Option<&str>) -> ScoutResult<FetchResponse> {
        let mut attempt = 0u32;
        loop {
            self.think().await;
            match self.request(url, referer).send().await {
                Ok(r) => {
                    let status = r.status().as_u16();
                    let final_url = r.url().to_string();

                    if (status >= 500 || status == 429) && attempt < self.config.max_retries {
                        let delay = if status == 429 {
                            r.headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok())
                                .and_then(|s| s.trim().parse::<u64>().ok())
                                .map(|s| Duration::from_secs(s.min(MAX_RETRY_AFTER_SECS)))
                                .unwrap_or_else(|| self.backoff(attempt))
                        } else {
                            self.backoff(attempt)
                        };
                        tracing::debug!("{url} answered {status}, retrying in {delay:?}");
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = r.text().await.unwrap_or_default();
                    return Ok(FetchResponse {
                        status,
                        body,
                        final_url,
                    });
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let delay = self.backoff(attempt);
                        tracing::warn!("attempt {} for {url} failed: {e}", attempt + 1);
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if e.is_timeout() {
                        return Err(ScoutError::Timeout(url.to_string()));
                    }
                    return Err(ScoutError::Transport(format!("{url}: {e}")));
                }
            }
        }
    }

    fn rotate_identity(&self) {
        let next = self.identity.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("switched user agent to #{}", next % USER_AGENTS.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        assert!(USER_AGENTS.contains(&client.user_agent()));
    }

    #[test]
    fn test_rotate_identity_changes_user_agent() {
        let client = HttpClient::new(HttpClientConfig::immediate()).unwrap();
        let before = client.user_agent();
        client.rotate_identity();
        assert_ne!(client.user_agent(), before);
    }

    #[test]
    fn test_backoff_doubles() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        assert_eq!(client.backoff(0), Duration::from_secs(5));
        assert_eq!(client.backoff(2), Duration::from_secs(20));
    }
}
