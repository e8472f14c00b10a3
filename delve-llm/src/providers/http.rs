//! Shared HTTP plumbing with rate limiting and status mapping.

use delve_core::{DelveError, DelveResult, LlmError};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// POSTs JSON with a concurrency cap and a minimum interval between requests.
pub struct RateLimitedHttp {
    client: Client,
    provider: &'static str,
    rate_limiter: Arc<Semaphore>,
    start_time: Instant,
    last_request: AtomicU64,
    min_request_interval_ms: u64,
    timeout_ms: u64,
}

impl RateLimitedHttp {
    /// # Arguments
    /// * `provider` - Name used in errors
    /// * `requests_per_minute` - Maximum requests per minute
    /// * `timeout` - Per-request timeout
    pub fn new(provider: &'static str, requests_per_minute: u32, timeout: Duration) -> Self {
        let rpm = requests_per_minute.max(1);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            provider,
            rate_limiter: Arc::new(Semaphore::new(rpm as usize)),
            start_time: Instant::now(),
            last_request: AtomicU64::new(0),
            min_request_interval_ms: (60_000 / rpm as u64).max(10),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Send `body` to `url` and decode the JSON response.
    ///
    /// `error_message` extracts a readable message from an error body.
    pub async fn post_json<Req, Res>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Req,
        error_message: fn(&str) -> Option<String>,
    ) -> DelveResult<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            DelveError::Llm(LlmError::Network {
                provider: self.provider.to_string(),
                message: format!("Rate limiter error: {}", e),
            })
        })?;

        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);
        if last_ms > 0 && elapsed < self.min_request_interval_ms {
            let wait_ms = self.min_request_interval_ms - elapsed;
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
        self.last_request
            .store(self.start_time.elapsed().as_millis().max(1) as u64, Ordering::Relaxed);

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                DelveError::Llm(LlmError::Timeout {
                    provider: self.provider.to_string(),
                    timeout_ms: self.timeout_ms,
                })
            } else {
                DelveError::Llm(LlmError::Network {
                    provider: self.provider.to_string(),
                    message: format!("HTTP request failed: {}", e),
                })
            }
        })?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            return response.json().await.map_err(|e| {
                DelveError::Llm(LlmError::InvalidResponse {
                    provider: self.provider.to_string(),
                    reason: format!("Failed to parse response: {}", e),
                })
            });
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = error_message(&error_text).unwrap_or(error_text);
        Err(DelveError::Llm(map_status(self.provider, status, retry_after_ms, message)))
    }
}

fn map_status(provider: &str, status: StatusCode, retry_after_ms: u64, message: String) -> LlmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::InvalidApiKey {
            provider: provider.to_string(),
        },
        _ => LlmError::RequestFailed {
            provider: provider.to_string(),
            status: status.as_u16(),
            message,
        },
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

impl std::fmt::Debug for RateLimitedHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedHttp")
            .field("provider", &self.provider)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status("openai", StatusCode::TOO_MANY_REQUESTS, 2000, String::new()),
            LlmError::RateLimited {
                retry_after_ms: 2000,
                ..
            }
        ));
        assert!(matches!(
            map_status("openai", StatusCode::FORBIDDEN, 0, String::new()),
            LlmError::InvalidApiKey { .. }
        ));
        let err = map_status("openai", StatusCode::BAD_GATEWAY, 0, "upstream".to_string());
        assert!(err.is_transient());
        let err = map_status("openai", StatusCode::BAD_REQUEST, 0, "bad".to_string());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1500));
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn test_min_interval_from_rpm() {
        let http = RateLimitedHttp::new("anthropic", 60, Duration::from_secs(5));
        assert_eq!(http.min_request_interval_ms, 1000);
        assert_eq!(http.timeout_ms, 5000);
        let fast = RateLimitedHttp::new("anthropic", 100_000, Duration::from_secs(5));
        assert_eq!(fast.min_request_interval_ms, 10);
    }
}
