//! Anthropic HTTP client with rate limiting

use super::types::{ApiError, MessageRequest, MessageResponse};
use crate::providers::http::{RateLimitedHttp, DEFAULT_TIMEOUT_SECS};
use delve_core::DelveResult;
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";

/// Anthropic API client with rate limiting.
pub struct AnthropicClient {
    http: RateLimitedHttp,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            http: RateLimitedHttp::new(
                "anthropic",
                requests_per_minute,
                Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
        }
    }

    /// Point the client at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn messages(&self, request: &MessageRequest) -> DelveResult<MessageResponse> {
        let url = format!("{}/messages", self.base_url);
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", API_VERSION.to_string()),
        ];
        self.http
            .post_json(&url, &headers, request, |body| {
                serde_json::from_str::<ApiError>(body)
                    .ok()
                    .map(|e| format!("{}: {}", e.error.r#type, e.error.message))
            })
            .await
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
