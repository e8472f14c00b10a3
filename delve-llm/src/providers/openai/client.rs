//! OpenAI HTTP client with rate limiting

use super::types::{ApiError, ChatRequest, ChatResponse};
use crate::providers::http::{RateLimitedHttp, DEFAULT_TIMEOUT_SECS};
use delve_core::DelveResult;
use std::time::Duration;

/// OpenAI API client with rate limiting.
pub struct OpenAIClient {
    http: RateLimitedHttp,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            http: RateLimitedHttp::new(
                "openai",
                requests_per_minute,
                Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Point the client at any OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn chat(&self, request: &ChatRequest) -> DelveResult<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        self.http
            .post_json(&url, &headers, request, |body| {
                serde_json::from_str::<ApiError>(body)
                    .ok()
                    .map(|e| match e.error.code {
                        Some(code) => format!("{} ({})", e.error.message, code),
                        None => e.error.message,
                    })
            })
            .await
    }
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
