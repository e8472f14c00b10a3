//! Retry with exponential backoff at the completion-call boundary.

use crate::{Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use delve_core::{DelveError, DelveResult, LlmError, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a provider and retries transient failures.
///
/// Only errors classified by `LlmError::is_transient` are retried. After
/// `max_retries` further attempts the last error is wrapped in
/// `LlmError::RetriesExhausted`.
pub struct RetryingProvider {
    inner: Arc<dyn CompletionProvider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn CompletionProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        let backoff = self.config.backoff_for(attempt);
        match err.retry_after_ms() {
            Some(ms) => backoff.max(Duration::from_millis(ms)),
            None => backoff,
        }
    }
}

#[async_trait]
impl CompletionProvider for RetryingProvider {
    async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.inner.complete(request).await {
                Ok(completion) => return Ok(completion),
                Err(DelveError::Llm(err)) if err.is_transient() => {
                    if attempt > self.config.max_retries {
                        tracing::warn!(
                            provider = self.inner.provider_id(),
                            attempts = attempt,
                            error = %err,
                            "Completion retries exhausted"
                        );
                        if self.config.max_retries == 0 {
                            return Err(DelveError::Llm(err));
                        }
                        return Err(DelveError::Llm(LlmError::RetriesExhausted {
                            provider: self.inner.provider_id().to_string(),
                            attempts: attempt,
                            last_error: err.to_string(),
                        }));
                    }
                    let delay = self.delay_for(attempt, &err);
                    tracing::debug!(
                        provider = self.inner.provider_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying transient completion failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn provider_id(&self) -> &str {
        self.inner.provider_id()
    }
}

impl std::fmt::Debug for RetryingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingProvider")
            .field("provider", &self.inner.provider_id())
            .field("config", &self.config)
            .finish()
    }
}
