//! Configuration types

use crate::{ConfigError, DelveError, DelveResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Retry configuration for completion calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all. Useful in tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let raw = self.initial_backoff_ms as f64 * (self.backoff_multiplier as f64).powi(exp);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Per-evaluation guardrails for the capability sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Evaluation steps (and produced collection elements) allowed per `execute`.
    pub fuel: u64,
    /// Characters of stdout kept per `execute`; the rest is truncated.
    pub max_output_chars: usize,
    /// Maximum nesting depth of evaluation and of any produced value.
    pub max_depth: usize,
    /// Characters of an observation fed back to the model.
    pub max_observation_chars: usize,
    /// String bytes any single produced value may hold, nested strings and map keys included.
    pub max_value_chars: u64,
    /// Collection elements any single produced value may hold, counted at every level.
    pub max_value_elements: u64,
}

/// Ceiling on `max_depth`; values nested this deep are still rendered and
/// dropped recursively.
pub const MAX_SANDBOX_DEPTH: usize = 1024;

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            fuel: 100_000,
            max_output_chars: 20_000,
            max_depth: 128,
            max_observation_chars: 8_000,
            max_value_chars: 1_000_000,
            max_value_elements: 100_000,
        }
    }
}

/// Engine-wide configuration held by an Environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model id used when a call does not name one.
    pub default_model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Token budget for the assembled conversation.
    pub context_token_budget: usize,
    pub retry: RetryConfig,
    pub sandbox: SandboxLimits,
    /// JSON-lines file the memory store is loaded from and flushed to.
    pub memory_path: Option<PathBuf>,
    /// How many prior learnings prime a new session.
    pub learning_primer_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-5".to_string(),
            max_output_tokens: 4096,
            temperature: 0.0,
            context_token_budget: 100_000,
            retry: RetryConfig::default(),
            sandbox: SandboxLimits::default(),
            memory_path: None,
            learning_primer_count: 3,
        }
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> DelveError {
    DelveError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

impl EngineConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml(source: &str) -> DelveResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| {
            DelveError::Config(ConfigError::InvalidValue {
                field: "toml".to_string(),
                value: String::new(),
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DELVE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_model: std::env::var("DELVE_MODEL").unwrap_or(defaults.default_model),
            max_output_tokens: std::env::var("DELVE_MAX_OUTPUT_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_output_tokens),
            temperature: std::env::var("DELVE_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.temperature),
            context_token_budget: std::env::var("DELVE_CONTEXT_TOKEN_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.context_token_budget),
            retry: RetryConfig {
                max_retries: std::env::var("DELVE_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.max_retries),
                ..defaults.retry
            },
            sandbox: SandboxLimits {
                fuel: std::env::var("DELVE_SANDBOX_FUEL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sandbox.fuel),
                max_output_chars: std::env::var("DELVE_SANDBOX_MAX_OUTPUT_CHARS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sandbox.max_output_chars),
                ..defaults.sandbox
            },
            memory_path: std::env::var("DELVE_MEMORY_PATH")
                .ok()
                .map(PathBuf::from)
                .or(defaults.memory_path),
            learning_primer_count: defaults.learning_primer_count,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_memory_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.memory_path = Some(path.into());
        self
    }

    pub fn with_sandbox_limits(mut self, limits: SandboxLimits) -> Self {
        self.sandbox = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - default_model is not empty
    /// - token budgets and output limits are positive
    /// - temperature in [0.0, 2.0]
    /// - backoff multiplier >= 1.0
    pub fn validate(&self) -> DelveResult<()> {
        if self.default_model.trim().is_empty() {
            return Err(DelveError::Config(ConfigError::MissingRequired {
                field: "default_model".to_string(),
            }));
        }
        if self.max_output_tokens == 0 {
            return Err(invalid(
                "max_output_tokens",
                self.max_output_tokens,
                "max_output_tokens must be greater than 0",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(
                "temperature",
                self.temperature,
                "temperature must be between 0.0 and 2.0",
            ));
        }
        if self.context_token_budget == 0 {
            return Err(invalid(
                "context_token_budget",
                self.context_token_budget,
                "context_token_budget must be greater than 0",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier,
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(invalid(
                "retry.initial_backoff_ms",
                self.retry.initial_backoff_ms,
                "initial_backoff_ms must not exceed max_backoff_ms",
            ));
        }
        if self.sandbox.fuel == 0 {
            return Err(invalid("sandbox.fuel", self.sandbox.fuel, "fuel must be greater than 0"));
        }
        if self.sandbox.max_depth == 0 || self.sandbox.max_depth > MAX_SANDBOX_DEPTH {
            return Err(invalid(
                "sandbox.max_depth",
                self.sandbox.max_depth,
                "max_depth must be between 1 and 1024",
            ));
        }
        if self.sandbox.max_value_chars == 0 || self.sandbox.max_value_elements == 0 {
            return Err(invalid(
                "sandbox.max_value_chars",
                self.sandbox.max_value_chars.min(self.sandbox.max_value_elements),
                "value size limits must be greater than 0",
            ));
        }
        if self.sandbox.max_observation_chars == 0 {
            return Err(invalid(
                "sandbox.max_observation_chars",
                self.sandbox.max_observation_chars,
                "max_observation_chars must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
