//! DELVE LLM - Completion Service Layer
//!
//! Provider-agnostic completion trait plus the concrete HTTP providers.
//! The engine only ever talks to `CompletionProvider`; which service backs
//! it is a wiring decision made by the caller.

pub mod providers;
pub mod retry;

pub use retry::RetryingProvider;

use async_trait::async_trait;
use delve_core::{DelveError, DelveResult, LlmError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One conversation turn sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A provider-neutral completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            max_tokens: 4096,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Text of the last user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// System prompt and all messages joined, for logging and routing.
    pub fn full_text(&self) -> String {
        let mut out = self.system.clone().unwrap_or_default();
        for message in &self.messages {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&message.content);
        }
        out
    }
}

/// What a provider returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl Completion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        }
    }

    /// Fill token counts and price them with the built-in table.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost_usd = ModelPricing::for_model(&self.model).cost(input_tokens, output_tokens);
        self
    }
}

// ============================================================================
// COMPLETION PROVIDER TRAIT
// ============================================================================

/// Trait for completion providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run one completion round trip.
    async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion>;

    /// Short identifier, e.g. `anthropic`.
    fn provider_id(&self) -> &str;
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion> {
        (**self).complete(request).await
    }

    fn provider_id(&self) -> &str {
        (**self).provider_id()
    }
}

// ============================================================================
// PRICING
// ============================================================================

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPricing {
    /// Look up pricing by model-name prefix. Unknown models are free.
    pub fn for_model(model: &str) -> Self {
        const TABLE: &[(&str, f64, f64)] = &[
            ("claude-opus", 15.0, 75.0),
            ("claude-sonnet", 3.0, 15.0),
            ("claude-3-5-sonnet", 3.0, 15.0),
            ("claude-haiku", 0.8, 4.0),
            ("claude-3-5-haiku", 0.8, 4.0),
            ("gpt-4o-mini", 0.15, 0.6),
            ("gpt-4o", 2.5, 10.0),
            ("gpt-4.1-mini", 0.4, 1.6),
            ("gpt-4.1", 2.0, 8.0),
        ];
        TABLE
            .iter()
            .find(|(prefix, _, _)| model.starts_with(prefix))
            .map(|(_, input, output)| Self {
                input_per_mtok: *input,
                output_per_mtok: *output,
            })
            .unwrap_or(Self {
                input_per_mtok: 0.0,
                output_per_mtok: 0.0,
            })
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_mtok + output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry of named completion providers with one default.
/// Providers must be explicitly registered - no auto-discovery.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn CompletionProvider>>,
    default: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its `provider_id`. The first one becomes the default.
    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        let id = provider.provider_id().to_string();
        if self.default.is_none() {
            self.default = Some(id.clone());
        }
        self.providers.insert(id, provider);
    }

    pub fn set_default(&mut self, id: &str) -> DelveResult<()> {
        if !self.providers.contains_key(id) {
            return Err(DelveError::Llm(LlmError::ProviderNotConfigured));
        }
        self.default = Some(id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> DelveResult<Arc<dyn CompletionProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or(DelveError::Llm(LlmError::ProviderNotConfigured))
    }

    /// The default provider.
    pub fn completion(&self) -> DelveResult<Arc<dyn CompletionProvider>> {
        self.default
            .as_deref()
            .and_then(|id| self.providers.get(id))
            .cloned()
            .ok_or(DelveError::Llm(LlmError::ProviderNotConfigured))
    }

    pub fn has_completion(&self) -> bool {
        self.default.is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .field("default", &self.default)
            .finish()
    }
}

// ============================================================================
// COST TRACKER
// ============================================================================

/// Tracks token usage and cost across completion calls.
/// Thread-safe via atomic operations.
#[derive(Default)]
pub struct CostTracker {
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    /// Cost in millionths of a dollar.
    cost_micros: AtomicU64,
}

/// Point-in-time view of a `CostTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, completion: &Completion) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(completion.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(completion.output_tokens, Ordering::Relaxed);
        let micros = (completion.cost_usd.max(0.0) * 1_000_000.0).round() as u64;
        self.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cost_usd: self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
        self.cost_micros.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CostTracker")
            .field("calls", &snapshot.calls)
            .field("input_tokens", &snapshot.input_tokens)
            .field("output_tokens", &snapshot.output_tokens)
            .field("cost_usd", &snapshot.cost_usd)
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider;

    #[async_trait]
    impl CompletionProvider for EchoProvider {
        async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion> {
            let text = request.last_user_message().unwrap_or_default().to_string();
            Ok(Completion::new(text, request.model.clone()).with_usage(10, 5))
        }

        fn provider_id(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_registry_empty_is_not_configured() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has_completion());
        assert!(matches!(
            registry.completion(),
            Err(DelveError::Llm(LlmError::ProviderNotConfigured))
        ));
    }

    #[test]
    fn test_registry_first_registered_is_default() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider));
        assert!(registry.has_completion());
        assert_eq!(registry.completion().unwrap().provider_id(), "echo");
        assert!(registry.set_default("missing").is_err());
        assert_eq!(registry.ids(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_arc_provider_delegates() {
        let provider: Arc<dyn CompletionProvider> = Arc::new(EchoProvider);
        let request = CompletionRequest::new("gpt-4o", vec![Message::user("hi")]);
        let completion = provider.complete(&request).await.unwrap();
        assert_eq!(completion.text, "hi");
        assert_eq!(completion.input_tokens, 10);
    }

    #[test]
    fn test_pricing_prefix_lookup() {
        let mini = ModelPricing::for_model("gpt-4o-mini-2024-07-18");
        assert_eq!(mini.input_per_mtok, 0.15);
        let unknown = ModelPricing::for_model("local-llama");
        assert_eq!(unknown.cost(1_000_000, 1_000_000), 0.0);
        let sonnet = ModelPricing::for_model("claude-sonnet-4-5");
        assert!((sonnet.cost(1_000_000, 0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_tracker_accumulates() {
        let tracker = CostTracker::new();
        let c = Completion::new("x", "claude-sonnet-4-5").with_usage(1000, 500);
        tracker.record(&c);
        tracker.record(&c);
        let snap = tracker.snapshot();
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.input_tokens, 2000);
        assert_eq!(snap.output_tokens, 1000);
        assert!((snap.cost_usd - 2.0 * c.cost_usd).abs() < 1e-6);

        tracker.reset();
        assert_eq!(tracker.snapshot(), CostSnapshot::default());
    }

    #[test]
    fn test_request_helpers() {
        let request = CompletionRequest::new(
            "m",
            vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ],
        )
        .with_system("sys")
        .with_max_tokens(256)
        .with_temperature(0.2);
        assert_eq!(request.last_user_message(), Some("second"));
        assert_eq!(request.full_text(), "sys\n\nfirst\n\nreply\n\nsecond");
        assert_eq!(request.max_tokens, 256);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_cost_tracker_sums_usage(
            usages in proptest::collection::vec((0u64..200_000, 0u64..50_000), 0..20)
        ) {
            let tracker = CostTracker::new();
            let mut expected = 0.0;
            for (input, output) in &usages {
                let completion = Completion::new("x", "claude-sonnet-4-5").with_usage(*input, *output);
                expected += completion.cost_usd;
                tracker.record(&completion);
            }
            let snap = tracker.snapshot();
            prop_assert_eq!(snap.calls, usages.len() as u64);
            prop_assert_eq!(snap.input_tokens, usages.iter().map(|(i, _)| i).sum::<u64>());
            prop_assert_eq!(snap.output_tokens, usages.iter().map(|(_, o)| o).sum::<u64>());
            // each record rounds to the micro-dollar
            prop_assert!((snap.cost_usd - expected).abs() <= 1e-6 * (usages.len() as f64 + 1.0));
        }

        #[test]
        fn prop_cost_grows_with_tokens(model in "(claude-opus|claude-haiku|gpt-4o|local)[a-z0-9-]{0,8}", tokens in 0u64..1_000_000) {
            let pricing = ModelPricing::for_model(&model);
            prop_assert!(pricing.cost(tokens, tokens) >= 0.0);
            prop_assert!(pricing.cost(tokens + 1, tokens) >= pricing.cost(tokens, tokens));
        }
    }
}
