//! Environment: the corpus-and-memory handle every engine call goes through.
//!
//! One Environment backs any number of concurrent sessions. Sessions share
//! only the corpus, the memory store, the trace recorder and the cost
//! tracker; everything else is per session.

use delve_core::{
    ConfigError, Corpus, DelveError, DelveResult, EngineConfig, IngestDocument, InputGuard,
    OutputParser, QueryError, StorageError, StructuralParser, Value,
};
use delve_llm::{
    Completion, CompletionProvider, CompletionRequest, CostSnapshot, CostTracker, Message,
    ProviderRegistry, RetryingProvider,
};
use delve_sandbox::CapabilityRegistry;
use delve_storage::{InMemoryCorpus, MemoryStore, TraceRecorder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read_lock<T>(lock: &RwLock<T>) -> DelveResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| DelveError::Storage(StorageError::LockPoisoned))
}

fn write_lock<T>(lock: &RwLock<T>) -> DelveResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| DelveError::Storage(StorageError::LockPoisoned))
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`Environment`].
pub struct EnvironmentBuilder {
    config: EngineConfig,
    providers: Vec<Arc<dyn CompletionProvider>>,
    default_provider: Option<String>,
    corpus: Option<Arc<dyn Corpus>>,
    memory: Option<Arc<MemoryStore>>,
    guard: Option<Arc<dyn InputGuard>>,
    parser: Option<Arc<dyn OutputParser>>,
}

impl EnvironmentBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            default_provider: None,
            corpus: None,
            memory: None,
            guard: None,
            parser: None,
        }
    }

    /// Add a completion provider. The first one added is the default.
    pub fn provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn default_provider(mut self, id: impl Into<String>) -> Self {
        self.default_provider = Some(id.into());
        self
    }

    /// Use an existing corpus instead of an empty in-memory one.
    pub fn corpus(mut self, corpus: Arc<dyn Corpus>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    /// Use an existing memory store instead of loading `memory_path`.
    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn input_guard(mut self, guard: Arc<dyn InputGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn output_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Validate configuration and assemble the environment.
    ///
    /// # Errors
    /// Configuration errors for an invalid config or when no provider was
    /// added; storage errors if the memory file cannot be loaded.
    pub fn build(self) -> DelveResult<Environment> {
        self.config.validate()?;
        if self.providers.is_empty() {
            return Err(DelveError::Config(ConfigError::MissingRequired {
                field: "provider".to_string(),
            }));
        }

        let mut providers = ProviderRegistry::new();
        for provider in self.providers {
            providers.register(Arc::new(RetryingProvider::new(
                provider,
                self.config.retry.clone(),
            )));
        }
        if let Some(id) = &self.default_provider {
            providers.set_default(id)?;
        }

        let memory = match (self.memory, &self.config.memory_path) {
            (Some(memory), _) => memory,
            (None, Some(path)) => Arc::new(MemoryStore::load(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let corpus = self
            .corpus
            .unwrap_or_else(|| Arc::new(InMemoryCorpus::new()) as Arc<dyn Corpus>);

        tracing::info!(
            providers = ?providers.ids(),
            model = %self.config.default_model,
            persistent_memory = self.config.memory_path.is_some(),
            "Environment created"
        );

        Ok(Environment {
            inner: Arc::new(EnvironmentInner {
                config: self.config,
                providers,
                corpus: RwLock::new(Some(corpus)),
                memory,
                registry: RwLock::new(CapabilityRegistry::new()),
                trace: TraceRecorder::new(),
                costs: CostTracker::new(),
                guard: self.guard,
                parser: self
                    .parser
                    .unwrap_or_else(|| Arc::new(StructuralParser) as Arc<dyn OutputParser>),
                disposed: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

struct EnvironmentInner {
    config: EngineConfig,
    providers: ProviderRegistry,
    /// Taken on dispose.
    corpus: RwLock<Option<Arc<dyn Corpus>>>,
    memory: Arc<MemoryStore>,
    /// Caller-registered functions and constants.
    registry: RwLock<CapabilityRegistry>,
    trace: TraceRecorder,
    costs: CostTracker,
    guard: Option<Arc<dyn InputGuard>>,
    parser: Arc<dyn OutputParser>,
    disposed: AtomicBool,
}

/// Shared handle to a corpus session. Cloning is cheap.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl Environment {
    pub fn builder(config: EngineConfig) -> EnvironmentBuilder {
        EnvironmentBuilder::new(config)
    }

    /// Environment with a single provider and an empty in-memory corpus.
    pub fn create(config: EngineConfig, provider: Arc<dyn CompletionProvider>) -> DelveResult<Self> {
        EnvironmentBuilder::new(config).provider(provider).build()
    }

    /// Load documents into the corpus. Returns how many were ingested.
    pub fn ingest(&self, documents: Vec<IngestDocument>) -> DelveResult<usize> {
        let corpus = self.corpus()?;
        let count = corpus.ingest(documents)?;
        tracing::info!(documents = count, "Ingested documents");
        Ok(count)
    }

    /// Expose a host function to sandbox code. Chainable.
    ///
    /// # Errors
    /// `ConfigError::ReservedName` if `name` is a builtin, special form or
    /// engine capability; `ConfigError::DuplicateName` if already taken.
    pub fn register_function<F>(&self, name: &str, doc: &str, f: F) -> DelveResult<&Self>
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.ensure_active()?;
        write_lock(&self.inner.registry)?.register_function(name, doc, f)?;
        tracing::debug!(name, "Registered function");
        Ok(self)
    }

    /// Expose a constant to sandbox code. Chainable.
    pub fn register_constant(&self, name: &str, value: impl Into<Value>, doc: &str) -> DelveResult<&Self> {
        self.ensure_active()?;
        write_lock(&self.inner.registry)?.register_constant(name, value.into(), doc)?;
        tracing::debug!(name, "Registered constant");
        Ok(self)
    }

    /// Release the corpus and flush memory to `memory_path`. Idempotent.
    pub fn dispose(&self) -> DelveResult<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        write_lock(&self.inner.corpus)?.take();
        if let Some(path) = &self.inner.config.memory_path {
            self.inner.memory.flush(path)?;
        }
        let costs = self.costs();
        tracing::info!(
            calls = costs.calls,
            cost_usd = costs.cost_usd,
            trace_entries = self.inner.trace.len()?,
            "Environment disposed"
        );
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_active(&self) -> DelveResult<()> {
        if self.is_disposed() {
            return Err(DelveError::Query(QueryError::EnvironmentDisposed));
        }
        Ok(())
    }

    // === Accessors ===

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn corpus(&self) -> DelveResult<Arc<dyn Corpus>> {
        read_lock(&self.inner.corpus)?
            .clone()
            .ok_or(DelveError::Query(QueryError::EnvironmentDisposed))
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.inner.memory
    }

    /// The environment-wide trace, across all sessions.
    pub fn trace(&self) -> &TraceRecorder {
        &self.inner.trace
    }

    pub fn costs(&self) -> CostSnapshot {
        self.inner.costs.snapshot()
    }

    pub fn parser(&self) -> &Arc<dyn OutputParser> {
        &self.inner.parser
    }

    pub fn input_guard(&self) -> Option<&Arc<dyn InputGuard>> {
        self.inner.guard.as_ref()
    }

    /// Snapshot of the caller-registered capabilities.
    pub fn registry(&self) -> DelveResult<CapabilityRegistry> {
        Ok(read_lock(&self.inner.registry)?.clone())
    }

    // === Completions ===

    /// Resolve a model string to a provider and the model id it expects.
    ///
    /// `provider/model` selects a registered provider by id; anything else
    /// goes to the default provider unchanged.
    pub fn resolve_model(&self, model: Option<&str>) -> DelveResult<(Arc<dyn CompletionProvider>, String)> {
        let model = model.unwrap_or(&self.inner.config.default_model);
        if let Some((provider_id, rest)) = model.split_once('/') {
            if let Ok(provider) = self.inner.providers.get(provider_id) {
                return Ok((provider, rest.to_string()));
            }
        }
        Ok((self.inner.providers.completion()?, model.to_string()))
    }

    /// One completion round trip with the engine's token and temperature
    /// settings. Usage is added to the cost tracker.
    pub async fn complete(
        &self,
        model: Option<&str>,
        system: &str,
        messages: Vec<Message>,
    ) -> DelveResult<Completion> {
        let (provider, model) = self.resolve_model(model)?;
        let mut request = CompletionRequest::new(model, messages)
            .with_max_tokens(self.inner.config.max_output_tokens)
            .with_temperature(self.inner.config.temperature);
        if !system.is_empty() {
            request = request.with_system(system);
        }
        let completion = provider.complete(&request).await?;
        self.inner.costs.record(&completion);
        Ok(completion)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("model", &self.inner.config.default_model)
            .field("providers", &self.inner.providers)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::{LlmError, SandboxLimits};
    use delve_test_utils::fixtures::{contract_documents, test_config};
    use delve_test_utils::ScriptedProvider;

    fn env() -> Environment {
        Environment::create(test_config(), Arc::new(ScriptedProvider::new(["ok"]))).unwrap()
    }

    #[test]
    fn test_build_requires_provider() {
        let result = Environment::builder(test_config()).build();
        assert!(matches!(
            result,
            Err(DelveError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_build_validates_config() {
        let config = test_config().with_sandbox_limits(SandboxLimits {
            fuel: 0,
            ..SandboxLimits::default()
        });
        let result = Environment::create(config, Arc::new(ScriptedProvider::empty()));
        assert!(matches!(result, Err(DelveError::Config(_))));
    }

    #[test]
    fn test_ingest_into_default_corpus() {
        let env = env();
        assert_eq!(env.ingest(contract_documents()).unwrap(), 5);
        assert_eq!(env.corpus().unwrap().list_documents().unwrap().len(), 5);
    }

    #[test]
    fn test_registration_is_chainable_and_checked() {
        let env = env();
        env.register_function("double", "Doubles a number", |args| {
            Ok(Value::from(args[0].as_f64().unwrap_or(0.0) * 2.0))
        })
        .unwrap()
        .register_constant("fiscal-year", 2024i64, "Current fiscal year")
        .unwrap();
        assert_eq!(env.registry().unwrap().len(), 2);

        assert!(matches!(
            env.register_constant("search-pages", "x", ""),
            Err(DelveError::Config(ConfigError::ReservedName { .. }))
        ));
        assert!(matches!(
            env.register_constant("fiscal-year", 2025i64, ""),
            Err(DelveError::Config(ConfigError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let env = env();
        env.dispose().unwrap();
        env.dispose().unwrap();
        assert!(env.is_disposed());
        assert!(matches!(
            env.ingest(contract_documents()),
            Err(DelveError::Query(QueryError::EnvironmentDisposed))
        ));
    }

    #[test]
    fn test_dispose_flushes_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.jsonl");
        let env = Environment::create(
            test_config().with_memory_path(path.clone()),
            Arc::new(ScriptedProvider::empty()),
        )
        .unwrap();
        env.memory().learn("Fees are on page 3", "msa").unwrap();
        env.dispose().unwrap();

        let reopened = Environment::create(
            test_config().with_memory_path(path.clone()),
            Arc::new(ScriptedProvider::empty()),
        )
        .unwrap();
        assert_eq!(reopened.memory().learning_count().unwrap(), 1);
    }

    #[test]
    fn test_model_routing_by_provider_prefix() {
        let env = Environment::builder(test_config())
            .provider(Arc::new(ScriptedProvider::empty().with_id("anthropic")))
            .provider(Arc::new(ScriptedProvider::empty().with_id("openai")))
            .build()
            .unwrap();

        let (provider, model) = env.resolve_model(Some("openai/gpt-4o")).unwrap();
        assert_eq!(provider.provider_id(), "openai");
        assert_eq!(model, "gpt-4o");

        let (provider, model) = env.resolve_model(None).unwrap();
        assert_eq!(provider.provider_id(), "anthropic");
        assert_eq!(model, "test-model");

        let (_, model) = env.resolve_model(Some("mistral/large")).unwrap();
        assert_eq!(model, "mistral/large");
    }

    #[tokio::test]
    async fn test_complete_records_cost() {
        let env = env();
        let completion = env.complete(None, "sys", vec![Message::user("hi")]).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(env.costs().calls, 1);

        let err = env.complete(None, "sys", vec![Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, DelveError::Llm(LlmError::InvalidResponse { .. })));
    }
}
