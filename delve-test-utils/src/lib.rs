//! DELVE Test Utilities
//!
//! Shared test infrastructure for the DELVE workspace:
//! - A scripted completion provider that replays canned model responses
//! - Fixture corpora for query and pipeline tests
//! - Proptest generators for domain types
//! - Assertions for DELVE-specific error variants

pub use delve_core::{
    Category, Claim, Corpus, DelveError, DelveResult, Difficulty, EngineConfig, IngestDocument,
    LlmError, QuestionRecord, RetryConfig, SandboxLimits, TraceEntry, TracePhase, Value, Verdict,
};
pub use delve_llm::{Completion, CompletionProvider, CompletionRequest};
pub use delve_storage::{InMemoryCorpus, MemoryStore};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// SCRIPTED PROVIDER
// ============================================================================

#[derive(Debug)]
struct Route {
    needle: String,
    responses: VecDeque<String>,
    /// Keep answering with the last response once the queue is down to one.
    sticky: bool,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<String>,
    routes: Vec<Route>,
    fallback: Option<String>,
    failures: VecDeque<LlmError>,
    requests: Vec<CompletionRequest>,
}

/// Completion provider that replays canned responses.
///
/// Routed responses are chosen when the system prompt or the last user
/// message contains the route's needle; everything else is served from the
/// main script in order. Queued failures are returned before any response.
#[derive(Debug)]
pub struct ScriptedProvider {
    id: String,
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            id: "scripted".to_string(),
            script: Mutex::new(Script {
                responses: responses.into_iter().map(Into::into).collect(),
                ..Script::default()
            }),
        }
    }

    /// A provider with no main script; only routes and the fallback answer.
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Serve `responses` in order to requests mentioning `needle`.
    pub fn route<S: Into<String>>(
        self,
        needle: impl Into<String>,
        responses: impl IntoIterator<Item = S>,
    ) -> Self {
        self.add_route(needle.into(), responses.into_iter().map(Into::into).collect(), false)
    }

    /// Answer every request mentioning `needle` with `response`.
    pub fn route_always(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.add_route(needle.into(), VecDeque::from(vec![response.into()]), true)
    }

    fn add_route(self, needle: String, responses: VecDeque<String>, sticky: bool) -> Self {
        self.lock().routes.push(Route {
            needle,
            responses,
            sticky,
        });
        self
    }

    /// Response used once the script and matching routes are exhausted.
    pub fn with_fallback(self, response: impl Into<String>) -> Self {
        self.lock().fallback = Some(response.into());
        self
    }

    /// Fail the next call with `error` before serving responses.
    pub fn fail_next(self, error: LlmError) -> Self {
        self.lock().failures.push_back(error);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Responses left in the main script.
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        // a panicking test thread must not wedge the others
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_response(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        if let Some(err) = script.failures.pop_front() {
            return Err(err);
        }

        let haystack = format!(
            "{}\n{}",
            request.system.as_deref().unwrap_or_default(),
            request.last_user_message().unwrap_or_default()
        );
        for route in script.routes.iter_mut() {
            if !haystack.contains(&route.needle) {
                continue;
            }
            if route.sticky && route.responses.len() == 1 {
                if let Some(text) = route.responses.front() {
                    return Ok(text.clone());
                }
            }
            if let Some(text) = route.responses.pop_front() {
                return Ok(text);
            }
        }

        script
            .responses
            .pop_front()
            .or_else(|| script.fallback.clone())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.id.clone(),
                reason: "script exhausted".to_string(),
            })
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion> {
        let text = self.next_response(request).map_err(DelveError::Llm)?;
        let input = request.full_text().len() as u64 / 4;
        let output = text.len() as u64 / 4;
        Ok(Completion::new(text, request.model.clone()).with_usage(input, output))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Wrap sandbox code in the fence the engine extracts.
pub fn code_block(code: &str) -> String {
    format!("Let me look.\n\n```clojure\n{}\n```", code)
}

/// A response that finalizes with `value`, given as sandbox source.
pub fn final_block(value_source: &str) -> String {
    code_block(&format!("(FINAL {})", value_source))
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for DELVE domain types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a sandbox value up to a small depth.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-10_000i64..10_000).prop_map(Value::from),
            "[a-zA-Z ]{0,16}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    pub fn arb_difficulty() -> impl Strategy<Value = Difficulty> {
        prop::sample::select(Difficulty::ALL.to_vec())
    }

    pub fn arb_category() -> impl Strategy<Value = Category> {
        prop::sample::select(Category::ALL.to_vec())
    }

    pub fn arb_verdict() -> impl Strategy<Value = Verdict> {
        prop_oneof![
            Just(Verdict::Pass),
            Just(Verdict::Fail),
            Just(Verdict::NeedsRevision),
        ]
    }

    /// Generate a question record sourced from one of the fixture documents.
    pub fn arb_question_record() -> impl Strategy<Value = QuestionRecord> {
        (
            "[A-Z][a-z]{3,12}( [a-z]{2,10}){2,6}\\?",
            "[A-Z][a-z]{2,10}( [a-z]{2,10}){0,4}",
            prop::sample::select(fixtures::DOCUMENT_IDS.to_vec()),
            1u32..5,
            arb_difficulty(),
            arb_category(),
        )
            .prop_map(|(question, answer, doc, page, difficulty, category)| {
                let evidence = answer.clone();
                QuestionRecord::new(question, answer, evidence, doc, page, difficulty, category)
            })
    }

    /// Generate a small valid ingest document.
    pub fn arb_ingest_document() -> impl Strategy<Value = IngestDocument> {
        (
            "[a-z]{3,8}",
            "[A-Z][a-z]{3,10}",
            prop::collection::vec("[A-Za-z ,.]{10,80}", 1..5),
        )
            .prop_map(|(id, title, pages)| IngestDocument::from_pages(id, title, pages))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built corpora and configuration for common test cases.

    use super::*;

    pub const DOCUMENT_IDS: [&str; 5] = ["msa", "lease", "nda", "employment", "privacy"];

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    /// Five short contracts, four pages each, with headings and entities.
    pub fn contract_documents() -> Vec<IngestDocument> {
        vec![
            IngestDocument::from_pages(
                "msa",
                "Master Services Agreement",
                pages(&[
                    "# Parties\nThis Master Services Agreement is entered into by Acme Corp and Beta LLC.",
                    "# Services\nBeta LLC will provide software maintenance services to Acme Corp.",
                    "# Fees\nAcme Corp pays Beta LLC a monthly fee of 12,000 USD within 30 days of invoice.",
                    "# Termination\nEither party may terminate for convenience with 60 days written notice.",
                ]),
            )
            .with_entity("Acme Corp", "organization", vec![1, 2, 3])
            .with_entity("Beta LLC", "organization", vec![1, 2, 3])
            .with_relationship("Acme Corp", "Beta LLC", "customer-of"),
            IngestDocument::from_pages(
                "lease",
                "Office Lease",
                pages(&[
                    "# Premises\nLandlord Gamma Properties leases Suite 400 to Acme Corp.",
                    "# Term\nThe lease term is five years starting on 1 March 2024.",
                    "# Rent\nBase rent is 8,500 USD per month, increasing 3 percent annually.",
                    "# Maintenance\nThe landlord maintains the roof and structural elements.",
                ]),
            )
            .with_entity("Gamma Properties", "organization", vec![1])
            .with_relationship("Gamma Properties", "Acme Corp", "landlord-of"),
            IngestDocument::from_pages(
                "nda",
                "Mutual Non-Disclosure Agreement",
                pages(&[
                    "# Parties\nAcme Corp and Delta Labs agree to protect confidential information.",
                    "# Confidential Information\nConfidential information excludes publicly available data.",
                    "# Duration\nObligations survive for three years after disclosure.",
                    "# Remedies\nThe disclosing party may seek injunctive relief for breaches.",
                ]),
            )
            .with_entity("Delta Labs", "organization", vec![1]),
            IngestDocument::from_pages(
                "employment",
                "Employment Agreement",
                pages(&[
                    "# Position\nAcme Corp employs Jordan Lee as Chief Technology Officer.",
                    "# Compensation\nThe annual base salary is 210,000 USD paid bi-weekly.",
                    "# Benefits\nThe employee receives 25 days of paid vacation per year.",
                    "# Non-Compete\nThe employee may not join a competitor for twelve months after leaving.",
                ]),
            )
            .with_entity("Jordan Lee", "person", vec![1]),
            IngestDocument::from_pages(
                "privacy",
                "Privacy Policy",
                pages(&[
                    "# Data Collected\nAcme Corp collects account, usage and billing data.",
                    "# Retention\nPersonal data is retained for no longer than 24 months.",
                    "# Sharing\nData is shared with processors under written agreements only.",
                    "# Rights\nUsers may request access, correction or deletion of their data.",
                ]),
            ),
        ]
    }

    /// The contract documents loaded into an in-memory corpus.
    pub fn contract_corpus() -> InMemoryCorpus {
        let corpus = InMemoryCorpus::new();
        if let Err(err) = corpus.ingest(contract_documents()) {
            panic!("fixture corpus failed to ingest: {}", err);
        }
        corpus
    }

    /// Engine configuration for tests: no retries, no persistence.
    pub fn test_config() -> EngineConfig {
        EngineConfig::default()
            .with_model("test-model")
            .with_retry(RetryConfig::none())
    }

    /// Sandbox limits small enough to trip quickly.
    pub fn tight_limits() -> SandboxLimits {
        SandboxLimits {
            fuel: 2_000,
            max_output_chars: 200,
            max_depth: 32,
            max_observation_chars: 500,
            ..SandboxLimits::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for DELVE-specific validation.

    use super::*;

    /// Assert that a DelveResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &DelveResult<T>) {
        match result {
            Err(DelveError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a DelveResult is a Query error.
    #[track_caller]
    pub fn assert_query_error<T: std::fmt::Debug>(result: &DelveResult<T>) {
        match result {
            Err(DelveError::Query(_)) => {}
            other => panic!("Expected Query error, got: {:?}", other),
        }
    }

    /// Assert that a DelveResult is a Pipeline error.
    #[track_caller]
    pub fn assert_pipeline_error<T: std::fmt::Debug>(result: &DelveResult<T>) {
        match result {
            Err(DelveError::Pipeline(_)) => {}
            other => panic!("Expected Pipeline error, got: {:?}", other),
        }
    }

    /// Assert the phase tags of a trace, in order.
    #[track_caller]
    pub fn assert_trace_phases(trace: &[TraceEntry], expected: &[TracePhase]) {
        let phases: Vec<TracePhase> = trace.iter().map(|e| e.phase).collect();
        assert_eq!(phases, expected, "Unexpected trace phases");
    }

    /// Assert that iteration numbers of `Iterate` entries count up from 1.
    #[track_caller]
    pub fn assert_iterations_sequential(trace: &[TraceEntry]) {
        let iterations: Vec<u32> = trace
            .iter()
            .filter(|e| e.phase == TracePhase::Iterate)
            .map(|e| e.iteration)
            .collect();
        let expected: Vec<u32> = (1..=iterations.len() as u32).collect();
        assert_eq!(iterations, expected, "Iterations are not sequential");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(system: &str, user: &str) -> CompletionRequest {
        CompletionRequest::new("m", vec![delve_llm::Message::user(user)]).with_system(system)
    }

    #[tokio::test]
    async fn test_script_served_in_order_then_fallback() {
        let provider = ScriptedProvider::new(["one", "two"]).with_fallback("done");
        let r = request("s", "u");
        assert_eq!(provider.complete(&r).await.unwrap().text, "one");
        assert_eq!(provider.complete(&r).await.unwrap().text, "two");
        assert_eq!(provider.complete(&r).await.unwrap().text, "done");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_routes_take_precedence() {
        let provider = ScriptedProvider::new(["main"])
            .route("decompose", ["[\"a\"]"])
            .route_always("verify", "yes");
        assert_eq!(
            provider.complete(&request("decompose this", "x")).await.unwrap().text,
            "[\"a\"]"
        );
        assert_eq!(provider.complete(&request("s", "please verify")).await.unwrap().text, "yes");
        assert_eq!(provider.complete(&request("s", "please verify")).await.unwrap().text, "yes");
        assert_eq!(provider.complete(&request("decompose this", "x")).await.unwrap().text, "main");
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let provider = ScriptedProvider::empty();
        let err = provider.complete(&request("s", "u")).await.unwrap_err();
        assert!(matches!(err, DelveError::Llm(LlmError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn test_queued_failure_first() {
        let provider = ScriptedProvider::new(["ok"]).fail_next(LlmError::Timeout {
            provider: "scripted".to_string(),
            timeout_ms: 10,
        });
        assert!(provider.complete(&request("s", "u")).await.is_err());
        assert_eq!(provider.complete(&request("s", "u")).await.unwrap().text, "ok");
    }

    #[test]
    fn test_fixture_corpus_shape() {
        let corpus = fixtures::contract_corpus();
        assert_eq!(corpus.document_count().unwrap(), 5);
        assert_eq!(corpus.page_count().unwrap(), 20);
    }
}
