//! Entity types recorded by sessions, the memory store and the pipeline.

use crate::{new_entity_id, now, EntityId, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TRACE
// ============================================================================

/// Which kind of model call produced a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracePhase {
    Plan,
    Iterate,
    Refine,
    Verify,
}

impl fmt::Display for TracePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plan => "plan",
            Self::Iterate => "iterate",
            Self::Refine => "refine",
            Self::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// What happened when a response was acted upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The response carried no code block.
    NoCode,
    /// Code evaluated to a value.
    Value { value: Value, stdout: String },
    /// Code failed to parse or evaluate.
    Error { message: String, stdout: String },
    /// Code invoked the finalize form.
    Final { value: Value, stdout: String },
    /// Code declared a plan.
    Plan { text: String, stdout: String },
    /// A sub-call whose response is consumed as text (plan, refine, verify).
    Completion,
}

impl ExecutionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCode => "no_code",
            Self::Value { .. } => "value",
            Self::Error { .. } => "error",
            Self::Final { .. } => "final",
            Self::Plan { .. } => "plan",
            Self::Completion => "completion",
        }
    }
}

/// Immutable record of one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: EntityId,
    pub session_id: EntityId,
    pub iteration: u32,
    pub phase: TracePhase,
    /// Free-form tag set by callers that group sessions, e.g. a pipeline phase.
    pub label: Option<String>,
    pub prompt: String,
    pub response: String,
    pub code: Option<String>,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
    pub created_at: Timestamp,
}

impl TraceEntry {
    pub fn new(
        session_id: EntityId,
        iteration: u32,
        phase: TracePhase,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            id: new_entity_id(),
            session_id,
            iteration,
            phase,
            label: None,
            prompt: prompt.into(),
            response: response.into(),
            code: None,
            outcome: ExecutionOutcome::Completion,
            duration_ms: 0,
            created_at: now(),
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn with_outcome(mut self, outcome: ExecutionOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

/// An assertion cited by model code, verified later against the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: EntityId,
    pub text: String,
    /// Source reference the model cited; searched verbatim during verification.
    pub source: String,
    pub document_id: Option<String>,
    /// `None` until the claim verifier runs.
    pub verified: Option<bool>,
    pub created_at: Timestamp,
}

impl Claim {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            text: text.into(),
            source: source.into(),
            document_id: None,
            verified: None,
            created_at: now(),
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A stored insight from a past session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: EntityId,
    pub insight: String,
    pub context: String,
    /// Number of votes recorded for this learning at read time.
    pub votes: u32,
    pub created_at: Timestamp,
}

impl Learning {
    pub fn new(insight: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            insight: insight.into(),
            context: context.into(),
            votes: 0,
            created_at: now(),
        }
    }
}

/// One vote for a learning. Votes are appended, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub learning_id: EntityId,
    pub created_at: Timestamp,
}

/// Speaker of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    Note,
}

impl fmt::Display for HistoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Note => "note",
        };
        f.write_str(s)
    }
}

impl FromStr for HistoryRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "note" => Ok(Self::Note),
            other => Err(format!("unknown history role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntityId,
    pub role: HistoryRole,
    pub content: String,
    pub timestamp: Timestamp,
}

impl HistoryEntry {
    pub fn new(role: HistoryRole, content: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            role,
            content: content.into(),
            timestamp: now(),
        }
    }
}

// ============================================================================
// Q&A PIPELINE
// ============================================================================

/// A corpus unit selected as generation material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub document_id: String,
    pub page: u32,
    pub rationale: String,
}

impl Passage {
    pub fn new(document_id: impl Into<String>, page: u32, rationale: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            page,
            rationale: rationale.into(),
        }
    }

    /// Identity used for de-duplication.
    pub fn key(&self) -> (String, u32) {
        (self.document_id.clone(), self.page)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown difficulty: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Factual,
    Conceptual,
    Procedural,
    Comparative,
    Numerical,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Factual,
        Self::Conceptual,
        Self::Procedural,
        Self::Comparative,
        Self::Numerical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Conceptual => "conceptual",
            Self::Procedural => "procedural",
            Self::Comparative => "comparative",
            Self::Numerical => "numerical",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "factual" => Ok(Self::Factual),
            "conceptual" => Ok(Self::Conceptual),
            "procedural" => Ok(Self::Procedural),
            "comparative" => Ok(Self::Comparative),
            "numerical" => Ok(Self::Numerical),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// Outcome of the verification phase for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    Fail,
    NeedsRevision,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::NeedsRevision => "needs-revision",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "needs-revision" => Ok(Self::NeedsRevision),
            other => Err(format!("unknown verdict: {}", other)),
        }
    }
}

/// A generated question/answer pair with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: EntityId,
    pub question: String,
    pub answer: String,
    /// Verbatim span from the source supporting the answer.
    pub evidence: String,
    pub document_id: String,
    pub page: u32,
    pub difficulty: Difficulty,
    pub category: Category,
    /// Set once by the verification phase.
    pub verdict: Option<Verdict>,
}

impl QuestionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        evidence: impl Into<String>,
        document_id: impl Into<String>,
        page: u32,
        difficulty: Difficulty,
        category: Category,
    ) -> Self {
        Self {
            id: new_entity_id(),
            question: question.into(),
            answer: answer.into(),
            evidence: evidence.into(),
            document_id: document_id.into(),
            page,
            difficulty,
            category,
            verdict: None,
        }
    }

    /// Normalized question text used for exact-duplicate collapsing.
    pub fn normalized_question(&self) -> String {
        self.question
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_parse_variants() {
        assert_eq!("pass".parse::<Verdict>(), Ok(Verdict::Pass));
        assert_eq!("FAIL".parse::<Verdict>(), Ok(Verdict::Fail));
        assert_eq!("needs_revision".parse::<Verdict>(), Ok(Verdict::NeedsRevision));
        assert_eq!("needs-revision".parse::<Verdict>(), Ok(Verdict::NeedsRevision));
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_verdict_serde_kebab_case() {
        let json = serde_json::to_string(&Verdict::NeedsRevision).unwrap();
        assert_eq!(json, "\"needs-revision\"");
    }

    #[test]
    fn test_claim_starts_unverified() {
        let claim = Claim::new("Acme is a party", "Agreement between Acme").with_document("doc-1");
        assert_eq!(claim.verified, None);
        assert_eq!(claim.document_id.as_deref(), Some("doc-1"));
    }

    #[test]
    fn test_normalized_question_ignores_case_and_punctuation() {
        let a = QuestionRecord::new(
            "What is the term of the lease?",
            "Five years",
            "term of five years",
            "doc",
            1,
            Difficulty::Easy,
            Category::Factual,
        );
        let mut b = a.clone();
        b.question = "  what IS the term of the lease ".to_string();
        assert_eq!(a.normalized_question(), b.normalized_question());
    }

    #[test]
    fn test_outcome_serde_tagged() {
        let outcome = ExecutionOutcome::Error {
            message: "boom".to_string(),
            stdout: String::new(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "error");
        assert!(outcome.is_error());
    }

    #[test]
    fn test_trace_entry_builder() {
        let session = new_entity_id();
        let entry = TraceEntry::new(session, 2, TracePhase::Iterate, "p", "r")
            .with_code(Some("(+ 1 2)".to_string()))
            .with_duration_ms(15)
            .with_label("generation");
        assert_eq!(entry.iteration, 2);
        assert_eq!(entry.code.as_deref(), Some("(+ 1 2)"));
        assert_eq!(entry.label.as_deref(), Some("generation"));
        assert_eq!(entry.outcome, ExecutionOutcome::Completion);
    }
}
