//! Query options and results.

use crate::refine::ClaimCheck;
use delve_core::{
    Claim, ConfigError, DelveError, DelveResult, EntityId, OutputSpec, TraceEntry, Value,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// OPTIONS
// ============================================================================

/// Per-call options for [`Environment::query`](crate::Environment::query).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Shape the finalized answer must satisfy.
    pub spec: Option<OutputSpec>,
    /// Caller context shown with the question.
    pub context: Option<String>,
    /// Model id, optionally prefixed with a provider id (`openai/gpt-4o`).
    pub model: Option<String>,
    pub max_iterations: u32,
    /// Regenerations allowed after the first scored answer.
    pub max_refinements: u32,
    /// Refinement stops once an answer scores at least this.
    pub min_score: f64,
    pub refine: bool,
    /// Prime with learnings, bind the memory write capabilities and record history.
    pub learn: bool,
    pub plan: bool,
    pub verify_claims: bool,
    /// Conversation budget; defaults to the engine's context budget.
    pub max_context_tokens: Option<usize>,
    /// Log per-iteration events at info level.
    pub debug: bool,
    /// Wall-clock limit for the whole session.
    pub deadline: Option<Duration>,
    /// Extra system-prompt section, e.g. a pipeline phase brief.
    pub guidance: Option<String>,
    /// Tag copied onto every trace entry of the session.
    pub label: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            spec: None,
            context: None,
            model: None,
            max_iterations: 50,
            max_refinements: 1,
            min_score: 32.0 / 40.0,
            refine: true,
            learn: true,
            plan: false,
            verify_claims: false,
            max_context_tokens: None,
            debug: false,
            deadline: None,
            guidance: None,
            label: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(mut self, spec: OutputSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_refinements(mut self, max_refinements: u32) -> Self {
        self.max_refinements = max_refinements;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_refine(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }

    pub fn with_learn(mut self, learn: bool) -> Self {
        self.learn = learn;
        self
    }

    pub fn with_plan(mut self, plan: bool) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_verify_claims(mut self, verify_claims: bool) -> Self {
        self.verify_claims = verify_claims;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Validate before any session starts.
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` for a zero iteration cap, a score outside
    /// `0.0..=1.0`, a zero context budget or deadline, or an unusable spec.
    pub fn validate(&self) -> DelveResult<()> {
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", self.max_iterations, "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(invalid("min_score", self.min_score, "must be between 0.0 and 1.0"));
        }
        if self.max_context_tokens == Some(0) {
            return Err(invalid("max_context_tokens", 0, "must be greater than 0"));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(invalid("deadline", "0ms", "must be greater than 0"));
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(invalid("model", "", "must not be blank"));
            }
        }
        if let Some(spec) = &self.spec {
            validate_spec(spec, "spec")?;
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> DelveError {
    DelveError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn validate_spec(spec: &OutputSpec, path: &str) -> DelveResult<()> {
    match spec {
        OutputSpec::Enum { values } if values.is_empty() => {
            Err(invalid(path, "enum", "enum needs at least one value"))
        }
        OutputSpec::List { items } => validate_spec(items, &format!("{}[]", path)),
        OutputSpec::Map { fields } => {
            for (name, field) in fields {
                if name.trim().is_empty() {
                    return Err(invalid(path, "map", "field names must not be blank"));
                }
                validate_spec(&field.spec, &format!("{}.{}", path, name))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// How the iteration loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryStatus {
    /// The model called `FINAL` and the value passed the output spec, if any.
    Finalized,
    /// The iteration cap was reached without a finalize call.
    Exhausted,
    /// The finalized value failed the output spec twice.
    ParseError { message: String },
}

/// One scored answer during refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRecord {
    /// 0 for the first answer, then one per regeneration.
    pub round: u32,
    pub answer: Value,
    pub checks: Vec<ClaimCheck>,
    pub score: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub session_id: EntityId,
    /// Finalized value, or the last non-error observation when exhausted.
    pub answer: Value,
    pub status: QueryStatus,
    /// Every entry this session appended, in order.
    pub trace: Vec<TraceEntry>,
    /// Completed iterations across the first run and all regenerations.
    pub iterations: u32,
    pub converged: bool,
    /// Best refinement score, when refinement ran.
    pub score: Option<f64>,
    pub refinements: Vec<RefinementRecord>,
    /// Cited claims with their verdicts, when claim verification ran.
    pub verified_claims: Option<Vec<Claim>>,
    pub plan: Option<String>,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

impl QueryResult {
    pub fn is_finalized(&self) -> bool {
        self.status == QueryStatus::Finalized
    }

    pub fn is_exhausted(&self) -> bool {
        self.status == QueryStatus::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::FieldSpec;

    #[test]
    fn test_documented_defaults() {
        let opts = QueryOptions::default();
        assert_eq!(opts.max_iterations, 50);
        assert_eq!(opts.max_refinements, 1);
        assert!((opts.min_score - 0.8).abs() < f64::EPSILON);
        assert!(opts.refine && opts.learn);
        assert!(!opts.plan && !opts.verify_claims && !opts.debug);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(QueryOptions::new().with_max_iterations(0).validate().is_err());
        assert!(QueryOptions::new().with_min_score(1.5).validate().is_err());
        assert!(QueryOptions::new().with_max_context_tokens(0).validate().is_err());
        assert!(QueryOptions::new().with_deadline(Duration::ZERO).validate().is_err());
        assert!(QueryOptions::new().with_model("  ").validate().is_err());
    }

    #[test]
    fn test_validate_walks_nested_spec() {
        let spec = OutputSpec::list_of(OutputSpec::map_of([(
            "kind",
            FieldSpec::required(OutputSpec::Enum { values: vec![] }),
        )]));
        match QueryOptions::new().with_spec(spec).validate() {
            Err(DelveError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "spec[].kind")
            }
            other => panic!("expected invalid spec, got {:?}", other),
        }
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_value(QueryStatus::ParseError {
            message: "bad".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "parse_error");
    }
}
