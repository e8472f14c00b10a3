//! Prompt text for every model call the engine makes.

use crate::refine::ClaimCheck;
use delve_context::{truncate_with_marker, PromptAssembler, PromptSection, SectionKind};
use delve_core::{Claim, Learning, OutputSpec, PageNode, SchemaError, Value};
use delve_sandbox::ExecutionResult;

// ============================================================================
// SYSTEM PROMPT
// ============================================================================

pub const INSTRUCTIONS: &str = "\
You answer questions about a document corpus that is too large to read at once. \
You explore it by writing small programs, one per turn, in a Clojure-like language. \
Each program runs in a sandbox and you see its result on the next turn.

Workflow:
1. Put exactly one program in a fenced code block:
```clojure
(search-pages \"termination\" 5)
```
2. Read the result. Errors are shown to you; fix the code and try again.
3. When you know the answer, call (FINAL value) with the answer as data, \
or (FINAL-VAR name) to finalize with a value bound by def.

Language:
- Literals: nil true false 42 3.5 \"text\" :keyword [vectors] {:maps 1}. Keywords evaluate to strings.
- Forms: def, defn, let, fn, if, when, cond, do, and, or, if-let, when-let, ->, ->>, doseq, for.
- Keywords and maps work as lookup functions: (:title doc).
- Builtins cover arithmetic, comparison, strings, collections, map/filter/reduce/sort-by/group-by, re-find/re-seq, str and println.
- def bindings persist between your turns. There is no file, network or host access.
- (PLAN \"1. ... 2. ...\") records a strategy without ending the session.";

pub const PLAN_SYSTEM: &str = "\
You write short research plans. Given a question about a document corpus and the functions \
available to explore it, reply with a numbered strategy of at most five steps. Do not write code.";

pub const NO_CODE_FEEDBACK: &str = "\
No code block found. Reply with one program in a ```clojure fenced block, \
or call (FINAL value) if you have the answer.";

/// Sections of the iteration system prompt, highest priority first.
pub fn system_sections(
    capabilities: &str,
    spec: Option<&OutputSpec>,
    learnings: &[Learning],
    guidance: Option<&str>,
) -> Vec<PromptSection> {
    let mut sections = vec![
        PromptSection::new(SectionKind::Instructions, INSTRUCTIONS, 100).with_compressible(false),
        PromptSection::new(SectionKind::Capabilities, capabilities, 90)
            .with_title("Available functions")
            .with_compressible(false),
    ];
    if let Some(spec) = spec {
        sections.push(
            PromptSection::new(
                SectionKind::Schema,
                format!("The value passed to FINAL must be: {}", spec.describe()),
                80,
            )
            .with_title("Answer format")
            .with_compressible(false),
        );
    }
    if let Some(guidance) = guidance.filter(|g| !g.trim().is_empty()) {
        sections.push(
            PromptSection::new(SectionKind::Guidance, guidance, 70).with_title("Task"),
        );
    }
    if !learnings.is_empty() {
        let lines: Vec<String> = learnings
            .iter()
            .map(|l| format!("- {} (votes: {}, id: {})", l.insight, l.votes, l.id))
            .collect();
        sections.push(
            PromptSection::new(SectionKind::Learnings, lines.join("\n"), 40)
                .with_title("Insights from earlier sessions (hints, may be wrong)"),
        );
    }
    sections
}

/// Render sections into a system prompt within `budget` tokens.
pub fn assemble_system(sections: Vec<PromptSection>, budget: usize) -> String {
    let assembled = PromptAssembler::new(budget).assemble(sections);
    if assembled.truncated() {
        tracing::debug!(
            used_tokens = assembled.used_tokens,
            budget,
            "System prompt truncated to fit"
        );
    }
    assembled.text
}

/// System prompt for the planning call.
pub fn plan_system(capabilities: &str) -> String {
    format!("{}\n\n## Available functions\n{}", PLAN_SYSTEM, capabilities)
}

// ============================================================================
// OBSERVATIONS
// ============================================================================

/// What the model sees after its code ran.
pub fn observation(result: &ExecutionResult, max_chars: usize) -> String {
    let mut out = String::new();
    if let Some(err) = &result.error {
        out.push_str(&format!("Error: {}", err));
    } else if let Some(plan) = &result.plan {
        out.push_str(&format!("Plan recorded:\n{}", plan));
        if !result.value.is_null() {
            out.push_str(&format!("\n=> {}", result.value.to_readable()));
        }
    } else {
        out.push_str(&format!("=> {}", result.value.to_readable()));
    }
    if !result.stdout.is_empty() {
        out.push_str("\n\nOutput:\n");
        out.push_str(&result.stdout);
    }
    truncate_with_marker(&out, max_chars)
}

/// Feedback after a finalized value failed the answer format.
pub fn schema_feedback(error: &SchemaError, spec: &OutputSpec, value: &Value) -> String {
    format!(
        "Your FINAL value {} does not match the required format: {}.\n\
         Required: {}\nCall FINAL again with a corrected value.",
        truncate_with_marker(&value.to_readable(), 500),
        error,
        spec.describe()
    )
}

// ============================================================================
// REFINEMENT
// ============================================================================

pub const DECOMPOSE_SYSTEM: &str = "\
You split answers into atomic claims. Each claim must be a single factual statement \
that can be checked on its own against source documents. Reply with a JSON array of strings \
and nothing else. Reply [] if the answer makes no checkable claim.";

pub const VERIFY_SYSTEM: &str = "\
You check claims against evidence. For every claim decide whether the evidence supports it. \
Reply with a JSON array of objects {\"claim\": string, \"supported\": boolean, \"reason\": string}, \
one per claim, in the order given.";

pub fn decompose_request(question: &str, answer: &Value) -> String {
    format!(
        "Question: {}\n\nAnswer:\n{}\n\nList the atomic claims this answer makes.",
        question,
        answer.to_readable()
    )
}

pub fn verify_request(question: &str, claims: &[String], evidence: &str) -> String {
    let numbered: Vec<String> = claims
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect();
    format!(
        "Question: {}\n\nClaims:\n{}\n\nEvidence:\n{}",
        question,
        numbered.join("\n"),
        if evidence.trim().is_empty() {
            "(no evidence found)"
        } else {
            evidence
        }
    )
}

/// Corrective note for a regeneration round.
pub fn regeneration_feedback(previous: &Value, score: f64, unsupported: &[&ClaimCheck]) -> String {
    let mut out = format!(
        "A previous attempt answered {} but only {:.0}% of its claims were supported by the corpus.",
        truncate_with_marker(&previous.to_readable(), 1_000),
        score * 100.0
    );
    if !unsupported.is_empty() {
        out.push_str("\nUnsupported claims:");
        for check in unsupported {
            out.push_str(&format!("\n- {} ({})", check.claim, check.reason));
        }
    }
    out.push_str("\nRe-check the corpus and finalize an answer whose every claim is supported.");
    out
}

// ============================================================================
// CLAIM VERIFICATION
// ============================================================================

pub const COVE_SYSTEM: &str = "\
You verify a single cited claim. Given the claim and passages retrieved for its cited source, \
reply \"yes\" if the passages support the claim and \"no\" otherwise, then one sentence of reason.";

pub fn cove_request(claim: &Claim, passages: &[PageNode], max_chars: usize) -> String {
    let mut evidence = String::new();
    for page in passages {
        evidence.push_str(&format!("[{} p.{}]\n{}\n\n", page.document_id, page.page, page.text));
    }
    format!(
        "Claim: {}\nCited source: {}\n\nPassages:\n{}",
        claim.text,
        claim.source,
        truncate_with_marker(evidence.trim_end(), max_chars)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::{FieldSpec, SandboxError};

    fn result(value: Value, stdout: &str, error: Option<SandboxError>) -> ExecutionResult {
        ExecutionResult {
            value,
            stdout: stdout.to_string(),
            error,
            final_value: None,
            plan: None,
            fuel_used: 0,
        }
    }

    #[test]
    fn test_sections_include_optional_parts() {
        let spec = OutputSpec::list_of(OutputSpec::String);
        let learnings = vec![Learning::new("Parties are on page 1", "msa")];
        let sections = system_sections("- search-pages : ...", Some(&spec), &learnings, Some("Select passages"));
        let kinds: Vec<SectionKind> = sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Instructions,
                SectionKind::Capabilities,
                SectionKind::Schema,
                SectionKind::Guidance,
                SectionKind::Learnings
            ]
        );
        let text = assemble_system(sections, 10_000);
        assert!(text.contains("Parties are on page 1"));
        assert!(text.contains("## Answer format"));
    }

    #[test]
    fn test_learnings_dropped_before_instructions_under_pressure() {
        let learnings: Vec<Learning> = (0..50)
            .map(|i| Learning::new(format!("insight number {} {}", i, "x".repeat(80)), "ctx"))
            .collect();
        let text = assemble_system(system_sections("caps", None, &learnings, None), 400);
        assert!(text.contains("FINAL"));
        assert!(!text.contains("insight number 49"));
    }

    #[test]
    fn test_observation_forms() {
        let ok = observation(&result(Value::from(vec!["a", "b"]), "", None), 1_000);
        assert_eq!(ok, "=> [\"a\" \"b\"]");

        let printed = observation(&result(Value::Null, "hello\n", None), 1_000);
        assert!(printed.contains("Output:\nhello"));

        let err = observation(
            &result(
                Value::Null,
                "",
                Some(SandboxError::UnboundSymbol {
                    name: "slurp".to_string(),
                }),
            ),
            1_000,
        );
        assert!(err.starts_with("Error:"));
        assert!(err.contains("slurp"));
    }

    #[test]
    fn test_observation_truncated() {
        let long = observation(&result(Value::from("x".repeat(5_000)), "", None), 100);
        assert!(long.contains("[truncated"));
        assert!(long.len() < 200);
    }

    #[test]
    fn test_schema_feedback_names_format() {
        let spec = OutputSpec::map_of([("total", FieldSpec::required(OutputSpec::Number))]);
        let err = SchemaError::MissingField {
            path: "total".to_string(),
        };
        let text = schema_feedback(&err, &spec, &Value::map([("sum", Value::from(3i64))]));
        assert!(text.contains("total"));
        assert!(text.contains("FINAL"));
    }
}
