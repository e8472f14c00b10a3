//! Refinement: decompose an answer into claims, check them, score, and
//! regenerate with corrective feedback until the score clears the bar.
//!
//! The returned answer is always the best-scoring one seen. Ties keep the
//! earlier answer.

use crate::options::{QueryStatus, RefinementRecord};
use crate::prompts;
use crate::session::{session_event, LoopOutcome, Session};
use delve_context::{truncate_with_marker, Conversation};
use delve_core::{extract_json, DelveResult, ExecutionOutcome, PageFilter, TraceEntry, TracePhase, Value};
use delve_llm::Message;
use delve_storage::query_terms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::time::Instant;

/// Search terms taken from each claim when gathering evidence.
const TERMS_PER_CLAIM: usize = 2;
const PAGES_PER_TERM: usize = 2;
/// Most recent successful observations shown as evidence.
const OBSERVATIONS_AS_EVIDENCE: usize = 3;

/// Verdict on one claim of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim: String,
    pub supported: bool,
    pub reason: String,
}

/// Fraction of supported claims. No checkable claims scores 1.0.
pub fn score_checks(checks: &[ClaimCheck]) -> f64 {
    if checks.is_empty() {
        return 1.0;
    }
    checks.iter().filter(|c| c.supported).count() as f64 / checks.len() as f64
}

fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(|s| s.trim().to_string())
}

/// Claims from a decomposition response: a JSON array of strings or of
/// `{claim}` objects. `None` if the response holds no such array.
pub(crate) fn parse_claims(text: &str) -> Option<Vec<String>> {
    let json = extract_json(text)?;
    let items = json.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                other => json_str(other, "claim").or_else(|| json_str(other, "text")),
            })
            .filter(|c| !c.is_empty())
            .collect(),
    )
}

fn supported_flag(entry: &serde_json::Value) -> bool {
    match entry.get("supported") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => crate::verify::parse_support(s),
        _ => false,
    }
}

/// One check per claim, in claim order. Entries are matched by claim text,
/// then by position; a claim with no verdict counts as unsupported.
pub(crate) fn parse_checks(text: &str, claims: &[String]) -> Vec<ClaimCheck> {
    let entries = extract_json(text)
        .and_then(|json| json.as_array().cloned())
        .unwrap_or_default();
    claims
        .iter()
        .enumerate()
        .map(|(i, claim)| {
            let entry = entries
                .iter()
                .find(|e| json_str(e, "claim").is_some_and(|c| c == claim.trim()))
                .or_else(|| entries.get(i).filter(|e| e.is_object()));
            match entry {
                Some(e) => ClaimCheck {
                    claim: claim.clone(),
                    supported: supported_flag(e),
                    reason: json_str(e, "reason").unwrap_or_default(),
                },
                None => ClaimCheck {
                    claim: claim.clone(),
                    supported: false,
                    reason: "no verdict returned".to_string(),
                },
            }
        })
        .collect()
}

/// What refinement settled on.
#[derive(Debug, Clone)]
pub(crate) struct RefineOutcome {
    pub answer: Value,
    pub score: f64,
    pub converged: bool,
    pub records: Vec<RefinementRecord>,
}

impl Session {
    /// Run refinement rounds starting from a finalized loop outcome.
    ///
    /// Regeneration starts a fresh loop from `base` with the unsupported
    /// claims as a note. A regeneration that does not finalize ends
    /// refinement with the best answer so far.
    pub(crate) async fn refine(&mut self, first: LoopOutcome, base: &Conversation) -> DelveResult<RefineOutcome> {
        let mut current = first;
        let mut records = Vec::new();
        let mut best_answer = current.answer.clone();
        let mut best_score = f64::NEG_INFINITY;
        let mut converged = false;
        let mut round: u32 = 0;

        loop {
            self.check_deadline()?;
            let started = Instant::now();
            let claims = self.decompose(&current.answer).await?;
            let checks = self.check_claims(&claims, &current.observations).await?;
            let score = score_checks(&checks);
            session_event!(
                self.debug(),
                session_id = %self.id,
                round,
                claims = checks.len(),
                score,
                "Refinement round scored"
            );
            records.push(RefinementRecord {
                round,
                answer: current.answer.clone(),
                checks: checks.clone(),
                score,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            if score > best_score {
                best_score = score;
                best_answer = current.answer.clone();
            }
            if score >= self.options.min_score {
                converged = true;
                break;
            }
            if round >= self.options.max_refinements {
                break;
            }

            round += 1;
            let unsupported: Vec<&ClaimCheck> = checks.iter().filter(|c| !c.supported).collect();
            let mut conversation = base.clone();
            conversation.add_note(prompts::regeneration_feedback(&current.answer, score, &unsupported));
            let next = self.run_loop(conversation).await?;
            if next.status != QueryStatus::Finalized {
                tracing::info!(
                    session_id = %self.id,
                    round,
                    "Regeneration did not finalize, keeping best answer"
                );
                break;
            }
            current = next;
        }

        Ok(RefineOutcome {
            answer: best_answer,
            score: best_score,
            converged,
            records,
        })
    }

    async fn decompose(&mut self, answer: &Value) -> DelveResult<Vec<String>> {
        let request = prompts::decompose_request(&self.question, answer);
        let started = Instant::now();
        let completion = self
            .complete(
                TracePhase::Refine,
                prompts::DECOMPOSE_SYSTEM,
                vec![Message::user(request.clone())],
            )
            .await?;

        let claims = match parse_claims(&completion.text) {
            Some(claims) => claims,
            None => {
                tracing::warn!(
                    session_id = %self.id,
                    "Unparseable claim decomposition, scoring the answer as one claim"
                );
                vec![answer.to_readable()]
            }
        };
        let entry = TraceEntry::new(self.id, self.iterations, TracePhase::Refine, request, completion.text)
            .with_label("decompose")
            .with_outcome(ExecutionOutcome::Value {
                value: Value::from(claims.clone()),
                stdout: String::new(),
            })
            .with_duration_ms(started.elapsed().as_millis() as u64);
        self.record(entry)?;
        Ok(claims)
    }

    async fn check_claims(&mut self, claims: &[String], observations: &[String]) -> DelveResult<Vec<ClaimCheck>> {
        if claims.is_empty() {
            return Ok(Vec::new());
        }
        let evidence = self.gather_evidence(claims, observations)?;
        let request = prompts::verify_request(&self.question, claims, &evidence);
        let started = Instant::now();
        let completion = self
            .complete(
                TracePhase::Refine,
                prompts::VERIFY_SYSTEM,
                vec![Message::user(request.clone())],
            )
            .await?;

        let checks = parse_checks(&completion.text, claims);
        let supported = checks.iter().filter(|c| c.supported).count();
        let entry = TraceEntry::new(self.id, self.iterations, TracePhase::Refine, request, completion.text)
            .with_label("check")
            .with_outcome(ExecutionOutcome::Value {
                value: Value::from(supported),
                stdout: String::new(),
            })
            .with_duration_ms(started.elapsed().as_millis() as u64);
        self.record(entry)?;
        Ok(checks)
    }

    /// Recent observations plus corpus hits for each claim's longest terms.
    fn gather_evidence(&self, claims: &[String], observations: &[String]) -> DelveResult<String> {
        let corpus = self.env.corpus()?;
        let mut out = String::new();
        for observation in observations.iter().rev().take(OBSERVATIONS_AS_EVIDENCE).rev() {
            out.push_str("Observation:\n");
            out.push_str(observation);
            out.push_str("\n\n");
        }

        let mut seen = BTreeSet::new();
        for claim in claims {
            let mut terms: Vec<String> = query_terms(claim).into_iter().collect();
            terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            for term in terms.iter().take(TERMS_PER_CLAIM) {
                for page in corpus.search_pages(term, PAGES_PER_TERM, &PageFilter::default())? {
                    if seen.insert(page.id.clone()) {
                        out.push_str(&format!("[{} p.{}]\n{}\n\n", page.document_id, page.page, page.text));
                    }
                }
            }
        }
        let max_chars = self.env.config().sandbox.max_observation_chars * 2;
        Ok(truncate_with_marker(out.trim_end(), max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(supported: bool) -> ClaimCheck {
        ClaimCheck {
            claim: "c".to_string(),
            supported,
            reason: String::new(),
        }
    }

    #[test]
    fn test_score_is_supported_fraction() {
        assert_eq!(score_checks(&[]), 1.0);
        assert_eq!(score_checks(&[check(true), check(false)]), 0.5);
        assert_eq!(score_checks(&[check(true), check(true), check(true), check(false)]), 0.75);
    }

    #[test]
    fn test_parse_claims_shapes() {
        assert_eq!(parse_claims("[]"), Some(vec![]));
        assert_eq!(
            parse_claims("Claims:\n[\"Acme is a party\", \"  \", \"Beta is a party\"]"),
            Some(vec!["Acme is a party".to_string(), "Beta is a party".to_string()])
        );
        assert_eq!(
            parse_claims(r#"[{"claim": "Rent is 8,500 USD"}]"#),
            Some(vec!["Rent is 8,500 USD".to_string()])
        );
        assert_eq!(parse_claims("no json here"), None);
        assert_eq!(parse_claims(r#"{"claim": "x"}"#), None);
    }

    #[test]
    fn test_parse_checks_matches_by_text_then_position() {
        let claims = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let text = r#"[
            {"claim": "B", "supported": true, "reason": "page 2"},
            {"claim": "something else", "supported": "yes", "reason": "close enough"}
        ]"#;
        let checks = parse_checks(text, &claims);
        // A falls back to position 0, which is B's verdict
        assert!(checks[0].supported);
        assert!(checks[1].supported);
        assert_eq!(checks[1].reason, "page 2");
        assert!(!checks[2].supported);
        assert_eq!(checks[2].reason, "no verdict returned");
    }

    #[test]
    fn test_parse_checks_unparseable_is_unsupported() {
        let claims = vec!["A".to_string()];
        let checks = parse_checks("I could not decide.", &claims);
        assert_eq!(checks.len(), 1);
        assert!(!checks[0].supported);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_score_in_unit_interval(flags in prop::collection::vec(any::<bool>(), 0..20)) {
            let checks: Vec<ClaimCheck> = flags
                .iter()
                .map(|s| ClaimCheck { claim: "c".to_string(), supported: *s, reason: String::new() })
                .collect();
            let score = score_checks(&checks);
            prop_assert!((0.0..=1.0).contains(&score));
            if flags.iter().all(|f| *f) {
                prop_assert_eq!(score, 1.0);
            }
        }

        #[test]
        fn prop_one_check_per_claim(
            claims in prop::collection::vec("[a-z ]{1,20}", 0..8),
            response in "\\PC{0,100}",
        ) {
            prop_assert_eq!(parse_checks(&response, &claims).len(), claims.len());
        }
    }
}
