//! Chain-of-verification over cited claims.
//!
//! Each claim recorded with `cite!` is checked on its own: passages are
//! retrieved for its cited source and one model call judges them.

use crate::prompts;
use crate::session::{session_event, Session};
use delve_core::{Claim, DelveResult, ExecutionOutcome, PageFilter, TraceEntry, TracePhase, Value};
use delve_llm::Message;
use tokio::time::Instant;

const PASSAGES_PER_CLAIM: usize = 3;

/// Read a yes/no verdict from the first word of a response.
pub fn parse_support(text: &str) -> bool {
    let first = text
        .trim_start()
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    matches!(first.as_str(), "yes" | "true" | "supported")
}

impl Session {
    /// Mark every claim verified or not. A claim whose source finds no
    /// passages is unverified without a model call.
    pub(crate) async fn verify_claims(&mut self, claims: Vec<Claim>) -> DelveResult<Vec<Claim>> {
        let corpus = self.env.corpus()?;
        let max_chars = self.env.config().sandbox.max_observation_chars * 2;
        let mut verified = Vec::with_capacity(claims.len());

        for mut claim in claims {
            self.check_deadline()?;
            let filter = match &claim.document_id {
                Some(doc) => PageFilter::document(doc.clone()),
                None => PageFilter::default(),
            };
            let passages = if claim.source.trim().is_empty() {
                Vec::new()
            } else {
                corpus.search_pages(&claim.source, PASSAGES_PER_CLAIM, &filter)?
            };
            if passages.is_empty() {
                session_event!(self.debug(), session_id = %self.id, claim_id = %claim.id, "No passages for cited source");
                claim.verified = Some(false);
                verified.push(claim);
                continue;
            }

            let request = prompts::cove_request(&claim, &passages, max_chars);
            let started = Instant::now();
            let completion = self
                .complete(
                    TracePhase::Verify,
                    prompts::COVE_SYSTEM,
                    vec![Message::user(request.clone())],
                )
                .await?;
            let supported = parse_support(&completion.text);
            self.record(
                TraceEntry::new(self.id, self.iterations, TracePhase::Verify, request, completion.text)
                    .with_outcome(ExecutionOutcome::Value {
                        value: Value::Bool(supported),
                        stdout: String::new(),
                    })
                    .with_duration_ms(started.elapsed().as_millis() as u64),
            )?;
            claim.verified = Some(supported);
            verified.push(claim);
        }

        let supported = verified.iter().filter(|c| c.verified == Some(true)).count();
        tracing::info!(
            session_id = %self.id,
            claims = verified.len(),
            supported,
            "Claim verification complete"
        );
        Ok(verified)
    }
}
