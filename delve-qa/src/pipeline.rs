//! The four phases: selection, generation, verification, deduplication.
//!
//! Phases run in order and each consumes only the previous phase's output.
//! Every phase is one or more `Environment::query` sessions with a phase
//! guidance, an answer format and the phase name as trace label.

use crate::allocate::assign_slots;
use crate::dedup::{apply_keep_set, collapse_exact, keep_indices};
use crate::options::QaOptions;
use crate::prompts;
use crate::result::{PhaseCounts, PhaseLog, QaResult, QaStats};
use async_trait::async_trait;
use delve_core::{
    Category, DelveError, DelveResult, Difficulty, Humanizer, OutputSpec, Passage, PipelineError,
    QuestionRecord, TextPostProcessor, Value, Verdict,
};
use delve_engine::{Environment, QueryOptions, QueryResult};
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

pub const SELECTION: &str = "selection";
pub const GENERATION: &str = "generation";
pub const VERIFICATION: &str = "verification";
pub const DEDUPLICATION: &str = "deduplication";

/// Recovers records the verification phase did not pass.
///
/// Returned records join the surviving set as they are.
#[async_trait]
pub trait RevisionHook: Send + Sync {
    async fn revise(&self, env: &Environment, rejected: Vec<QuestionRecord>) -> DelveResult<Vec<QuestionRecord>>;
}

/// Generate a question/answer dataset from the environment's corpus.
pub async fn generate_qa(env: &Environment, options: &QaOptions) -> DelveResult<QaResult> {
    QaPipeline::new(env.clone(), options.clone()).run().await
}

/// Pipeline runner. Use [`generate_qa`] unless a revision hook is needed.
pub struct QaPipeline {
    env: Environment,
    options: QaOptions,
    revision: Option<Arc<dyn RevisionHook>>,
    humanizer: Humanizer,
}

impl QaPipeline {
    pub fn new(env: Environment, options: QaOptions) -> Self {
        Self {
            env,
            options,
            revision: None,
            humanizer: Humanizer,
        }
    }

    pub fn with_revision_hook(mut self, hook: Arc<dyn RevisionHook>) -> Self {
        self.revision = Some(hook);
        self
    }

    pub async fn run(&self) -> DelveResult<QaResult> {
        self.options.validate()?;
        let started = Instant::now();
        let mut log = PhaseLog::default();
        let mut counts = PhaseCounts::default();
        tracing::info!(
            count = self.options.count,
            target = self.options.selection_target(),
            verify = self.options.verify_answers,
            "Q&A generation started"
        );

        let passages = self.select(&mut log).await?;
        counts.selected = passages.len();

        let (generated, failed_batches) = self.generate(&passages, &mut log).await?;
        counts.generated = generated.len();
        counts.failed_batches = failed_batches;

        let verified = if self.options.verify_answers {
            let (passed, rejected) = self.verify(generated, &mut log).await?;
            counts.passed = passed.len();
            self.revise(passed, rejected, &mut counts).await?
        } else {
            counts.passed = generated.len();
            generated
        };

        let before = verified.len();
        let collapsed = collapse_exact(verified);
        counts.exact_duplicates = before - collapsed.len();
        let mut questions = self.deduplicate(collapsed, &mut log).await?;
        counts.kept = questions.len();

        if self.options.humanize {
            for record in &mut questions {
                record.question = self.humanizer.process(&record.question);
                record.answer = self.humanizer.process(&record.answer);
            }
        }

        let stats = QaStats::tally(&questions, counts);
        tracing::info!(
            selected = stats.phases.selected,
            generated = stats.phases.generated,
            passed = stats.phases.passed,
            kept = stats.phases.kept,
            sessions = log.sessions,
            "Q&A generation complete"
        );
        Ok(QaResult {
            questions,
            stats,
            trace: log.trace,
            iterations: log.iterations,
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd: log.cost_usd,
        })
    }

    fn session_options(&self, phase: &str, guidance: &str, spec: OutputSpec) -> QueryOptions {
        let mut options = QueryOptions::new()
            .with_spec(spec)
            .with_guidance(guidance)
            .with_label(phase)
            .with_max_iterations(self.options.max_iterations)
            .with_refine(false)
            .with_learn(false)
            .with_debug(self.options.debug);
        if let Some(model) = &self.options.model {
            options = options.with_model(model.clone());
        }
        options
    }

    async fn session(&self, phase: &str, task: &str, options: QueryOptions) -> DelveResult<QueryResult> {
        self.env
            .query(task, options)
            .await
            .map_err(|err| phase_failed(phase, err.to_string()))
    }

    // ========================================================================
    // PHASE 1: SELECTION
    // ========================================================================

    async fn select(&self, log: &mut PhaseLog) -> DelveResult<Vec<Passage>> {
        let target = self.options.selection_target();
        let corpus = self.env.corpus()?;
        let mut selected: Vec<Passage> = Vec::new();
        let mut seen = BTreeSet::new();

        for round in 0..self.options.selection_rounds {
            let wanted = target - selected.len();
            let options = self
                .session_options(SELECTION, prompts::SELECTION_GUIDANCE, prompts::selection_spec())
                .with_context(prompts::selection_context(wanted, &selected));
            let result = self.session(SELECTION, &prompts::selection_task(wanted), options).await?;
            log.absorb(&result);

            let mut added = 0;
            for passage in parse_passages(&result) {
                if corpus.get_page(&passage.document_id, passage.page)?.is_none() {
                    tracing::debug!(document = %passage.document_id, page = passage.page, "Selected page not in corpus");
                    continue;
                }
                if seen.insert(passage.key()) {
                    selected.push(passage);
                    added += 1;
                }
            }
            tracing::info!(phase = SELECTION, round, added, total = selected.len(), target, "Selection round complete");
            if selected.len() >= target || added == 0 {
                break;
            }
        }

        selected.truncate(target);
        if selected.is_empty() {
            return Err(PipelineError::EmptyPhase {
                phase: SELECTION.to_string(),
            }
            .into());
        }
        Ok(selected)
    }

    // ========================================================================
    // PHASE 2: GENERATION
    // ========================================================================

    /// Returns the generated records and the number of failed batches.
    async fn generate(&self, passages: &[Passage], log: &mut PhaseLog) -> DelveResult<(Vec<QuestionRecord>, usize)> {
        let corpus = self.env.corpus()?;
        let difficulties = assign_slots(&self.options.difficulty_mix, passages.len());
        let categories = assign_slots(&self.options.category_mix, passages.len());
        let mut items = Vec::with_capacity(passages.len());
        for (i, passage) in passages.iter().enumerate() {
            let page = corpus.get_page(&passage.document_id, passage.page)?;
            items.push((
                passage.clone(),
                page,
                difficulties.get(i).copied().unwrap_or(Difficulty::Medium),
                categories.get(i).copied().unwrap_or(Category::Factual),
            ));
        }

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let batches = items.chunks(self.options.batch_size).enumerate().map(|(batch, chunk)| {
            let semaphore = Arc::clone(&semaphore);
            let options = self
                .session_options(GENERATION, prompts::GENERATION_GUIDANCE, prompts::generation_spec())
                .with_context(prompts::generation_context(chunk));
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(err) => return (batch, Err(phase_failed(GENERATION, err.to_string()))),
                };
                tracing::debug!(phase = GENERATION, batch, "Batch started");
                (batch, self.session(GENERATION, prompts::GENERATION_TASK, options).await)
            }
        });
        let outcomes: Vec<(usize, DelveResult<QueryResult>)> = join_all(batches).await;

        let mut records = Vec::new();
        let mut failed = 0;
        for (batch, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    log.absorb(&result);
                    if !result.is_finalized() {
                        tracing::warn!(phase = GENERATION, batch, status = ?result.status, "Batch did not finalize, skipping");
                        failed += 1;
                        continue;
                    }
                    let batch_records = parse_records(&result.answer);
                    tracing::info!(phase = GENERATION, batch, records = batch_records.len(), "Batch complete");
                    records.extend(batch_records);
                }
                Err(err) => {
                    tracing::warn!(phase = GENERATION, batch, error = %err, "Batch failed, skipping");
                    failed += 1;
                }
            }
        }

        if records.is_empty() {
            return Err(PipelineError::EmptyPhase {
                phase: GENERATION.to_string(),
            }
            .into());
        }
        Ok((records, failed))
    }

    // ========================================================================
    // PHASE 3: VERIFICATION
    // ========================================================================

    /// Split records into passed and rejected. Verdicts are set here and
    /// nowhere else; a record the session gave no verdict stays without one.
    async fn verify(
        &self,
        mut records: Vec<QuestionRecord>,
        log: &mut PhaseLog,
    ) -> DelveResult<(Vec<QuestionRecord>, Vec<QuestionRecord>)> {
        let options = self
            .session_options(VERIFICATION, prompts::VERIFICATION_GUIDANCE, prompts::verification_spec())
            .with_context(prompts::numbered_records(&records, true));
        let result = self.session(VERIFICATION, prompts::VERIFICATION_TASK, options).await?;
        log.absorb(&result);
        if !result.is_finalized() {
            return Err(phase_failed(
                VERIFICATION,
                format!("session ended without verdicts ({:?})", result.status),
            ));
        }

        for (index, verdict) in parse_verdicts(&result.answer) {
            if let Some(record) = records.get_mut(index) {
                if record.verdict.is_none() {
                    record.verdict = Some(verdict);
                }
            }
        }

        let (passed, rejected): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.verdict == Some(Verdict::Pass));
        tracing::info!(
            phase = VERIFICATION,
            passed = passed.len(),
            rejected = rejected.len(),
            "Verification complete"
        );
        Ok((passed, rejected))
    }

    async fn revise(
        &self,
        mut passed: Vec<QuestionRecord>,
        rejected: Vec<QuestionRecord>,
        counts: &mut PhaseCounts,
    ) -> DelveResult<Vec<QuestionRecord>> {
        let Some(hook) = &self.revision else {
            return Ok(passed);
        };
        if rejected.is_empty() {
            return Ok(passed);
        }
        let revised = hook.revise(&self.env, rejected).await?;
        tracing::info!(phase = VERIFICATION, revised = revised.len(), "Revision hook returned records");
        counts.revised = revised.len();
        passed.extend(revised);
        Ok(passed)
    }

    // ========================================================================
    // PHASE 4: DEDUPLICATION
    // ========================================================================

    /// Keep the records the session names. Any failure of the session keeps
    /// the input as it is.
    async fn deduplicate(&self, records: Vec<QuestionRecord>, log: &mut PhaseLog) -> DelveResult<Vec<QuestionRecord>> {
        if records.len() < 2 {
            return Ok(records);
        }
        let options = self
            .session_options(DEDUPLICATION, prompts::DEDUP_GUIDANCE, prompts::dedup_spec())
            .with_context(prompts::numbered_records(&records, false));
        let result = match self.session(DEDUPLICATION, prompts::DEDUP_TASK, options).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(phase = DEDUPLICATION, error = %err, "Deduplication failed, keeping all records");
                return Ok(records);
            }
        };
        log.absorb(&result);
        if !result.is_finalized() {
            tracing::warn!(phase = DEDUPLICATION, status = ?result.status, "Deduplication did not finalize, keeping all records");
            return Ok(records);
        }

        let before = records.len();
        let kept = apply_keep_set(records, &keep_indices(&result.answer));
        tracing::info!(phase = DEDUPLICATION, before, after = kept.len(), "Deduplication complete");
        Ok(kept)
    }
}

// ============================================================================
// ANSWER PARSING
// ============================================================================

fn phase_failed(phase: &str, reason: String) -> DelveError {
    PipelineError::PhaseFailed {
        phase: phase.to_string(),
        reason,
    }
    .into()
}

fn page_number(value: Option<&Value>) -> Option<u32> {
    let n = value?.as_f64()?;
    (n >= 1.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX)).then_some(n as u32)
}

fn parse_passages(result: &QueryResult) -> Vec<Passage> {
    if !result.is_finalized() {
        tracing::warn!(phase = SELECTION, status = ?result.status, "Selection session did not finalize");
        return Vec::new();
    }
    result
        .answer
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(|item| {
            let document = item.get_str("document")?;
            let page = page_number(item.get("page"))?;
            Some(Passage::new(document, page, item.get_str("rationale").unwrap_or_default()))
        })
        .collect()
}

fn parse_records(answer: &Value) -> Vec<QuestionRecord> {
    answer
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(|item| {
            Some(QuestionRecord::new(
                item.get_str("question")?,
                item.get_str("answer")?,
                item.get_str("evidence")?,
                item.get_str("document")?,
                page_number(item.get("page"))?,
                item.get_str("difficulty")?.parse::<Difficulty>().ok()?,
                item.get_str("category")?.parse::<Category>().ok()?,
            ))
        })
        .collect()
}

fn parse_verdicts(answer: &Value) -> Vec<(usize, Verdict)> {
    answer
        .as_list()
        .unwrap_or_default()
        .iter()
        .filter_map(|item| {
            let index = item.get("index")?.as_f64()?;
            if index < 0.0 || index.fract() != 0.0 {
                return None;
            }
            let verdict = item.get_str("verdict")?.parse::<Verdict>().ok()?;
            Some((index as usize, verdict))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records_skips_incomplete_items() {
        let answer = Value::List(vec![
            Value::map([
                ("question", Value::from("What is the base rent under the office lease?")),
                ("answer", Value::from("8,500 USD per month")),
                ("evidence", Value::from("Base rent is 8,500 USD per month")),
                ("document", Value::from("lease")),
                ("page", Value::Number(3.0)),
                ("difficulty", Value::from("easy")),
                ("category", Value::from("numerical")),
            ]),
            Value::map([("question", Value::from("Missing everything else"))]),
        ]);
        let records = parse_records(&answer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page, 3);
        assert_eq!(records[0].verdict, None);
    }

    #[test]
    fn test_parse_verdicts() {
        let answer = Value::List(vec![
            Value::map([("index", Value::Number(0.0)), ("verdict", Value::from("pass"))]),
            Value::map([("index", Value::Number(1.0)), ("verdict", Value::from("needs-revision"))]),
            Value::map([("index", Value::Number(-1.0)), ("verdict", Value::from("pass"))]),
            Value::map([("index", Value::Number(2.0)), ("verdict", Value::from("maybe"))]),
        ]);
        assert_eq!(
            parse_verdicts(&answer),
            vec![(0, Verdict::Pass), (1, Verdict::NeedsRevision)]
        );
    }

    #[test]
    fn test_page_number_bounds() {
        assert_eq!(page_number(Some(&Value::Number(4.0))), Some(4));
        assert_eq!(page_number(Some(&Value::Number(0.0))), None);
        assert_eq!(page_number(Some(&Value::Number(2.5))), None);
        assert_eq!(page_number(None), None);
    }
}
