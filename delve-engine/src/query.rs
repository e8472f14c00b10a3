//! The `query` entry point.

use crate::environment::Environment;
use crate::options::{QueryOptions, QueryResult, QueryStatus};
use crate::session::Session;
use delve_context::Conversation;
use delve_core::{ConfigError, DelveError, DelveResult, GuardVerdict, HistoryRole, QueryError};

impl Environment {
    /// Answer `question` against this environment's corpus.
    ///
    /// Configuration problems fail before any model call. Once the session
    /// starts, every outcome short of a collaborator fault or the deadline
    /// comes back as a `QueryResult` with status flags.
    pub async fn query(&self, question: &str, options: QueryOptions) -> DelveResult<QueryResult> {
        self.ensure_active()?;
        options.validate()?;
        if question.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "question".to_string(),
            }
            .into());
        }
        if let Some(guard) = self.input_guard() {
            if let GuardVerdict::Reject { reason } = guard.screen(question) {
                tracing::warn!(%reason, "Question rejected by input guard");
                return Err(DelveError::Query(QueryError::InputRejected { reason }));
            }
        }

        let mut session = Session::start(self.clone(), question, options.clone())?;
        tracing::info!(
            session_id = %session.id,
            max_iterations = options.max_iterations,
            refine = options.refine,
            plan = options.plan,
            label = options.label.as_deref().unwrap_or(""),
            "Query started"
        );

        let mut base = Conversation::new(question);
        if let Some(context) = &options.context {
            base = base.with_context(context.clone());
        }
        if options.plan {
            let plan = session.plan(&base).await?;
            base.set_plan(plan.clone());
            session.plan = Some(plan);
        }

        let first = session.run_loop(base.clone()).await?;
        if let Some(plan) = &session.plan {
            base.set_plan(plan.clone());
        }
        let finalized = first.status == QueryStatus::Finalized;
        let status = first.status.clone();

        let (answer, converged, score, refinements) = if options.refine && finalized {
            let outcome = session.refine(first, &base).await?;
            (outcome.answer, outcome.converged, Some(outcome.score), outcome.records)
        } else {
            (first.answer, finalized, None, Vec::new())
        };

        let verified_claims = if options.verify_claims && finalized {
            let claims = session.claims.snapshot();
            Some(session.verify_claims(claims).await?)
        } else {
            None
        };

        if options.learn && finalized {
            let memory = self.memory();
            memory.remember(HistoryRole::User, question)?;
            memory.remember(HistoryRole::Assistant, answer.to_readable())?;
        }

        let result = QueryResult {
            session_id: session.id,
            answer,
            status,
            trace: std::mem::take(&mut session.trace),
            iterations: session.iterations,
            converged,
            score,
            refinements,
            verified_claims,
            plan: session.plan.clone(),
            duration_ms: session.elapsed_ms(),
            cost_usd: session.cost_usd,
        };
        tracing::info!(
            session_id = %result.session_id,
            iterations = result.iterations,
            converged = result.converged,
            finalized = result.is_finalized(),
            duration_ms = result.duration_ms,
            cost_usd = result.cost_usd,
            "Query complete"
        );
        Ok(result)
    }
}
