//! Per-query session state and the iteration loop.
//!
//! A session owns its sandbox, conversation and trace slice. The only
//! state it shares with other sessions lives in the Environment.

use crate::capabilities::{self, ClaimLog, SessionBindings};
use crate::extract::extract_code;
use crate::options::{QueryOptions, QueryStatus};
use crate::prompts;
use crate::Environment;
use delve_context::{estimate_tokens, truncate_with_marker, Conversation};
use delve_core::{
    DelveError, DelveResult, EntityId, ExecutionOutcome, QueryError, TraceEntry, TracePhase,
    Value,
};
use delve_llm::{Completion, Message};
use delve_sandbox::{CapabilityRegistry, Sandbox};
use std::time::Duration;
use tokio::time::Instant;

/// Log at info when the session runs in debug mode, else at debug.
macro_rules! session_event {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}
pub(crate) use session_event;

const MAX_PLAN_CHARS: usize = 2_000;

/// How one run of the iteration loop ended.
#[derive(Debug, Clone)]
pub(crate) struct LoopOutcome {
    pub answer: Value,
    pub status: QueryStatus,
    pub iterations: u32,
    /// Observations of successful executions, oldest first.
    pub observations: Vec<String>,
}

pub(crate) struct Session {
    pub env: Environment,
    pub id: EntityId,
    pub question: String,
    pub options: QueryOptions,
    pub claims: ClaimLog,
    pub registry: CapabilityRegistry,
    pub system: String,
    pub trace: Vec<TraceEntry>,
    /// Iterations completed across every loop run of this session.
    pub iterations: u32,
    pub cost_usd: f64,
    pub started: Instant,
    deadline: Option<Instant>,
    pub plan: Option<String>,
}

impl Session {
    /// INIT: bind capabilities, prime with learnings and assemble the system prompt.
    pub fn start(env: Environment, question: &str, options: QueryOptions) -> DelveResult<Self> {
        let claims = ClaimLog::new();
        let mut registry = env.registry()?;
        capabilities::install(
            &mut registry,
            &SessionBindings {
                corpus: env.corpus()?,
                memory: env.memory().clone(),
                claims: claims.clone(),
                question: question.to_string(),
                memory_writes: options.learn,
            },
        );

        let learnings = if options.learn {
            env.memory()
                .learning_search(question, env.config().learning_primer_count)?
        } else {
            Vec::new()
        };
        let sections = prompts::system_sections(
            &registry.describe(),
            options.spec.as_ref(),
            &learnings,
            options.guidance.as_deref(),
        );
        let system = prompts::assemble_system(sections, context_budget(&env, &options) / 2);

        let started = Instant::now();
        Ok(Self {
            deadline: options.deadline.map(|d| started + d),
            id: delve_core::new_entity_id(),
            question: question.to_string(),
            claims,
            registry,
            system,
            trace: Vec::new(),
            iterations: 0,
            cost_usd: 0.0,
            started,
            plan: None,
            env,
            options,
        })
    }

    pub fn debug(&self) -> bool {
        self.options.debug
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // === Deadline ===

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn deadline_error(&self) -> DelveError {
        DelveError::Query(QueryError::DeadlineExceeded {
            deadline_ms: self
                .options
                .deadline
                .map_or(0, |d| d.as_millis() as u64),
            iterations: self.iterations,
        })
    }

    /// Fail if the deadline has passed. Called between iterations.
    pub fn check_deadline(&self) -> DelveResult<()> {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Err(self.deadline_error()),
            _ => Ok(()),
        }
    }

    // === Collaborators ===

    /// One completion call, bounded by the remaining deadline.
    ///
    /// Completion failures are scoped to this session and named by phase.
    pub async fn complete(
        &mut self,
        phase: TracePhase,
        system: &str,
        messages: Vec<Message>,
    ) -> DelveResult<Completion> {
        let call = self
            .env
            .complete(self.options.model.as_deref(), system, messages);
        let result = match self.remaining() {
            Some(remaining) => match tokio::time::timeout(remaining, call).await {
                Ok(result) => result,
                Err(_) => return Err(self.deadline_error()),
            },
            None => call.await,
        };
        let completion = result.map_err(|err| match err {
            DelveError::Llm(llm) => {
                tracing::warn!(session_id = %self.id, %phase, error = %llm, "Completion failed");
                DelveError::Query(QueryError::Collaborator {
                    phase: phase.to_string(),
                    reason: llm.to_string(),
                })
            }
            other => other,
        })?;
        self.cost_usd += completion.cost_usd;
        Ok(completion)
    }

    /// Append to the environment trace and this session's slice of it.
    pub fn record(&mut self, mut entry: TraceEntry) -> DelveResult<()> {
        if let Some(label) = &self.options.label {
            entry = entry.with_label(label.clone());
        }
        self.env.trace().append(entry.clone())?;
        self.trace.push(entry);
        Ok(())
    }

    // === Planning ===

    /// PLANNING: one call for a short strategy. Returns the plan text.
    pub async fn plan(&mut self, conversation: &Conversation) -> DelveResult<String> {
        self.check_deadline()?;
        let system = prompts::plan_system(&self.registry.describe());
        let messages = conversation.messages();
        let prompt = messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let started = Instant::now();
        let completion = self.complete(TracePhase::Plan, &system, messages).await?;
        let plan = truncate_with_marker(completion.text.trim(), MAX_PLAN_CHARS);

        let entry = TraceEntry::new(self.id, 0, TracePhase::Plan, prompt, completion.text)
            .with_outcome(ExecutionOutcome::Plan {
                text: plan.clone(),
                stdout: String::new(),
            })
            .with_duration_ms(started.elapsed().as_millis() as u64);
        self.record(entry)?;
        session_event!(self.debug(), session_id = %self.id, plan_chars = plan.len(), "Plan recorded");
        Ok(plan)
    }

    // === Iteration ===

    /// ITERATING until FINALIZED or EXHAUSTED.
    ///
    /// Sandbox errors and missing code are fed back as the next turn. A
    /// finalized value that fails the output spec gets one corrective turn, even
    /// past the iteration cap; a second failure ends with `ParseError`.
    pub async fn run_loop(&mut self, mut conversation: Conversation) -> DelveResult<LoopOutcome> {
        let limits = self.env.config().sandbox.clone();
        let max_observation = limits.max_observation_chars;
        let conversation_budget =
            context_budget(&self.env, &self.options).saturating_sub(estimate_tokens(&self.system));
        let system = self.system.clone();
        let mut sandbox = Sandbox::new(self.registry.clone(), limits);

        let mut cap = self.options.max_iterations;
        let mut completed: u32 = 0;
        let mut parse_retried = false;
        let mut last_value: Option<Value> = None;
        let mut observations = Vec::new();

        while completed < cap {
            self.check_deadline()?;
            let dropped = conversation.trim_to_budget(conversation_budget);
            if dropped > 0 {
                tracing::debug!(session_id = %self.id, dropped, "Trimmed conversation to budget");
            }

            let messages = conversation.messages();
            let prompt = messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let started = Instant::now();
            let completion = self.complete(TracePhase::Iterate, &system, messages).await?;
            completed += 1;
            self.iterations += 1;
            let response = completion.text;
            let entry = TraceEntry::new(
                self.id,
                self.iterations,
                TracePhase::Iterate,
                prompt,
                response.clone(),
            );

            let Some(code) = extract_code(&response) else {
                self.record(
                    entry
                        .with_outcome(ExecutionOutcome::NoCode)
                        .with_duration_ms(started.elapsed().as_millis() as u64),
                )?;
                session_event!(self.debug(), session_id = %self.id, iteration = completed, "No code in response");
                conversation.push_exchange(response, prompts::NO_CODE_FEEDBACK);
                continue;
            };

            let mut result = sandbox.execute(&code);
            let outcome = result.outcome();
            session_event!(
                self.debug(),
                session_id = %self.id,
                iteration = completed,
                outcome = outcome.kind(),
                fuel_used = result.fuel_used,
                "Iteration complete"
            );
            self.record(
                entry
                    .with_code(Some(code))
                    .with_outcome(outcome)
                    .with_duration_ms(started.elapsed().as_millis() as u64),
            )?;

            if let Some(plan) = &result.plan {
                conversation.set_plan(plan.clone());
                self.plan = Some(plan.clone());
            }

            if let Some(value) = result.final_value.take() {
                let Some(spec) = self.options.spec.clone() else {
                    return Ok(LoopOutcome {
                        answer: value,
                        status: QueryStatus::Finalized,
                        iterations: completed,
                        observations,
                    });
                };
                match self.env.parser().parse(&spec, &value) {
                    Ok(parsed) => {
                        return Ok(LoopOutcome {
                            answer: parsed,
                            status: QueryStatus::Finalized,
                            iterations: completed,
                            observations,
                        })
                    }
                    Err(err) if !parse_retried => {
                        parse_retried = true;
                        cap = cap.max(completed + 1);
                        tracing::warn!(
                            session_id = %self.id,
                            iteration = completed,
                            error = %err,
                            "Final value failed the answer format, retrying once"
                        );
                        conversation.push_exchange(response, prompts::schema_feedback(&err, &spec, &value));
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(session_id = %self.id, error = %err, "Final value failed the answer format again");
                        return Ok(LoopOutcome {
                            answer: value,
                            status: QueryStatus::ParseError {
                                message: err.to_string(),
                            },
                            iterations: completed,
                            observations,
                        });
                    }
                }
            }

            let observation = prompts::observation(&result, max_observation);
            if !result.is_error() && result.plan.is_none() {
                last_value = Some(result.value);
                observations.push(observation.clone());
            }
            conversation.push_exchange(response, observation);
        }

        session_event!(self.debug(), session_id = %self.id, iterations = completed, "Iteration budget exhausted");
        Ok(LoopOutcome {
            answer: last_value.unwrap_or_default(),
            status: QueryStatus::Exhausted,
            iterations: completed,
            observations,
        })
    }
}

fn context_budget(env: &Environment, options: &QueryOptions) -> usize {
    options
        .max_context_tokens
        .unwrap_or(env.config().context_token_budget)
}
