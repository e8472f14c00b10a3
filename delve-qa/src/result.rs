//! Pipeline output.

use delve_core::{Category, Difficulty, QuestionRecord, TraceEntry};
use delve_engine::QueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record counts after each phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub selected: usize,
    pub generated: usize,
    pub failed_batches: usize,
    /// Records with verdict pass. Equals `generated` when verification is off.
    pub passed: usize,
    /// Records returned by the revision hook.
    pub revised: usize,
    pub exact_duplicates: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaStats {
    pub by_difficulty: BTreeMap<Difficulty, usize>,
    pub by_category: BTreeMap<Category, usize>,
    pub phases: PhaseCounts,
}

impl QaStats {
    pub(crate) fn tally(questions: &[QuestionRecord], phases: PhaseCounts) -> Self {
        let mut stats = Self {
            phases,
            ..Self::default()
        };
        for record in questions {
            *stats.by_difficulty.entry(record.difficulty).or_default() += 1;
            *stats.by_category.entry(record.category).or_default() += 1;
        }
        stats
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResult {
    pub questions: Vec<QuestionRecord>,
    pub stats: QaStats,
    /// Entries of every phase session, labelled with the phase name.
    pub trace: Vec<TraceEntry>,
    /// Iterations summed over every phase session.
    pub iterations: u32,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

/// Trace, iteration and cost totals across phase sessions.
#[derive(Debug, Default)]
pub(crate) struct PhaseLog {
    pub trace: Vec<TraceEntry>,
    pub iterations: u32,
    pub cost_usd: f64,
    pub sessions: usize,
}

impl PhaseLog {
    pub fn absorb(&mut self, result: &QueryResult) {
        self.trace.extend(result.trace.iter().cloned());
        self.iterations += result.iterations;
        self.cost_usd += result.cost_usd;
        self.sessions += 1;
    }
}
