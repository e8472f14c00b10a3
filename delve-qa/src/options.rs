//! Pipeline options.

use delve_core::{Category, ConfigError, DelveResult, Difficulty};
use std::collections::BTreeMap;

/// Options for `generate_qa`.
#[derive(Debug, Clone, PartialEq)]
pub struct QaOptions {
    /// Records wanted in the final set.
    pub count: usize,
    /// Relative weights; normalized at allocation time.
    pub difficulty_mix: BTreeMap<Difficulty, f64>,
    pub category_mix: BTreeMap<Category, f64>,
    pub model: Option<String>,
    pub verify_answers: bool,
    pub debug: bool,
    /// Passages selected per wanted record.
    pub oversample: f64,
    pub batch_size: usize,
    /// Generation sessions in flight at once.
    pub concurrency: usize,
    pub selection_rounds: u32,
    /// Iteration cap for every phase session.
    pub max_iterations: u32,
    /// Strip stock assistant phrasing from the final questions and answers.
    pub humanize: bool,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self {
            count: 10,
            difficulty_mix: BTreeMap::from([
                (Difficulty::Easy, 0.3),
                (Difficulty::Medium, 0.5),
                (Difficulty::Hard, 0.2),
            ]),
            category_mix: BTreeMap::from([
                (Category::Factual, 0.4),
                (Category::Conceptual, 0.2),
                (Category::Procedural, 0.15),
                (Category::Comparative, 0.1),
                (Category::Numerical, 0.15),
            ]),
            model: None,
            verify_answers: true,
            debug: false,
            oversample: 1.5,
            batch_size: 5,
            concurrency: 4,
            selection_rounds: 2,
            max_iterations: 12,
            humanize: false,
        }
    }
}

impl QaOptions {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn with_difficulty_mix(mut self, mix: impl IntoIterator<Item = (Difficulty, f64)>) -> Self {
        self.difficulty_mix = mix.into_iter().collect();
        self
    }

    pub fn with_category_mix(mut self, mix: impl IntoIterator<Item = (Category, f64)>) -> Self {
        self.category_mix = mix.into_iter().collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_verify_answers(mut self, verify: bool) -> Self {
        self.verify_answers = verify;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_oversample(mut self, oversample: f64) -> Self {
        self.oversample = oversample;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_selection_rounds(mut self, rounds: u32) -> Self {
        self.selection_rounds = rounds;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_humanize(mut self, humanize: bool) -> Self {
        self.humanize = humanize;
        self
    }

    /// Passages the selection phase aims for.
    pub fn selection_target(&self) -> usize {
        (self.count as f64 * self.oversample).ceil() as usize
    }

    pub fn validate(&self) -> DelveResult<()> {
        if self.count == 0 {
            return Err(invalid("count", "0", "must be at least 1"));
        }
        if !self.oversample.is_finite() || self.oversample < 1.0 {
            return Err(invalid("oversample", self.oversample, "must be at least 1.0"));
        }
        for (field, value) in [("batch_size", self.batch_size), ("concurrency", self.concurrency)] {
            if value == 0 {
                return Err(invalid(field, value, "must be at least 1"));
            }
        }
        if self.selection_rounds == 0 {
            return Err(invalid("selection_rounds", 0, "must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", 0, "must be at least 1"));
        }
        validate_mix("difficulty_mix", self.difficulty_mix.values())?;
        validate_mix("category_mix", self.category_mix.values())?;
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> delve_core::DelveError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn validate_mix<'a>(field: &str, weights: impl Iterator<Item = &'a f64>) -> DelveResult<()> {
    let mut total = 0.0;
    for weight in weights {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(invalid(field, weight, "weights must be finite and non-negative"));
        }
        total += weight;
    }
    if total <= 0.0 {
        return Err(invalid(field, total, "weights must sum to more than zero"));
    }
    Ok(())
}
