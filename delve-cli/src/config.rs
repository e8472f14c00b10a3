//! Configuration file for the `delve` binary.
//!
//! Every section is optional. A missing `[engine]` section falls back to
//! `EngineConfig::from_env()`.

use delve_core::EngineConfig;
use delve_engine::QueryOptions;
use delve_qa::QaOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Directory of documents used when `--corpus` is not given.
    pub corpus_dir: Option<PathBuf>,
    /// `anthropic` or `openai`. Defaults to whichever key is set, Anthropic first.
    pub provider: Option<String>,
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub qa: QaSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySection {
    pub max_iterations: Option<u32>,
    pub max_refinements: Option<u32>,
    pub min_score: Option<f64>,
    pub refine: Option<bool>,
    pub learn: Option<bool>,
    pub plan: Option<bool>,
    pub verify_claims: Option<bool>,
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QaSection {
    pub count: Option<usize>,
    pub verify_answers: Option<bool>,
    pub oversample: Option<f64>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub selection_rounds: Option<u32>,
    pub max_iterations: Option<u32>,
    pub humanize: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CliConfig {
    /// Load from `path`, or defaults when no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigFileError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(source)?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_else(EngineConfig::from_env)
    }

    /// Query options from the `[query]` section on top of the defaults.
    pub fn query_options(&self) -> QueryOptions {
        let q = &self.query;
        let mut options = QueryOptions::new();
        if let Some(n) = q.max_iterations {
            options = options.with_max_iterations(n);
        }
        if let Some(n) = q.max_refinements {
            options = options.with_max_refinements(n);
        }
        if let Some(score) = q.min_score {
            options = options.with_min_score(score);
        }
        if let Some(refine) = q.refine {
            options = options.with_refine(refine);
        }
        if let Some(learn) = q.learn {
            options = options.with_learn(learn);
        }
        if let Some(plan) = q.plan {
            options = options.with_plan(plan);
        }
        if let Some(verify) = q.verify_claims {
            options = options.with_verify_claims(verify);
        }
        if let Some(secs) = q.deadline_secs {
            options = options.with_deadline(std::time::Duration::from_secs(secs));
        }
        options
    }

    /// Pipeline options from the `[qa]` section on top of the defaults.
    pub fn qa_options(&self) -> QaOptions {
        let q = &self.qa;
        let defaults = QaOptions::default();
        QaOptions::new(q.count.unwrap_or(defaults.count))
            .with_verify_answers(q.verify_answers.unwrap_or(defaults.verify_answers))
            .with_oversample(q.oversample.unwrap_or(defaults.oversample))
            .with_batch_size(q.batch_size.unwrap_or(defaults.batch_size))
            .with_concurrency(q.concurrency.unwrap_or(defaults.concurrency))
            .with_selection_rounds(q.selection_rounds.unwrap_or(defaults.selection_rounds))
            .with_max_iterations(q.max_iterations.unwrap_or(defaults.max_iterations))
            .with_humanize(q.humanize.unwrap_or(defaults.humanize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = CliConfig::from_toml("").unwrap();
        assert!(config.corpus_dir.is_none());
        assert_eq!(config.query_options(), QueryOptions::new());
        assert_eq!(config.qa_options(), QaOptions::default());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = CliConfig::from_toml(
            r#"
corpus_dir = "./contracts"
provider = "openai"

[engine]
default_model = "gpt-4o"
learning_primer_count = 5

[query]
max_iterations = 8
refine = false

[qa]
count = 20
batch_size = 4
"#,
        )
        .unwrap();
        assert_eq!(config.corpus_dir, Some(PathBuf::from("./contracts")));
        assert_eq!(config.engine_config().default_model, "gpt-4o");
        assert_eq!(config.engine_config().learning_primer_count, 5);
        let query = config.query_options();
        assert_eq!(query.max_iterations, 8);
        assert!(!query.refine);
        assert!(query.learn);
        let qa = config.qa_options();
        assert_eq!(qa.count, 20);
        assert_eq!(qa.batch_size, 4);
        assert!(qa.verify_answers);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(matches!(
            CliConfig::from_toml("corpus = \"./docs\""),
            Err(ConfigFileError::Parse(_))
        ));
        assert!(CliConfig::from_toml("[query]\nmax_iters = 3").is_err());
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = CliConfig::from_path(Path::new("/nonexistent/delve.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/delve.toml"));
    }
}
