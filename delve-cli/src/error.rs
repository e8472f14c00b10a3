//! Error types for the CLI.

use crate::config::ConfigFileError;
use delve_core::DelveError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigFileError),
    #[error(transparent)]
    Delve(#[from] DelveError),
    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("No completion provider configured (set ANTHROPIC_API_KEY or OPENAI_API_KEY)")]
    NoProvider,
    #[error("Unknown provider '{0}' (expected anthropic or openai)")]
    UnknownProvider(String),
    #[error("No .txt or .md documents found in {}", .0.display())]
    EmptyCorpus(PathBuf),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

pub type CliResult<T> = Result<T, CliError>;
