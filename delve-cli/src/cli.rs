//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Recursive question answering over document collections.
#[derive(Debug, Parser)]
#[command(name = "delve", version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "DELVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Answer one question against a corpus.
    Query(QueryArgs),
    /// Generate a question/answer dataset from a corpus.
    GenerateQa(GenerateQaArgs),
}

#[derive(Debug, Args)]
pub struct CorpusArgs {
    /// Directory of .txt/.md documents (overrides `corpus_dir`).
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Model id, or `provider/model`.
    #[arg(long)]
    pub model: Option<String>,

    /// Log every iteration at info level.
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    pub question: String,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Skip the refinement loop.
    #[arg(long)]
    pub no_refine: bool,

    /// Ask for a research plan before iterating.
    #[arg(long)]
    pub plan: bool,

    /// Verify cited claims against their sources.
    #[arg(long)]
    pub verify_claims: bool,

    /// Print the session trace after the answer.
    #[arg(long)]
    pub trace: bool,

    /// Include prompts and untruncated text in the printed trace.
    #[arg(long, requires = "trace")]
    pub verbose_trace: bool,

    /// Print the whole result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct GenerateQaArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Records wanted in the final set.
    #[arg(long)]
    pub count: Option<usize>,

    /// Skip the verification phase.
    #[arg(long)]
    pub no_verify: bool,

    /// Strip stock assistant phrasing from the records.
    #[arg(long)]
    pub humanize: bool,

    /// Write the dataset here instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}
