//! Subcommand execution.

use crate::cli::{CorpusArgs, GenerateQaArgs, QueryArgs};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::ingest::load_directory;
use delve_engine::{render_trace, Environment, QueryStatus, RenderOptions};
use delve_llm::providers::{AnthropicCompletionProvider, OpenAICompletionProvider};
use delve_llm::CompletionProvider;
use delve_qa::generate_qa;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Completion providers whose API keys are present in the environment.
pub fn providers_from_env() -> Vec<Arc<dyn CompletionProvider>> {
    let mut providers: Vec<Arc<dyn CompletionProvider>> = Vec::new();
    if let Some(provider) = AnthropicCompletionProvider::from_env() {
        providers.push(Arc::new(provider));
    }
    if let Some(provider) = OpenAICompletionProvider::from_env() {
        providers.push(Arc::new(provider));
    }
    providers
}

/// Build an environment over the corpus directory named by the arguments or config.
pub fn build_environment(
    config: &CliConfig,
    args: &CorpusArgs,
    providers: Vec<Arc<dyn CompletionProvider>>,
) -> CliResult<Environment> {
    if providers.is_empty() {
        return Err(CliError::NoProvider);
    }
    let mut builder = Environment::builder(config.engine_config());
    if let Some(id) = &config.provider {
        if !providers.iter().any(|p| p.provider_id() == id) {
            return Err(CliError::UnknownProvider(id.clone()));
        }
        builder = builder.default_provider(id.clone());
    }
    for provider in providers {
        builder = builder.provider(provider);
    }
    let env = builder.build()?;

    let dir = corpus_dir(config, args);
    let documents = load_directory(&dir)?;
    env.ingest(documents)?;
    Ok(env)
}

fn corpus_dir(config: &CliConfig, args: &CorpusArgs) -> PathBuf {
    args.corpus
        .clone()
        .or_else(|| config.corpus_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub async fn run_query(env: &Environment, config: &CliConfig, args: &QueryArgs, out: &mut impl Write) -> CliResult<()> {
    let mut options = config.query_options().with_debug(args.corpus.debug);
    if let Some(model) = &args.corpus.model {
        options = options.with_model(model.clone());
    }
    if let Some(n) = args.max_iterations {
        options = options.with_max_iterations(n);
    }
    if args.no_refine {
        options = options.with_refine(false);
    }
    if args.plan {
        options = options.with_plan(true);
    }
    if args.verify_claims {
        options = options.with_verify_claims(true);
    }

    let result = env.query(&args.question, options).await?;

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?;
        return Ok(());
    }
    writeln!(out, "{}", result.answer.to_readable())?;
    match &result.status {
        QueryStatus::Finalized => {}
        QueryStatus::Exhausted => writeln!(out, "(no final answer after {} iterations)", result.iterations)?,
        QueryStatus::ParseError { message } => writeln!(out, "(answer did not match the format: {})", message)?,
    }
    if let Some(score) = result.score {
        writeln!(out, "score: {:.2} converged: {}", score, result.converged)?;
    }
    if let Some(claims) = &result.verified_claims {
        for claim in claims {
            let mark = match claim.verified {
                Some(true) => "verified",
                Some(false) => "unverified",
                None => "unchecked",
            };
            writeln!(out, "[{}] {} ({})", mark, claim.text, claim.source)?;
        }
    }
    if args.trace {
        let render = if args.verbose_trace {
            RenderOptions::verbose()
        } else {
            RenderOptions::default()
        };
        write!(out, "\n{}", render_trace(&result.trace, &render))?;
    }
    Ok(())
}

pub async fn run_generate_qa(
    env: &Environment,
    config: &CliConfig,
    args: &GenerateQaArgs,
    out: &mut impl Write,
) -> CliResult<()> {
    let mut options = config.qa_options().with_debug(args.corpus.debug);
    if let Some(count) = args.count {
        options.count = count;
    }
    if let Some(model) = &args.corpus.model {
        options = options.with_model(model.clone());
    }
    if args.no_verify {
        options = options.with_verify_answers(false);
    }
    if args.humanize {
        options = options.with_humanize(true);
    }

    let result = generate_qa(env, &options).await?;
    let dataset = serde_json::json!({
        "questions": result.questions,
        "stats": result.stats,
        "iterations": result.iterations,
        "duration_ms": result.duration_ms,
        "cost_usd": result.cost_usd,
    });
    let text = serde_json::to_string_pretty(&dataset)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, text)?;
            tracing::info!(path = %path.display(), questions = result.questions.len(), "Dataset written");
            writeln!(out, "{} questions written to {}", result.questions.len(), path.display())?;
        }
        None => writeln!(out, "{}", text)?,
    }
    Ok(())
}
