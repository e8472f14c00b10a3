//! Integration tests for the CLI commands.
//!
//! Tests verify:
//! - A directory of documents becomes the environment's corpus
//! - `query` prints the answer and, on request, the trace
//! - `generate-qa` writes a JSON dataset
//! - Missing providers and empty corpora are reported

use clap::Parser;
use delve_cli::commands::{build_environment, run_generate_qa, run_query};
use delve_cli::{Cli, CliConfig, CliError, Commands};
use delve_core::Corpus;
use delve_llm::CompletionProvider;
use delve_test_utils::{final_block, ScriptedProvider};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

const CONFIG: &str = r#"
[engine]
default_model = "test-model"

[query]
refine = false
learn = false
"#;

fn corpus_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("msa.txt"),
        "# Master Services Agreement\nEntered into by Acme Corp and Beta LLC.\u{c}# Fees\nAcme Corp pays 12,000 USD monthly.",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("lease.md"),
        "# Office Lease\n\nGamma Properties leases Suite 400 to Acme Corp.\n\nBase rent is 8,500 USD per month.",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
    dir
}

fn providers(provider: &Arc<ScriptedProvider>) -> Vec<Arc<dyn CompletionProvider>> {
    vec![provider.clone() as Arc<dyn CompletionProvider>]
}

fn parse(args: &[&str]) -> Commands {
    Cli::try_parse_from(args).unwrap().command
}

// ============================================================================
// ENVIRONMENT TESTS
// ============================================================================

#[test]
fn test_directory_becomes_corpus() {
    let dir = corpus_dir();
    let provider = Arc::new(ScriptedProvider::empty());
    let config = CliConfig::from_toml(CONFIG).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let Commands::Query(args) = parse(&["delve", "query", "--corpus", &corpus, "q"]) else {
        panic!("expected query");
    };

    let env = build_environment(&config, &args.corpus, providers(&provider)).unwrap();

    let documents = env.corpus().unwrap().list_documents().unwrap();
    let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["lease", "msa"]);
    let msa = documents.iter().find(|d| d.id == "msa").unwrap();
    assert_eq!(msa.title, "Master Services Agreement");
    assert_eq!(msa.page_count, 2);
}

#[test]
fn test_missing_provider_is_reported() {
    let dir = corpus_dir();
    let config = CliConfig::from_toml(CONFIG).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let Commands::Query(args) = parse(&["delve", "query", "--corpus", &corpus, "q"]) else {
        panic!("expected query");
    };

    let result = build_environment(&config, &args.corpus, Vec::new());

    assert!(matches!(result, Err(CliError::NoProvider)));
}

#[test]
fn test_unknown_default_provider_is_reported() {
    let dir = corpus_dir();
    let provider = Arc::new(ScriptedProvider::empty());
    let config = CliConfig::from_toml(&format!("provider = \"openai\"\n{}", CONFIG)).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let Commands::Query(args) = parse(&["delve", "query", "--corpus", &corpus, "q"]) else {
        panic!("expected query");
    };

    let result = build_environment(&config, &args.corpus, providers(&provider));

    assert!(matches!(result, Err(CliError::UnknownProvider(ref id)) if id == "openai"));
}

#[test]
fn test_empty_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::empty());
    let config = CliConfig::from_toml(CONFIG).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let Commands::Query(args) = parse(&["delve", "query", "--corpus", &corpus, "q"]) else {
        panic!("expected query");
    };

    let result = build_environment(&config, &args.corpus, providers(&provider));

    assert!(matches!(result, Err(CliError::EmptyCorpus(_))));
}

// ============================================================================
// COMMAND TESTS
// ============================================================================

#[tokio::test]
async fn test_query_prints_answer_and_trace() {
    let dir = corpus_dir();
    let provider = Arc::new(ScriptedProvider::new([final_block(r#"["Acme Corp" "Beta LLC"]"#)]));
    let config = CliConfig::from_toml(CONFIG).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let Commands::Query(args) = parse(&["delve", "query", "--corpus", &corpus, "--trace", "List all parties"]) else {
        panic!("expected query");
    };
    let env = build_environment(&config, &args.corpus, providers(&provider)).unwrap();

    let mut out = Vec::new();
    run_query(&env, &config, &args, &mut out).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with(r#"["Acme Corp" "Beta LLC"]"#), "got {}", text);
    assert!(text.contains("[iterate #1]"));
    assert!(!text.contains("no final answer"));
}

#[tokio::test]
async fn test_query_json_output() {
    let dir = corpus_dir();
    let provider = Arc::new(ScriptedProvider::new([final_block("12000")]));
    let config = CliConfig::from_toml(CONFIG).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let Commands::Query(args) = parse(&["delve", "query", "--corpus", &corpus, "--json", "What is the monthly fee?"]) else {
        panic!("expected query");
    };
    let env = build_environment(&config, &args.corpus, providers(&provider)).unwrap();

    let mut out = Vec::new();
    run_query(&env, &config, &args, &mut out).await.unwrap();

    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["iterations"], 1);
    assert_eq!(json["converged"], true);
}

#[tokio::test]
async fn test_generate_qa_writes_dataset() {
    let dir = corpus_dir();
    let provider = Arc::new(
        ScriptedProvider::empty()
            .route(
                "You are selecting passages",
                [final_block(r#"[{:document "msa" :page 2} {:document "lease" :page 1}]"#)],
            )
            .route_always(
                "You are writing question/answer pairs",
                final_block(
                    r#"[{:question "What monthly fee does Acme Corp pay?" :answer "12,000 USD" :evidence "Acme Corp pays 12,000 USD monthly." :document "msa" :page 2 :difficulty "easy" :category "numerical"}]"#,
                ),
            ),
    );
    let config = CliConfig::from_toml(&format!("{}\n[qa]\noversample = 1.0\n", CONFIG)).unwrap();
    let corpus = dir.path().to_string_lossy().into_owned();
    let output = dir.path().join("qa.json");
    let output_arg = output.to_string_lossy().into_owned();
    let Commands::GenerateQa(args) = parse(&[
        "delve",
        "generate-qa",
        "--corpus",
        &corpus,
        "--count",
        "2",
        "--no-verify",
        "--output",
        &output_arg,
    ]) else {
        panic!("expected generate-qa");
    };
    let env = build_environment(&config, &args.corpus, providers(&provider)).unwrap();

    let mut out = Vec::new();
    run_generate_qa(&env, &config, &args, &mut out).await.unwrap();

    let dataset: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let questions = dataset["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0]["question"], "What monthly fee does Acme Corp pay?");
    assert_eq!(dataset["stats"]["phases"]["selected"], 2);
    assert!(String::from_utf8(out).unwrap().contains("1 questions written"));
}
