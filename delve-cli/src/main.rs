//! DELVE CLI entry point.

use clap::Parser;
use delve_cli::commands::{build_environment, providers_from_env, run_generate_qa, run_query};
use delve_cli::{telemetry, Cli, CliConfig, CliError, Commands};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    telemetry::init(cli.log_json)?;
    let config = CliConfig::load(cli.config.as_deref())?;
    let mut stdout = std::io::stdout().lock();

    let (env, outcome) = match &cli.command {
        Commands::Query(args) => {
            let env = build_environment(&config, &args.corpus, providers_from_env())?;
            let outcome = run_query(&env, &config, args, &mut stdout).await;
            (env, outcome)
        }
        Commands::GenerateQa(args) => {
            let env = build_environment(&config, &args.corpus, providers_from_env())?;
            let outcome = run_generate_qa(&env, &config, args, &mut stdout).await;
            (env, outcome)
        }
    };

    let costs = env.costs();
    tracing::info!(calls = costs.calls, cost_usd = costs.cost_usd, "Session costs");
    // flushes persistent memory even when the command failed
    env.dispose()?;
    outcome
}
