//! Tracing subscriber setup.

use crate::error::{CliError, CliResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "warn,delve_cli=info,delve_engine=info,delve_qa=info,delve_llm=info,delve_storage=info";

/// Install the global subscriber. Logs go to stderr so stdout carries only results.
pub fn init(json: bool) -> CliResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let fmt = if json { fmt.json().boxed() } else { fmt.boxed() };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))
}
