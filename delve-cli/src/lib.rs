//! DELVE CLI
//!
//! The `delve` binary: loads a TOML config, ingests a directory of text
//! documents and runs `query` or `generate-qa` against it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod ingest;
pub mod telemetry;

pub use cli::{Cli, Commands};
pub use config::CliConfig;
pub use error::{CliError, CliResult};
