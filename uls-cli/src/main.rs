//! Entry point for the `uls` command-line interface.
#![forbid(unsafe_code)]

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use uls_cli::CliError;

fn main() -> ExitCode {
    init_logging();
    match uls_cli::run() {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("uls: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("uls: failed to install logging: {err}");
    }
}
