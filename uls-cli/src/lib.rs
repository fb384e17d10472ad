//! Command-line interface for the ULS import engine.
//!
//! The CLI only maps engine results onto console output and exit codes; all
//! import decisions live in `uls-data`.
#![forbid(unsafe_code)]

mod error;
mod import;
mod output;

use std::io::Write;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use uls_core::RunStatus;
use uls_data::Driver;
use uls_data::store::StoreOptions;

pub use error::CliError;
use import::ImportArgs;

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_SCHEMA: &str = "schema";
pub(crate) const ARG_JSON: &str = "json";
pub(crate) const ARG_LIMIT: &str = "limit";
pub(crate) const ENV_INIT_SCHEMA_DATABASE: &str = "ULS_CMDS_INIT_SCHEMA_DATABASE";
pub(crate) const ENV_INIT_SCHEMA_SCHEMA: &str = "ULS_CMDS_INIT_SCHEMA_SCHEMA";
pub(crate) const ENV_STATUS_DATABASE: &str = "ULS_CMDS_STATUS_DATABASE";
pub(crate) const ENV_VACUUM_DATABASE: &str = "ULS_CMDS_VACUUM_DATABASE";
pub(crate) const ENV_ANALYZE_DATABASE: &str = "ULS_CMDS_ANALYZE_DATABASE";

/// Result of a successful invocation, used to pick the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A non-import command completed.
    Completed,
    /// One or more import runs finished; carries the least successful status.
    Imported(RunStatus),
}

impl Outcome {
    /// Process exit code: 0 on success, 2 when an import was partial and 1
    /// when it failed.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Completed | Self::Imported(RunStatus::Succeeded) => 0,
            Self::Imported(RunStatus::Partial) => 2,
            Self::Imported(RunStatus::Failed | RunStatus::Running) => 1,
        }
    }
}

/// Run the `uls` CLI with the current process arguments and environment,
/// writing command output to stdout.
pub fn run() -> Result<Outcome, CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    run_with(cli, &mut stdout)
}

fn run_with(cli: Cli, writer: &mut dyn Write) -> Result<Outcome, CliError> {
    match cli.command {
        Command::InitSchema(args) => run_init_schema(args, writer),
        Command::Import(args) => import::run_import(args, writer),
        Command::Status(args) => run_status(args, writer),
        Command::Vacuum(args) => {
            let database = require_database(args.load_and_merge()?.database, ENV_VACUUM_DATABASE)?;
            Driver::open(&database, &StoreOptions::default())?.vacuum()?;
            output::line(writer, &format!("vacuumed {database}"))?;
            Ok(Outcome::Completed)
        }
        Command::Analyze(args) => {
            let database =
                require_database(args.load_and_merge()?.database, ENV_ANALYZE_DATABASE)?;
            Driver::open(&database, &StoreOptions::default())?.analyze()?;
            output::line(writer, &format!("analyzed {database}"))?;
            Ok(Outcome::Completed)
        }
    }
}

fn run_init_schema(args: InitSchemaArgs, writer: &mut dyn Write) -> Result<Outcome, CliError> {
    let merged = args.load_and_merge()?;
    let schema = merged.schema.ok_or(CliError::MissingArgument {
        field: ARG_SCHEMA,
        env: ENV_INIT_SCHEMA_SCHEMA,
    })?;
    let database = require_database(merged.database, ENV_INIT_SCHEMA_DATABASE)?;
    let mut driver = Driver::open(&database, &StoreOptions::default())?;
    let installed = driver.init_schema(&schema)?;
    output::line(
        writer,
        &format!("installed {installed} record types from {schema} into {database}"),
    )?;
    Ok(Outcome::Completed)
}

fn run_status(args: StatusArgs, writer: &mut dyn Write) -> Result<Outcome, CliError> {
    let merged = args.load_and_merge()?;
    let database = require_database(merged.database, ENV_STATUS_DATABASE)?;
    let driver = Driver::open_read_only(&database)?;
    let report = driver.get_status(merged.limit)?;
    if merged.json {
        output::write_status_json(writer, &report)?;
    } else {
        output::write_status(writer, &report)?;
    }
    Ok(Outcome::Completed)
}

pub(crate) fn require_database(
    database: Option<Utf8PathBuf>,
    env: &'static str,
) -> Result<Utf8PathBuf, CliError> {
    database.ok_or(CliError::MissingArgument {
        field: ARG_DATABASE,
        env,
    })
}

#[derive(Debug, Parser)]
#[command(
    name = "uls",
    about = "Load license database exports into a queryable SQLite store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create record-type tables from a schema document.
    InitSchema(InitSchemaArgs),
    /// Apply a full snapshot or daily delta archive.
    Import(ImportArgs),
    /// Show import history and table sizes.
    Status(StatusArgs),
    /// Reclaim free space in the store.
    Vacuum(VacuumArgs),
    /// Refresh query planner statistics.
    Analyze(AnalyzeArgs),
}

/// CLI arguments for the `init-schema` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "init-schema",
    long_about = "Parse a public access data definition document and create \
                 one table per record type. Re-running with the same \
                 document is harmless.",
    about = "Create record-type tables from a schema document"
)]
#[ortho_config(prefix = "ULS")]
struct InitSchemaArgs {
    /// Path to the SQL data definition document.
    #[arg(value_name = "path")]
    #[serde(default)]
    schema: Option<Utf8PathBuf>,
    /// SQLite database to initialise.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    database: Option<Utf8PathBuf>,
}

/// CLI arguments for the `status` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(name = "status", about = "Show import history and table sizes")]
#[ortho_config(prefix = "ULS")]
struct StatusArgs {
    /// SQLite database to inspect.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    database: Option<Utf8PathBuf>,
    /// Print the report as JSON.
    #[arg(long = ARG_JSON)]
    #[serde(default)]
    json: bool,
    /// Show at most this many runs.
    #[arg(long = ARG_LIMIT, value_name = "count")]
    #[serde(default)]
    limit: Option<usize>,
}

/// CLI arguments for the `vacuum` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(name = "vacuum", about = "Reclaim free space in the store")]
#[ortho_config(prefix = "ULS")]
struct VacuumArgs {
    /// SQLite database to compact.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    database: Option<Utf8PathBuf>,
}

/// CLI arguments for the `analyze` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(name = "analyze", about = "Refresh query planner statistics")]
#[ortho_config(prefix = "ULS")]
struct AnalyzeArgs {
    /// SQLite database to analyze.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    database: Option<Utf8PathBuf>,
}

#[cfg(test)]
mod tests;
