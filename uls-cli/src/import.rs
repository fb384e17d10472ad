//! `import` command: resolve options and apply archives.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use uls_core::{InvalidFieldPolicy, ReplacePolicy, RunStatus, TypeCode};
use uls_data::driver::ArchiveSelection;
use uls_data::import::ImportOptions;
use uls_data::{DirectoryImport, Driver};
use uls_data::store::StoreOptions;

use crate::{ARG_DATABASE, CliError, Outcome, output, require_database};

pub(crate) const ARG_SOURCE: &str = "source";
pub(crate) const ARG_MODE: &str = "mode";
pub(crate) const ARG_REPLACE: &str = "replace";
pub(crate) const ARG_REPLACE_TYPE: &str = "replace-type";
pub(crate) const ARG_KEEP_TYPE: &str = "keep-type";
pub(crate) const ARG_REJECT_INVALID_FIELDS: &str = "reject-invalid-fields";
pub(crate) const ARG_EACH_ARCHIVE: &str = "each-archive";
pub(crate) const ARG_PATTERN: &str = "pattern";
pub(crate) const ARG_REAPPLY: &str = "reapply";
const REQUIRES_DAILY: &str = "--mode daily";
const REQUIRES_EACH_ARCHIVE: &str = "--each-archive";
pub(crate) const ENV_IMPORT_SOURCE: &str = "ULS_CMDS_IMPORT_SOURCE";
pub(crate) const ENV_IMPORT_MODE: &str = "ULS_CMDS_IMPORT_MODE";
pub(crate) const ENV_IMPORT_DATABASE: &str = "ULS_CMDS_IMPORT_DATABASE";

/// Import mode as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ModeArg {
    /// Truncate and reload every record type in the snapshot.
    Full,
    /// Upsert a daily delta.
    Daily,
}

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "import",
    long_about = "Apply a weekly full snapshot or a daily delta. The source \
                 may be a zip archive or a directory of unpacked record \
                 files; with --each-archive it is a directory of archives \
                 applied in file-name order.",
    about = "Apply a full snapshot or daily delta archive"
)]
#[ortho_config(prefix = "ULS")]
pub(crate) struct ImportArgs {
    /// Archive, record directory or (with --each-archive) archive directory.
    #[arg(value_name = "path")]
    #[serde(default)]
    pub(crate) source: Option<Utf8PathBuf>,
    /// SQLite database to load into.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Whether the source is a full snapshot or a daily delta.
    #[arg(long = ARG_MODE, value_enum, value_name = "mode")]
    #[serde(default)]
    pub(crate) mode: Option<ModeArg>,
    /// Daily records overwrite stored records sharing a key or identifier.
    #[arg(long = ARG_REPLACE)]
    #[serde(default)]
    pub(crate) replace: bool,
    /// Record types that overwrite on daily imports regardless of --replace.
    #[arg(long = ARG_REPLACE_TYPE, value_name = "code", value_delimiter = ',')]
    #[serde(default)]
    pub(crate) replace_type: Vec<String>,
    /// Record types that keep stored records on daily imports regardless of
    /// --replace.
    #[arg(long = ARG_KEEP_TYPE, value_name = "code", value_delimiter = ',')]
    #[serde(default)]
    pub(crate) keep_type: Vec<String>,
    /// Reject records with fields that fail coercion instead of nulling them.
    #[arg(long = ARG_REJECT_INVALID_FIELDS)]
    #[serde(default)]
    pub(crate) reject_invalid_fields: bool,
    /// Treat the source as a directory of archives, one run per archive.
    #[arg(long = ARG_EACH_ARCHIVE)]
    #[serde(default)]
    pub(crate) each_archive: bool,
    /// Wildcard selecting archives with --each-archive (default `*.zip`).
    #[arg(long = ARG_PATTERN, value_name = "glob")]
    #[serde(default)]
    pub(crate) pattern: Option<String>,
    /// With --each-archive, apply archives an earlier run already applied.
    #[arg(long = ARG_REAPPLY)]
    #[serde(default)]
    pub(crate) reapply: bool,
}

impl ImportArgs {
    pub(crate) fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// Resolved `import` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportConfig {
    pub(crate) source: Utf8PathBuf,
    pub(crate) database: Utf8PathBuf,
    pub(crate) options: ImportOptions,
    /// Set when the source is a directory of archives.
    pub(crate) archives: Option<ArchiveSelection>,
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let source = args.source.clone().ok_or(CliError::MissingArgument {
            field: ARG_SOURCE,
            env: ENV_IMPORT_SOURCE,
        })?;
        let database = require_database(args.database.clone(), ENV_IMPORT_DATABASE)?;
        let mode = args.mode.ok_or(CliError::MissingArgument {
            field: ARG_MODE,
            env: ENV_IMPORT_MODE,
        })?;

        let options = match mode {
            ModeArg::Full => {
                reject_daily_flags(&args)?;
                ImportOptions::full()
            }
            ModeArg::Daily => ImportOptions::daily(args.replace).with_replace_policy(
                replace_policy(args.replace, &args.replace_type, &args.keep_type)?,
            ),
        };
        let invalid_fields = if args.reject_invalid_fields {
            InvalidFieldPolicy::RejectRecord
        } else {
            InvalidFieldPolicy::LoadWithNull
        };

        let archives = if args.each_archive {
            let selection = args
                .pattern
                .map_or_else(ArchiveSelection::default, |pattern| {
                    ArchiveSelection::default().with_pattern(pattern)
                });
            Some(selection.reapplying(args.reapply))
        } else {
            inapplicable(args.pattern.is_some(), ARG_PATTERN, REQUIRES_EACH_ARCHIVE)?;
            inapplicable(args.reapply, ARG_REAPPLY, REQUIRES_EACH_ARCHIVE)?;
            None
        };

        Ok(Self {
            source,
            database,
            options: options.with_invalid_field_policy(invalid_fields),
            archives,
        })
    }
}

fn reject_daily_flags(args: &ImportArgs) -> Result<(), CliError> {
    inapplicable(args.replace, ARG_REPLACE, REQUIRES_DAILY)?;
    inapplicable(!args.replace_type.is_empty(), ARG_REPLACE_TYPE, REQUIRES_DAILY)?;
    inapplicable(!args.keep_type.is_empty(), ARG_KEEP_TYPE, REQUIRES_DAILY)
}

fn inapplicable(given: bool, flag: &'static str, requires: &'static str) -> Result<(), CliError> {
    if given {
        Err(CliError::InapplicableFlag { flag, requires })
    } else {
        Ok(())
    }
}

fn replace_policy(
    replace: bool,
    replace_types: &[String],
    keep_types: &[String],
) -> Result<ReplacePolicy, CliError> {
    let mut policy = if replace {
        ReplacePolicy::replace_all()
    } else {
        ReplacePolicy::keep_existing()
    };
    for code in replace_types {
        let type_code = TypeCode::new(code.trim());
        if keep_types
            .iter()
            .any(|kept| TypeCode::new(kept.trim()) == type_code)
        {
            return Err(CliError::ConflictingOverride {
                type_code: type_code.to_string(),
            });
        }
        policy = policy.with_override(type_code, true);
    }
    for code in keep_types {
        policy = policy.with_override(TypeCode::new(code.trim()), false);
    }
    Ok(policy)
}

pub(crate) fn run_import(args: ImportArgs, writer: &mut dyn Write) -> Result<Outcome, CliError> {
    let config = args.into_config()?;
    log::info!(
        "importing {} into {} ({} mode)",
        config.source,
        config.database,
        config.options.mode()
    );
    let mut driver = Driver::open(&config.database, &StoreOptions::default())?;
    let DirectoryImport { runs, skipped } = match &config.archives {
        Some(selection) => {
            driver.import_directory_with(&config.source, &config.options, selection)?
        }
        None => DirectoryImport {
            runs: vec![driver.run_import(&config.source, &config.options)?],
            skipped: Vec::new(),
        },
    };

    for archive in &skipped {
        output::line(writer, &format!("skipped {archive}: already applied"))?;
    }
    let mut status = RunStatus::Succeeded;
    for run in &runs {
        output::write_run(writer, run)?;
        status = least_successful(status, run.status);
    }
    Ok(Outcome::Imported(status))
}

const fn least_successful(left: RunStatus, right: RunStatus) -> RunStatus {
    const fn rank(status: RunStatus) -> u8 {
        match status {
            RunStatus::Succeeded => 0,
            RunStatus::Partial => 1,
            RunStatus::Failed => 2,
            RunStatus::Running => 3,
        }
    }
    if rank(right) > rank(left) { right } else { left }
}
