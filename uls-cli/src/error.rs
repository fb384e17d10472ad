//! Error types emitted by the `uls` CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use thiserror::Error;
use uls_data::DriverError;

/// Errors emitted by the `uls` CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Flag name.
        field: &'static str,
        /// Environment variable that can supply the value.
        env: &'static str,
    },
    /// A record type override was given for both replace and keep.
    #[error("record type {type_code} cannot be both replaced and kept")]
    ConflictingOverride {
        /// Offending record type.
        type_code: String,
    },
    /// A flag was given in a context where it has no effect.
    #[error("--{flag} only applies with {requires}")]
    InapplicableFlag {
        /// Flag name.
        flag: &'static str,
        /// Setting the flag depends on.
        requires: &'static str,
    },
    /// The engine rejected the operation.
    #[error(transparent)]
    Engine(Box<DriverError>),
    /// Serializing status output failed.
    #[error("failed to serialize status output: {0}")]
    SerializeStatus(#[source] serde_json::Error),
    /// Writing to the output stream failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<DriverError> for CliError {
    fn from(err: DriverError) -> Self {
        Self::Engine(Box::new(err))
    }
}
