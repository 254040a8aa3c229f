// cloud-pipelines-cli/src/error.rs
// ============================================================================
// Module: CLI Errors
// Description: The single error type every subcommand handler returns.
// Purpose: Convert every collaborator's error into one value `main` can
// render and turn into an exit code.
// Dependencies: thiserror, cloud-pipelines-compiler, cloud-pipelines-core,
// cloud-pipelines-orchestrator, cloud-pipelines-store-sqlite
// ============================================================================

//! ## Overview
//! Subcommand handlers return `Result<(), CliError>`; `main` prints the
//! `Display` of any error to stderr and maps it to
//! [`std::process::ExitCode::FAILURE`].

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the `cloud-pipelines` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or failed validation.
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// The database could not be opened.
    #[error("{0}")]
    Sqlite(#[from] cloud_pipelines_store_sqlite::SqliteStoreError),
    /// A submitted task spec failed compilation.
    #[error("{0}")]
    Compile(#[from] cloud_pipelines_compiler::CompileError),
    /// The orchestrator reported a failure.
    #[error("{0}")]
    Orchestrator(#[from] cloud_pipelines_orchestrator::OrchestratorError),
    /// A query against the store failed or found nothing.
    #[error("{0}")]
    Store(#[from] cloud_pipelines_core::StoreError),
    /// An input file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that failed to read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A JSON document could not be parsed.
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The identity guard denied the requested action.
    #[error("{0}")]
    Permission(#[from] cloud_pipelines_core::PermissionError),
}
