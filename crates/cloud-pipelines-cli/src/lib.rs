// cloud-pipelines-cli/src/lib.rs
// ============================================================================
// Module: Cloud Pipelines CLI
// Description: Typed configuration and error plumbing behind the
// `cloud-pipelines` binary.
// Purpose: Expose `config`/`error` as a library so the binary's subcommand
// handlers stay thin, and so integration tests can load configs directly.
// Dependencies: clap, cloud-pipelines-core, cloud-pipelines-compiler,
// cloud-pipelines-orchestrator, cloud-pipelines-providers,
// cloud-pipelines-store-sqlite, serde, thiserror, toml, tracing
// ============================================================================

//! ## Overview
//! This crate stands in for an HTTP/JSON API layer: it is the
//! one place in the workspace that wires a concrete [`config::OrchestratorConfig`]
//! into a `SqliteStore` + `FilesystemStorageProvider` + `InProcessLauncher`
//! trio and drives the compiler/orchestrator/query surfaces as
//! CLI subcommands rather than endpoints.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

pub use config::OrchestratorConfig;
pub use error::CliError;
