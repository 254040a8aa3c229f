// cloud-pipelines-providers/src/lib.rs
// ============================================================================
// Module: Cloud Pipelines Providers
// Description: Reference implementations of the Storage Provider and
// Container Launcher interfaces.
// Purpose: Let the orchestrator run end to end without a real object store
// or container runtime, for tests and for the CLI.
// Dependencies: cloud-pipelines-core, serde, serde_json, time, tracing
// ============================================================================

//! ## Overview
//! This crate ships exactly two reference implementations: a
//! `file://`-rooted [`FilesystemStorageProvider`] and a deterministic
//! [`InProcessLauncher`]. Neither is meant to back a production deployment;
//! both exist so the orchestrator, the CLI, and this workspace's own tests
//! have something concrete to drive.

#![forbid(unsafe_code)]

pub mod filesystem;
pub mod inprocess;

pub use filesystem::FilesystemStorageProvider;
pub use inprocess::InProcessLauncher;
pub use inprocess::mark_log_streamed;
