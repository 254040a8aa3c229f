// cloud-pipelines-orchestrator/src/lib.rs
// ============================================================================
// Module: Cloud Pipelines Orchestrator
// Description: Sweep-driven execution orchestrator over a compiled pipeline
// graph.
// Purpose: Drive execution nodes through the container-execution state
// machine against the `PipelineStore`/`StorageProvider`/`ContainerLauncher`
// seams defined in `cloud-pipelines-core`.
// Dependencies: cloud-pipelines-core, thiserror, tracing, time, serde_json
// ============================================================================

//! ## Overview
//! This crate contains no persistence or container-runtime code of its own;
//! it is pure orchestration logic over the trait objects
//! [`cloud_pipelines_core::PipelineStore`],
//! [`cloud_pipelines_core::StorageProvider`], and
//! [`cloud_pipelines_core::ContainerLauncher`]. [`Orchestrator`] is the
//! crate's only entry point — construct one, then call
//! [`Orchestrator::sweep_ready_once`] / [`Orchestrator::sweep_inflight_once`]
//! directly in a test, or [`Orchestrator::run`] for a long-lived process.
//!
//! [`cache`] and [`sweep`] are kept as separate, independently testable
//! modules since both are pure functions of the store/launcher/storage
//! interfaces rather than orchestrator state.

#![forbid(unsafe_code)]

mod cache;
mod error;
mod orchestrator;
mod sweep;

pub use cache::compute_cache_key;
pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use orchestrator::OrchestratorSettings;
pub use sweep::propagate_skip;
pub use sweep::propagate_skip_many;
pub use sweep::wake_downstream;
