// cloud-pipelines-orchestrator/src/error.rs
// ============================================================================
// Module: Orchestrator Errors
// Description: Failure modes of the sweep, cache, and cancellation logic.
// Purpose: Distinguish internal invariant violations from the store's own
// errors and the external launcher/storage collaborators' errors.
// Dependencies: thiserror, cloud-pipelines-core
// ============================================================================

//! ## Overview
//! Every node-level failure the orchestrator observes (a launch raising, a
//! refresh raising, a cache-key hash failing to serialize) is mapped to a
//! `SYSTEM_ERROR` transition on the affected node rather than aborting the
//! sweep; [`OrchestratorError`] is reserved for failures the sweep loop
//! itself cannot recover from — a broken store, or an internal invariant
//! that does not hold.

use cloud_pipelines_core::ExecutionId;
use cloud_pipelines_core::hashing::HashError;
use thiserror::Error;

/// Errors raised by the orchestrator's sweep, cache, and cancellation logic.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The underlying `PipelineStore` reported a failure.
    #[error("store error: {0}")]
    Store(#[from] cloud_pipelines_core::StoreError),

    /// The cache key could not be computed (canonical JSON serialization
    /// failed for a `ContainerSpec`/input-hash map that should always
    /// serialize cleanly).
    #[error("cache key computation failed: {0}")]
    CacheKey(#[from] HashError),

    /// An internal invariant did not hold — e.g. a container-status node
    /// whose component implementation is not actually a container. Always a
    /// programming bug.
    #[error("invariant violation on execution {execution_id}: {message}")]
    InvariantViolation {
        /// The execution node the invariant was checked against.
        execution_id: ExecutionId,
        /// A human-readable description of what failed.
        message: String,
    },

    /// No `PipelineRun` exists for the requested id, e.g. on `cancel`.
    #[error("pipeline run not found: {0}")]
    RunNotFound(i64),
}
