// cloud-pipelines-orchestrator/src/sweep.rs
// ============================================================================
// Module: Downstream Propagation
// Description: One-hop wake-up and recursive skip propagation over the
// InputArtifactLink/OutputArtifactLink graph.
// Purpose: Downstream wake-up and skip propagation as store-agnostic graph
// walks, shared by both sweeps and by cancellation.
// Dependencies: cloud-pipelines-core, tracing
// ============================================================================

//! ## Overview
//! Both functions here walk "direct downstream" edges one hop at a time via
//! [`cloud_pipelines_core::PipelineStore::direct_downstream`]; skip
//! propagation additionally recurses with a visited set so a diamond-shaped
//! DAG is never walked twice.

use std::collections::HashSet;

use cloud_pipelines_core::ExecutionId;
use cloud_pipelines_core::PipelineStore;

use crate::error::OrchestratorError;

/// Wakes every direct downstream node of `execution_id` currently sitting in
/// `WAITING_FOR_UPSTREAM` whose inputs are now all available.
///
/// This is a single hop, not a transitive closure: the promoted nodes are
/// revalidated by the next ready-queue sweep, which is the safety net for a
/// missed wake-up.
///
/// # Errors
///
/// Returns [`OrchestratorError::Store`] on a storage failure.
pub fn wake_downstream(
    store: &dyn PipelineStore,
    execution_id: ExecutionId,
) -> Result<Vec<ExecutionId>, OrchestratorError> {
    let downstream = store.direct_downstream(execution_id)?;
    if downstream.is_empty() {
        return Ok(Vec::new());
    }
    let woken = store.wake_ready(&downstream)?;
    if !woken.is_empty() {
        tracing::debug!(
            execution_id = execution_id.get(),
            woken = woken.len(),
            "woke downstream nodes to queued"
        );
    }
    Ok(woken)
}

/// Recursively marks every `WAITING_FOR_UPSTREAM` descendant reachable from
/// `execution_id` through direct-downstream edges as `SKIPPED`
/// Already-terminal or in-flight nodes are left untouched; a visited set
/// guards against revisiting a node reachable through more than one path.
///
/// # Errors
///
/// Returns [`OrchestratorError::Store`] on a storage failure.
pub fn propagate_skip(
    store: &dyn PipelineStore,
    execution_id: ExecutionId,
) -> Result<(), OrchestratorError> {
    let mut visited: HashSet<i64> = HashSet::new();
    let mut frontier = vec![execution_id];
    while let Some(current) = frontier.pop() {
        if !visited.insert(current.get()) {
            continue;
        }
        let downstream = store.direct_downstream(current)?;
        if downstream.is_empty() {
            continue;
        }
        let skipped = store.skip_waiting(&downstream)?;
        if !skipped.is_empty() {
            tracing::debug!(
                from_execution_id = current.get(),
                skipped = skipped.len(),
                "propagated skip to downstream nodes"
            );
        }
        frontier.extend(downstream);
    }
    Ok(())
}

/// Runs [`propagate_skip`] from every id in `execution_ids`, for callers that
/// hold a batch of newly terminal executions (e.g. a `finalize_container_execution`
/// result covering several cache-sharing nodes at once).
///
/// # Errors
///
/// Returns [`OrchestratorError::Store`] on a storage failure.
pub fn propagate_skip_many(
    store: &dyn PipelineStore,
    execution_ids: &[ExecutionId],
) -> Result<(), OrchestratorError> {
    for execution_id in execution_ids {
        propagate_skip(store, *execution_id)?;
    }
    Ok(())
}
