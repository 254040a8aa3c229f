// cloud-pipelines-core/src/store.rs
// ============================================================================
// Module: Pipeline Store Contract
// Description: The persistence seam the compiler and orchestrator depend on.
// Purpose: Let the compiler and orchestrator share one trait while
// `cloud-pipelines-store-sqlite` owns every concrete SQL statement.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! `PipelineStore` is written at the granularity of one orchestrator or
//! compiler step, not raw CRUD: each method either is one self-contained
//! transaction, or is explicitly documented as requiring the caller to
//! sequence several calls (e.g. cache adoption, skip propagation, whose
//! *traversal* logic belongs to the orchestrator, not the store).

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::compiled_graph::CompiledGraph;
use crate::compiled_graph::PipelineRunSubmission;
use crate::entities::ArtifactData;
use crate::entities::ContainerExecution;
use crate::entities::ExecutionNode;
use crate::entities::PipelineRun;
use crate::identifiers::ArtifactDataId;
use crate::identifiers::ArtifactId;
use crate::identifiers::ContainerExecutionId;
use crate::identifiers::ExecutionId;
use crate::identifiers::PipelineRunId;
use crate::status::ContainerExecutionStatus;

/// Errors a [`PipelineStore`] implementation may return.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("item not found: {0}")]
    NotFound(String),
    /// The underlying storage engine reported a failure.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// An illegal status transition was attempted against the state machine
    /// in [`crate::status::ContainerExecutionStatus`].
    #[error("illegal transition from {from:?} to {to:?} on execution {execution_id}")]
    IllegalTransition {
        /// The execution the transition was attempted on.
        execution_id: ExecutionId,
        /// The status the node was in.
        from: ContainerExecutionStatus,
        /// The status the transition attempted to move to.
        to: ContainerExecutionStatus,
    },
}

/// A fully resolved input, joined through its `ArtifactNode` to whatever
/// `ArtifactData` (if any) currently backs it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolvedInput {
    /// The input slot name on the consuming execution.
    pub input_name: String,
    /// The artifact node id supplying the value.
    pub artifact_id: ArtifactId,
    /// The content record backing the artifact, once available.
    pub artifact_data: Option<ArtifactData>,
}

/// A freshly computed output, to be attached to an execution's declared
/// output slot when finalizing a container execution.
#[derive(Debug, Clone)]
pub struct FinalizedOutput {
    /// The output slot name on the producing execution.
    pub output_name: String,
    /// The content to attach.
    pub data: NewArtifactData,
}

/// Content to insert as a new `ArtifactData` row.
#[derive(Debug, Clone)]
pub struct NewArtifactData {
    /// Byte size of the content.
    pub total_size: u64,
    /// Whether the content is a directory.
    pub is_dir: bool,
    /// Canonical `md5=<hex>` hash.
    pub hash: String,
    /// Storage location, if any.
    pub uri: Option<String>,
    /// Inline value, if any.
    pub value: Option<String>,
}

/// Everything the query service returns for one execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionDetail {
    /// The execution node itself.
    pub node: ExecutionNode,
    /// The backing container execution, if one has ever been created.
    pub container_execution: Option<ContainerExecution>,
    /// Direct children, for graph nodes.
    pub children: Vec<ExecutionNode>,
}

/// Aggregate status counts for one execution's subtree, keyed by direct
/// child execution id and then by status name: `counts[child][status]` is
/// the number of container nodes under that child's own subtree (the child
/// itself plus every transitive descendant) currently sitting in `status`.
pub type AggregateStatusCounts = BTreeMap<ExecutionId, BTreeMap<ContainerExecutionStatus, u64>>;

/// The persistence seam between the graph compiler / orchestrator and a
/// concrete storage engine.
///
/// Implementations must provide the transactional and locking guarantees
/// assumed by the algorithms : `persist_compiled_graph` is atomic, and
/// every sweep/finalize method observes and updates rows as of a single
/// point in time even under concurrent sweepers.
pub trait PipelineStore: Send + Sync {
    /// Persists an entire compiled graph as one transaction and
    /// returns the resulting `PipelineRun`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on any failure; no partial graph is
    /// ever left visible to other callers.
    fn persist_compiled_graph(
        &self,
        graph: &CompiledGraph,
        submission: PipelineRunSubmission,
    ) -> Result<PipelineRun, StoreError>;

    /// Returns one run by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn get_pipeline_run(&self, id: PipelineRunId) -> Result<Option<PipelineRun>, StoreError>;

    /// Returns one execution node by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn get_execution_node(&self, id: ExecutionId) -> Result<Option<ExecutionNode>, StoreError>;

    /// Returns full detail for one execution: the node, its backing
    /// container execution if any, and its direct children.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn get_execution_detail(&self, id: ExecutionId) -> Result<Option<ExecutionDetail>, StoreError>;

    /// Returns one `ArtifactData` row by id, for materializing an output or
    /// input artifact inline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn get_artifact_data(&self, id: ArtifactDataId) -> Result<Option<ArtifactData>, StoreError>;

    /// Returns, for each direct child of `root_execution_id`, the status
    /// counts of every container node in that child's own subtree (the
    /// child itself plus its transitive descendants). A child with no
    /// container nodes under it at all is omitted rather than mapped to an
    /// empty inner map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn aggregate_status(
        &self,
        root_execution_id: ExecutionId,
    ) -> Result<AggregateStatusCounts, StoreError>;

    /// Atomically claims and returns one `QUEUED` execution node, marking no
    /// status change itself — the orchestrator decides the next status after
    /// inspecting the cache index. Returns `None` when the
    /// ready queue is empty. Rows are never returned to two sweepers at once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn claim_ready_node(&self) -> Result<Option<ExecutionNode>, StoreError>;

    /// Resolves every input wired to `execution_id`, joined through to
    /// current `ArtifactData`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn resolve_inputs(&self, execution_id: ExecutionId) -> Result<Vec<ResolvedInput>, StoreError>;

    /// Transitions `execution_id` back to `WAITING_FOR_UPSTREAM`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] if the current status
    /// cannot move there, or [`StoreError::Backend`] on a storage failure.
    fn revert_to_waiting(&self, execution_id: ExecutionId) -> Result<(), StoreError>;

    /// Looks up a `ContainerExecution` already carrying `cache_key`, for
    /// cache adoption. Returns the most recently created match.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn find_by_cache_key(
        &self,
        cache_key: &str,
    ) -> Result<Option<ContainerExecution>, StoreError>;

    /// Adopts an existing `ContainerExecution` for `execution_id` without
    /// launching a new one (cache hit): sets
    /// `container_execution_id`/`container_execution_cache_key`, and if the
    /// cached execution is already terminal, propagates its current status
    /// and output artifact data onto `execution_id`'s own `ArtifactNode`s.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn adopt_cached_execution(
        &self,
        execution_id: ExecutionId,
        cache_key: &str,
        container_execution_id: ContainerExecutionId,
    ) -> Result<(), StoreError>;

    /// Creates a new `ContainerExecution` row in `PENDING`, links it to
    /// `execution_id`, and records the cache key, resolved input map, and
    /// the log URI minted for this launch attempt — the
    /// only point at which that URI is ever computed, so it must be
    /// persisted here for the in-flight sweep to find again on a later tick.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn create_container_execution(
        &self,
        execution_id: ExecutionId,
        cache_key: &str,
        launcher_data: Vec<u8>,
        input_artifact_data_map: BTreeMap<String, ArtifactDataId>,
        log_uri: &str,
    ) -> Result<ContainerExecutionId, StoreError>;

    /// Returns one container execution by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn get_container_execution(
        &self,
        id: ContainerExecutionId,
    ) -> Result<Option<ContainerExecution>, StoreError>;

    /// Returns every `ExecutionNode` currently backed by `container_execution_id`
    /// — ordinarily one, but more than one after a cache adoption shares the
    /// same launch. Used by the in-flight sweep to recover the declared
    /// output names a bare `ContainerExecution` row does not itself carry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn execution_nodes_by_container(
        &self,
        container_execution_id: ContainerExecutionId,
    ) -> Result<Vec<ExecutionId>, StoreError>;

    /// Atomically claims and returns one in-flight (`PENDING` or `RUNNING`)
    /// container execution, ordered by `last_processed_at` ascending
    ///, and stamps `last_processed_at` to
    /// now as part of the same operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn claim_inflight_execution(
        &self,
        now: OffsetDateTime,
    ) -> Result<Option<ContainerExecution>, StoreError>;

    /// Updates `launcher_data` after a `refresh` call, without changing
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn update_launcher_data(
        &self,
        id: ContainerExecutionId,
        launcher_data: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Transitions a container execution and every `ExecutionNode` backed by
    /// it to `next`, optionally recording `exit_code`/`log_uri`, and — only
    /// for a terminal transition other than `Cancelled` — attaching
    /// `outputs` to the producing node's declared output artifacts.
    /// Returns every `ExecutionId` that changed status, for the caller to
    /// drive downstream wake-up / skip propagation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] if `next` is not reachable
    /// from the current status, or [`StoreError::Backend`] on a storage
    /// failure.
    fn finalize_container_execution(
        &self,
        id: ContainerExecutionId,
        next: ContainerExecutionStatus,
        exit_code: Option<i64>,
        log_uri: Option<String>,
        outputs: Vec<FinalizedOutput>,
    ) -> Result<Vec<ExecutionId>, StoreError>;

    /// Returns the executions that directly consume any output of
    /// `execution_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn direct_downstream(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionId>, StoreError>;

    /// Transitions every id in `execution_ids` currently sitting in
    /// `WAITING_FOR_UPSTREAM` with all inputs now available to `QUEUED`.
    /// Ids not in `WAITING_FOR_UPSTREAM`, or still missing an input, are
    /// left untouched. Returns the ids actually transitioned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn wake_ready(&self, execution_ids: &[ExecutionId]) -> Result<Vec<ExecutionId>, StoreError>;

    /// Transitions every id in `execution_ids` currently sitting in
    /// `WAITING_FOR_UPSTREAM` to `SKIPPED` unconditionally. Returns the ids
    /// actually transitioned, for the caller's DFS frontier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn skip_waiting(&self, execution_ids: &[ExecutionId]) -> Result<Vec<ExecutionId>, StoreError>;

    /// Returns every non-terminal container execution id (and its backing
    /// `ContainerExecution`, if launched) under `root_execution_id`'s
    /// subtree, inclusive, for cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn subtree_non_terminal(
        &self,
        root_execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionNode>, StoreError>;

    /// Transitions every id in `execution_ids` to `CANCELLED`; ids
    /// already terminal are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn cancel_nodes(&self, execution_ids: &[ExecutionId]) -> Result<(), StoreError>;

    /// Merges and returns the effective annotation object for `execution_id`
    /// per the three-layer policy (default, run, task).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on a storage failure.
    fn effective_annotations(&self, execution_id: ExecutionId) -> Result<Value, StoreError>;
}
