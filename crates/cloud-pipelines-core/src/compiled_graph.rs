// cloud-pipelines-core/src/compiled_graph.rs
// ============================================================================
// Module: Compiled Graph
// Description: The compiler's in-memory output, keyed by locally-scoped ids.
// Purpose: Decouple the graph compiler from SQL — the compiler only ever
// produces this value; a `PipelineStore` translates it into real rows within
// one transaction.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! The compiler assigns small sequential `local_id`s as it walks the
//! `TaskSpec` tree depth-first. Because children are only ever
//! created after their parent and `TaskOutputArgument` producers are always
//! processed before their consumers (post-toposort), a `PipelineStore`
//! implementation can insert `nodes` and `artifacts` in the given order,
//! remapping each `local_id` to its freshly assigned row id as it goes,
//! without ever needing to look ahead.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::status::ContainerExecutionStatus;
use crate::task_spec::TaskSpec;

/// One compiled `ExecutionNode`, not yet assigned a real row id.
#[derive(Debug, Clone)]
pub struct CompiledExecutionNode {
    /// Id scoped to this compilation, unique within the `CompiledGraph`.
    pub local_id: u64,
    /// The frozen task this node was compiled from.
    pub task_spec: TaskSpec,
    /// The local id of this node's graph parent, if any.
    pub parent_local_id: Option<u64>,
    /// The key this node appears under in its parent's `tasks` map.
    pub task_id_in_parent_execution: Option<String>,
    /// Every ancestor's local id (not just the immediate parent), for the
    /// `ExecutionToAncestorExecutionLink` closure table.
    pub ancestor_local_ids: Vec<u64>,
    /// Present iff this node's implementation is a container.
    pub container_execution_status: Option<ContainerExecutionStatus>,
}

/// An `ArtifactData` value known at compile time (constants only; container
/// outputs are never known until the orchestrator finalizes them).
#[derive(Debug, Clone)]
pub struct CompiledArtifactData {
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

/// One compiled `ArtifactNode`, not yet assigned a real row id.
#[derive(Debug, Clone)]
pub struct CompiledArtifactNode {
    /// Id scoped to this compilation, unique within the `CompiledGraph`.
    pub local_id: u64,
    /// The local id of the execution that produces this artifact, if any.
    pub producer_local_id: Option<u64>,
    /// The output name under which the producer emits this artifact.
    pub producer_output_name: Option<String>,
    /// Declared type name, if any.
    pub type_name: Option<String>,
    /// Declared type properties, if any.
    pub type_properties: Option<Value>,
    /// Inline content, known at compile time only for constants.
    pub inline_data: Option<CompiledArtifactData>,
    /// Mirrors [`crate::entities::ArtifactNode::had_data_in_past`].
    pub had_data_in_past: bool,
}

/// A compiled `InputArtifactLink`, keyed by local ids.
#[derive(Debug, Clone)]
pub struct CompiledInputLink {
    /// The consuming execution's local id.
    pub execution_local_id: u64,
    /// The input slot name on the consumer.
    pub input_name: String,
    /// The supplying artifact's local id.
    pub artifact_local_id: u64,
}

/// A compiled `OutputArtifactLink`, keyed by local ids.
#[derive(Debug, Clone)]
pub struct CompiledOutputLink {
    /// The producing execution's local id.
    pub execution_local_id: u64,
    /// The output slot name on the producer.
    pub output_name: String,
    /// The receiving artifact's local id.
    pub artifact_local_id: u64,
}

/// The complete output of one graph compilation, ready to persist in
/// a single transaction.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    /// The local id of the compiled root execution node.
    pub root_local_id: u64,
    /// Every execution node, in creation order (parents precede children).
    pub nodes: Vec<CompiledExecutionNode>,
    /// Every artifact node, in creation order (producers precede consumers
    /// that reference them by local id).
    pub artifacts: Vec<CompiledArtifactNode>,
    /// Every input wiring edge.
    pub input_links: Vec<CompiledInputLink>,
    /// Every output wiring edge.
    pub output_links: Vec<CompiledOutputLink>,
}

impl CompiledGraph {
    /// Returns an empty graph rooted at local id `0`, to be filled in by the
    /// compiler as it walks the task tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root_local_id: 0,
            nodes: Vec::new(),
            artifacts: Vec::new(),
            input_links: Vec::new(),
            output_links: Vec::new(),
        }
    }
}

impl Default for CompiledGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-level metadata supplied by the submitter, separate from the compiled
/// task tree itself.
#[derive(Debug, Clone, Default)]
pub struct PipelineRunSubmission {
    /// Arbitrary submission-level metadata.
    pub annotations: BTreeMap<String, Value>,
    /// Optional identity of the submitting principal.
    pub created_by: Option<String>,
}
