// cloud-pipelines-core/src/entities.rs
// ============================================================================
// Module: Pipeline Entities
// Description: In-memory representations of the pipeline data model.
// Purpose: Give the compiler, orchestrator, and store a shared vocabulary for
// rows without coupling any of them to a particular persistence backend.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! These structs mirror the relational schema field-for-field. The
//! SQLite store (`cloud-pipelines-store-sqlite`) maps them onto tables;
//! nothing in this crate assumes SQLite or any other backend.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::identifiers::ArtifactDataId;
use crate::identifiers::ArtifactId;
use crate::identifiers::ContainerExecutionId;
use crate::identifiers::ExecutionId;
use crate::identifiers::PipelineRunId;
use crate::status::ContainerExecutionStatus;
use crate::task_spec::TaskSpec;

/// A user-facing pipeline submission; owns one root `ExecutionNode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Row identifier.
    pub id: PipelineRunId,
    /// The compiled root execution.
    pub root_execution_id: ExecutionId,
    /// Arbitrary submission-level metadata, merged into launcher annotations.
    pub annotations: BTreeMap<String, serde_json::Value>,
    /// Optional identity of the submitting principal.
    pub created_by: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last-updated timestamp (status propagation, cancellation).
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One node per task instance in the compiled DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionNode {
    /// Row identifier.
    pub id: ExecutionId,
    /// The frozen `TaskSpec` this node was compiled from.
    pub task_spec: TaskSpec,
    /// Graph parent, null for the run's root.
    pub parent_execution_id: Option<ExecutionId>,
    /// The key under which this node appears in its parent's `tasks` map.
    pub task_id_in_parent_execution: Option<String>,
    /// The `ContainerExecution` currently backing this node, once launched.
    pub container_execution_id: Option<ContainerExecutionId>,
    /// The cache key computed for this node, set at most once.
    pub container_execution_cache_key: Option<String>,
    /// Non-null iff the node's component implementation is a container;
    /// graph nodes carry `None`.
    pub container_execution_status: Option<ContainerExecutionStatus>,
}

/// A logical artifact slot within a compiled graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactNode {
    /// Row identifier.
    pub id: ArtifactId,
    /// The execution that produces this artifact; null for constants and
    /// unresolved graph inputs.
    pub producer_execution_id: Option<ExecutionId>,
    /// The output name under which the producer emits this artifact.
    pub producer_output_name: Option<String>,
    /// Declared type name, if any.
    pub type_name: Option<String>,
    /// Declared type properties, if any.
    pub type_properties: Option<serde_json::Value>,
    /// The content record backing this slot, once available.
    pub artifact_data_id: Option<ArtifactDataId>,
    /// Monotone: once content has ever been attached, stays true even if a
    /// later operation nulls `artifact_data_id` (which never happens today,
    /// but the flag exists to make that invariant explicit).
    pub had_data_in_past: bool,
}

/// An immutable content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactData {
    /// Row identifier.
    pub id: ArtifactDataId,
    /// Byte size of the content.
    pub total_size: u64,
    /// Whether this content is a directory rather than a single file.
    pub is_dir: bool,
    /// Canonical `md5=<hex>` content hash.
    pub hash: String,
    /// Storage location, absent for inline-only constants.
    pub uri: Option<String>,
    /// Short inline value, present only when `total_size < 256` and the
    /// content decodes as UTF-8.
    pub value: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ArtifactData {
    /// True if this record has somewhere its content can actually be read from.
    #[must_use]
    pub const fn has_location(&self) -> bool {
        self.uri.is_some() || self.value.is_some()
    }
}

/// Directed wiring: `execution_id` consumes `artifact_id` as input `input_name`.
/// Unique on `(execution_id, input_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputArtifactLink {
    /// The consuming execution.
    pub execution_id: ExecutionId,
    /// The input slot name on the consumer.
    pub input_name: String,
    /// The artifact supplying the value.
    pub artifact_id: ArtifactId,
}

/// Directed wiring: `execution_id` produces `artifact_id` as output `output_name`.
/// Unique on `(execution_id, output_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifactLink {
    /// The producing execution.
    pub execution_id: ExecutionId,
    /// The output slot name on the producer.
    pub output_name: String,
    /// The artifact receiving the value.
    pub artifact_id: ArtifactId,
}

/// One actual launch attempt of a container workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerExecution {
    /// Row identifier.
    pub id: ContainerExecutionId,
    /// Current reported status.
    pub status: ContainerExecutionStatus,
    /// Process exit code, once known.
    pub exit_code: Option<i64>,
    /// Opaque launcher handle, serialized as `{kind, payload}`.
    pub launcher_data: Vec<u8>,
    /// Input name to the `ArtifactData` id actually consumed; an input
    /// still missing data when the launch was recorded is omitted here
    /// rather than stored as null.
    pub input_artifact_data_map: BTreeMap<String, ArtifactDataId>,
    /// Output name to the `ArtifactData` id produced, once finalized.
    pub output_artifact_data_map: BTreeMap<String, ArtifactDataId>,
    /// Location of the uploaded container log, once available.
    pub log_uri: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last-modified timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Last time the in-flight sweep examined this row; drives the
    /// round-robin aging order.
    #[serde(with = "time::serde::rfc3339")]
    pub last_processed_at: OffsetDateTime,
}
