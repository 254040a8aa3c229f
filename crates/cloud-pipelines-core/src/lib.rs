// cloud-pipelines-core/src/lib.rs
// ============================================================================
// Module: Cloud Pipelines Core
// Description: Shared data model, hashing, and interface contracts for the
// Cloud Pipelines graph compiler and orchestrator.
// Purpose: Provide the vocabulary every other crate in the workspace builds on.
// Dependencies: serde, serde_jcs, md-5, time, thiserror, rand
// ============================================================================

//! ## Overview
//! This crate defines the entities
//! (`TaskSpec`, `PipelineRun`, `ExecutionNode`, `ArtifactNode`, `ArtifactData`,
//! `ContainerExecution`), the container-execution state machine, canonical
//! hashing, URI layout helpers, and the backend-agnostic `StorageProvider` /
//! `ContainerLauncher` traits that the orchestrator drives. Nothing here talks
//! to a database or a container runtime directly.

#![forbid(unsafe_code)]

pub mod annotations;
pub mod compiled_graph;
pub mod entities;
pub mod hashing;
pub mod identifiers;
pub mod interfaces;
pub mod status;
pub mod store;
pub mod task_spec;
pub mod uri;

pub use annotations::merge_annotations;
pub use compiled_graph::CompiledArtifactData;
pub use compiled_graph::CompiledArtifactNode;
pub use compiled_graph::CompiledExecutionNode;
pub use compiled_graph::CompiledGraph;
pub use compiled_graph::CompiledInputLink;
pub use compiled_graph::CompiledOutputLink;
pub use compiled_graph::PipelineRunSubmission;
pub use entities::ArtifactData;
pub use entities::ArtifactNode;
pub use entities::ContainerExecution;
pub use entities::ExecutionNode;
pub use entities::InputArtifactLink;
pub use entities::OutputArtifactLink;
pub use entities::PipelineRun;
pub use hashing::canonical_json_bytes;
pub use hashing::md5_hex;
pub use hashing::CacheKey;
pub use identifiers::ArtifactDataId;
pub use identifiers::ArtifactId;
pub use identifiers::ContainerExecutionId;
pub use identifiers::ExecutionId;
pub use identifiers::PipelineRunId;
pub use interfaces::ContainerLauncher;
pub use interfaces::GuardedAction;
pub use interfaces::IdentityGuard;
pub use interfaces::InputArgument;
pub use interfaces::LaunchedContainer;
pub use interfaces::LauncherError;
pub use interfaces::LauncherStatus;
pub use interfaces::PermissionError;
pub use interfaces::PermitAll;
pub use interfaces::StorageError;
pub use interfaces::StorageInfo;
pub use interfaces::StorageProvider;
pub use status::ContainerExecutionStatus;
pub use store::AggregateStatusCounts;
pub use store::ExecutionDetail;
pub use store::FinalizedOutput;
pub use store::NewArtifactData;
pub use store::PipelineStore;
pub use store::ResolvedInput;
pub use store::StoreError;
pub use task_spec::ArgumentSource;
pub use task_spec::ComponentImplementation;
pub use task_spec::ComponentReference;
pub use task_spec::ComponentSpec;
pub use task_spec::ContainerSpec;
pub use task_spec::GraphSpec;
pub use task_spec::InputSpec;
pub use task_spec::OutputSpec;
pub use task_spec::TaskSpec;
pub use task_spec::TypeSpec;
