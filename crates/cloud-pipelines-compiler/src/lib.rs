// cloud-pipelines-compiler/src/lib.rs
// ============================================================================
// Module: Cloud Pipelines Graph Compiler
// Description: Compiles a submitted TaskSpec tree into a CompiledGraph.
// Purpose: Compile graphs as a pure function over `cloud-pipelines-core`
// types, independent of any storage backend.
// Dependencies: cloud-pipelines-core, thiserror, tracing
// ============================================================================

//! ## Overview
//! This crate owns exactly one responsibility: turning a user-submitted
//! [`cloud_pipelines_core::TaskSpec`] tree into a
//! [`cloud_pipelines_core::CompiledGraph`] — topological sort of
//! graph children, input/output wiring, constant materialization, and the
//! initial `QUEUED`/`WAITING_FOR_UPSTREAM` split for container nodes. It
//! never persists anything; a `PipelineStore` implementation does that in
//! one transaction from the value this crate returns.

#![forbid(unsafe_code)]

mod compiler;
mod error;

pub use compiler::CompilerOptions;
pub use compiler::DEFAULT_MAX_GRAPH_DEPTH;
pub use compiler::compile_pipeline;
pub use error::CompileError;
