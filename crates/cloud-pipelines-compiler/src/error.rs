// cloud-pipelines-compiler/src/error.rs
// ============================================================================
// Module: Compiler Errors
// Description: Validation failures raised while compiling a TaskSpec tree.
// Purpose: Give callers a narrow, match-able error for every way a submitted
// pipeline can fail the validation rules.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every variant here corresponds to a specific rejection rule 
//! None of them are recoverable mid-compile: the whole submission is
//! rejected and no partial `CompiledGraph` is ever returned to a caller.

use thiserror::Error;

/// Errors raised while compiling a submitted `TaskSpec` tree into a
/// [`crate::CompiledGraph`].
#[derive(Debug, Error)]
pub enum CompileError {
    /// A required declared input had neither an argument nor a default.
    #[error("required input '{0}' has no argument and no default")]
    MissingRequiredInput(String),

    /// A graph's child tasks form a cycle through `TaskOutputArgument`
    /// references; names the task with the smallest remaining dependency
    /// count at the point the cycle was detected.
    #[error("cyclic task dependency detected at '{0}'")]
    CyclicDependency(String),

    /// A `TaskOutputArgument` referenced a task id or output name that does
    /// not exist in the enclosing graph.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A root task supplied a non-constant argument; root arguments may only
    /// be `ConstantString`.
    #[error("root task argument '{0}' must be a constant string")]
    InvalidRootArgument(String),

    /// A graph's `output_values` entry was not a `TaskOutputArgument`.
    #[error("graph output '{0}' must be a task_output_argument")]
    InvalidGraphOutput(String),

    /// Recursion depth exceeded the configured cap before the tree bottomed
    /// out, per its "fail rather than exhaust the stack" policy.
    #[error("graph nesting exceeds the configured depth cap of {max_depth}")]
    DepthExceeded {
        /// The configured cap that was exceeded.
        max_depth: u32,
    },
}
