// cloud-pipelines-core/src/status.rs
// ============================================================================
// Module: Container Execution State Machine
// Description: States and permitted transitions for a container ExecutionNode.
// Purpose: Give every writer of `ExecutionNode.container_execution_status` a
// single source of truth for which transitions are legal.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! `ExecutionNode`s whose component is a nested graph never carry a status;
//! only leaf container nodes do.

use serde::Deserialize;
use serde::Serialize;

/// The state of a container `ExecutionNode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerExecutionStatus {
    /// Assigned transiently before the compiler decides `Queued` vs `WaitingForUpstream`.
    Uninitialized,
    /// At least one input artifact has no `ArtifactData` yet.
    WaitingForUpstream,
    /// Ready for the next ready-queue sweep.
    Queued,
    /// A launch succeeded; a `ContainerExecution` exists and has not yet run.
    Pending,
    /// The launcher reports the container as running.
    Running,
    /// Terminal: the container finished successfully.
    Succeeded,
    /// Terminal: the container finished with a non-zero exit or launcher failure.
    Failed,
    /// Terminal: skipped because an upstream producer did not succeed.
    Skipped,
    /// Terminal: an internal error occurred outside the container's own exit path.
    SystemError,
    /// Terminal: cancelled by a user request.
    Cancelled,
}

impl ContainerExecutionStatus {
    /// Returns true for any of the five terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::SystemError | Self::Cancelled
        )
    }

    /// Returns true if `self → next` is a permitted transition.
    ///
    /// This is the single gate every writer of the status column must pass
    /// through; an illegal transition is a programming bug and is
    /// reported as a [`crate::store::StoreError::IllegalTransition`] rather
    /// than silently applied.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::WaitingForUpstream, Self::Queued)
            | (Self::Queued, Self::WaitingForUpstream)
            | (Self::Queued, Self::Pending | Self::SystemError | Self::Succeeded)
            | (Self::Pending, Self::Running | Self::Succeeded | Self::Failed | Self::SystemError)
            | (Self::Running, Self::Succeeded | Self::Failed | Self::SystemError) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            (Self::WaitingForUpstream, Self::Skipped) => true,
            _ => false,
        }
    }
}
