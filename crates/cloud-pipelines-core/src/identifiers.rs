// cloud-pipelines-core/src/identifiers.rs
// ============================================================================
// Module: Cloud Pipelines Identifiers
// Description: Opaque integer identifiers for pipeline entities.
// Purpose: Provide strongly typed, serializable row identifiers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every entity uses an opaque integer
//! primary key. These newtypes keep a `PipelineRunId` from being passed where
//! an `ExecutionId` is expected, while serializing transparently as plain
//! integers for storage and JSON projections.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw row identifier.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw row identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(PipelineRunId, "Identifies a `PipelineRun` row.");
opaque_id!(ExecutionId, "Identifies an `ExecutionNode` row.");
opaque_id!(ArtifactId, "Identifies an `ArtifactNode` row.");
opaque_id!(ArtifactDataId, "Identifies an `ArtifactData` row.");
opaque_id!(ContainerExecutionId, "Identifies a `ContainerExecution` row.");
