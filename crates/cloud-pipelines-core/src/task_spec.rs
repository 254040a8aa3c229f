// cloud-pipelines-core/src/task_spec.rs
// ============================================================================
// Module: Task Specification Tree
// Description: The submitted, never-mutated input document the compiler consumes.
// Purpose: Represent nested container/graph components and their argument wiring.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A `TaskSpec` is the user-submitted unit of work: a reference to a
//! `ComponentSpec` (container or nested graph) plus a map of argument
//! sources. `TaskSpec` trees are immutable once accepted by the compiler;
//! the compiler only ever reads them when materializing `ExecutionNode`s.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// The declared interface and implementation of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Human-readable component name.
    pub name: String,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// The concrete implementation: a container or a nested graph.
    pub implementation: ComponentImplementation,
}

/// A single declared component input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Input name, unique within the component.
    pub name: String,
    /// Declared type, if any.
    #[serde(default, rename = "type")]
    pub type_spec: Option<TypeSpec>,
    /// Whether the input must be supplied (no default, no optional flag).
    #[serde(default = "default_true")]
    pub required: bool,
    /// Default value used when no argument is supplied.
    #[serde(default)]
    pub default: Option<String>,
}

const fn default_true() -> bool {
    true
}

/// A single declared component output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output name, unique within the component.
    pub name: String,
    /// Declared type, if any.
    #[serde(default, rename = "type")]
    pub type_spec: Option<TypeSpec>,
}

/// A component's declared type: either a bare name or a name with properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    /// A bare type name, e.g. `"String"`.
    Name(String),
    /// A type name with associated properties, e.g. `{"GcsPath": {"bucket_type": "versioned"}}`.
    NameWithProperties(BTreeMap<String, serde_json::Value>),
}

/// The implementation half of a `ComponentSpec`: a container or a nested graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentImplementation {
    /// A containerized leaf task.
    Container(ContainerSpec),
    /// A nested graph of child tasks.
    Graph(GraphSpec),
}

/// A containerized task's launch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image reference.
    pub image: String,
    /// Entrypoint command, with templated placeholders resolved by the
    /// launcher from `input_arguments`/`output_uris`.
    #[serde(default)]
    pub command: Vec<String>,
    /// Additional arguments appended after `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables passed to the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A nested graph component: child tasks plus graph-level output wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Child tasks keyed by their id within this graph. A `BTreeMap` is used
    /// so iteration order is stable across compiles, matching the toposort
    /// tie-break policy (smallest remaining dependency count).
    pub tasks: BTreeMap<String, TaskSpec>,
    /// Graph-level output name to the sibling task output that supplies it.
    /// Values must be `ArgumentSource::TaskOutputArgument`.
    #[serde(default)]
    pub output_values: BTreeMap<String, ArgumentSource>,
}

/// A task instance: a reference to a component plus its argument wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// The component this task instantiates.
    pub component_ref: ComponentReference,
    /// Argument sources keyed by input name.
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentSource>,
    /// Arbitrary task-level annotations, merged at launch time.
    #[serde(default)]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

/// A reference to a component specification.
///
/// The source system resolves references against a component library; this
/// crate only ever sees the already-resolved `spec`, since library browsing
/// and publishing are out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentReference {
    /// The resolved component specification.
    pub spec: ComponentSpec,
}

/// The source of a single task argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentSource {
    /// A literal constant string value.
    ConstantString {
        /// The literal value.
        value: String,
    },
    /// Resolved against the enclosing graph's own incoming artifact map.
    /// Only valid on a `TaskSpec` nested inside a `GraphSpec`.
    GraphInputArgument {
        /// The name of the input on the enclosing graph.
        input_name: String,
    },
    /// Resolved against a sibling task's declared output.
    TaskOutputArgument {
        /// The id of the producing sibling task within the same graph.
        task_id: String,
        /// The name of the producing output.
        output_name: String,
    },
}
