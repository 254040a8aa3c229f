// cloud-pipelines-compiler/src/compiler.rs
// ============================================================================
// Module: Graph Compiler
// Description: Recursive depth-first TaskSpec -> CompiledGraph materialization.
// Purpose: Implement the algorithm end to end: toposort, wiring, constant
// materialization, and the QUEUED/WAITING_FOR_UPSTREAM initial-status split.
// Dependencies: cloud-pipelines-core, tracing
// ============================================================================

//! ## Overview
//! [`compile_pipeline`] walks a submitted root [`TaskSpec`] depth-first,
//! assigning small sequential local ids to execution nodes and artifact
//! nodes as it goes (two independent counters, since each maps onto a
//! different table with its own row-id sequence downstream). A
//! [`cloud_pipelines_core::PipelineStore`] later remaps these local ids to
//! real row ids within one transaction; this crate never touches storage.

use std::collections::BTreeMap;
use std::collections::HashMap;

use cloud_pipelines_core::ArgumentSource;
use cloud_pipelines_core::CompiledArtifactData;
use cloud_pipelines_core::CompiledArtifactNode;
use cloud_pipelines_core::CompiledExecutionNode;
use cloud_pipelines_core::CompiledGraph;
use cloud_pipelines_core::CompiledInputLink;
use cloud_pipelines_core::CompiledOutputLink;
use cloud_pipelines_core::ComponentImplementation;
use cloud_pipelines_core::ContainerExecutionStatus;
use cloud_pipelines_core::InputSpec;
use cloud_pipelines_core::TaskSpec;
use cloud_pipelines_core::TypeSpec;
use cloud_pipelines_core::hashing::md5_hex;
use serde_json::Value;

use crate::error::CompileError;

/// The default recursion depth cap, used when a caller does not
/// supply its own via [`CompilerOptions`].
pub const DEFAULT_MAX_GRAPH_DEPTH: u32 = 64;

/// Options controlling one [`compile_pipeline`] call.
#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    /// Maximum nested graph depth before compilation fails rather than
    /// recursing further.
    pub max_graph_depth: u32,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { max_graph_depth: DEFAULT_MAX_GRAPH_DEPTH }
    }
}

/// Compiles a root [`TaskSpec`] into a [`CompiledGraph`].
///
/// Root-level arguments may only be [`ArgumentSource::ConstantString`]; any
/// other kind is rejected before any node is materialized.
///
/// # Errors
///
/// Returns [`CompileError`] when the submission fails validation: a missing
/// required input, a cyclic or unresolved task reference, a non-constant
/// root argument, a malformed graph output, or a graph nested deeper than
/// `options.max_graph_depth`.
pub fn compile_pipeline(
    root_task: &TaskSpec,
    options: CompilerOptions,
) -> Result<CompiledGraph, CompileError> {
    tracing::info!(max_graph_depth = options.max_graph_depth, "compiling pipeline");
    for (name, argument) in &root_task.arguments {
        if !matches!(argument, ArgumentSource::ConstantString { .. }) {
            return Err(CompileError::InvalidRootArgument(name.clone()));
        }
    }

    let mut builder = GraphBuilder::new(options.max_graph_depth);
    let empty_incoming = BTreeMap::new();
    let empty_siblings = HashMap::new();
    let root = builder.compile_node(
        root_task,
        None,
        None,
        &[],
        &empty_incoming,
        &empty_siblings,
        0,
        "root",
    )?;
    builder.graph.root_local_id = root.local_id;
    tracing::info!(
        nodes = builder.graph.nodes.len(),
        artifacts = builder.graph.artifacts.len(),
        "pipeline compiled"
    );
    Ok(builder.graph)
}

/// The outcome of resolving one declared input against its argument.
enum Resolved {
    /// The input is wired to an existing or freshly materialized artifact.
    Connected(u64),
    /// The input has no wiring; permitted only for optional inputs.
    Unconnected,
}

/// One compiled node's declared outputs, by name, for its parent to consume.
type OutputMap = BTreeMap<String, u64>;

/// Accumulates a [`CompiledGraph`] across one recursive compile.
struct GraphBuilder {
    graph: CompiledGraph,
    next_execution_id: u64,
    next_artifact_id: u64,
    artifact_has_inline_data: HashMap<u64, bool>,
    max_graph_depth: u32,
}

impl GraphBuilder {
    fn new(max_graph_depth: u32) -> Self {
        Self {
            graph: CompiledGraph::new(),
            next_execution_id: 0,
            next_artifact_id: 0,
            artifact_has_inline_data: HashMap::new(),
            max_graph_depth,
        }
    }

    /// Compiles one task instance and, if it is a graph, its entire subtree.
    ///
    /// `incoming_artifacts` is the enclosing graph node's own resolved input
    /// map (input name -> artifact local id), used to resolve
    /// `GraphInputArgument` sources. `sibling_outputs` holds the output maps
    /// of already-compiled siblings in the same `tasks` map, used to resolve
    /// `TaskOutputArgument` sources.
    #[allow(clippy::too_many_arguments, reason = "recursive descent carries scope explicitly")]
    fn compile_node(
        &mut self,
        task: &TaskSpec,
        parent_local_id: Option<u64>,
        task_id_in_parent: Option<String>,
        ancestors: &[u64],
        incoming_artifacts: &BTreeMap<String, u64>,
        sibling_outputs: &HashMap<String, OutputMap>,
        depth: u32,
        task_path: &str,
    ) -> Result<CompiledNodeResult, CompileError> {
        if depth > self.max_graph_depth {
            return Err(CompileError::DepthExceeded { max_depth: self.max_graph_depth });
        }

        let local_id = self.next_execution_id;
        self.next_execution_id += 1;

        let component_spec = &task.component_ref.spec;
        let mut resolved_inputs: BTreeMap<String, u64> = BTreeMap::new();
        for input in &component_spec.inputs {
            let argument = task.arguments.get(&input.name);
            let resolved = self.resolve_input(
                input,
                argument,
                incoming_artifacts,
                sibling_outputs,
                task_path,
            )?;
            match resolved {
                Resolved::Connected(artifact_local_id) => {
                    self.graph.input_links.push(CompiledInputLink {
                        execution_local_id: local_id,
                        input_name: input.name.clone(),
                        artifact_local_id,
                    });
                    resolved_inputs.insert(input.name.clone(), artifact_local_id);
                }
                Resolved::Unconnected => {
                    if input.required && input.default.is_none() {
                        return Err(CompileError::MissingRequiredInput(format!(
                            "{task_path}.{}",
                            input.name
                        )));
                    }
                }
            }
        }

        let child_ancestors: Vec<u64> = {
            let mut extended = ancestors.to_vec();
            extended.push(local_id);
            extended
        };

        let (container_execution_status, own_outputs) = match &component_spec.implementation {
            ComponentImplementation::Container(_) => {
                let status = if resolved_inputs
                    .values()
                    .all(|artifact_local_id| self.has_inline_data(*artifact_local_id))
                {
                    ContainerExecutionStatus::Queued
                } else {
                    ContainerExecutionStatus::WaitingForUpstream
                };
                let outputs = self.materialize_container_outputs(local_id, component_spec);
                (Some(status), outputs)
            }
            ComponentImplementation::Graph(graph_spec) => {
                let order = toposort_tasks(&graph_spec.tasks)?;
                let mut compiled_siblings: HashMap<String, OutputMap> = HashMap::new();
                for task_id in order {
                    let child_task = &graph_spec.tasks[&task_id];
                    let child_path = format!("{task_path}.{task_id}");
                    let child_result = self.compile_node(
                        child_task,
                        Some(local_id),
                        Some(task_id.clone()),
                        &child_ancestors,
                        &resolved_inputs,
                        &compiled_siblings,
                        depth + 1,
                        &child_path,
                    )?;
                    compiled_siblings.insert(task_id, child_result.outputs);
                }
                let outputs = self.materialize_graph_outputs(
                    local_id,
                    &graph_spec.output_values,
                    &compiled_siblings,
                )?;
                (None, outputs)
            }
        };

        self.graph.nodes.push(CompiledExecutionNode {
            local_id,
            task_spec: task.clone(),
            parent_local_id,
            task_id_in_parent_execution: task_id_in_parent,
            ancestor_local_ids: ancestors.to_vec(),
            container_execution_status,
        });

        Ok(CompiledNodeResult { local_id, outputs: own_outputs })
    }

    fn has_inline_data(&self, artifact_local_id: u64) -> bool {
        self.artifact_has_inline_data.get(&artifact_local_id).copied().unwrap_or(false)
    }

    fn resolve_input(
        &mut self,
        input: &InputSpec,
        argument: Option<&ArgumentSource>,
        incoming_artifacts: &BTreeMap<String, u64>,
        sibling_outputs: &HashMap<String, OutputMap>,
        task_path: &str,
    ) -> Result<Resolved, CompileError> {
        match argument {
            Some(ArgumentSource::ConstantString { value }) => {
                Ok(Resolved::Connected(self.push_constant_artifact(value, &input.type_spec)))
            }
            Some(ArgumentSource::GraphInputArgument { input_name }) => {
                Ok(match incoming_artifacts.get(input_name) {
                    Some(artifact_local_id) => Resolved::Connected(*artifact_local_id),
                    None => Resolved::Unconnected,
                })
            }
            Some(ArgumentSource::TaskOutputArgument { task_id, output_name }) => {
                let outputs = sibling_outputs.get(task_id).ok_or_else(|| {
                    CompileError::UnresolvedReference(format!(
                        "{task_path}.{}: unknown task '{task_id}'",
                        input.name
                    ))
                })?;
                let artifact_local_id = outputs.get(output_name).copied().ok_or_else(|| {
                    CompileError::UnresolvedReference(format!(
                        "{task_path}.{}: task '{task_id}' has no output '{output_name}'",
                        input.name
                    ))
                })?;
                Ok(Resolved::Connected(artifact_local_id))
            }
            None => Ok(match &input.default {
                Some(default_value) => {
                    Resolved::Connected(self.push_constant_artifact(default_value, &input.type_spec))
                }
                None => Resolved::Unconnected,
            }),
        }
    }

    fn push_constant_artifact(&mut self, value: &str, type_spec: &Option<TypeSpec>) -> u64 {
        let (type_name, type_properties) = type_spec_parts(type_spec);
        let bytes = value.as_bytes();
        let local_id = self.next_artifact_id;
        self.next_artifact_id += 1;
        self.graph.artifacts.push(CompiledArtifactNode {
            local_id,
            producer_local_id: None,
            producer_output_name: None,
            type_name,
            type_properties,
            inline_data: Some(CompiledArtifactData {
                total_size: bytes.len() as u64,
                is_dir: false,
                hash: md5_hex(bytes),
                uri: None,
                value: Some(value.to_string()),
            }),
            had_data_in_past: true,
        });
        self.artifact_has_inline_data.insert(local_id, true);
        local_id
    }

    fn materialize_container_outputs(
        &mut self,
        producer_local_id: u64,
        component_spec: &cloud_pipelines_core::ComponentSpec,
    ) -> OutputMap {
        let mut outputs = OutputMap::new();
        for output in &component_spec.outputs {
            let (type_name, type_properties) = type_spec_parts(&output.type_spec);
            let artifact_local_id = self.next_artifact_id;
            self.next_artifact_id += 1;
            self.graph.artifacts.push(CompiledArtifactNode {
                local_id: artifact_local_id,
                producer_local_id: Some(producer_local_id),
                producer_output_name: Some(output.name.clone()),
                type_name,
                type_properties,
                inline_data: None,
                had_data_in_past: false,
            });
            self.artifact_has_inline_data.insert(artifact_local_id, false);
            self.graph.output_links.push(CompiledOutputLink {
                execution_local_id: producer_local_id,
                output_name: output.name.clone(),
                artifact_local_id,
            });
            outputs.insert(output.name.clone(), artifact_local_id);
        }
        outputs
    }

    fn materialize_graph_outputs(
        &mut self,
        graph_local_id: u64,
        output_values: &BTreeMap<String, ArgumentSource>,
        compiled_siblings: &HashMap<String, OutputMap>,
    ) -> Result<OutputMap, CompileError> {
        let mut outputs = OutputMap::new();
        for (output_name, source) in output_values {
            let ArgumentSource::TaskOutputArgument { task_id, output_name: inner_name } = source
            else {
                return Err(CompileError::InvalidGraphOutput(output_name.clone()));
            };
            let sibling_outputs = compiled_siblings.get(task_id).ok_or_else(|| {
                CompileError::UnresolvedReference(format!(
                    "graph output '{output_name}': unknown task '{task_id}'"
                ))
            })?;
            let artifact_local_id = sibling_outputs.get(inner_name).copied().ok_or_else(|| {
                CompileError::UnresolvedReference(format!(
                    "graph output '{output_name}': task '{task_id}' has no output '{inner_name}'"
                ))
            })?;
            self.graph.output_links.push(CompiledOutputLink {
                execution_local_id: graph_local_id,
                output_name: output_name.clone(),
                artifact_local_id,
            });
            outputs.insert(output_name.clone(), artifact_local_id);
        }
        Ok(outputs)
    }
}

/// What a compiled node's subtree exposes to its parent.
struct CompiledNodeResult {
    local_id: u64,
    outputs: OutputMap,
}

/// Converts a declared `TypeSpec` into its `(name, properties)` parts.
fn type_spec_parts(type_spec: &Option<TypeSpec>) -> (Option<String>, Option<Value>) {
    match type_spec {
        None => (None, None),
        Some(TypeSpec::Name(name)) => (Some(name.clone()), None),
        Some(TypeSpec::NameWithProperties(map)) => match map.iter().next() {
            Some((name, properties)) => (Some(name.clone()), Some(properties.clone())),
            None => (None, None),
        },
    }
}

/// Topologically sorts `tasks` by their `TaskOutputArgument` dependencies:
/// iteration order is stabilized by the caller's `BTreeMap`, and a
/// cycle is reported naming the task with the smallest remaining dependency
/// count once no zero-dependency task remains.
fn toposort_tasks(tasks: &BTreeMap<String, TaskSpec>) -> Result<Vec<String>, CompileError> {
    let mut remaining: BTreeMap<String, usize> = BTreeMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for (task_id, task) in tasks {
        let mut dependency_count = 0_usize;
        for argument in task.arguments.values() {
            if let ArgumentSource::TaskOutputArgument { task_id: dep_id, .. } = argument {
                if !tasks.contains_key(dep_id) {
                    return Err(CompileError::UnresolvedReference(format!(
                        "task '{task_id}' depends on unknown task '{dep_id}'"
                    )));
                }
                dependency_count += 1;
                dependents.entry(dep_id.clone()).or_default().push(task_id.clone());
            }
        }
        remaining.insert(task_id.clone(), dependency_count);
    }

    let mut order = Vec::with_capacity(tasks.len());
    while order.len() < tasks.len() {
        let ready = remaining
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(task_id, _)| task_id.clone())
            .next();
        let Some(task_id) = ready else {
            let stuck = remaining
                .iter()
                .min_by_key(|&(task_id, &count)| (count, task_id.clone()))
                .map(|(task_id, _)| task_id.clone())
                .unwrap_or_default();
            return Err(CompileError::CyclicDependency(stuck));
        };
        remaining.remove(&task_id);
        if let Some(affected) = dependents.get(&task_id) {
            for dependent in affected {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        order.push(task_id);
    }
    Ok(order)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use std::collections::BTreeMap;

    use cloud_pipelines_core::ArgumentSource;
    use cloud_pipelines_core::ComponentImplementation;
    use cloud_pipelines_core::ComponentReference;
    use cloud_pipelines_core::ComponentSpec;
    use cloud_pipelines_core::ContainerExecutionStatus;
    use cloud_pipelines_core::ContainerSpec;
    use cloud_pipelines_core::GraphSpec;
    use cloud_pipelines_core::InputSpec;
    use cloud_pipelines_core::OutputSpec;
    use cloud_pipelines_core::TaskSpec;

    use super::CompileError;
    use super::CompilerOptions;
    use super::compile_pipeline;

    fn container_task(
        inputs: Vec<InputSpec>,
        outputs: Vec<OutputSpec>,
        arguments: BTreeMap<String, ArgumentSource>,
    ) -> TaskSpec {
        TaskSpec {
            component_ref: ComponentReference {
                spec: ComponentSpec {
                    name: "component".to_string(),
                    inputs,
                    outputs,
                    implementation: ComponentImplementation::Container(ContainerSpec {
                        image: "busybox".to_string(),
                        command: vec![],
                        args: vec![],
                        env: BTreeMap::new(),
                    }),
                },
            },
            arguments,
            annotations: BTreeMap::new(),
        }
    }

    fn out(name: &str) -> OutputSpec {
        OutputSpec { name: name.to_string(), type_spec: None }
    }

    fn required_input(name: &str) -> InputSpec {
        InputSpec { name: name.to_string(), type_spec: None, required: true, default: None }
    }

    #[test]
    fn linear_three_step_pipeline_compiles_correctly() {
        let a = container_task(vec![], vec![out("out")], BTreeMap::new());
        let b = container_task(
            vec![required_input("in")],
            vec![out("out")],
            BTreeMap::from([(
                "in".to_string(),
                ArgumentSource::TaskOutputArgument {
                    task_id: "a".to_string(),
                    output_name: "out".to_string(),
                },
            )]),
        );
        let c = container_task(
            vec![required_input("in")],
            vec![out("out")],
            BTreeMap::from([(
                "in".to_string(),
                ArgumentSource::TaskOutputArgument {
                    task_id: "b".to_string(),
                    output_name: "out".to_string(),
                },
            )]),
        );
        let root = TaskSpec {
            component_ref: ComponentReference {
                spec: ComponentSpec {
                    name: "root".to_string(),
                    inputs: vec![],
                    outputs: vec![],
                    implementation: ComponentImplementation::Graph(GraphSpec {
                        tasks: BTreeMap::from([
                            ("a".to_string(), a),
                            ("b".to_string(), b),
                            ("c".to_string(), c),
                        ]),
                        output_values: BTreeMap::new(),
                    }),
                },
            },
            arguments: BTreeMap::new(),
            annotations: BTreeMap::new(),
        };

        let graph = compile_pipeline(&root, CompilerOptions::default()).unwrap();
        let statuses: Vec<_> = graph
            .nodes
            .iter()
            .filter_map(|node| node.container_execution_status)
            .collect();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses.iter().filter(|s| **s == ContainerExecutionStatus::Queued).count(), 1);
        assert_eq!(
            statuses.iter().filter(|s| **s == ContainerExecutionStatus::WaitingForUpstream).count(),
            2
        );
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let x = container_task(
            vec![required_input("in")],
            vec![out("out")],
            BTreeMap::from([(
                "in".to_string(),
                ArgumentSource::TaskOutputArgument {
                    task_id: "y".to_string(),
                    output_name: "out".to_string(),
                },
            )]),
        );
        let y = container_task(
            vec![required_input("in")],
            vec![out("out")],
            BTreeMap::from([(
                "in".to_string(),
                ArgumentSource::TaskOutputArgument {
                    task_id: "x".to_string(),
                    output_name: "out".to_string(),
                },
            )]),
        );
        let root = TaskSpec {
            component_ref: ComponentReference {
                spec: ComponentSpec {
                    name: "root".to_string(),
                    inputs: vec![],
                    outputs: vec![],
                    implementation: ComponentImplementation::Graph(GraphSpec {
                        tasks: BTreeMap::from([("x".to_string(), x), ("y".to_string(), y)]),
                        output_values: BTreeMap::new(),
                    }),
                },
            },
            arguments: BTreeMap::new(),
            annotations: BTreeMap::new(),
        };

        let result = compile_pipeline(&root, CompilerOptions::default());
        assert!(matches!(result, Err(CompileError::CyclicDependency(_))));
    }

    #[test]
    fn constant_input_compiles_with_default_value() {
        let task = container_task(
            vec![InputSpec {
                name: "threshold".to_string(),
                type_spec: None,
                required: true,
                default: Some("0.5".to_string()),
            }],
            vec![],
            BTreeMap::new(),
        );

        let graph = compile_pipeline(&task, CompilerOptions::default()).unwrap();
        assert_eq!(graph.nodes[0].container_execution_status, Some(ContainerExecutionStatus::Queued));
        let artifact = &graph.artifacts[0];
        let data = artifact.inline_data.as_ref().unwrap();
        assert_eq!(data.value.as_deref(), Some("0.5"));
        assert_eq!(data.total_size, 3);
        assert_eq!(data.hash, "md5=d310cb367d993fb6fb584b198a2fd72c");
        assert!(!data.is_dir);
        assert!(artifact.had_data_in_past);
    }

    #[test]
    fn missing_required_input_fails_compilation() {
        let task = container_task(vec![required_input("threshold")], vec![], BTreeMap::new());
        let result = compile_pipeline(&task, CompilerOptions::default());
        assert!(matches!(result, Err(CompileError::MissingRequiredInput(_))));
    }

    #[test]
    fn root_task_output_argument_is_rejected() {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "in".to_string(),
            ArgumentSource::TaskOutputArgument {
                task_id: "other".to_string(),
                output_name: "out".to_string(),
            },
        );
        let task = container_task(vec![required_input("in")], vec![], arguments);
        let result = compile_pipeline(&task, CompilerOptions::default());
        assert!(matches!(result, Err(CompileError::InvalidRootArgument(_))));
    }

    #[test]
    fn depth_cap_rejects_deeply_nested_graphs() {
        let mut inner = container_task(vec![], vec![], BTreeMap::new());
        for index in 0..5 {
            inner = TaskSpec {
                component_ref: ComponentReference {
                    spec: ComponentSpec {
                        name: format!("wrapper-{index}"),
                        inputs: vec![],
                        outputs: vec![],
                        implementation: ComponentImplementation::Graph(GraphSpec {
                            tasks: BTreeMap::from([("child".to_string(), inner)]),
                            output_values: BTreeMap::new(),
                        }),
                    },
                },
                arguments: BTreeMap::new(),
                annotations: BTreeMap::new(),
            };
        }

        let result = compile_pipeline(&inner, CompilerOptions { max_graph_depth: 2 });
        assert!(matches!(result, Err(CompileError::DepthExceeded { max_depth: 2 })));
    }
}
