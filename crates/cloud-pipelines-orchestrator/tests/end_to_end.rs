// cloud-pipelines-orchestrator/tests/end_to_end.rs
// ============================================================================
// Module: Orchestrator End-to-End Tests
// Description: Drives compile -> persist -> sweep against the real compiler,
// sqlite store, and filesystem/in-process providers rather than mocks.
// Purpose: Cover the sweep/cache/skip behaviors that a single-crate unit test
// cannot reach: a full graph progressing to completion, cache-key adoption
// across two separate runs, and skip propagation cascading through more than
// one hop.
// ============================================================================

#![allow(clippy::unwrap_used, reason = "test assertions")]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cloud_pipelines_compiler::CompilerOptions;
use cloud_pipelines_compiler::compile_pipeline;
use cloud_pipelines_core::ArgumentSource;
use cloud_pipelines_core::ComponentImplementation;
use cloud_pipelines_core::ComponentReference;
use cloud_pipelines_core::ComponentSpec;
use cloud_pipelines_core::ContainerExecutionStatus;
use cloud_pipelines_core::ContainerLauncher;
use cloud_pipelines_core::ContainerSpec;
use cloud_pipelines_core::GraphSpec;
use cloud_pipelines_core::InputArgument;
use cloud_pipelines_core::InputSpec;
use cloud_pipelines_core::LaunchedContainer;
use cloud_pipelines_core::LauncherError;
use cloud_pipelines_core::LauncherStatus;
use cloud_pipelines_core::OutputSpec;
use cloud_pipelines_core::PipelineRunSubmission;
use cloud_pipelines_core::PipelineStore;
use cloud_pipelines_core::StorageProvider;
use cloud_pipelines_core::TaskSpec;
use cloud_pipelines_orchestrator::Orchestrator;
use cloud_pipelines_orchestrator::OrchestratorSettings;
use cloud_pipelines_providers::FilesystemStorageProvider;
use cloud_pipelines_providers::InProcessLauncher;
use cloud_pipelines_store_sqlite::SqliteJournalMode;
use cloud_pipelines_store_sqlite::SqliteStore;
use cloud_pipelines_store_sqlite::SqliteStoreConfig;
use cloud_pipelines_store_sqlite::SqliteSyncMode;
use serde_json::Value;

fn input_spec(name: &str, required: bool) -> InputSpec {
    InputSpec { name: name.to_string(), type_spec: None, required, default: None }
}

fn output_spec(name: &str) -> OutputSpec {
    OutputSpec { name: name.to_string(), type_spec: None }
}

fn container_component(image: &str, inputs: Vec<InputSpec>, outputs: Vec<OutputSpec>) -> ComponentSpec {
    ComponentSpec {
        name: format!("{image}-component"),
        inputs,
        outputs,
        implementation: ComponentImplementation::Container(ContainerSpec {
            image: image.to_string(),
            command: vec!["run".to_string()],
            args: Vec::new(),
            env: BTreeMap::new(),
        }),
    }
}

fn task(component: ComponentSpec, arguments: BTreeMap<String, ArgumentSource>) -> TaskSpec {
    TaskSpec { component_ref: ComponentReference { spec: component }, arguments, annotations: BTreeMap::new() }
}

/// A root graph task wiring three container tasks in a line: `a -> b -> c`.
fn linear_three_step_root() -> TaskSpec {
    let mut a_args = BTreeMap::new();
    a_args.insert("seed".to_string(), ArgumentSource::ConstantString { value: "0.5".to_string() });
    let a = task(container_component("step-a", vec![input_spec("seed", true)], vec![output_spec("out")]), a_args);

    let mut b_args = BTreeMap::new();
    b_args.insert(
        "in".to_string(),
        ArgumentSource::TaskOutputArgument { task_id: "a".to_string(), output_name: "out".to_string() },
    );
    let b = task(container_component("step-b", vec![input_spec("in", true)], vec![output_spec("out")]), b_args);

    let mut c_args = BTreeMap::new();
    c_args.insert(
        "in".to_string(),
        ArgumentSource::TaskOutputArgument { task_id: "b".to_string(), output_name: "out".to_string() },
    );
    let c = task(container_component("step-c", vec![input_spec("in", true)], vec![output_spec("out")]), c_args);

    let mut tasks = BTreeMap::new();
    tasks.insert("a".to_string(), a);
    tasks.insert("b".to_string(), b);
    tasks.insert("c".to_string(), c);

    let graph = ComponentSpec {
        name: "linear-three-step".to_string(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        implementation: ComponentImplementation::Graph(GraphSpec { tasks, output_values: BTreeMap::new() }),
    };
    task(graph, BTreeMap::new())
}

/// A root graph task with three independent container tasks that share no
/// arguments, so all three become ready in the same ready-queue sweep.
fn three_independent_steps_root() -> TaskSpec {
    let mut tasks = BTreeMap::new();
    for (task_id, image) in [("a", "step-a"), ("b", "step-b"), ("c", "step-c")] {
        let mut args = BTreeMap::new();
        args.insert("seed".to_string(), ArgumentSource::ConstantString { value: "0.5".to_string() });
        tasks.insert(task_id.to_string(), task(container_component(image, vec![input_spec("seed", true)], vec![output_spec("out")]), args));
    }

    let graph = ComponentSpec {
        name: "three-independent-steps".to_string(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        implementation: ComponentImplementation::Graph(GraphSpec { tasks, output_values: BTreeMap::new() }),
    };
    task(graph, BTreeMap::new())
}

/// A root graph task with a single container task and no dependencies, used
/// to exercise cache-key adoption across two otherwise-unrelated runs.
fn single_step_root(seed: &str) -> TaskSpec {
    let mut args = BTreeMap::new();
    args.insert("seed".to_string(), ArgumentSource::ConstantString { value: seed.to_string() });
    let only = task(container_component("cacheable-step", vec![input_spec("seed", true)], vec![output_spec("out")]), args);

    let mut tasks = BTreeMap::new();
    tasks.insert("only".to_string(), only);
    let graph = ComponentSpec {
        name: "single-step".to_string(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        implementation: ComponentImplementation::Graph(GraphSpec { tasks, output_values: BTreeMap::new() }),
    };
    task(graph, BTreeMap::new())
}

fn open_store(dir: &std::path::Path, name: &str) -> SqliteStore {
    SqliteStore::new(SqliteStoreConfig {
        path: dir.join(name),
        busy_timeout_ms: 5_000,
        journal_mode: SqliteJournalMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    })
    .expect("open sqlite store")
}

fn settings(dir: &std::path::Path) -> OrchestratorSettings {
    OrchestratorSettings {
        cache_adoption_enabled: true,
        data_root_uri: format!("file://{}", dir.join("data").display()),
        logs_root_uri: format!("file://{}", dir.join("logs").display()),
        storage_retry_attempts: 2,
        storage_retry_delay: Duration::from_millis(1),
        default_task_annotations: Value::Object(serde_json::Map::new()),
    }
}

/// Drains both sweeps until neither claims anything, bounding the number of
/// rounds so a stuck test fails fast instead of hanging.
fn drain(orchestrator: &Orchestrator) {
    for _ in 0..100 {
        let ready = orchestrator.sweep_ready_once().expect("ready sweep");
        let inflight = orchestrator.sweep_inflight_once().expect("inflight sweep");
        if !ready && !inflight {
            return;
        }
    }
    panic!("orchestrator did not drain within 100 sweep rounds");
}

#[test]
fn linear_three_step_pipeline_runs_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PipelineStore> = Arc::new(open_store(dir.path(), "store.db"));
    let storage: Arc<dyn StorageProvider> = Arc::new(FilesystemStorageProvider::new());
    let launcher: Arc<dyn ContainerLauncher> = Arc::new(InProcessLauncher::new(Box::new(FilesystemStorageProvider::new())));
    let orchestrator = Orchestrator::new(Arc::clone(&store), storage, launcher, settings(dir.path()));

    let graph = compile_pipeline(&linear_three_step_root(), CompilerOptions::default()).unwrap();
    let run = store.persist_compiled_graph(&graph, PipelineRunSubmission::default()).unwrap();

    drain(&orchestrator);

    let detail = store.get_execution_detail(run.root_execution_id).unwrap().unwrap();
    assert_eq!(detail.children.len(), 3);
    for child in &detail.children {
        assert_eq!(child.container_execution_status, Some(ContainerExecutionStatus::Succeeded));
    }

    let counts = store.aggregate_status(run.root_execution_id).unwrap();
    assert_eq!(counts.len(), 3);
    for child in &detail.children {
        let child_counts = counts.get(&child.id).unwrap();
        assert_eq!(child_counts.get(&ContainerExecutionStatus::Succeeded), Some(&1));
    }
}

#[test]
fn failure_propagates_as_skip_through_two_hops() {
    struct AlwaysFailsLauncher;

    impl ContainerLauncher for AlwaysFailsLauncher {
        fn launch_container_task(
            &self,
            _component_spec: &ContainerSpec,
            _input_arguments: &BTreeMap<String, InputArgument>,
            _output_uris: &BTreeMap<String, String>,
            _log_uri: &str,
            _annotations: &Value,
        ) -> Result<LaunchedContainer, LauncherError> {
            Ok(LaunchedContainer { status: LauncherStatus::Pending, exit_code: None, started_at: None, ended_at: None, data: Vec::new() })
        }

        fn refresh(&self, handle_data: &[u8]) -> Result<LaunchedContainer, LauncherError> {
            Ok(LaunchedContainer {
                status: LauncherStatus::Failed,
                exit_code: Some(1),
                started_at: None,
                ended_at: None,
                data: handle_data.to_vec(),
            })
        }

        fn get_log(&self, _handle_data: &[u8]) -> Result<String, LauncherError> {
            Ok("step failed\n".to_string())
        }

        fn stream_log_lines(&self, _handle_data: &[u8]) -> Result<Vec<String>, LauncherError> {
            Ok(Vec::new())
        }

        fn terminate(&self, _handle_data: &[u8]) -> Result<(), LauncherError> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PipelineStore> = Arc::new(open_store(dir.path(), "store.db"));
    let storage: Arc<dyn StorageProvider> = Arc::new(FilesystemStorageProvider::new());
    let launcher: Arc<dyn ContainerLauncher> = Arc::new(AlwaysFailsLauncher);
    let orchestrator = Orchestrator::new(Arc::clone(&store), storage, launcher, settings(dir.path()));

    let graph = compile_pipeline(&linear_three_step_root(), CompilerOptions::default()).unwrap();
    let run = store.persist_compiled_graph(&graph, PipelineRunSubmission::default()).unwrap();

    drain(&orchestrator);

    let detail = store.get_execution_detail(run.root_execution_id).unwrap().unwrap();
    let mut by_task_id = BTreeMap::new();
    for child in &detail.children {
        let task_id = child.task_id_in_parent_execution.clone().unwrap();
        by_task_id.insert(task_id, child.container_execution_status);
    }
    assert_eq!(by_task_id.get("a"), Some(&Some(ContainerExecutionStatus::Failed)));
    assert_eq!(by_task_id.get("b"), Some(&Some(ContainerExecutionStatus::Skipped)));
    assert_eq!(by_task_id.get("c"), Some(&Some(ContainerExecutionStatus::Skipped)));
}

#[test]
fn second_run_with_identical_cache_key_adopts_the_first_runs_execution() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PipelineStore> = Arc::new(open_store(dir.path(), "store.db"));
    let storage: Arc<dyn StorageProvider> = Arc::new(FilesystemStorageProvider::new());
    let launcher: Arc<dyn ContainerLauncher> = Arc::new(InProcessLauncher::new(Box::new(FilesystemStorageProvider::new())));
    let orchestrator = Orchestrator::new(Arc::clone(&store), storage, launcher, settings(dir.path()));

    let graph_one = compile_pipeline(&single_step_root("0.5"), CompilerOptions::default()).unwrap();
    let run_one = store.persist_compiled_graph(&graph_one, PipelineRunSubmission::default()).unwrap();
    drain(&orchestrator);

    let detail_one = store.get_execution_detail(run_one.root_execution_id).unwrap().unwrap();
    let node_one = detail_one.children.first().unwrap();
    assert_eq!(node_one.container_execution_status, Some(ContainerExecutionStatus::Succeeded));
    let container_execution_id_one = node_one.container_execution_id.unwrap();

    let graph_two = compile_pipeline(&single_step_root("0.5"), CompilerOptions::default()).unwrap();
    let run_two = store.persist_compiled_graph(&graph_two, PipelineRunSubmission::default()).unwrap();

    // A single ready-queue sweep is enough for a cache hit: adoption sets the
    // node's terminal status directly, with no in-flight window to observe.
    assert!(orchestrator.sweep_ready_once().unwrap());

    let detail_two = store.get_execution_detail(run_two.root_execution_id).unwrap().unwrap();
    let node_two = detail_two.children.first().unwrap();
    assert_eq!(node_two.container_execution_status, Some(ContainerExecutionStatus::Succeeded));
    assert_eq!(node_two.container_execution_id, Some(container_execution_id_one));

    let counts = store.aggregate_status(run_two.root_execution_id).unwrap();
    let child_counts = counts.get(&node_two.id).unwrap();
    assert_eq!(child_counts.get(&ContainerExecutionStatus::Succeeded), Some(&1));
}

#[test]
fn cancelling_a_run_marks_every_non_terminal_node_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PipelineStore> = Arc::new(open_store(dir.path(), "store.db"));
    let storage: Arc<dyn StorageProvider> = Arc::new(FilesystemStorageProvider::new());
    let launcher: Arc<dyn ContainerLauncher> = Arc::new(InProcessLauncher::new(Box::new(FilesystemStorageProvider::new())));
    let orchestrator = Orchestrator::new(Arc::clone(&store), storage, launcher, settings(dir.path()));

    let graph = compile_pipeline(&linear_three_step_root(), CompilerOptions::default()).unwrap();
    let run = store.persist_compiled_graph(&graph, PipelineRunSubmission::default()).unwrap();

    // Cancel before any sweep runs: every container node is still
    // QUEUED/WAITING_FOR_UPSTREAM, i.e. non-terminal.
    orchestrator.cancel(run.id, Some("operator")).unwrap();

    let detail = store.get_execution_detail(run.root_execution_id).unwrap().unwrap();
    assert_eq!(detail.children.len(), 3);

    let counts = store.aggregate_status(run.root_execution_id).unwrap();
    assert_eq!(counts.len(), 3);
    for child in &detail.children {
        let child_counts = counts.get(&child.id).unwrap();
        assert_eq!(child_counts.get(&ContainerExecutionStatus::Cancelled), Some(&1));
    }

    // A cancelled run never resumes: sweeping it further claims nothing.
    assert!(!orchestrator.sweep_ready_once().unwrap());
}

/// A launcher whose containers never finish: every `launch_container_task`
/// and `refresh` call reports `Pending`. Each launch is tagged with a unique
/// handle so `refresh` can tally how many times each one was revisited.
struct NeverFinishingLauncher {
    refresh_counts: std::sync::Mutex<BTreeMap<u8, u32>>,
    next_handle: std::sync::atomic::AtomicU8,
}

impl NeverFinishingLauncher {
    fn new() -> Self {
        Self { refresh_counts: std::sync::Mutex::new(BTreeMap::new()), next_handle: std::sync::atomic::AtomicU8::new(0) }
    }

    fn counts(&self) -> BTreeMap<u8, u32> {
        self.refresh_counts.lock().unwrap().clone()
    }
}

impl ContainerLauncher for NeverFinishingLauncher {
    fn launch_container_task(
        &self,
        _component_spec: &ContainerSpec,
        _input_arguments: &BTreeMap<String, InputArgument>,
        _output_uris: &BTreeMap<String, String>,
        _log_uri: &str,
        _annotations: &Value,
    ) -> Result<LaunchedContainer, LauncherError> {
        let handle = self.next_handle.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.refresh_counts.lock().unwrap().insert(handle, 0);
        Ok(LaunchedContainer { status: LauncherStatus::Pending, exit_code: None, started_at: None, ended_at: None, data: vec![handle] })
    }

    fn refresh(&self, handle_data: &[u8]) -> Result<LaunchedContainer, LauncherError> {
        let handle = handle_data[0];
        *self.refresh_counts.lock().unwrap().get_mut(&handle).unwrap() += 1;
        Ok(LaunchedContainer { status: LauncherStatus::Pending, exit_code: None, started_at: None, ended_at: None, data: handle_data.to_vec() })
    }

    fn get_log(&self, _handle_data: &[u8]) -> Result<String, LauncherError> {
        Ok(String::new())
    }

    fn stream_log_lines(&self, _handle_data: &[u8]) -> Result<Vec<String>, LauncherError> {
        Ok(Vec::new())
    }

    fn terminate(&self, _handle_data: &[u8]) -> Result<(), LauncherError> {
        Ok(())
    }
}

#[test]
fn inflight_sweep_ages_never_finishing_nodes_round_robin() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PipelineStore> = Arc::new(open_store(dir.path(), "store.db"));
    let storage: Arc<dyn StorageProvider> = Arc::new(FilesystemStorageProvider::new());
    let launcher = Arc::new(NeverFinishingLauncher::new());
    let orchestrator = Orchestrator::new(Arc::clone(&store), storage, Arc::clone(&launcher) as Arc<dyn ContainerLauncher>, settings(dir.path()));

    let graph = compile_pipeline(&three_independent_steps_root(), CompilerOptions::default()).unwrap();
    let run = store.persist_compiled_graph(&graph, PipelineRunSubmission::default()).unwrap();

    // Launch all three nodes into PENDING; none of them will ever finish.
    for _ in 0..3 {
        assert!(orchestrator.sweep_ready_once().unwrap());
    }
    assert!(!orchestrator.sweep_ready_once().unwrap());
    assert_eq!(launcher.counts().len(), 3);

    let rounds = 3;
    for _ in 0..(rounds * 3) {
        assert!(orchestrator.sweep_inflight_once().unwrap());
    }

    // `last_processed_at ASC` round-robins across the three in-flight rows,
    // so an exact multiple of 3 sweeps refreshes each one the same number
    // of times.
    for count in launcher.counts().values() {
        assert_eq!(*count, rounds);
    }
}
