// cloud-pipelines-orchestrator/src/orchestrator.rs
// ============================================================================
// Module: Orchestrator
// Description: Ready-queue and in-flight sweeps, cancellation, and the
// cadence loop that drives them.
// Purpose: Drive the ready and in-flight queues end to end against the
// `PipelineStore`, `StorageProvider`, and `ContainerLauncher` seams.
// Dependencies: cloud-pipelines-core, tracing, time
// ============================================================================

//! ## Overview
//! An [`Orchestrator`] holds no state of its own beyond its three
//! collaborators and a handful of settings; every fact it needs to resume a
//! sweep after a restart is read back from the store. `sweep_ready_once` and `sweep_inflight_once`
//! each process at most one row per call so the caller's cadence loop
//! controls throughput; [`Orchestrator::run`] wraps both in the polling loop
//! a long-lived process actually wants.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cloud_pipelines_core::ContainerExecution;
use cloud_pipelines_core::ContainerExecutionStatus;
use cloud_pipelines_core::ContainerLauncher;
use cloud_pipelines_core::ContainerSpec;
use cloud_pipelines_core::ExecutionId;
use cloud_pipelines_core::ExecutionNode;
use cloud_pipelines_core::FinalizedOutput;
use cloud_pipelines_core::InputArgument;
use cloud_pipelines_core::LauncherStatus;
use cloud_pipelines_core::NewArtifactData;
use cloud_pipelines_core::PipelineRunId;
use cloud_pipelines_core::PipelineStore;
use cloud_pipelines_core::ResolvedInput;
use cloud_pipelines_core::StorageProvider;
use cloud_pipelines_core::merge_annotations;
use cloud_pipelines_core::task_spec::ComponentImplementation;
use cloud_pipelines_core::uri::generate_execution_uuid;
use cloud_pipelines_core::uri::input_data_uri;
use cloud_pipelines_core::uri::log_uri as build_log_uri;
use cloud_pipelines_core::uri::output_data_uri;
use serde_json::Value;
use time::OffsetDateTime;

use crate::cache::compute_cache_key;
use crate::error::OrchestratorError;
use crate::sweep;

/// The maximum byte size an output is inlined at, mirroring `ArtifactData::value`'s
/// own documented threshold.
const INLINE_VALUE_THRESHOLD: u64 = 256;

/// Tunable behavior of an [`Orchestrator`], independent of the store/launcher
/// it is wired to.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Whether a `QUEUED` node may adopt an existing `ContainerExecution`
    /// sharing its cache key instead of launching a new one.
    pub cache_adoption_enabled: bool,
    /// Root URI new input/output data is staged under.
    pub data_root_uri: String,
    /// Root URI container logs are uploaded under.
    pub logs_root_uri: String,
    /// How many attempts a success-path storage call gets before giving up.
    pub storage_retry_attempts: u32,
    /// Delay between storage retry attempts.
    pub storage_retry_delay: Duration,
    /// The base layer of the three-layer annotation merge: every
    /// launch starts from this object before the owning run's and the
    /// task's own annotations are merged on top.
    pub default_task_annotations: Value,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            cache_adoption_enabled: true,
            data_root_uri: "file:///var/lib/cloud-pipelines/data".to_string(),
            logs_root_uri: "file:///var/lib/cloud-pipelines/logs".to_string(),
            storage_retry_attempts: 5,
            storage_retry_delay: Duration::from_secs(1),
            default_task_annotations: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Drives the ready-queue and in-flight sweeps against one store, storage
/// provider, and container launcher.
pub struct Orchestrator {
    /// Backing persistence for every queue, graph, and artifact read/write.
    store: Arc<dyn PipelineStore>,
    /// Backing blob storage for output probing, inlining, and log upload.
    storage: Arc<dyn StorageProvider>,
    /// Backing container runtime for launch/refresh/terminate.
    launcher: Arc<dyn ContainerLauncher>,
    /// Tunable behavior independent of the collaborators above.
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Builds an orchestrator over the given collaborators and settings.
    #[must_use]
    pub fn new(
        store: Arc<dyn PipelineStore>,
        storage: Arc<dyn StorageProvider>,
        launcher: Arc<dyn ContainerLauncher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { store, storage, launcher, settings }
    }

    /// Runs the ready-queue and in-flight sweeps in a loop, sleeping
    /// `interval` between full passes, until `should_continue` returns
    /// `false`. A full pass drains the ready queue and the in-flight queue
    /// each to empty before sleeping, so a burst of newly queued work is not
    /// throttled by the interval.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on the first sweep failure that is not
    /// itself recoverable by marking a single node `SYSTEM_ERROR` — i.e. a
    /// store failure.
    pub fn run(
        &self,
        interval: Duration,
        mut should_continue: impl FnMut() -> bool,
    ) -> Result<(), OrchestratorError> {
        while should_continue() {
            while self.sweep_ready_once()? {}
            while self.sweep_inflight_once()? {}
            thread::sleep(interval);
        }
        Ok(())
    }

    /// Processes at most one `QUEUED`/`UNINITIALIZED` node. Returns
    /// `true` if a node was claimed (whether or not it actually launched),
    /// `false` if the ready queue was empty.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on a store failure; launcher failures
    /// are absorbed into a `SYSTEM_ERROR` transition on the claimed node.
    pub fn sweep_ready_once(&self) -> Result<bool, OrchestratorError> {
        let Some(node) = self.store.claim_ready_node()? else {
            return Ok(false);
        };
        let execution_id = node.id;
        let container_spec = match Self::container_spec_of(&node) {
            Ok(spec) => spec,
            Err(err) => {
                tracing::error!(execution_id = execution_id.get(), "{err}");
                return Err(err);
            }
        };

        let resolved = self.store.resolve_inputs(execution_id)?;
        let required = required_input_names(&node);
        let all_required_ready = required
            .iter()
            .all(|name| resolved.iter().any(|input| &input.input_name == name && input.artifact_data.is_some()));
        if !all_required_ready {
            tracing::debug!(execution_id = execution_id.get(), "required input not yet available, reverting to wait");
            self.store.revert_to_waiting(execution_id)?;
            return Ok(true);
        }

        let input_hashes = resolved
            .iter()
            .filter_map(|input| input.artifact_data.as_ref().map(|data| (input.input_name.clone(), data.hash.clone())))
            .collect::<BTreeMap<_, _>>();
        let cache_key = compute_cache_key(container_spec, &input_hashes)?;

        if self.settings.cache_adoption_enabled {
            if let Some(cached) = self.store.find_by_cache_key(&cache_key)? {
                tracing::info!(execution_id = execution_id.get(), cache_key = %cache_key, "adopting cached container execution");
                self.store.adopt_cached_execution(execution_id, &cache_key, cached.id)?;
                if cached.status.is_terminal() {
                    if cached.status == ContainerExecutionStatus::Succeeded {
                        sweep::wake_downstream(self.store.as_ref(), execution_id)?;
                    } else {
                        sweep::propagate_skip(self.store.as_ref(), execution_id)?;
                    }
                }
                return Ok(true);
            }
        }

        let exec_uuid = generate_execution_uuid();
        let input_arguments = build_input_arguments(&resolved, &self.settings.data_root_uri, &exec_uuid);
        let input_artifact_data_map = resolved
            .iter()
            .filter_map(|input| input.artifact_data.as_ref().map(|data| (input.input_name.clone(), data.id)))
            .collect::<BTreeMap<_, _>>();
        let output_uris = node
            .task_spec
            .component_ref
            .spec
            .outputs
            .iter()
            .map(|output| (output.name.clone(), output_data_uri(&self.settings.data_root_uri, &exec_uuid, &output.name)))
            .collect::<BTreeMap<_, _>>();
        let log_uri_value = build_log_uri(&self.settings.logs_root_uri, &exec_uuid);
        let run_and_task_annotations = self.store.effective_annotations(execution_id)?;
        let annotations = merge_annotations(&self.settings.default_task_annotations, &run_and_task_annotations);

        match self.launcher.launch_container_task(container_spec, &input_arguments, &output_uris, &log_uri_value, &annotations) {
            Ok(launched) => {
                self.store.create_container_execution(
                    execution_id,
                    &cache_key,
                    launched.data,
                    input_artifact_data_map,
                    &log_uri_value,
                )?;
                tracing::info!(execution_id = execution_id.get(), cache_key = %cache_key, "launched container execution");
            }
            Err(err) => {
                tracing::error!(execution_id = execution_id.get(), "launch failed: {err}");
                let container_execution_id = self.store.create_container_execution(
                    execution_id,
                    &cache_key,
                    Vec::new(),
                    input_artifact_data_map,
                    &log_uri_value,
                )?;
                let changed = self.store.finalize_container_execution(
                    container_execution_id,
                    ContainerExecutionStatus::SystemError,
                    None,
                    None,
                    Vec::new(),
                )?;
                sweep::propagate_skip_many(self.store.as_ref(), &changed)?;
            }
        }
        Ok(true)
    }

    /// Processes at most one in-flight (`PENDING`/`RUNNING`) container
    /// execution. Returns `true` if one was claimed, `false` if the
    /// in-flight queue was empty.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] on a store failure; launcher/storage
    /// failures are absorbed into a `SYSTEM_ERROR` transition.
    pub fn sweep_inflight_once(&self) -> Result<bool, OrchestratorError> {
        let Some(execution) = self.store.claim_inflight_execution(now())? else {
            return Ok(false);
        };

        let refreshed = match self.launcher.refresh(&execution.launcher_data) {
            Ok(refreshed) => refreshed,
            Err(err) => {
                tracing::error!(container_execution_id = execution.id.get(), "refresh failed: {err}");
                let changed = self.store.finalize_container_execution(
                    execution.id,
                    ContainerExecutionStatus::SystemError,
                    None,
                    None,
                    Vec::new(),
                )?;
                sweep::propagate_skip_many(self.store.as_ref(), &changed)?;
                return Ok(true);
            }
        };

        if refreshed.data != execution.launcher_data {
            self.store.update_launcher_data(execution.id, refreshed.data.clone())?;
        }

        match refreshed.status {
            LauncherStatus::Pending => {}
            LauncherStatus::Running => {
                if execution.status != ContainerExecutionStatus::Running {
                    self.store.finalize_container_execution(
                        execution.id,
                        ContainerExecutionStatus::Running,
                        None,
                        None,
                        Vec::new(),
                    )?;
                }
            }
            LauncherStatus::Succeeded => {
                self.finalize_success(&execution, refreshed.exit_code)?;
            }
            LauncherStatus::Failed => {
                self.upload_log_best_effort(&execution);
                let changed = self.store.finalize_container_execution(
                    execution.id,
                    ContainerExecutionStatus::Failed,
                    refreshed.exit_code,
                    execution.log_uri.clone(),
                    Vec::new(),
                )?;
                sweep::propagate_skip_many(self.store.as_ref(), &changed)?;
            }
            LauncherStatus::Error => {
                self.upload_log_best_effort(&execution);
                let changed = self.store.finalize_container_execution(
                    execution.id,
                    ContainerExecutionStatus::SystemError,
                    refreshed.exit_code,
                    execution.log_uri.clone(),
                    Vec::new(),
                )?;
                sweep::propagate_skip_many(self.store.as_ref(), &changed)?;
            }
        }
        Ok(true)
    }

    /// Finalizes a container execution the launcher reports as succeeded:
    /// uploads logs, probes declared outputs through the storage provider,
    /// and wakes direct downstream consumers.
    fn finalize_success(
        &self,
        execution: &ContainerExecution,
        exit_code: Option<i64>,
    ) -> Result<(), OrchestratorError> {
        self.upload_log_best_effort(execution);

        let node_ids = self.store.execution_nodes_by_container(execution.id)?;
        let Some(&primary_id) = node_ids.first() else {
            return Err(OrchestratorError::InvariantViolation {
                execution_id: ExecutionId::new(0),
                message: format!("container execution {} backs no execution node", execution.id),
            });
        };
        let Some(node) = self.store.get_execution_node(primary_id)? else {
            return Err(OrchestratorError::InvariantViolation {
                execution_id: primary_id,
                message: "execution node disappeared before finalize".to_string(),
            });
        };

        let exec_uuid = execution
            .log_uri
            .as_deref()
            .and_then(extract_exec_uuid)
            .ok_or_else(|| OrchestratorError::InvariantViolation {
                execution_id: primary_id,
                message: "container execution has no log uri to recover its execution uuid from".to_string(),
            })?;

        let mut outputs = Vec::with_capacity(node.task_spec.component_ref.spec.outputs.len());
        for output in &node.task_spec.component_ref.spec.outputs {
            let uri = output_data_uri(&self.settings.data_root_uri, exec_uuid, &output.name);
            let info = self.get_info_with_retry(primary_id, &uri)?;
            let hash = info.hashes.get("md5").cloned().unwrap_or_default();
            let value = if !info.is_dir && info.total_size < INLINE_VALUE_THRESHOLD {
                self.storage.download_as_text(&uri).ok()
            } else {
                None
            };
            outputs.push(FinalizedOutput {
                output_name: output.name.clone(),
                data: NewArtifactData {
                    total_size: info.total_size,
                    is_dir: info.is_dir,
                    hash: format!("md5={hash}"),
                    uri: Some(uri),
                    value,
                },
            });
        }

        let changed = self.store.finalize_container_execution(
            execution.id,
            ContainerExecutionStatus::Succeeded,
            exit_code,
            execution.log_uri.clone(),
            outputs,
        )?;
        for id in changed {
            sweep::wake_downstream(self.store.as_ref(), id)?;
        }
        Ok(())
    }

    /// Uploads the container's log via the launcher, retrying per settings;
    /// a persistent failure is logged and otherwise ignored — losing a log
    /// must never block the node's own terminal transition.
    fn upload_log_best_effort(&self, execution: &ContainerExecution) {
        let Some(log_uri) = execution.log_uri.as_deref() else { return };
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match self.launcher.upload_log(&execution.launcher_data, log_uri, self.storage.as_ref()) {
                Ok(()) => return,
                Err(err) if attempt < self.settings.storage_retry_attempts => {
                    tracing::warn!(attempt, "log upload failed, retrying: {err}");
                    thread::sleep(self.settings.storage_retry_delay);
                }
                Err(err) => {
                    tracing::warn!("log upload failed after {attempt} attempts, giving up: {err}");
                    return;
                }
            }
        }
    }

    /// Probes storage for output metadata, retrying per settings.
    fn get_info_with_retry(
        &self,
        execution_id: ExecutionId,
        uri: &str,
    ) -> Result<cloud_pipelines_core::StorageInfo, OrchestratorError> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match self.storage.get_info(uri) {
                Ok(info) => return Ok(info),
                Err(err) if attempt < self.settings.storage_retry_attempts => {
                    tracing::warn!(attempt, uri, "output info probe failed, retrying: {err}");
                    thread::sleep(self.settings.storage_retry_delay);
                }
                Err(err) => {
                    return Err(OrchestratorError::InvariantViolation {
                        execution_id,
                        message: format!("output info probe for {uri} failed after {attempt} attempts: {err}"),
                    });
                }
            }
        }
    }

    /// Cancels every non-terminal node in `root_execution_id`'s subtree
    ///: asks the launcher to terminate in-flight containers
    /// best-effort, then marks every non-terminal node `CANCELLED`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::RunNotFound`] if the run does not exist,
    /// or [`OrchestratorError::Store`] on a storage failure.
    pub fn cancel(&self, pipeline_run_id: PipelineRunId, by_user: Option<&str>) -> Result<(), OrchestratorError> {
        let Some(run) = self.store.get_pipeline_run(pipeline_run_id)? else {
            return Err(OrchestratorError::RunNotFound(pipeline_run_id.get()));
        };
        tracing::info!(
            pipeline_run_id = pipeline_run_id.get(),
            by_user = by_user.unwrap_or("<unknown>"),
            "cancelling pipeline run"
        );
        let nodes = self.store.subtree_non_terminal(run.root_execution_id)?;
        let execution_ids: Vec<ExecutionId> = nodes.iter().map(|node| node.id).collect();
        for node in &nodes {
            let Some(container_execution_id) = node.container_execution_id else { continue };
            if let Some(container_execution) = self.store.get_container_execution(container_execution_id)? {
                if !container_execution.status.is_terminal() {
                    if let Err(err) = self.launcher.terminate(&container_execution.launcher_data) {
                        tracing::warn!(container_execution_id = container_execution_id.get(), "terminate request failed: {err}");
                    }
                }
            }
        }
        self.store.cancel_nodes(&execution_ids)?;
        Ok(())
    }

    /// Extracts the `ContainerSpec` an execution node's task must be backed
    /// by, returning an invariant violation if the node is a graph node
    /// (which never carries a `container_execution_status` and is therefore
    /// never returned by `claim_ready_node`/`claim_inflight_execution`).
    fn container_spec_of(node: &ExecutionNode) -> Result<&ContainerSpec, OrchestratorError> {
        match &node.task_spec.component_ref.spec.implementation {
            ComponentImplementation::Container(spec) => Ok(spec),
            ComponentImplementation::Graph(_) => Err(OrchestratorError::InvariantViolation {
                execution_id: node.id,
                message: "claimed a container-status node whose implementation is a graph".to_string(),
            }),
        }
    }
}

/// Returns the names of every required input on a container task.
fn required_input_names(node: &ExecutionNode) -> Vec<String> {
    node.task_spec.component_ref.spec.inputs.iter().filter(|input| input.required).map(|input| input.name.clone()).collect()
}

/// Builds the launcher's `input_arguments` map from every resolved input that
/// currently has data; inputs still missing data are omitted rather than
/// passed with a placeholder (only reachable for an optional, connected
/// input whose producer has not yet run).
fn build_input_arguments(
    resolved: &[ResolvedInput],
    data_root_uri: &str,
    exec_uuid: &str,
) -> BTreeMap<String, InputArgument> {
    resolved
        .iter()
        .filter_map(|input| {
            let data = input.artifact_data.as_ref()?;
            Some((
                input.input_name.clone(),
                InputArgument {
                    total_size: data.total_size,
                    is_dir: data.is_dir,
                    value: data.value.clone(),
                    uri: data.uri.clone(),
                    staging_uri: input_data_uri(data_root_uri, exec_uuid, &input.input_name),
                },
            ))
        })
        .collect()
}

/// Recovers the execution UUID embedded in a log URI built by
/// [`cloud_pipelines_core::uri::log_uri`], since no other persisted field
/// carries it once the launch attempt has completed.
fn extract_exec_uuid(log_uri: &str) -> Option<&str> {
    log_uri.split("by_execution/").nth(1)?.split('/').next()
}

/// The current wall-clock time, used for `last_processed_at` claims.
fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::extract_exec_uuid;

    #[test]
    fn extracts_uuid_from_well_formed_log_uri() {
        assert_eq!(extract_exec_uuid("file:///logs/by_execution/abc123/log.txt"), Some("abc123"));
    }

    #[test]
    fn returns_none_without_the_expected_segment() {
        assert_eq!(extract_exec_uuid("file:///logs/log.txt"), None);
    }
}
