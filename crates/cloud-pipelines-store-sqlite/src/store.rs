// cloud-pipelines-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Pipeline Store
// Description: A `PipelineStore` implementation backed by one mutex-guarded
// `rusqlite::Connection`.
// Purpose: Give the compiler and orchestrator a durable backend without the
// writer-queue-batching machinery a multi-process deployment would need
// (out of scope — a single orchestrator process owns this connection).
// Dependencies: cloud-pipelines-core, rusqlite, serde_json, time
// ============================================================================

//! ## Overview
//! Every `PipelineStore` method takes the connection mutex for exactly as
//! long as its own SQL needs; multi-statement methods (`persist_compiled_graph`,
//! `finalize_container_execution`, `adopt_cached_execution`) wrap their
//! statements in one `rusqlite::Transaction` so partial writes are never
//! visible to another caller.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use cloud_pipelines_core::ArtifactData;
use cloud_pipelines_core::ArtifactDataId;
use cloud_pipelines_core::ArtifactId;
use cloud_pipelines_core::CompiledGraph;
use cloud_pipelines_core::ContainerExecution;
use cloud_pipelines_core::ContainerExecutionId;
use cloud_pipelines_core::ContainerExecutionStatus;
use cloud_pipelines_core::ExecutionDetail;
use cloud_pipelines_core::ExecutionId;
use cloud_pipelines_core::ExecutionNode;
use cloud_pipelines_core::FinalizedOutput;
use cloud_pipelines_core::PipelineRun;
use cloud_pipelines_core::PipelineRunId;
use cloud_pipelines_core::PipelineRunSubmission;
use cloud_pipelines_core::PipelineStore;
use cloud_pipelines_core::ResolvedInput;
use cloud_pipelines_core::StoreError;
use cloud_pipelines_core::store::AggregateStatusCounts;
use cloud_pipelines_core::task_spec::TaskSpec;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::SqliteStoreConfig;
use crate::connection::initialize_schema;
use crate::connection::open_connection;
use crate::error::SqliteStoreError;

/// A `PipelineStore` backed by `SQLite`.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `config.path` and bootstraps its
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the file cannot be opened or the
    /// schema cannot be initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Mutex::new(connection) })
    }

    /// Locks the single connection, recovering from a poisoned mutex.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Row mapping
// ============================================================================

/// Renders a status as the `SCREAMING_SNAKE_CASE` text stored in columns.
fn status_to_text(status: ContainerExecutionStatus) -> Result<String, SqliteStoreError> {
    serde_json::to_value(status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .ok_or_else(|| SqliteStoreError::Corrupt("status did not serialize to a string".to_string()))
}

/// Parses the `SCREAMING_SNAKE_CASE` text a status column holds.
fn status_from_text(raw: &str) -> Result<ContainerExecutionStatus, SqliteStoreError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|err| SqliteStoreError::Corrupt(format!("unknown status {raw:?}: {err}")))
}

/// Formats a timestamp the way every `TEXT` timestamp column stores it.
fn to_rfc3339(timestamp: OffsetDateTime) -> Result<String, SqliteStoreError> {
    timestamp.format(&Rfc3339).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Parses a timestamp column back into an `OffsetDateTime`.
fn from_rfc3339(raw: &str) -> Result<OffsetDateTime, SqliteStoreError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Decodes the `{name: artifact_data_id}` JSON object a map column holds.
fn json_map_to_ids(raw: &str) -> Result<BTreeMap<String, ArtifactDataId>, SqliteStoreError> {
    let raw_map: BTreeMap<String, i64> =
        serde_json::from_str(raw).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
    Ok(raw_map.into_iter().map(|(name, id)| (name, ArtifactDataId::new(id))).collect())
}

/// Encodes a `{name: artifact_data_id}` map into the JSON text a map column stores.
fn ids_to_json_map(map: &BTreeMap<String, ArtifactDataId>) -> Result<String, SqliteStoreError> {
    let raw_map: BTreeMap<&String, i64> = map.iter().map(|(name, id)| (name, id.get())).collect();
    serde_json::to_string(&raw_map).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Maps one `execution_nodes` row.
fn row_to_execution_node(row: &Row<'_>) -> rusqlite::Result<ExecutionNode> {
    let task_spec_json: String = row.get("task_spec")?;
    let task_spec: TaskSpec = serde_json::from_str(&task_spec_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?;
    let status_raw: Option<String> = row.get("container_execution_status")?;
    let status = status_raw
        .map(|raw| status_from_text(&raw))
        .transpose()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?;
    Ok(ExecutionNode {
        id: ExecutionId::new(row.get("id")?),
        task_spec,
        parent_execution_id: row.get::<_, Option<i64>>("parent_execution_id")?.map(ExecutionId::new),
        task_id_in_parent_execution: row.get("task_id_in_parent_execution")?,
        container_execution_id: row
            .get::<_, Option<i64>>("container_execution_id")?
            .map(ContainerExecutionId::new),
        container_execution_cache_key: row.get("container_execution_cache_key")?,
        container_execution_status: status,
    })
}

/// Maps one `artifact_data` row.
fn row_to_artifact_data(row: &Row<'_>) -> rusqlite::Result<ArtifactData> {
    let created_at_raw: String = row.get("created_at")?;
    let created_at = from_rfc3339(&created_at_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err)))?;
    Ok(ArtifactData {
        id: ArtifactDataId::new(row.get("id")?),
        total_size: row.get::<_, i64>("total_size")?.max(0).cast_unsigned(),
        is_dir: row.get("is_dir")?,
        hash: row.get("hash")?,
        uri: row.get("uri")?,
        value: row.get("value")?,
        created_at,
    })
}

/// Maps one `container_executions` row.
fn row_to_container_execution(row: &Row<'_>) -> rusqlite::Result<ContainerExecution> {
    let to_corrupt =
        |err: SqliteStoreError| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err));
    let status_raw: String = row.get("status")?;
    let status = status_from_text(&status_raw).map_err(to_corrupt)?;
    let input_map_raw: String = row.get("input_artifact_data_map")?;
    let output_map_raw: String = row.get("output_artifact_data_map")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_processed_at: String = row.get("last_processed_at")?;
    Ok(ContainerExecution {
        id: ContainerExecutionId::new(row.get("id")?),
        status,
        exit_code: row.get("exit_code")?,
        launcher_data: row.get("launcher_data")?,
        input_artifact_data_map: json_map_to_ids(&input_map_raw).map_err(to_corrupt)?,
        output_artifact_data_map: json_map_to_ids(&output_map_raw).map_err(to_corrupt)?,
        log_uri: row.get("log_uri")?,
        created_at: from_rfc3339(&created_at).map_err(to_corrupt)?,
        updated_at: from_rfc3339(&updated_at).map_err(to_corrupt)?,
        last_processed_at: from_rfc3339(&last_processed_at).map_err(to_corrupt)?,
    })
}

/// Maps one `pipeline_runs` row.
fn row_to_pipeline_run(row: &Row<'_>) -> rusqlite::Result<PipelineRun> {
    let to_corrupt =
        |err: SqliteStoreError| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err));
    let annotations_raw: String = row.get("annotations")?;
    let annotations: BTreeMap<String, Value> =
        serde_json::from_str(&annotations_raw).map_err(|err| SqliteStoreError::Corrupt(err.to_string())).map_err(to_corrupt)?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(PipelineRun {
        id: PipelineRunId::new(row.get("id")?),
        root_execution_id: ExecutionId::new(row.get("root_execution_id")?),
        annotations,
        created_by: row.get("created_by")?,
        created_at: from_rfc3339(&created_at).map_err(to_corrupt)?,
        updated_at: from_rfc3339(&updated_at).map_err(to_corrupt)?,
    })
}

/// Returns the names of every required input on a container task.
fn required_input_names(task_spec: &TaskSpec) -> Vec<String> {
    match &task_spec.component_ref.spec.implementation {
        cloud_pipelines_core::task_spec::ComponentImplementation::Container(_) => task_spec
            .component_ref
            .spec
            .inputs
            .iter()
            .filter(|input| input.required)
            .map(|input| input.name.clone())
            .collect(),
        cloud_pipelines_core::task_spec::ComponentImplementation::Graph(_) => Vec::new(),
    }
}

/// Resolves every input wired to `execution_id` within an open transaction.
fn fetch_resolved_inputs(tx: &Transaction<'_>, execution_id: ExecutionId) -> Result<Vec<ResolvedInput>, SqliteStoreError> {
    let mut statement = tx.prepare(
        "SELECT ial.input_name AS input_name, ial.artifact_id AS artifact_id, ad.id AS data_id,
                ad.total_size AS total_size, ad.is_dir AS is_dir, ad.hash AS hash, ad.uri AS uri,
                ad.value AS value, ad.created_at AS created_at
         FROM input_artifact_links ial
         JOIN artifact_nodes an ON an.id = ial.artifact_id
         LEFT JOIN artifact_data ad ON ad.id = an.artifact_data_id
         WHERE ial.execution_id = ?1",
    )?;
    let rows = statement.query_map(params![execution_id.get()], |row| {
        let has_data: Option<i64> = row.get("data_id")?;
        let artifact_data = if has_data.is_some() { Some(row_to_artifact_data(row)?) } else { None };
        Ok(ResolvedInput {
            input_name: row.get("input_name")?,
            artifact_id: ArtifactId::new(row.get("artifact_id")?),
            artifact_data,
        })
    })?;
    let mut resolved = Vec::new();
    for row in rows {
        resolved.push(row?);
    }
    Ok(resolved)
}

/// Fetches one execution node within an open transaction.
fn fetch_execution_node(tx: &Transaction<'_>, id: ExecutionId) -> Result<Option<ExecutionNode>, SqliteStoreError> {
    Ok(tx
        .query_row("SELECT * FROM execution_nodes WHERE id = ?1", params![id.get()], row_to_execution_node)
        .optional()?)
}

/// Fetches one container execution within an open transaction.
fn fetch_container_execution(
    tx: &Transaction<'_>,
    id: ContainerExecutionId,
) -> Result<Option<ContainerExecution>, SqliteStoreError> {
    Ok(tx
        .query_row("SELECT * FROM container_executions WHERE id = ?1", params![id.get()], row_to_container_execution)
        .optional()?)
}

// ============================================================================
// SECTION: PipelineStore implementation
// ============================================================================

impl PipelineStore for SqliteStore {
    fn persist_compiled_graph(
        &self,
        graph: &CompiledGraph,
        submission: PipelineRunSubmission,
    ) -> Result<PipelineRun, StoreError> {
        self.persist_compiled_graph_inner(graph, submission).map_err(StoreError::from)
    }

    fn get_pipeline_run(&self, id: PipelineRunId) -> Result<Option<PipelineRun>, StoreError> {
        let connection = self.lock();
        connection
            .query_row("SELECT * FROM pipeline_runs WHERE id = ?1", params![id.get()], row_to_pipeline_run)
            .optional()
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))
    }

    fn get_execution_node(&self, id: ExecutionId) -> Result<Option<ExecutionNode>, StoreError> {
        let connection = self.lock();
        connection
            .query_row("SELECT * FROM execution_nodes WHERE id = ?1", params![id.get()], row_to_execution_node)
            .optional()
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))
    }

    fn get_execution_detail(&self, id: ExecutionId) -> Result<Option<ExecutionDetail>, StoreError> {
        self.get_execution_detail_inner(id).map_err(StoreError::from)
    }

    fn get_artifact_data(&self, id: ArtifactDataId) -> Result<Option<ArtifactData>, StoreError> {
        let connection = self.lock();
        connection
            .query_row("SELECT * FROM artifact_data WHERE id = ?1", params![id.get()], row_to_artifact_data)
            .optional()
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))
    }

    fn aggregate_status(&self, root_execution_id: ExecutionId) -> Result<AggregateStatusCounts, StoreError> {
        self.aggregate_status_inner(root_execution_id).map_err(StoreError::from)
    }

    fn claim_ready_node(&self) -> Result<Option<ExecutionNode>, StoreError> {
        let connection = self.lock();
        connection
            .query_row(
                "SELECT * FROM execution_nodes
                 WHERE container_execution_status IN ('UNINITIALIZED', 'QUEUED')
                 ORDER BY id ASC LIMIT 1",
                params![],
                row_to_execution_node,
            )
            .optional()
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))
    }

    fn resolve_inputs(&self, execution_id: ExecutionId) -> Result<Vec<ResolvedInput>, StoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction().map_err(SqliteStoreError::from)?;
        let resolved = fetch_resolved_inputs(&tx, execution_id).map_err(StoreError::from)?;
        tx.commit().map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        Ok(resolved)
    }

    fn revert_to_waiting(&self, execution_id: ExecutionId) -> Result<(), StoreError> {
        self.revert_to_waiting_inner(execution_id).map_err(StoreError::from)
    }

    fn find_by_cache_key(&self, cache_key: &str) -> Result<Option<ContainerExecution>, StoreError> {
        let connection = self.lock();
        connection
            .query_row(
                "SELECT ce.* FROM container_executions ce
                 JOIN execution_nodes en ON en.container_execution_id = ce.id
                 WHERE en.container_execution_cache_key = ?1
                 ORDER BY ce.created_at DESC LIMIT 1",
                params![cache_key],
                row_to_container_execution,
            )
            .optional()
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))
    }

    fn adopt_cached_execution(
        &self,
        execution_id: ExecutionId,
        cache_key: &str,
        container_execution_id: ContainerExecutionId,
    ) -> Result<(), StoreError> {
        self.adopt_cached_execution_inner(execution_id, cache_key, container_execution_id)
            .map_err(StoreError::from)
    }

    fn create_container_execution(
        &self,
        execution_id: ExecutionId,
        cache_key: &str,
        launcher_data: Vec<u8>,
        input_artifact_data_map: BTreeMap<String, ArtifactDataId>,
        log_uri: &str,
    ) -> Result<ContainerExecutionId, StoreError> {
        self.create_container_execution_inner(
            execution_id,
            cache_key,
            launcher_data,
            input_artifact_data_map,
            log_uri,
        )
        .map_err(StoreError::from)
    }

    fn get_container_execution(&self, id: ContainerExecutionId) -> Result<Option<ContainerExecution>, StoreError> {
        let connection = self.lock();
        connection
            .query_row("SELECT * FROM container_executions WHERE id = ?1", params![id.get()], row_to_container_execution)
            .optional()
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))
    }

    fn execution_nodes_by_container(
        &self,
        container_execution_id: ContainerExecutionId,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let connection = self.lock();
        let mut statement = connection
            .prepare("SELECT id FROM execution_nodes WHERE container_execution_id = ?1 ORDER BY id ASC")
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        let rows = statement
            .query_map(params![container_execution_id.get()], |row| row.get::<_, i64>(0))
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(ExecutionId::new(row.map_err(|err| StoreError::from(SqliteStoreError::from(err)))?));
        }
        Ok(ids)
    }

    fn claim_inflight_execution(&self, now: OffsetDateTime) -> Result<Option<ContainerExecution>, StoreError> {
        self.claim_inflight_execution_inner(now).map_err(StoreError::from)
    }

    fn update_launcher_data(&self, id: ContainerExecutionId, launcher_data: Vec<u8>) -> Result<(), StoreError> {
        let connection = self.lock();
        let now = to_rfc3339(OffsetDateTime::now_utc()).map_err(StoreError::from)?;
        connection
            .execute(
                "UPDATE container_executions SET launcher_data = ?1, updated_at = ?2 WHERE id = ?3",
                params![launcher_data, now, id.get()],
            )
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        Ok(())
    }

    fn finalize_container_execution(
        &self,
        id: ContainerExecutionId,
        next: ContainerExecutionStatus,
        exit_code: Option<i64>,
        log_uri: Option<String>,
        outputs: Vec<FinalizedOutput>,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        self.finalize_container_execution_inner(id, next, exit_code, log_uri, outputs).map_err(StoreError::from)
    }

    fn direct_downstream(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionId>, StoreError> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(
                "SELECT DISTINCT ial.execution_id AS execution_id
                 FROM output_artifact_links oal
                 JOIN input_artifact_links ial ON ial.artifact_id = oal.artifact_id
                 WHERE oal.execution_id = ?1",
            )
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        let rows = statement
            .query_map(params![execution_id.get()], |row| row.get::<_, i64>("execution_id"))
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        let mut downstream = Vec::new();
        for row in rows {
            downstream.push(ExecutionId::new(row.map_err(|err| StoreError::from(SqliteStoreError::from(err)))?));
        }
        Ok(downstream)
    }

    fn wake_ready(&self, execution_ids: &[ExecutionId]) -> Result<Vec<ExecutionId>, StoreError> {
        self.wake_ready_inner(execution_ids).map_err(StoreError::from)
    }

    fn skip_waiting(&self, execution_ids: &[ExecutionId]) -> Result<Vec<ExecutionId>, StoreError> {
        self.skip_waiting_inner(execution_ids).map_err(StoreError::from)
    }

    fn subtree_non_terminal(&self, root_execution_id: ExecutionId) -> Result<Vec<ExecutionNode>, StoreError> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(
                "SELECT * FROM execution_nodes
                 WHERE container_execution_status IS NOT NULL
                   AND container_execution_status NOT IN
                       ('SUCCEEDED', 'FAILED', 'SKIPPED', 'SYSTEM_ERROR', 'CANCELLED')
                   AND (id = ?1 OR id IN (
                       SELECT execution_id FROM execution_ancestor_links WHERE ancestor_execution_id = ?1
                   ))",
            )
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        let rows = statement
            .query_map(params![root_execution_id.get()], row_to_execution_node)
            .map_err(|err| StoreError::from(SqliteStoreError::from(err)))?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row.map_err(|err| StoreError::from(SqliteStoreError::from(err)))?);
        }
        Ok(nodes)
    }

    fn cancel_nodes(&self, execution_ids: &[ExecutionId]) -> Result<(), StoreError> {
        self.cancel_nodes_inner(execution_ids).map_err(StoreError::from)
    }

    fn effective_annotations(&self, execution_id: ExecutionId) -> Result<Value, StoreError> {
        self.effective_annotations_inner(execution_id).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Multi-statement method bodies
// ============================================================================

impl SqliteStore {
    /// Implements `persist_compiled_graph` inside one transaction.
    fn persist_compiled_graph_inner(
        &self,
        graph: &CompiledGraph,
        submission: PipelineRunSubmission,
    ) -> Result<PipelineRun, SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;

        let mut node_ids: HashMap<u64, i64> = HashMap::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let parent_real = match node.parent_local_id {
                Some(local) => Some(*node_ids.get(&local).ok_or_else(|| {
                    SqliteStoreError::Corrupt(format!("parent local id {local} not yet materialized"))
                })?),
                None => None,
            };
            let status_text = node.container_execution_status.map(status_to_text).transpose()?;
            let task_spec_json =
                serde_json::to_string(&node.task_spec).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
            tx.execute(
                "INSERT INTO execution_nodes
                    (task_spec, parent_execution_id, task_id_in_parent_execution, container_execution_status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![task_spec_json, parent_real, node.task_id_in_parent_execution, status_text],
            )?;
            node_ids.insert(node.local_id, tx.last_insert_rowid());
        }

        for node in &graph.nodes {
            let real_id = node_ids[&node.local_id];
            for ancestor_local in &node.ancestor_local_ids {
                let ancestor_real = node_ids.get(ancestor_local).ok_or_else(|| {
                    SqliteStoreError::Corrupt(format!("ancestor local id {ancestor_local} not yet materialized"))
                })?;
                tx.execute(
                    "INSERT INTO execution_ancestor_links (execution_id, ancestor_execution_id) VALUES (?1, ?2)",
                    params![real_id, ancestor_real],
                )?;
            }
        }

        let mut artifact_ids: HashMap<u64, i64> = HashMap::with_capacity(graph.artifacts.len());
        let now = to_rfc3339(OffsetDateTime::now_utc())?;
        for artifact in &graph.artifacts {
            let producer_real = match artifact.producer_local_id {
                Some(local) => Some(*node_ids.get(&local).ok_or_else(|| {
                    SqliteStoreError::Corrupt(format!("producer local id {local} not yet materialized"))
                })?),
                None => None,
            };
            let artifact_data_id = match &artifact.inline_data {
                Some(data) => {
                    tx.execute(
                        "INSERT INTO artifact_data (total_size, is_dir, hash, uri, value, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            i64::try_from(data.total_size).unwrap_or(i64::MAX),
                            data.is_dir,
                            data.hash,
                            data.uri,
                            data.value,
                            now,
                        ],
                    )?;
                    Some(tx.last_insert_rowid())
                }
                None => None,
            };
            let type_properties_json = artifact
                .type_properties
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
            tx.execute(
                "INSERT INTO artifact_nodes
                    (producer_execution_id, producer_output_name, type_name, type_properties,
                     artifact_data_id, had_data_in_past)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    producer_real,
                    artifact.producer_output_name,
                    artifact.type_name,
                    type_properties_json,
                    artifact_data_id,
                    artifact.had_data_in_past || artifact_data_id.is_some(),
                ],
            )?;
            artifact_ids.insert(artifact.local_id, tx.last_insert_rowid());
        }

        for link in &graph.input_links {
            let execution_real = node_ids.get(&link.execution_local_id).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("execution local id {} not yet materialized", link.execution_local_id))
            })?;
            let artifact_real = artifact_ids.get(&link.artifact_local_id).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("artifact local id {} not yet materialized", link.artifact_local_id))
            })?;
            tx.execute(
                "INSERT INTO input_artifact_links (execution_id, input_name, artifact_id) VALUES (?1, ?2, ?3)",
                params![execution_real, link.input_name, artifact_real],
            )?;
        }

        for link in &graph.output_links {
            let execution_real = node_ids.get(&link.execution_local_id).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("execution local id {} not yet materialized", link.execution_local_id))
            })?;
            let artifact_real = artifact_ids.get(&link.artifact_local_id).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("artifact local id {} not yet materialized", link.artifact_local_id))
            })?;
            tx.execute(
                "INSERT INTO output_artifact_links (execution_id, output_name, artifact_id) VALUES (?1, ?2, ?3)",
                params![execution_real, link.output_name, artifact_real],
            )?;
        }

        let root_real = *node_ids
            .get(&graph.root_local_id)
            .ok_or_else(|| SqliteStoreError::Corrupt("root local id not materialized".to_string()))?;
        let annotations_json =
            serde_json::to_string(&submission.annotations).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?;
        tx.execute(
            "INSERT INTO pipeline_runs (root_execution_id, annotations, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![root_real, annotations_json, submission.created_by, now],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(PipelineRun {
            id: PipelineRunId::new(run_id),
            root_execution_id: ExecutionId::new(root_real),
            annotations: submission.annotations,
            created_by: submission.created_by,
            created_at: from_rfc3339(&now)?,
            updated_at: from_rfc3339(&now)?,
        })
    }

    /// Implements `get_execution_detail`.
    fn get_execution_detail_inner(&self, id: ExecutionId) -> Result<Option<ExecutionDetail>, SqliteStoreError> {
        let connection = self.lock();
        let Some(node) =
            connection.query_row("SELECT * FROM execution_nodes WHERE id = ?1", params![id.get()], row_to_execution_node).optional()?
        else {
            return Ok(None);
        };
        let container_execution = match node.container_execution_id {
            Some(container_execution_id) => connection
                .query_row(
                    "SELECT * FROM container_executions WHERE id = ?1",
                    params![container_execution_id.get()],
                    row_to_container_execution,
                )
                .optional()?,
            None => None,
        };
        let mut statement =
            connection.prepare("SELECT * FROM execution_nodes WHERE parent_execution_id = ?1 ORDER BY id ASC")?;
        let rows = statement.query_map(params![id.get()], row_to_execution_node)?;
        let mut children = Vec::new();
        for row in rows {
            children.push(row?);
        }
        Ok(Some(ExecutionDetail { node, container_execution, children }))
    }

    /// Implements `aggregate_status`: one query groups each direct child of
    /// `root_execution_id` by its own status, a second groups every
    /// transitive descendant by which direct child's subtree it falls
    /// under via `execution_ancestor_links`; the two result sets are
    /// concatenated into the per-child counts.
    fn aggregate_status_inner(&self, root_execution_id: ExecutionId) -> Result<AggregateStatusCounts, SqliteStoreError> {
        let connection = self.lock();
        let mut counts = AggregateStatusCounts::new();

        let mut direct_statement = connection.prepare(
            "SELECT id AS child_id, container_execution_status AS status, COUNT(*) AS count
             FROM execution_nodes
             WHERE parent_execution_id = ?1 AND container_execution_status IS NOT NULL
             GROUP BY id, container_execution_status",
        )?;
        let direct_rows = direct_statement.query_map(params![root_execution_id.get()], |row| {
            let child_id: i64 = row.get("child_id")?;
            let status_raw: String = row.get("status")?;
            let count: i64 = row.get("count")?;
            Ok((child_id, status_raw, count))
        })?;
        for row in direct_rows {
            let (child_id, status_raw, count) = row?;
            let status = status_from_text(&status_raw)?;
            *counts.entry(ExecutionId::new(child_id)).or_default().entry(status).or_insert(0) += count.max(0).cast_unsigned();
        }

        let mut descendant_statement = connection.prepare(
            "SELECT child.id AS child_id, descendant.container_execution_status AS status, COUNT(*) AS count
             FROM execution_ancestor_links links
             JOIN execution_nodes descendant ON descendant.id = links.execution_id
             JOIN execution_nodes child ON child.id = links.ancestor_execution_id
             WHERE child.parent_execution_id = ?1 AND descendant.container_execution_status IS NOT NULL
             GROUP BY child.id, descendant.container_execution_status",
        )?;
        let descendant_rows = descendant_statement.query_map(params![root_execution_id.get()], |row| {
            let child_id: i64 = row.get("child_id")?;
            let status_raw: String = row.get("status")?;
            let count: i64 = row.get("count")?;
            Ok((child_id, status_raw, count))
        })?;
        for row in descendant_rows {
            let (child_id, status_raw, count) = row?;
            let status = status_from_text(&status_raw)?;
            *counts.entry(ExecutionId::new(child_id)).or_default().entry(status).or_insert(0) += count.max(0).cast_unsigned();
        }

        Ok(counts)
    }

    /// Implements `revert_to_waiting`.
    fn revert_to_waiting_inner(&self, execution_id: ExecutionId) -> Result<(), SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        let current_raw: Option<Option<String>> = tx
            .query_row(
                "SELECT container_execution_status FROM execution_nodes WHERE id = ?1",
                params![execution_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(Some(current_raw)) = current_raw else {
            return Err(SqliteStoreError::NotFound(format!("execution {execution_id} not found")));
        };
        let current = status_from_text(&current_raw)?;
        if !current.can_transition_to(ContainerExecutionStatus::WaitingForUpstream) {
            return Err(SqliteStoreError::IllegalTransition {
                execution_id,
                from: current,
                to: ContainerExecutionStatus::WaitingForUpstream,
            });
        }
        tx.execute(
            "UPDATE execution_nodes SET container_execution_status = 'WAITING_FOR_UPSTREAM' WHERE id = ?1",
            params![execution_id.get()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Implements `adopt_cached_execution`.
    fn adopt_cached_execution_inner(
        &self,
        execution_id: ExecutionId,
        cache_key: &str,
        container_execution_id: ContainerExecutionId,
    ) -> Result<(), SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        tx.execute(
            "UPDATE execution_nodes
             SET container_execution_id = ?1, container_execution_cache_key = ?2
             WHERE id = ?3",
            params![container_execution_id.get(), cache_key, execution_id.get()],
        )?;
        let Some(cached) = fetch_container_execution(&tx, container_execution_id)? else {
            return Err(SqliteStoreError::NotFound(format!(
                "container execution {container_execution_id} not found"
            )));
        };
        if cached.status.is_terminal() {
            let status_text = status_to_text(cached.status)?;
            tx.execute(
                "UPDATE execution_nodes SET container_execution_status = ?1 WHERE id = ?2",
                params![status_text, execution_id.get()],
            )?;
            for (output_name, artifact_data_id) in &cached.output_artifact_data_map {
                let artifact_id: Option<i64> = tx
                    .query_row(
                        "SELECT artifact_id FROM output_artifact_links WHERE execution_id = ?1 AND output_name = ?2",
                        params![execution_id.get(), output_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(artifact_id) = artifact_id {
                    tx.execute(
                        "UPDATE artifact_nodes SET artifact_data_id = ?1, had_data_in_past = 1 WHERE id = ?2",
                        params![artifact_data_id.get(), artifact_id],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Implements `create_container_execution`.
    fn create_container_execution_inner(
        &self,
        execution_id: ExecutionId,
        cache_key: &str,
        launcher_data: Vec<u8>,
        input_artifact_data_map: BTreeMap<String, ArtifactDataId>,
        log_uri: &str,
    ) -> Result<ContainerExecutionId, SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        let now = to_rfc3339(OffsetDateTime::now_utc())?;
        let input_map_json = ids_to_json_map(&input_artifact_data_map)?;
        tx.execute(
            "INSERT INTO container_executions
                (status, exit_code, launcher_data, input_artifact_data_map, output_artifact_data_map,
                 log_uri, created_at, updated_at, last_processed_at)
             VALUES ('PENDING', NULL, ?1, ?2, '{}', ?4, ?3, ?3, ?3)",
            params![launcher_data, input_map_json, now, log_uri],
        )?;
        let container_execution_id = ContainerExecutionId::new(tx.last_insert_rowid());
        tx.execute(
            "UPDATE execution_nodes
             SET container_execution_id = ?1, container_execution_cache_key = ?2,
                 container_execution_status = 'PENDING'
             WHERE id = ?3",
            params![container_execution_id.get(), cache_key, execution_id.get()],
        )?;
        tx.commit()?;
        Ok(container_execution_id)
    }

    /// Implements `claim_inflight_execution`.
    fn claim_inflight_execution_inner(&self, now: OffsetDateTime) -> Result<Option<ContainerExecution>, SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        let claimed_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM container_executions
                 WHERE status IN ('PENDING', 'RUNNING')
                 ORDER BY last_processed_at ASC LIMIT 1",
                params![],
                |row| row.get(0),
            )
            .optional()?;
        let Some(claimed_id) = claimed_id else {
            tx.commit()?;
            return Ok(None);
        };
        let now_text = to_rfc3339(now)?;
        tx.execute(
            "UPDATE container_executions SET last_processed_at = ?1 WHERE id = ?2",
            params![now_text, claimed_id],
        )?;
        let claimed = fetch_container_execution(&tx, ContainerExecutionId::new(claimed_id))?;
        tx.commit()?;
        Ok(claimed)
    }

    /// Implements `finalize_container_execution`.
    fn finalize_container_execution_inner(
        &self,
        id: ContainerExecutionId,
        next: ContainerExecutionStatus,
        exit_code: Option<i64>,
        log_uri: Option<String>,
        outputs: Vec<FinalizedOutput>,
    ) -> Result<Vec<ExecutionId>, SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        let Some(current) = fetch_container_execution(&tx, id)? else {
            return Err(SqliteStoreError::NotFound(format!("container execution {id} not found")));
        };
        if !current.status.can_transition_to(next) {
            let affected: Vec<i64> = {
                let mut statement = tx.prepare("SELECT id FROM execution_nodes WHERE container_execution_id = ?1")?;
                let rows = statement.query_map(params![id.get()], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            let execution_id = affected.first().copied().map_or(ExecutionId::new(0), ExecutionId::new);
            return Err(SqliteStoreError::IllegalTransition { execution_id, from: current.status, to: next });
        }

        let now = to_rfc3339(OffsetDateTime::now_utc())?;
        let mut output_map: BTreeMap<String, ArtifactDataId> = BTreeMap::new();
        if next.is_terminal() && next != ContainerExecutionStatus::Cancelled {
            for output in &outputs {
                tx.execute(
                    "INSERT INTO artifact_data (total_size, is_dir, hash, uri, value, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        i64::try_from(output.data.total_size).unwrap_or(i64::MAX),
                        output.data.is_dir,
                        output.data.hash,
                        output.data.uri,
                        output.data.value,
                        now,
                    ],
                )?;
                output_map.insert(output.output_name.clone(), ArtifactDataId::new(tx.last_insert_rowid()));
            }
        }
        let status_text = status_to_text(next)?;
        let output_map_json = ids_to_json_map(&output_map)?;
        tx.execute(
            "UPDATE container_executions
             SET status = ?1, exit_code = COALESCE(?2, exit_code), log_uri = COALESCE(?3, log_uri),
                 output_artifact_data_map = ?4, updated_at = ?5
             WHERE id = ?6",
            params![status_text, exit_code, log_uri, output_map_json, now, id.get()],
        )?;

        let mut statement = tx.prepare("SELECT id FROM execution_nodes WHERE container_execution_id = ?1")?;
        let node_ids: Vec<i64> = statement.query_map(params![id.get()], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?;
        drop(statement);

        let mut changed = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            tx.execute(
                "UPDATE execution_nodes SET container_execution_status = ?1 WHERE id = ?2",
                params![status_text, node_id],
            )?;
            for (output_name, artifact_data_id) in &output_map {
                let artifact_id: Option<i64> = tx
                    .query_row(
                        "SELECT artifact_id FROM output_artifact_links WHERE execution_id = ?1 AND output_name = ?2",
                        params![node_id, output_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(artifact_id) = artifact_id {
                    tx.execute(
                        "UPDATE artifact_nodes SET artifact_data_id = ?1, had_data_in_past = 1 WHERE id = ?2",
                        params![artifact_data_id.get(), artifact_id],
                    )?;
                }
            }
            changed.push(ExecutionId::new(node_id));
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Implements `wake_ready`.
    fn wake_ready_inner(&self, execution_ids: &[ExecutionId]) -> Result<Vec<ExecutionId>, SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        let mut woken = Vec::new();
        for &id in execution_ids {
            let Some(node) = fetch_execution_node(&tx, id)? else { continue };
            if node.container_execution_status != Some(ContainerExecutionStatus::WaitingForUpstream) {
                continue;
            }
            let required = required_input_names(&node.task_spec);
            let resolved = fetch_resolved_inputs(&tx, id)?;
            let all_ready = required
                .iter()
                .all(|name| resolved.iter().any(|input| &input.input_name == name && input.artifact_data.is_some()));
            if all_ready {
                tx.execute(
                    "UPDATE execution_nodes SET container_execution_status = 'QUEUED' WHERE id = ?1",
                    params![id.get()],
                )?;
                woken.push(id);
            }
        }
        tx.commit()?;
        Ok(woken)
    }

    /// Implements `skip_waiting`.
    fn skip_waiting_inner(&self, execution_ids: &[ExecutionId]) -> Result<Vec<ExecutionId>, SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        let mut skipped = Vec::new();
        for &id in execution_ids {
            let Some(node) = fetch_execution_node(&tx, id)? else { continue };
            if node.container_execution_status != Some(ContainerExecutionStatus::WaitingForUpstream) {
                continue;
            }
            tx.execute(
                "UPDATE execution_nodes SET container_execution_status = 'SKIPPED' WHERE id = ?1",
                params![id.get()],
            )?;
            skipped.push(id);
        }
        tx.commit()?;
        Ok(skipped)
    }

    /// Implements `cancel_nodes`.
    fn cancel_nodes_inner(&self, execution_ids: &[ExecutionId]) -> Result<(), SqliteStoreError> {
        let mut connection = self.lock();
        let tx = connection.transaction()?;
        for &id in execution_ids {
            let Some(node) = fetch_execution_node(&tx, id)? else { continue };
            let Some(current) = node.container_execution_status else { continue };
            if current.is_terminal() {
                continue;
            }
            tx.execute(
                "UPDATE execution_nodes SET container_execution_status = 'CANCELLED' WHERE id = ?1",
                params![id.get()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Implements `effective_annotations`.
    fn effective_annotations_inner(&self, execution_id: ExecutionId) -> Result<Value, SqliteStoreError> {
        let connection = self.lock();
        let Some(node) = connection
            .query_row("SELECT * FROM execution_nodes WHERE id = ?1", params![execution_id.get()], row_to_execution_node)
            .optional()?
        else {
            return Err(SqliteStoreError::NotFound(format!("execution {execution_id} not found")));
        };
        let run_annotations: Option<String> = connection
            .query_row(
                "SELECT pr.annotations FROM pipeline_runs pr
                 WHERE pr.root_execution_id = ?1
                    OR pr.root_execution_id IN (
                       SELECT ancestor_execution_id FROM execution_ancestor_links WHERE execution_id = ?1
                    )
                 LIMIT 1",
                params![execution_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        let run_value: Value = run_annotations
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| SqliteStoreError::Corrupt(err.to_string()))?
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let task_value = serde_json::to_value(&node.task_spec.annotations).unwrap_or(Value::Null);
        Ok(cloud_pipelines_core::merge_annotations(&run_value, &task_value))
    }
}
