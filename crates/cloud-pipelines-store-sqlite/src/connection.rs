// cloud-pipelines-store-sqlite/src/connection.rs
// ============================================================================
// Module: SQLite Connection Setup
// Description: Opens the database file, applies durability pragmas, and
// bootstraps or migrates the schema.
// Purpose: Keep the DDL and pragma logic in one place: open, apply pragmas,
// initialize schema.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! Every table here maps 1:1 to a data-model entity or link.
//! `execution_ancestor_links` is the closure table backing O(1) subtree
//! aggregation.

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;

/// Current schema version written to `store_meta`.
const SCHEMA_VERSION: i64 = 1;

/// Opens a connection and applies pragmas, but does not touch the schema.
pub(crate) fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies the durability and concurrency pragmas 
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

/// Bootstraps a fresh database or validates an existing schema version.
pub(crate) fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0)).optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE pipeline_runs (
                    id INTEGER PRIMARY KEY,
                    root_execution_id INTEGER NOT NULL,
                    annotations TEXT NOT NULL,
                    created_by TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE execution_nodes (
                    id INTEGER PRIMARY KEY,
                    task_spec TEXT NOT NULL,
                    parent_execution_id INTEGER REFERENCES execution_nodes(id),
                    task_id_in_parent_execution TEXT,
                    container_execution_id INTEGER,
                    container_execution_cache_key TEXT,
                    container_execution_status TEXT
                );
                CREATE INDEX idx_execution_nodes_parent
                    ON execution_nodes (parent_execution_id);
                CREATE INDEX idx_execution_nodes_status
                    ON execution_nodes (container_execution_status);
                CREATE INDEX idx_execution_nodes_cache_key
                    ON execution_nodes (container_execution_cache_key);

                CREATE TABLE execution_ancestor_links (
                    execution_id INTEGER NOT NULL,
                    ancestor_execution_id INTEGER NOT NULL,
                    PRIMARY KEY (execution_id, ancestor_execution_id)
                );
                CREATE INDEX idx_ancestor_links_ancestor
                    ON execution_ancestor_links (ancestor_execution_id);

                CREATE TABLE artifact_data (
                    id INTEGER PRIMARY KEY,
                    total_size INTEGER NOT NULL,
                    is_dir INTEGER NOT NULL,
                    hash TEXT NOT NULL,
                    uri TEXT,
                    value TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE artifact_nodes (
                    id INTEGER PRIMARY KEY,
                    producer_execution_id INTEGER REFERENCES execution_nodes(id),
                    producer_output_name TEXT,
                    type_name TEXT,
                    type_properties TEXT,
                    artifact_data_id INTEGER REFERENCES artifact_data(id),
                    had_data_in_past INTEGER NOT NULL
                );
                CREATE INDEX idx_artifact_nodes_producer
                    ON artifact_nodes (producer_execution_id, producer_output_name);

                CREATE TABLE input_artifact_links (
                    execution_id INTEGER NOT NULL,
                    input_name TEXT NOT NULL,
                    artifact_id INTEGER NOT NULL,
                    PRIMARY KEY (execution_id, input_name)
                );
                CREATE INDEX idx_input_links_artifact
                    ON input_artifact_links (artifact_id);

                CREATE TABLE output_artifact_links (
                    execution_id INTEGER NOT NULL,
                    output_name TEXT NOT NULL,
                    artifact_id INTEGER NOT NULL,
                    PRIMARY KEY (execution_id, output_name)
                );
                CREATE INDEX idx_output_links_artifact
                    ON output_artifact_links (artifact_id);

                CREATE TABLE container_executions (
                    id INTEGER PRIMARY KEY,
                    status TEXT NOT NULL,
                    exit_code INTEGER,
                    launcher_data BLOB NOT NULL,
                    input_artifact_data_map TEXT NOT NULL,
                    output_artifact_data_map TEXT NOT NULL,
                    log_uri TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    last_processed_at TEXT NOT NULL
                );
                CREATE INDEX idx_container_executions_inflight
                    ON container_executions (status, last_processed_at);",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "database schema version {value} is not supported by this build (expected {SCHEMA_VERSION})"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}
