// cloud-pipelines-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Store Errors
// Description: The error type returned by connection setup and schema I/O.
// Purpose: Separate "this backend failed" from the generic `StoreError` the
// rest of the workspace depends on, while still converting cleanly into it.
// Dependencies: thiserror, cloud-pipelines-core
// ============================================================================

use cloud_pipelines_core::ContainerExecutionStatus;
use cloud_pipelines_core::ExecutionId;
use cloud_pipelines_core::StoreError;
use thiserror::Error;

/// Errors raised while opening or operating the `SQLite` store.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// The database file could not be opened or written.
    #[error("sqlite io error: {0}")]
    Io(String),
    /// `SQLite` reported a query or constraint failure.
    #[error("sqlite db error: {0}")]
    Db(String),
    /// A stored row could not be decoded (corrupt JSON, unknown enum variant).
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// The on-disk schema version is newer or unrecognized by this binary.
    #[error("sqlite schema version mismatch: {0}")]
    VersionMismatch(String),
    /// A requested row does not exist.
    #[error("item not found: {0}")]
    NotFound(String),
    /// An illegal status transition was attempted.
    #[error("illegal transition from {from:?} to {to:?} on execution {execution_id}")]
    IllegalTransition {
        /// The execution the transition was attempted on.
        execution_id: ExecutionId,
        /// The status the node was in.
        from: ContainerExecutionStatus,
        /// The status the transition attempted to move to.
        to: ContainerExecutionStatus,
    },
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Backend(message),
            SqliteStoreError::Corrupt(message) => {
                Self::Backend(format!("corrupt store row: {message}"))
            }
            SqliteStoreError::VersionMismatch(message) => {
                Self::Backend(format!("schema version mismatch: {message}"))
            }
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::IllegalTransition { execution_id, from, to } => {
                Self::IllegalTransition { execution_id, from, to }
            }
        }
    }
}
