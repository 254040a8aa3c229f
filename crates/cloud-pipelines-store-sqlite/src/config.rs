// cloud-pipelines-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Store Configuration
// Description: Connection and durability settings for the SQLite store.
// Purpose: Let the CLI's `OrchestratorConfig` embed these settings directly.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A single connection, a journal mode, a sync mode, and a busy timeout.
//! There is no writer queue or read pool here — a single orchestrator
//! process is scoped to one mutex-guarded connection.

use std::path::PathBuf;

use serde::Deserialize;

/// Default busy timeout, in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// Write-ahead log (recommended for concurrent readers).
    #[default]
    Wal,
    /// Classic rollback journal.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the pragma value `SQLite` expects.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full fsync durability.
    #[default]
    Full,
    /// Reduced fsync durability, faster under WAL.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the pragma value `SQLite` expects.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for [`crate::store::SqliteStore`].
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file; created if absent.
    pub path: PathBuf,
    /// Busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode pragma.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Synchronous mode pragma.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
