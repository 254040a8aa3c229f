// cloud-pipelines-store-sqlite/src/lib.rs
// ============================================================================
// Module: Cloud Pipelines SQLite Store
// Description: A `PipelineStore` implementation backed by `SQLite`.
// Purpose: Durable persistence for a single orchestrator process, without
// multi-writer machinery.
// Dependencies: cloud-pipelines-core, rusqlite, serde_json, time, tracing
// ============================================================================

//! ## Overview
//! One table per entity, plus `execution_ancestor_links` as the closure
//! table backing O(1) subtree aggregation. A single mutex-guarded
//! `rusqlite::Connection` is all the serialization a single orchestrator
//! process requires — no writer queue, no read pool, no perf histograms.

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod store;

pub use config::SqliteJournalMode;
pub use config::SqliteStoreConfig;
pub use config::SqliteSyncMode;
pub use error::SqliteStoreError;
pub use store::SqliteStore;
