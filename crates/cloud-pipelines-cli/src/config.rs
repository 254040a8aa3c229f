// cloud-pipelines-cli/src/config.rs
// ============================================================================
// Module: Orchestrator Configuration
// Description: Typed startup configuration loaded from TOML.
// Purpose: The single config surface the CLI's subcommands build a
// store/orchestrator/providers trio from.
// Dependencies: serde, toml, cloud-pipelines-store-sqlite
// ============================================================================

//! ## Overview
//! [`OrchestratorConfig`] is the one typed document every subcommand loads
//! before doing anything else; it embeds [`SqliteStoreConfig`] directly
//! rather than re-declaring the same fields, since the `sqlite` sub-table
//! reuses the store's own shape. [`OrchestratorConfig::load`] validates in
//! stages: a path length cap, a file size cap, a UTF-8 check, then `toml`
//! deserialization and field validation.

use std::path::Path;
use std::path::PathBuf;

use cloud_pipelines_store_sqlite::SqliteJournalMode;
use cloud_pipelines_store_sqlite::SqliteStoreConfig;
use cloud_pipelines_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

/// Maximum accepted length of a config file path, defensive against
/// pathological input before any filesystem call is made.
const MAX_CONFIG_PATH_BYTES: usize = 4_096;
/// Maximum accepted length of a single path component.
const MAX_CONFIG_PATH_COMPONENT_BYTES: usize = 255;
/// Maximum accepted config file size.
const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576;

const DEFAULT_CONFIG_PATH: &str = "cloud-pipelines.toml";

/// Errors raised while loading or validating an [`OrchestratorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config path itself was unreasonably long.
    #[error("config path exceeds max length of {MAX_CONFIG_PATH_BYTES} bytes")]
    PathTooLong,
    /// A single path component was unreasonably long.
    #[error("config path component too long (max {MAX_CONFIG_PATH_COMPONENT_BYTES} bytes)")]
    PathComponentTooLong,
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The path that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file exceeded the size cap.
    #[error("config file exceeds size limit of {MAX_CONFIG_FILE_BYTES} bytes")]
    TooLarge,
    /// The config file was not valid UTF-8.
    #[error("config file must be utf-8")]
    NotUtf8,
    /// The TOML document could not be parsed into an [`OrchestratorConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A loaded config failed field-level validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Typed startup configuration for the Cloud Pipelines CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// SQLite connection and durability settings.
    pub sqlite: SqliteStoreConfig,
    /// Root URI new input/output data is staged under.
    #[serde(default = "default_data_root_uri")]
    pub data_root_uri: String,
    /// Root URI container logs are uploaded under.
    #[serde(default = "default_logs_root_uri")]
    pub logs_root_uri: String,
    /// Milliseconds slept between full ready/in-flight sweep passes.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Whether a `QUEUED` node may adopt a cache-equivalent prior launch.
    #[serde(default = "default_cache_adoption_enabled")]
    pub cache_adoption_enabled: bool,
    /// Maximum nested graph depth the compiler accepts.
    #[serde(default = "default_max_graph_depth")]
    pub max_graph_depth: u32,
    /// Attempts a success-path storage call gets before giving up.
    #[serde(default = "default_storage_retry_attempts")]
    pub storage_retry_attempts: u32,
    /// Delay, in milliseconds, between storage retry attempts.
    #[serde(default = "default_storage_retry_delay_ms")]
    pub storage_retry_delay_ms: u64,
}

const fn default_data_root_uri() -> String {
    String::new()
}

fn default_logs_root_uri() -> String {
    String::new()
}

const fn default_sweep_interval_ms() -> u64 {
    500
}

const fn default_cache_adoption_enabled() -> bool {
    true
}

const fn default_max_graph_depth() -> u32 {
    cloud_pipelines_compiler::DEFAULT_MAX_GRAPH_DEPTH
}

const fn default_storage_retry_attempts() -> u32 {
    5
}

const fn default_storage_retry_delay_ms() -> u64 {
    1_000
}

impl OrchestratorConfig {
    /// Loads a config from `path`, defaulting to `./cloud-pipelines.toml`,
    /// then validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the path is malformed, the file cannot be
    /// read, it exceeds the size or encoding constraints, the TOML cannot be
    /// parsed, or the parsed config fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let path = path.unwrap_or(&default_path);
        Self::check_path_shape(path)?;

        let metadata = std::fs::metadata(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        if metadata.len() > MAX_CONFIG_FILE_BYTES {
            return Err(ConfigError::TooLarge);
        }
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let text = String::from_utf8(bytes).map_err(|_| ConfigError::NotUtf8)?;

        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn check_path_shape(path: &Path) -> Result<(), ConfigError> {
        if path.as_os_str().len() > MAX_CONFIG_PATH_BYTES {
            return Err(ConfigError::PathTooLong);
        }
        for component in path.components() {
            if component.as_os_str().len() > MAX_CONFIG_PATH_COMPONENT_BYTES {
                return Err(ConfigError::PathComponentTooLong);
            }
        }
        Ok(())
    }

    /// Validates every field : non-empty paths, positive
    /// intervals/retry counts, and a depth cap within `[1, 4096]`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first field that fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sqlite.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("sqlite.path must not be empty".to_string()));
        }
        if self.data_root_uri.is_empty() {
            return Err(ConfigError::Invalid("data_root_uri must not be empty".to_string()));
        }
        if self.logs_root_uri.is_empty() {
            return Err(ConfigError::Invalid("logs_root_uri must not be empty".to_string()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be positive".to_string()));
        }
        if self.max_graph_depth == 0 || self.max_graph_depth > 4_096 {
            return Err(ConfigError::Invalid("max_graph_depth must be within [1, 4096]".to_string()));
        }
        if self.storage_retry_attempts == 0 {
            return Err(ConfigError::Invalid("storage_retry_attempts must be positive".to_string()));
        }
        if self.storage_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid("storage_retry_delay_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Returns the `sqlite` sub-config's journal mode, for display purposes.
    #[must_use]
    pub const fn journal_mode(&self) -> SqliteJournalMode {
        self.sqlite.journal_mode
    }

    /// Returns the `sqlite` sub-config's sync mode, for display purposes.
    #[must_use]
    pub const fn sync_mode(&self) -> SqliteSyncMode {
        self.sqlite.sync_mode
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::ConfigError;
    use super::OrchestratorConfig;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(
            "data_root_uri = \"file:///tmp/data\"\nlogs_root_uri = \"file:///tmp/logs\"\n[sqlite]\npath = \"/tmp/x.db\"\n",
        );
        let config = OrchestratorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.sweep_interval_ms, 500);
        assert!(config.cache_adoption_enabled);
        assert_eq!(config.max_graph_depth, cloud_pipelines_compiler::DEFAULT_MAX_GRAPH_DEPTH);
    }

    #[test]
    fn rejects_empty_data_root_uri() {
        let file = write_config("data_root_uri = \"\"\nlogs_root_uri = \"file:///tmp/logs\"\n[sqlite]\npath = \"/tmp/x.db\"\n");
        let err = OrchestratorConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_max_graph_depth() {
        let file = write_config(
            "data_root_uri = \"file:///tmp/data\"\nlogs_root_uri = \"file:///tmp/logs\"\nmax_graph_depth = 0\n[sqlite]\npath = \"/tmp/x.db\"\n",
        );
        let err = OrchestratorConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_file() {
        let err = OrchestratorConfig::load(Some(std::path::Path::new("/nonexistent/cloud-pipelines.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
