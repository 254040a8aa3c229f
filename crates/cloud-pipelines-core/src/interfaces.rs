// cloud-pipelines-core/src/interfaces.rs
// ============================================================================
// Module: External Interfaces
// Description: Backend-agnostic Storage Provider and Container Launcher
// contracts.
// Purpose: Let the orchestrator depend on trait objects rather than a
// concrete blob store or container runtime.
// Dependencies: serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Implementations must be deterministic given their inputs and fail closed
//! on ambiguous data. `cloud-pipelines-providers` ships one reference
//! implementation of each trait (local filesystem, in-process launcher);
//! production deployments are expected to substitute their own.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::task_spec::ContainerSpec;

// ============================================================================
// SECTION: Storage Provider
// ============================================================================

/// Metadata about a stored blob, returned by [`StorageProvider::get_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    /// Byte size of the content.
    pub total_size: u64,
    /// Whether the URI addresses a directory rather than a single file.
    pub is_dir: bool,
    /// Content hashes keyed by algorithm name (e.g. `"md5"`).
    pub hashes: BTreeMap<String, String>,
}

/// Storage provider errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The URI does not address any existing content.
    #[error("storage item not found: {0}")]
    NotFound(String),
    /// An I/O or transport failure occurred.
    #[error("storage io error: {0}")]
    Io(String),
    /// The URI scheme is not supported by this provider.
    #[error("unsupported uri scheme: {0}")]
    UnsupportedScheme(String),
}

/// Read/write access to blobs addressed by URI.
///
/// Supported URI schemes are provider-dependent; the orchestrator treats
/// URIs as opaque strings except for the layout it constructs itself.
pub trait StorageProvider: Send + Sync {
    /// Downloads the content at `uri` and decodes it as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the content is missing, unreadable, or
    /// not valid UTF-8.
    fn download_as_text(&self, uri: &str) -> Result<String, StorageError>;

    /// Downloads the raw bytes at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the content is missing or unreadable.
    fn download_as_bytes(&self, uri: &str) -> Result<Vec<u8>, StorageError>;

    /// Returns size, directory-flag, and content hashes for `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the content is missing or unreadable.
    fn get_info(&self, uri: &str) -> Result<StorageInfo, StorageError>;

    /// Uploads UTF-8 text to `uri`, creating or overwriting it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the upload fails.
    fn upload_from_text(&self, uri: &str, text: &str) -> Result<(), StorageError>;

    /// Uploads raw bytes to `uri`, creating or overwriting it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the upload fails.
    fn upload_from_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

// ============================================================================
// SECTION: Container Launcher
// ============================================================================

/// A single resolved input argument handed to the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArgument {
    /// Byte size of the input content.
    pub total_size: u64,
    /// Whether the input is a directory.
    pub is_dir: bool,
    /// Inline value, when the upstream `ArtifactData` carried one.
    pub value: Option<String>,
    /// Storage URI, when the upstream `ArtifactData` carried one.
    pub uri: Option<String>,
    /// URI the launcher should stage an inline `value` to if it needs a URI
    /// and none was supplied.
    pub staging_uri: String,
}

/// The launcher's reported status for a `LaunchedContainer`, mapped onto the
/// state machine driven by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherStatus {
    /// Accepted but not yet started.
    Pending,
    /// Actively running.
    Running,
    /// Finished with a zero exit code.
    Succeeded,
    /// Finished with a non-zero exit code.
    Failed,
    /// The launcher itself could not determine the container's outcome.
    Error,
}

/// Launcher errors.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Launching the container raised an error.
    #[error("launch failed: {0}")]
    LaunchFailed(String),
    /// Refreshing status for a launched container raised an error.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
    /// The opaque launcher handle could not be (de)serialized.
    #[error("invalid launcher handle: {0}")]
    InvalidHandle(String),
    /// Terminating a launched container raised an error.
    #[error("terminate failed: {0}")]
    TerminateFailed(String),
}

/// A live handle to a launched container, returned by
/// [`ContainerLauncher::launch_container_task`] and
/// [`ContainerLauncher::refresh`].
///
/// `data` is the opaque, launcher-specific payload the orchestrator persists
/// verbatim as `ContainerExecution.launcher_data` and passes back unmodified
/// on the next call.
#[derive(Debug, Clone)]
pub struct LaunchedContainer {
    /// Current reported status.
    pub status: LauncherStatus,
    /// Process exit code, once known.
    pub exit_code: Option<i64>,
    /// Time the container started running, once known.
    pub started_at: Option<OffsetDateTime>,
    /// Time the container reached a terminal state, once known.
    pub ended_at: Option<OffsetDateTime>,
    /// Opaque handle payload for the next `refresh`/`terminate`/log call.
    pub data: Vec<u8>,
}

/// Launch, refresh, log, and terminate a container workload.
///
/// Implementations are free to choose any wire representation for
/// [`LaunchedContainer::data`]; the orchestrator only ever stores and replays
/// it, never inspects it.
pub trait ContainerLauncher: Send + Sync {
    /// Launches a new container task and returns its initial handle.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::LaunchFailed`] when the launch itself raises;
    /// the caller transitions the node to `SYSTEM_ERROR` on this error.
    fn launch_container_task(
        &self,
        component_spec: &ContainerSpec,
        input_arguments: &BTreeMap<String, InputArgument>,
        output_uris: &BTreeMap<String, String>,
        log_uri: &str,
        annotations: &Value,
    ) -> Result<LaunchedContainer, LauncherError>;

    /// Returns a refreshed handle for a previously launched container.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::RefreshFailed`] or
    /// [`LauncherError::InvalidHandle`] when the handle cannot be refreshed.
    fn refresh(&self, handle_data: &[u8]) -> Result<LaunchedContainer, LauncherError>;

    /// Returns the full container log as text.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError`] when the log cannot be retrieved.
    fn get_log(&self, handle_data: &[u8]) -> Result<String, LauncherError>;

    /// Uploads the container log to `log_uri` via `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError`] when the log cannot be retrieved, or
    /// [`crate::interfaces::StorageError`] wrapped as
    /// [`LauncherError::LaunchFailed`] when the upload fails.
    fn upload_log(
        &self,
        handle_data: &[u8],
        log_uri: &str,
        storage: &dyn StorageProvider,
    ) -> Result<(), LauncherError> {
        let log_text = self.get_log(handle_data)?;
        storage
            .upload_from_text(log_uri, &log_text)
            .map_err(|err| LauncherError::LaunchFailed(err.to_string()))
    }

    /// Returns the container's log lines as a finite, single-shot sequence:
    /// a second call on the same handle after the container has reached a
    /// terminal state returns an empty sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError`] when the log cannot be retrieved.
    fn stream_log_lines(&self, handle_data: &[u8]) -> Result<Vec<String>, LauncherError>;

    /// Requests termination of a launched container; safe to call on any
    /// handle, including one for an already-terminal container.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::TerminateFailed`] when the request itself
    /// could not be delivered; this is best-effort and callers must not
    /// block run-level cancellation on its outcome.
    fn terminate(&self, handle_data: &[u8]) -> Result<(), LauncherError>;
}

// ============================================================================
// SECTION: Identity Guard
// ============================================================================

/// An action an [`IdentityGuard`] may permit or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedAction {
    /// Cancelling a pipeline run.
    CancelRun,
    /// Submitting a new pipeline run.
    SubmitRun,
}

/// Raised by an [`IdentityGuard`] that denies a request. Never itself mutates orchestrator state.
#[derive(Debug, Error)]
#[error("permission denied for {action:?} by {principal}")]
pub struct PermissionError {
    /// The action that was denied.
    pub action: GuardedAction,
    /// The identity the denial applies to, `"<unknown>"` if none was given.
    pub principal: String,
}

/// Authorizes actions against an external identity provider before the
/// orchestrator or compiler performs them.
///
/// No production identity integration is in scope; this hook exists so a
/// caller can plug one in without changing `cloud-pipelines-orchestrator`.
/// [`PermitAll`] is the default used when no guard is configured.
pub trait IdentityGuard: Send + Sync {
    /// Checks whether `principal` may perform `action`.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError`] when the action is denied.
    fn check(&self, action: GuardedAction, principal: Option<&str>) -> Result<(), PermissionError>;
}

/// An [`IdentityGuard`] that permits every action; the default when no
/// identity provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl IdentityGuard for PermitAll {
    fn check(&self, _action: GuardedAction, _principal: Option<&str>) -> Result<(), PermissionError> {
        Ok(())
    }
}
