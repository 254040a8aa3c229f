// cloud-pipelines-providers/src/inprocess.rs
// ============================================================================
// Module: In-Process Container Launcher
// Description: A ContainerLauncher that models a run as a deterministic,
// immediately terminal function of its ComponentSpec over its inputs.
// Purpose: Drive the orchestrator and CLI without a real container runtime.
// Dependencies: cloud-pipelines-core, serde, serde_json, time
// ============================================================================

//! ## Overview
//! [`InProcessLauncher`] never actually execs a container image. Launching a
//! task writes a deterministic byte string to each declared output URI
//! (derived from the image reference, command/args, and the resolved input
//! values) and returns an already-`Succeeded` handle. `refresh` is therefore
//! a no-op that echoes the same handle back; there is no `RUNNING` window to
//! observe. The opaque `launcher_data` is the tagged payload :
//! `{"kind": "inprocess", "payload": <InProcessHandle as JSON>}`.

use std::collections::BTreeMap;

use cloud_pipelines_core::ContainerLauncher;
use cloud_pipelines_core::ContainerSpec;
use cloud_pipelines_core::InputArgument;
use cloud_pipelines_core::LaunchedContainer;
use cloud_pipelines_core::LauncherError;
use cloud_pipelines_core::LauncherStatus;
use cloud_pipelines_core::StorageProvider;
use cloud_pipelines_core::md5_hex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// The `kind` tag this launcher writes into every handle it produces.
const HANDLE_KIND: &str = "inprocess";

/// The opaque payload behind `launcher_data`, serialized as JSON. This
/// launcher is always immediately terminal with a zero exit code; there is
/// no status field because `Succeeded` is the only outcome it ever reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InProcessHandle {
    kind: String,
    exit_code: i64,
    started_at: String,
    ended_at: String,
    log: String,
    streamed: bool,
}

/// A [`ContainerLauncher`] that never runs real containers: every launch is
/// a pure, synchronous function of its inputs.
///
/// It owns a [`StorageProvider`] so it can write output content at launch
/// time; in practice callers pass the same provider the orchestrator itself
/// uses, since both address the same `data_root_uri`.
pub struct InProcessLauncher {
    storage: Box<dyn StorageProvider>,
}

impl InProcessLauncher {
    /// Creates an in-process launcher that writes outputs through `storage`.
    #[must_use]
    pub fn new(storage: Box<dyn StorageProvider>) -> Self {
        Self {
            storage,
        }
    }
}

impl ContainerLauncher for InProcessLauncher {
    fn launch_container_task(
        &self,
        component_spec: &ContainerSpec,
        input_arguments: &BTreeMap<String, InputArgument>,
        output_uris: &BTreeMap<String, String>,
        log_uri: &str,
        annotations: &Value,
    ) -> Result<LaunchedContainer, LauncherError> {
        let now = OffsetDateTime::now_utc();
        let timestamp = now.format(&Rfc3339).map_err(|err| LauncherError::LaunchFailed(err.to_string()))?;

        for (output_name, uri) in output_uris {
            let content = output_content(component_spec, output_name, input_arguments);
            self.storage
                .upload_from_text(uri, &content)
                .map_err(|err| LauncherError::LaunchFailed(format!("writing output {output_name}: {err}")))?;
        }

        let log = render_log(component_spec, input_arguments, output_uris, log_uri, annotations);
        let handle = InProcessHandle {
            kind: HANDLE_KIND.to_string(),
            exit_code: 0,
            started_at: timestamp.clone(),
            ended_at: timestamp,
            log,
            streamed: false,
        };
        let data = serde_json::to_vec(&handle).map_err(|err| LauncherError::LaunchFailed(err.to_string()))?;

        Ok(LaunchedContainer {
            status: LauncherStatus::Succeeded,
            exit_code: Some(0),
            started_at: Some(now),
            ended_at: Some(now),
            data,
        })
    }

    fn refresh(&self, handle_data: &[u8]) -> Result<LaunchedContainer, LauncherError> {
        let handle = decode_handle(handle_data)?;
        let started_at = parse_timestamp(&handle.started_at)?;
        let ended_at = parse_timestamp(&handle.ended_at)?;
        Ok(LaunchedContainer {
            status: LauncherStatus::Succeeded,
            exit_code: Some(handle.exit_code),
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            data: handle_data.to_vec(),
        })
    }

    fn get_log(&self, handle_data: &[u8]) -> Result<String, LauncherError> {
        Ok(decode_handle(handle_data)?.log)
    }

    fn stream_log_lines(&self, handle_data: &[u8]) -> Result<Vec<String>, LauncherError> {
        let handle = decode_handle(handle_data)?;
        if handle.streamed {
            return Ok(Vec::new());
        }
        Ok(handle.log.lines().map(ToString::to_string).collect())
    }

    fn terminate(&self, _handle_data: &[u8]) -> Result<(), LauncherError> {
        // Already terminal by construction; termination is always a no-op.
        Ok(())
    }
}

/// Re-encodes `handle_data` with its `streamed` flag set, so a caller that
/// persists the result back via the store observes single-shot log
/// streaming on the next call.
///
/// # Errors
///
/// Returns [`LauncherError::InvalidHandle`] when `handle_data` is not a
/// handle this launcher produced.
pub fn mark_log_streamed(handle_data: &[u8]) -> Result<Vec<u8>, LauncherError> {
    let mut handle = decode_handle(handle_data)?;
    handle.streamed = true;
    serde_json::to_vec(&handle).map_err(|err| LauncherError::InvalidHandle(err.to_string()))
}

/// Decodes an opaque handle, rejecting anything not produced by this launcher.
fn decode_handle(handle_data: &[u8]) -> Result<InProcessHandle, LauncherError> {
    let handle: InProcessHandle =
        serde_json::from_slice(handle_data).map_err(|err| LauncherError::InvalidHandle(err.to_string()))?;
    if handle.kind != HANDLE_KIND {
        return Err(LauncherError::InvalidHandle(format!("unexpected launcher_data kind: {}", handle.kind)));
    }
    Ok(handle)
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, LauncherError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|err| LauncherError::InvalidHandle(err.to_string()))
}

/// Derives deterministic output content: the md5 of the container image,
/// command, args, output name, and every input's resolved content.
fn output_content(spec: &ContainerSpec, output_name: &str, input_arguments: &BTreeMap<String, InputArgument>) -> String {
    let mut basis = format!("{}\u{0}{}\u{0}{}\u{0}{output_name}", spec.image, spec.command.join(" "), spec.args.join(" "));
    for (name, argument) in input_arguments {
        basis.push('\u{0}');
        basis.push_str(name);
        basis.push('=');
        if let Some(value) = &argument.value {
            basis.push_str(value);
        } else if let Some(uri) = &argument.uri {
            basis.push_str(uri);
        }
    }
    md5_hex(basis.as_bytes())
}

/// Renders a deterministic synthetic log describing the simulated run.
fn render_log(
    spec: &ContainerSpec,
    input_arguments: &BTreeMap<String, InputArgument>,
    output_uris: &BTreeMap<String, String>,
    log_uri: &str,
    annotations: &Value,
) -> String {
    let mut lines = vec![
        format!("inprocess launcher: image={}", spec.image),
        format!("command: {}", spec.command.join(" ")),
        format!("args: {}", spec.args.join(" ")),
        format!("log_uri: {log_uri}"),
    ];
    for (name, argument) in input_arguments {
        lines.push(format!("input {name}: size={} is_dir={}", argument.total_size, argument.is_dir));
    }
    for (name, uri) in output_uris {
        lines.push(format!("output {name}: {uri}"));
    }
    lines.push(format!("annotations: {annotations}"));
    lines.push("exit_code: 0".to_string());
    lines.join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::InProcessLauncher;
    use super::mark_log_streamed;
    use crate::filesystem::FilesystemStorageProvider;
    use cloud_pipelines_core::ContainerLauncher;
    use cloud_pipelines_core::ContainerSpec;
    use cloud_pipelines_core::InputArgument;
    use cloud_pipelines_core::LauncherStatus;
    use cloud_pipelines_core::StorageProvider;
    use std::collections::BTreeMap;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "alpine:3".to_string(),
            command: vec!["echo".to_string()],
            args: vec!["hi".to_string()],
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn launch_is_immediately_succeeded_and_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Box::new(FilesystemStorageProvider::new());
        let launcher = InProcessLauncher::new(storage);

        let mut outputs = BTreeMap::new();
        let out_uri = format!("file://{}", dir.path().join("out/data").display());
        outputs.insert("out".to_string(), out_uri.clone());

        let launched = launcher
            .launch_container_task(&spec(), &BTreeMap::new(), &outputs, "file:///tmp/log.txt", &serde_json::json!({}))
            .unwrap();
        assert_eq!(launched.status, LauncherStatus::Succeeded);
        assert_eq!(launched.exit_code, Some(0));

        let storage = FilesystemStorageProvider::new();
        let content = storage.download_as_text(&out_uri).unwrap();
        assert!(!content.is_empty());
    }

    #[test]
    fn identical_inputs_produce_identical_output_content() {
        let dir = tempfile::tempdir().unwrap();
        let launcher_a = InProcessLauncher::new(Box::new(FilesystemStorageProvider::new()));
        let launcher_b = InProcessLauncher::new(Box::new(FilesystemStorageProvider::new()));

        let mut input_arguments = BTreeMap::new();
        input_arguments.insert(
            "threshold".to_string(),
            InputArgument {
                total_size: 3,
                is_dir: false,
                value: Some("0.5".to_string()),
                uri: None,
                staging_uri: "file:///unused".to_string(),
            },
        );

        let mut outputs_a = BTreeMap::new();
        outputs_a.insert("out".to_string(), format!("file://{}", dir.path().join("a/data").display()));
        let mut outputs_b = BTreeMap::new();
        outputs_b.insert("out".to_string(), format!("file://{}", dir.path().join("b/data").display()));

        launcher_a
            .launch_container_task(&spec(), &input_arguments, &outputs_a, "file:///tmp/a.txt", &serde_json::json!({}))
            .unwrap();
        launcher_b
            .launch_container_task(&spec(), &input_arguments, &outputs_b, "file:///tmp/b.txt", &serde_json::json!({}))
            .unwrap();

        let storage = FilesystemStorageProvider::new();
        let content_a = storage.download_as_text(outputs_a.get("out").unwrap()).unwrap();
        let content_b = storage.download_as_text(outputs_b.get("out").unwrap()).unwrap();
        assert_eq!(content_a, content_b);
    }

    #[test]
    fn stream_log_lines_is_single_shot_once_marked() {
        let launcher = InProcessLauncher::new(Box::new(FilesystemStorageProvider::new()));
        let launched = launcher
            .launch_container_task(&spec(), &BTreeMap::new(), &BTreeMap::new(), "file:///tmp/log.txt", &serde_json::json!({}))
            .unwrap();

        let first = launcher.stream_log_lines(&launched.data).unwrap();
        assert!(!first.is_empty());

        let advanced = mark_log_streamed(&launched.data).unwrap();
        let second = launcher.stream_log_lines(&advanced).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn refresh_echoes_terminal_status_back() {
        let launcher = InProcessLauncher::new(Box::new(FilesystemStorageProvider::new()));
        let launched = launcher
            .launch_container_task(&spec(), &BTreeMap::new(), &BTreeMap::new(), "file:///tmp/log.txt", &serde_json::json!({}))
            .unwrap();
        let refreshed = launcher.refresh(&launched.data).unwrap();
        assert_eq!(refreshed.status, LauncherStatus::Succeeded);
        assert_eq!(refreshed.data, launched.data);
    }

    #[test]
    fn terminate_on_terminal_handle_is_a_safe_no_op() {
        let launcher = InProcessLauncher::new(Box::new(FilesystemStorageProvider::new()));
        let launched = launcher
            .launch_container_task(&spec(), &BTreeMap::new(), &BTreeMap::new(), "file:///tmp/log.txt", &serde_json::json!({}))
            .unwrap();
        launcher.terminate(&launched.data).unwrap();
    }
}
