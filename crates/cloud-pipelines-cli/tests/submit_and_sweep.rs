// crates/cloud-pipelines-cli/tests/submit_and_sweep.rs
// ============================================================================
// Module: CLI Submit/Sweep/Get Integration Test
// Description: Drives the compiled `cloud-pipelines` binary end to end
// against a tempdir-backed config.
// Purpose: Exercise submit -> sweep --once -> get across a process boundary,
// the way a real operator would invoke the CLI.
// Dependencies: cloud-pipelines-cli binary, tempfile, serde_json
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "integration test assertions"
)]

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

fn cloud_pipelines_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cloud-pipelines"))
}

fn write_config(dir: &Path) -> PathBuf {
    let config_path = dir.join("cloud-pipelines.toml");
    let data_root = dir.join("data");
    let logs_root = dir.join("logs");
    let db_path = dir.join("store.sqlite3");
    fs::write(
        &config_path,
        format!(
            "data_root_uri = \"file://{}\"\nlogs_root_uri = \"file://{}\"\nsweep_interval_ms = 50\n[sqlite]\npath = \"{}\"\n",
            data_root.display(),
            logs_root.display(),
            db_path.display(),
        ),
    )
    .expect("write config");
    config_path
}

fn write_task_spec(dir: &Path) -> PathBuf {
    let path = dir.join("task.json");
    let spec = serde_json::json!({
        "component_ref": {
            "spec": {
                "name": "echo-graph",
                "inputs": [],
                "outputs": [],
                "implementation": {
                    "graph": {
                        "tasks": {
                            "only": {
                                "component_ref": {
                                    "spec": {
                                        "name": "echo",
                                        "inputs": [],
                                        "outputs": [],
                                        "implementation": {
                                            "container": {
                                                "image": "busybox",
                                                "command": ["echo", "hello"],
                                                "args": [],
                                                "env": {}
                                            }
                                        }
                                    }
                                },
                                "arguments": {},
                                "annotations": {}
                            }
                        },
                        "output_values": {}
                    }
                }
            }
        },
        "arguments": {},
        "annotations": {}
    });
    fs::write(&path, serde_json::to_vec_pretty(&spec).expect("serialize task spec")).expect("write task spec");
    path
}

fn run_cli(config_path: &Path, args: &[&str]) -> Output {
    Command::new(cloud_pipelines_bin())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("spawn cloud-pipelines binary")
}

#[test]
fn submits_sweeps_and_queries_a_single_container_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path());
    let task_spec_path = write_task_spec(dir.path());

    let submit = run_cli(&config_path, &["submit", task_spec_path.to_str().expect("utf8 path")]);
    assert!(submit.status.success(), "submit failed: {}", String::from_utf8_lossy(&submit.stderr));
    let run: serde_json::Value = serde_json::from_slice(&submit.stdout).expect("parse submit output");
    let run_id = run["id"].as_i64().expect("run id");
    let root_execution_id = run["root_execution_id"].as_i64().expect("root execution id");

    let sweep = run_cli(&config_path, &["sweep", "--once"]);
    assert!(sweep.status.success(), "sweep failed: {}", String::from_utf8_lossy(&sweep.stderr));

    let get_run = run_cli(&config_path, &["get", "run", &run_id.to_string()]);
    assert!(get_run.status.success());
    let fetched_run: serde_json::Value = serde_json::from_slice(&get_run.stdout).expect("parse get run output");
    assert_eq!(fetched_run["id"], run["id"]);

    let get_execution = run_cli(&config_path, &["get", "execution", &root_execution_id.to_string()]);
    assert!(get_execution.status.success());
    let detail: serde_json::Value = serde_json::from_slice(&get_execution.stdout).expect("parse get execution output");
    assert!(detail["node"]["container_execution_status"].is_null());
    assert_eq!(detail["children"].as_array().expect("children array").len(), 1);
    let child = &detail["children"][0];
    assert_eq!(child["container_execution_status"], "SUCCEEDED");
    let child_execution_id = child["id"].as_i64().expect("child execution id");

    let get_aggregate = run_cli(&config_path, &["get", "aggregate", &root_execution_id.to_string()]);
    assert!(get_aggregate.status.success());
    let counts: serde_json::Value = serde_json::from_slice(&get_aggregate.stdout).expect("parse get aggregate output");
    assert_eq!(counts[child_execution_id.to_string()]["SUCCEEDED"], 1);
}

#[test]
fn cancel_on_an_unknown_run_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path());

    let cancel = run_cli(&config_path, &["cancel", "999999"]);
    assert!(!cancel.status.success());
    assert!(String::from_utf8_lossy(&cancel.stderr).contains("not found"));
}

#[test]
fn get_execution_on_an_unknown_id_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = write_config(dir.path());

    let get_execution = run_cli(&config_path, &["get", "execution", "123456"]);
    assert!(!get_execution.status.success());
    assert!(String::from_utf8_lossy(&get_execution.stderr).contains("not found"));
}
