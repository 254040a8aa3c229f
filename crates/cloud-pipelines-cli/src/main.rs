// cloud-pipelines-cli/src/main.rs
// ============================================================================
// Module: Cloud Pipelines CLI Entry Point
// Description: Command dispatcher for submitting pipelines, running the
// sweep loop, cancelling runs, and querying stored state.
// Purpose: Stand in for an HTTP/JSON API layer.
// Dependencies: clap, cloud-pipelines-cli, cloud-pipelines-compiler,
// cloud-pipelines-core, cloud-pipelines-orchestrator,
// cloud-pipelines-providers, cloud-pipelines-store-sqlite, serde_json,
// tracing, tracing-subscriber
// ============================================================================

//! ## Overview
//! Every subcommand loads the same [`OrchestratorConfig`], builds the same
//! `SqliteStore` + `FilesystemStorageProvider` + `InProcessLauncher` trio,
//! and exits through one error path (`emit_error`).

use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use cloud_pipelines_cli::CliError;
use cloud_pipelines_cli::OrchestratorConfig;
use cloud_pipelines_compiler::CompilerOptions;
use cloud_pipelines_compiler::compile_pipeline;
use cloud_pipelines_core::ArtifactDataId;
use cloud_pipelines_core::ExecutionId;
use cloud_pipelines_core::GuardedAction;
use cloud_pipelines_core::IdentityGuard;
use cloud_pipelines_core::PermitAll;
use cloud_pipelines_core::PipelineRunId;
use cloud_pipelines_core::PipelineRunSubmission;
use cloud_pipelines_core::PipelineStore;
use cloud_pipelines_core::TaskSpec;
use cloud_pipelines_orchestrator::Orchestrator;
use cloud_pipelines_orchestrator::OrchestratorSettings;
use cloud_pipelines_providers::FilesystemStorageProvider;
use cloud_pipelines_providers::InProcessLauncher;
use cloud_pipelines_store_sqlite::SqliteStore;
use serde::Serialize;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "cloud-pipelines", disable_help_subcommand = true)]
struct Cli {
    /// Path to the TOML config file (defaults to `./cloud-pipelines.toml`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Compiles a task spec and persists it as a new pipeline run.
    Submit(SubmitCommand),
    /// Drives the ready-queue and in-flight sweeps.
    Sweep(SweepCommand),
    /// Cancels every non-terminal node under a run.
    Cancel(CancelCommand),
    /// Read-only queries against the store.
    Get {
        /// Selected query subcommand.
        #[command(subcommand)]
        command: GetCommand,
    },
}

/// Arguments for the `submit` subcommand.
#[derive(Args, Debug)]
struct SubmitCommand {
    /// Path to a JSON-encoded root `TaskSpec`.
    #[arg(value_name = "TASK_SPEC_JSON")]
    task_spec_path: PathBuf,
    /// Identity of the submitting principal, recorded on the run.
    #[arg(long, value_name = "USER")]
    created_by: Option<String>,
}

/// Arguments for the `sweep` subcommand.
#[derive(Args, Debug)]
struct SweepCommand {
    /// Drains both queues once each and exits, instead of looping until
    /// interrupted.
    #[arg(long)]
    once: bool,
}

/// Arguments for the `cancel` subcommand.
#[derive(Args, Debug)]
struct CancelCommand {
    /// The pipeline run id to cancel.
    #[arg(value_name = "RUN_ID")]
    run_id: i64,
    /// Identity of the cancelling principal, for the log line only.
    #[arg(long, value_name = "USER")]
    by_user: Option<String>,
}

/// `get` subcommands, one per read-only projection.
#[derive(Subcommand, Debug)]
enum GetCommand {
    /// Full detail for one execution node.
    Execution {
        /// The execution id to look up.
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: i64,
    },
    /// Aggregate status counts under a subtree root.
    Aggregate {
        /// The root execution id of the subtree to aggregate.
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: i64,
    },
    /// One pipeline run by id.
    Run {
        /// The run id to look up.
        #[arg(value_name = "RUN_ID")]
        run_id: i64,
    },
    /// One artifact data row by id.
    Artifact {
        /// The artifact data id to look up.
        #[arg(value_name = "ARTIFACT_DATA_ID")]
        artifact_data_id: i64,
    },
}

/// Entry point: runs the dispatcher and maps any error to a failure exit code.
fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Submit(command) => command_submit(&config, &command),
        Command::Sweep(command) => command_sweep(&config, &command),
        Command::Cancel(command) => command_cancel(&config, &command),
        Command::Get { command } => command_get(&config, &command),
    }
}

/// Builds the store/storage/launcher trio and the orchestrator wired on top
/// of it, the one place every command shares (submit only needs the store,
/// but building the full trio keeps this function the single source of
/// truth for how the collaborators are assembled).
fn build_orchestrator(config: &OrchestratorConfig) -> Result<(Arc<SqliteStore>, Orchestrator), CliError> {
    let store = Arc::new(SqliteStore::new(config.sqlite.clone())?);
    let storage = Arc::new(FilesystemStorageProvider::new());
    let launcher = Arc::new(InProcessLauncher::new(Box::new(FilesystemStorageProvider::new())));
    let settings = OrchestratorSettings {
        cache_adoption_enabled: config.cache_adoption_enabled,
        data_root_uri: config.data_root_uri.clone(),
        logs_root_uri: config.logs_root_uri.clone(),
        storage_retry_attempts: config.storage_retry_attempts,
        storage_retry_delay: Duration::from_millis(config.storage_retry_delay_ms),
        ..OrchestratorSettings::default()
    };
    let orchestrator = Orchestrator::new(store.clone(), storage, launcher, settings);
    Ok((store, orchestrator))
}

/// Executes the `submit` subcommand: compiles the given task spec and
/// persists it as a new pipeline run, printing the resulting run as JSON.
fn command_submit(config: &OrchestratorConfig, command: &SubmitCommand) -> Result<(), CliError> {
    PermitAll.check(GuardedAction::SubmitRun, command.created_by.as_deref())?;
    let text = read_to_string(&command.task_spec_path)?;
    let root_task: TaskSpec = serde_json::from_str(&text)?;

    let options = CompilerOptions { max_graph_depth: config.max_graph_depth };
    let graph = compile_pipeline(&root_task, options)?;

    let (store, _orchestrator) = build_orchestrator(config)?;
    let submission = PipelineRunSubmission {
        annotations: std::collections::BTreeMap::new(),
        created_by: command.created_by.clone(),
    };
    let run = store.persist_compiled_graph(&graph, submission)?;
    print_json(&run)
}

/// Executes the `sweep` subcommand: either drains both queues once and
/// exits, or runs the cadence loop until a Ctrl-C signal is observed.
fn command_sweep(config: &OrchestratorConfig, command: &SweepCommand) -> Result<(), CliError> {
    let (_store, orchestrator) = build_orchestrator(config)?;

    if command.once {
        while orchestrator.sweep_ready_once()? {}
        while orchestrator.sweep_inflight_once()? {}
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .map_err(|err| CliError::Io { path: "SIGINT handler".to_string(), source: std::io::Error::other(err) })?;

    let interval = Duration::from_millis(config.sweep_interval_ms);
    orchestrator.run(interval, || running.load(Ordering::SeqCst))?;
    Ok(())
}

/// Executes the `cancel` subcommand.
fn command_cancel(config: &OrchestratorConfig, command: &CancelCommand) -> Result<(), CliError> {
    PermitAll.check(GuardedAction::CancelRun, command.by_user.as_deref())?;
    let (_store, orchestrator) = build_orchestrator(config)?;
    orchestrator.cancel(PipelineRunId::new(command.run_id), command.by_user.as_deref())?;
    Ok(())
}

/// Executes one of the `get` query subcommands.
fn command_get(config: &OrchestratorConfig, command: &GetCommand) -> Result<(), CliError> {
    let (store, _orchestrator) = build_orchestrator(config)?;
    match command {
        GetCommand::Execution { execution_id } => {
            let detail = store
                .get_execution_detail(ExecutionId::new(*execution_id))?
                .ok_or_else(|| CliError::NotFound(format!("execution {execution_id}")))?;
            print_json(&detail)
        }
        GetCommand::Aggregate { execution_id } => {
            let counts = store.aggregate_status(ExecutionId::new(*execution_id))?;
            print_json(&counts)
        }
        GetCommand::Run { run_id } => {
            let run = store
                .get_pipeline_run(PipelineRunId::new(*run_id))?
                .ok_or_else(|| CliError::NotFound(format!("pipeline run {run_id}")))?;
            print_json(&run)
        }
        GetCommand::Artifact { artifact_data_id } => {
            let data = store
                .get_artifact_data(ArtifactDataId::new(*artifact_data_id))?
                .ok_or_else(|| CliError::NotFound(format!("artifact data {artifact_data_id}")))?;
            print_json(&data)
        }
    }
}

/// Reads a file to a UTF-8 string, mapping I/O failure to [`CliError::Io`].
fn read_to_string(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io { path: path.display().to_string(), source })
}

/// Prints a value as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{text}").map_err(|source| CliError::Io { path: "<stdout>".to_string(), source })
}

/// Prints `message` to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}
