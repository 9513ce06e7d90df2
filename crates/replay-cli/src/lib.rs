//! The `replay` command line. Domain crates that register their own tools
//! build a binary around `run_main` with their catalog; the stock binary
//! carries only the built-in fixture tools.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use replay_compare::ComparePolicy;
use replay_remap::{FieldTableMap, OffsetTable, RemapStats, Remapper};
use replay_runner::{
    default_log_path, JsonlReportSink, ReplayConfig, RunMode, RunSummary, Runner,
};
use replay_tools::PluginCatalog;
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_TASKS_ROOT: &str = "tasks";
const DEFAULT_RESULTS_FILE: &str = "results.json";
const REMAPPED_SUFFIX: &str = "_remapped";

#[derive(Parser)]
#[command(
    name = "replay",
    version,
    about = "Replay recorded tool calls against fixture environments"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Root directory holding one subdirectory per environment.
    #[arg(long, global = true)]
    envs: Option<PathBuf>,
    /// JSON or YAML run configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, global = true)]
    compare: Option<CompareArg>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompareArg {
    #[value(name = "strict")]
    Strict,
    #[value(name = "loose")]
    Loose,
    #[value(name = "fuzzy")]
    Fuzzy,
}

impl From<CompareArg> for ComparePolicy {
    fn from(value: CompareArg) -> Self {
        match value {
            CompareArg::Strict => ComparePolicy::strict(),
            CompareArg::Loose => ComparePolicy::loose(),
            CompareArg::Fuzzy => ComparePolicy::fuzzy(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Replay task files and report where outputs diverge.
    Verify {
        #[arg(default_value = DEFAULT_TASKS_ROOT)]
        root: PathBuf,
    },
    /// Replay task files and write observed outputs back.
    Repair {
        #[arg(default_value = DEFAULT_TASKS_ROOT)]
        root: PathBuf,
    },
    /// Replay the tool calls of an external result file.
    ReplayResults {
        #[arg(default_value = DEFAULT_RESULTS_FILE)]
        file: PathBuf,
    },
    /// Shift identifiers in a task tree into a mirrored output tree.
    RemapTasks {
        #[arg(default_value = DEFAULT_TASKS_ROOT)]
        root: PathBuf,
        #[arg(long)]
        offsets: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        field_map: Option<PathBuf>,
    },
    /// Shift identifiers in a single result file.
    RemapResults {
        #[arg(default_value = DEFAULT_RESULTS_FILE)]
        file: PathBuf,
        #[arg(long)]
        offsets: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        field_map: Option<PathBuf>,
    },
}

/// Parses the process arguments and runs one command against `catalog`.
pub fn run_main(catalog: PluginCatalog) -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;
    match run_command(cli, Arc::new(catalog)) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ReplayConfig> {
    let mut config = ReplayConfig::load(cli.config.as_deref())?;
    if let Some(envs) = &cli.envs {
        config.envs_root = envs.clone();
    }
    if let Some(compare) = cli.compare {
        config.compare = compare.into();
    }
    Ok(config)
}

fn run_command(cli: Cli, catalog: Arc<PluginCatalog>) -> Result<Option<Value>> {
    let json = cli.json;
    match &cli.command {
        Commands::Verify { root } => run_tasks(&cli, catalog, root, RunMode::Verify),
        Commands::Repair { root } => run_tasks(&cli, catalog, root, RunMode::RepairOutput),
        Commands::ReplayResults { file } => {
            let mut runner = Runner::new(load_config(&cli)?, catalog);
            let log_path = default_log_path(file, RunMode::ReplayExternal);
            let mut sink = JsonlReportSink::new(&log_path)?;
            let summary = runner.replay_result_file(file, &mut sink)?;
            finish_run(json, RunMode::ReplayExternal, file, &log_path, &summary)
        }
        Commands::RemapTasks {
            root,
            offsets,
            output,
            field_map,
        } => {
            let remapper = build_remapper(offsets, field_map.as_deref())?;
            let output = output
                .clone()
                .unwrap_or_else(|| remapped_sibling(root, None));
            let stats = remapper.remap_tree(root, &output)?;
            finish_remap(json, "remap-tasks", root, &output, &stats)
        }
        Commands::RemapResults {
            file,
            offsets,
            output,
            field_map,
        } => {
            let remapper = build_remapper(offsets, field_map.as_deref())?;
            let output = output
                .clone()
                .unwrap_or_else(|| remapped_sibling(file, Some("json")));
            let stats = remapper.remap_file(file, &output)?;
            finish_remap(json, "remap-results", file, &output, &stats)
        }
    }
}

fn run_tasks(
    cli: &Cli,
    catalog: Arc<PluginCatalog>,
    root: &Path,
    mode: RunMode,
) -> Result<Option<Value>> {
    let mut runner = Runner::new(load_config(cli)?, catalog);
    let log_path = default_log_path(root, mode);
    let mut sink = JsonlReportSink::new(&log_path)?;
    let summary = runner.run_tree(root, mode, &mut sink)?;
    finish_run(cli.json, mode, root, &log_path, &summary)
}

fn build_remapper(offsets: &Path, field_map: Option<&Path>) -> Result<Remapper> {
    let offsets = OffsetTable::load_csv(offsets)?;
    let fields = match field_map {
        Some(path) => FieldTableMap::load(path)?,
        None => FieldTableMap::builtin(),
    };
    info!(tables = offsets.len(), fields = fields.len(), "remapper ready");
    Ok(Remapper::new(offsets, fields))
}

/// `tasks` -> `tasks_remapped`, `results.json` -> `results_remapped.json`.
fn remapped_sibling(input: &Path, extension: Option<&str>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "replay".to_string());
    let name = match extension {
        Some(ext) => format!("{}{}.{}", stem, REMAPPED_SUFFIX, ext),
        None => {
            let base = input
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or(stem);
            format!("{}{}", base, REMAPPED_SUFFIX)
        }
    };
    input.with_file_name(name)
}

fn finish_run(
    json: bool,
    mode: RunMode,
    input: &Path,
    log_path: &Path,
    summary: &RunSummary,
) -> Result<Option<Value>> {
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": mode.as_str(),
            "input": input.display().to_string(),
            "log": log_path.display().to_string(),
            "summary": serde_json::to_value(summary)?
        })));
    }
    print_run_summary(mode, input, log_path, summary);
    Ok(None)
}

fn finish_remap(
    json: bool,
    command: &str,
    input: &Path,
    output: &Path,
    stats: &RemapStats,
) -> Result<Option<Value>> {
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": command,
            "input": input.display().to_string(),
            "output": output.display().to_string(),
            "total_shifted": stats.total_shifted(),
            "stats": serde_json::to_value(stats)?
        })));
    }
    println!("input: {}", input.display());
    println!("output: {}", output.display());
    println!("files_written: {}", stats.files_written);
    println!("files_failed: {}", stats.files_failed);
    println!("embedded_rewritten: {}", stats.embedded_rewritten);
    println!("shifted: {}", stats.total_shifted());
    for (table, count) in &stats.shifted {
        println!("  {}: {}", table, count);
    }
    Ok(None)
}

fn print_run_summary(mode: RunMode, input: &Path, log_path: &Path, summary: &RunSummary) {
    println!("mode: {}", mode);
    println!("input: {}", input.display());
    println!("files: {}", summary.files);
    println!("ok: {}", summary.ok);
    println!("updated: {}", summary.updated);
    println!("failed: {}", summary.failed);
    println!("load_failures: {}", summary.load_failures);
    println!("mismatches: {}", summary.mismatches);
    println!("actions: {}", summary.actions);
    println!("log: {}", log_path.display());
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
