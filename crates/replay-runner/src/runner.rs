use crate::config::ReplayConfig;
use crate::report::{FailureKind, FileOutcome, FileReport, RunMode, RunSummary, StepFailure};
use crate::sink::ReportSink;
use crate::steps::{drive_steps, StepVerdict};
use crate::task::TaskDoc;
use anyhow::{anyhow, Context, Result};
use replay_compare::scalar_differences;
use replay_core::{atomic_write_json_pretty, sha256_bytes, sha256_file};
use replay_tools::{LoadError, PluginCatalog, Session};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Drives task files and result logs through one session. The output
/// substitution map lives as long as the runner, so ids repaired in one
/// file carry over to the `outputs` of files run later in the batch.
#[derive(Debug)]
pub struct Runner {
    session: Session,
    config: ReplayConfig,
    substitutions: BTreeMap<String, Value>,
}

impl Runner {
    pub fn new(config: ReplayConfig, catalog: Arc<PluginCatalog>) -> Self {
        Self {
            session: Session::new(config.envs_root.clone(), catalog),
            config,
            substitutions: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn substitutions(&self) -> &BTreeMap<String, Value> {
        &self.substitutions
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Switches to `env`/`interface`, reloading fixtures when the pair is
    /// already active and every task should start from clean data.
    pub(crate) fn prepare(&mut self, env: &str, interface: &str) -> Result<(), LoadError> {
        let switched = self.session.switch(env, interface)?;
        if !switched && self.config.fresh_fixtures_per_task {
            self.session.reload()?;
        }
        Ok(())
    }

    pub fn run_task_file(&mut self, path: &Path, mode: RunMode) -> FileReport {
        let mut report = FileReport::new(path);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                return report.failed(StepFailure::file_level(
                    FailureKind::LoadFailure,
                    format!("failed to read task file: {}", err),
                ))
            }
        };
        report.digest_before = Some(sha256_bytes(&bytes));
        let mut doc = match TaskDoc::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(err) => {
                return report.failed(StepFailure::file_level(
                    FailureKind::LoadFailure,
                    format!("{:#}", err),
                ))
            }
        };
        report.env = doc.env();
        report.interface = doc.interface();
        let (Some(env), Some(interface)) = (report.env.clone(), report.interface.clone()) else {
            return report.failed(StepFailure::file_level(
                FailureKind::ConfigMissing,
                "task declares no env or interface_num",
            ));
        };
        if let Err(err) = self.prepare(&env, &interface) {
            return report.failed(StepFailure::file_level(
                FailureKind::LoadFailure,
                err.to_string(),
            ));
        }
        report.plugin_diagnostics = self.session.diagnostics().to_vec();

        let steps = doc.steps();
        report.actions = steps.len();
        let float_env = self.config.is_float_env(&env);
        let outcome = drive_steps(&mut self.session, &steps, mode, &self.config, float_env);
        report.aborted = outcome.aborted;
        report.failures.extend(outcome.failures().cloned());

        if !mode.rewrites() {
            report.outcome = if report.failures.is_empty() {
                FileOutcome::Ok
            } else {
                FileOutcome::Failed
            };
            log_outcome(&report);
            return report;
        }
        if outcome.halted {
            report.outcome = FileOutcome::Failed;
            log_outcome(&report);
            return report;
        }

        let mut modified = false;
        let mut pairs: Vec<(Value, Value)> = Vec::new();
        for step in &outcome.steps {
            if !step.substituted.is_empty() {
                doc.set_arguments(step.index, step.arguments.clone());
                modified = true;
            }
            if let StepVerdict::Repair(new_output) = &step.verdict {
                if let Some(old_output) = &steps[step.index].expected {
                    pairs.extend(scalar_differences(old_output, new_output));
                }
                doc.set_output(step.index, new_output.clone());
                report.repaired += 1;
                modified = true;
            }
        }
        for (old, new) in pairs {
            self.register_substitution(&old, new);
        }
        if self.apply_output_substitutions(&mut doc) {
            modified = true;
        }

        if modified {
            if let Err(err) = atomic_write_json_pretty(path, doc.as_value()) {
                report.outcome = FileOutcome::Failed;
                report.failures.push(StepFailure::file_level(
                    FailureKind::Fatal,
                    format!("failed to rewrite task file: {:#}", err),
                ));
                log_outcome(&report);
                return report;
            }
            report.digest_after = sha256_file(path).ok();
            report.outcome = FileOutcome::Updated;
        } else {
            report.outcome = FileOutcome::Ok;
        }
        log_outcome(&report);
        report
    }

    /// Runs every `*.json` task file under `root` (or `root` itself when it
    /// is a file), in path order.
    pub fn run_tree(
        &mut self,
        root: &Path,
        mode: RunMode,
        sink: &mut dyn ReportSink,
    ) -> Result<RunSummary> {
        let files = collect_task_files(root)?;
        let mut summary = RunSummary::default();
        for path in files {
            let report = self.run_task_file(&path, mode);
            sink.append_file_report(mode, &report)?;
            summary.record(&report);
        }
        sink.append_summary(mode, &summary)?;
        sink.flush()?;
        info!(
            mode = %mode,
            root = %root.display(),
            files = summary.files,
            ok = summary.ok,
            updated = summary.updated,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }

    fn register_substitution(&mut self, old: &Value, new: Value) {
        let Some(key) = scalar_text(old) else {
            return;
        };
        if scalar_text(&new).is_some() {
            self.substitutions.insert(key, new);
        }
    }

    /// Rewrites `task.outputs` entries that name a value repaired earlier in
    /// the run. Returns whether anything changed.
    fn apply_output_substitutions(&self, doc: &mut TaskDoc) -> bool {
        if self.substitutions.is_empty() {
            return false;
        }
        let Some(outputs) = doc.outputs_mut() else {
            return false;
        };
        let mut changed = false;
        for entry in outputs.iter_mut() {
            let Some(key) = scalar_text(entry) else {
                continue;
            };
            let Some(replacement) = self.substitutions.get(&key) else {
                continue;
            };
            let replaced = retyped_like(entry, replacement);
            if replaced != *entry {
                *entry = replaced;
                changed = true;
            }
        }
        changed
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `replacement` in the storage type of `original`: an integer output
/// stays an integer when the new value reads as one.
fn retyped_like(original: &Value, replacement: &Value) -> Value {
    let Some(text) = scalar_text(replacement) else {
        return replacement.clone();
    };
    match original {
        Value::Number(n) if !n.is_f64() => match text.trim().parse::<i64>() {
            Ok(i) => Value::Number(Number::from(i)),
            Err(_) => replacement.clone(),
        },
        Value::String(_) => Value::String(text),
        _ => replacement.clone(),
    }
}

fn log_outcome(report: &FileReport) {
    match report.outcome {
        FileOutcome::Failed => warn!(
            file = %report.path.display(),
            failures = report.failures.len(),
            aborted = report.aborted,
            "task failed"
        ),
        FileOutcome::Updated => info!(
            file = %report.path.display(),
            repaired = report.repaired,
            "task updated"
        ),
        FileOutcome::Ok => info!(file = %report.path.display(), "task ok"),
    }
}

pub fn collect_task_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(anyhow!("input root not found: {}", root.display()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
        {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}
