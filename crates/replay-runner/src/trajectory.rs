use crate::report::{FailureKind, FileOutcome, FileReport, RunMode, RunSummary, StepFailure};
use crate::runner::Runner;
use crate::sink::ReportSink;
use crate::steps::{drive_steps, ReplayStep};
use anyhow::{Context, Result};
use replay_core::{interface_key, sha256_bytes};
use replay_schemas::{validate_value, TRAJECTORY_FILE_SCHEMA};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const TOOL_ROLE: &str = "tool";

/// One agent run taken from a result file.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub task_id: Option<String>,
    pub env: Option<String>,
    pub interface: Option<String>,
    pub steps: Vec<ReplayStep>,
}

impl Trial {
    pub fn from_value(trial: &Value) -> Self {
        let steps = trial
            .get("traj")
            .and_then(Value::as_array)
            .map(|traj| {
                traj.iter()
                    .filter(|entry| entry.get("role").and_then(Value::as_str) == Some(TOOL_ROLE))
                    .map(tool_step)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            task_id: trial.get("task_id").and_then(interface_key),
            env: trial
                .get("env")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            interface: trial.get("interface_num").and_then(interface_key),
            steps,
        }
    }
}

fn tool_step(entry: &Value) -> ReplayStep {
    let arguments = match entry.get("args") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    };
    let expected = entry.get("content").map(|content| match content {
        Value::String(text) => {
            serde_json::from_str::<Value>(text).unwrap_or_else(|_| content.clone())
        }
        other => other.clone(),
    });
    ReplayStep {
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        arguments,
        expected,
    }
}

pub fn read_trials(bytes: &[u8]) -> Result<Vec<Trial>> {
    let doc: Value = serde_json::from_slice(bytes).context("result file is not valid JSON")?;
    validate_value(TRAJECTORY_FILE_SCHEMA, &doc)?;
    Ok(doc
        .as_array()
        .map(|trials| trials.iter().map(Trial::from_value).collect())
        .unwrap_or_default())
}

impl Runner {
    /// Replays every trial of an external result file. One report per
    /// trial; the file itself is never rewritten.
    pub fn replay_result_file(
        &mut self,
        path: &Path,
        sink: &mut dyn ReportSink,
    ) -> Result<RunSummary> {
        let mode = RunMode::ReplayExternal;
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let digest = sha256_bytes(&bytes);
        let trials = read_trials(&bytes).with_context(|| format!("in {}", path.display()))?;

        let mut summary = RunSummary::default();
        for trial in &trials {
            let mut report = self.replay_trial(path, trial);
            report.digest_before = Some(digest.clone());
            sink.append_file_report(mode, &report)?;
            summary.record(&report);
        }
        sink.append_summary(mode, &summary)?;
        sink.flush()?;
        info!(
            file = %path.display(),
            trials = summary.files,
            ok = summary.ok,
            failed = summary.failed,
            mismatches = summary.mismatches,
            "result replay finished"
        );
        Ok(summary)
    }

    fn replay_trial(&mut self, path: &Path, trial: &Trial) -> FileReport {
        let mut report = FileReport::new(path);
        report.task_id = trial.task_id.clone();
        report.env = trial.env.clone();
        report.interface = trial.interface.clone();
        let (Some(env), Some(interface)) = (trial.env.as_deref(), trial.interface.as_deref())
        else {
            return report.failed(StepFailure::file_level(
                FailureKind::ConfigMissing,
                "trial declares no env or interface_num",
            ));
        };
        if let Err(err) = self.prepare(env, interface) {
            return report.failed(StepFailure::file_level(
                FailureKind::LoadFailure,
                err.to_string(),
            ));
        }
        report.plugin_diagnostics = self.session().diagnostics().to_vec();
        report.actions = trial.steps.len();
        let config = self.config().clone();
        let outcome = drive_steps(
            self.session_mut(),
            &trial.steps,
            RunMode::ReplayExternal,
            &config,
            config.is_float_env(env),
        );
        report.failures.extend(outcome.failures().cloned());
        report.outcome = if report.failures.is_empty() {
            FileOutcome::Ok
        } else {
            warn!(
                file = %path.display(),
                task_id = trial.task_id.as_deref().unwrap_or("-"),
                failures = report.failures.len(),
                "trial diverged from replay"
            );
            FileOutcome::Failed
        };
        report
    }
}
