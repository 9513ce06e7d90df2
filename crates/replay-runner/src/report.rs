use replay_tools::PluginDiagnostic;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Verify,
    RepairOutput,
    ReplayExternal,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::RepairOutput => "repair-output",
            Self::ReplayExternal => "replay-external",
        }
    }

    pub fn rewrites(&self) -> bool {
        matches!(self, Self::RepairOutput)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LoadFailure,
    ConfigMissing,
    OperationUnknown,
    ArgumentMismatch,
    ToolFailure,
    Mismatch,
    Fatal,
}

/// A step that did not hold, or a file that could not be run at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    /// `None` for failures that happen before any step runs.
    pub step: Option<usize>,
    pub operation: Option<String>,
    pub kind: FailureKind,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_actual: Option<Value>,
}

impl StepFailure {
    pub fn file_level(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            step: None,
            operation: None,
            kind,
            reason: reason.into(),
            expected: None,
            actual: None,
            normalized_actual: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Ok,
    Updated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub outcome: FileOutcome,
    pub env: Option<String>,
    pub interface: Option<String>,
    pub actions: usize,
    /// Steps whose recorded output was replaced.
    pub repaired: usize,
    /// Verify stopped early after too many failures in a row.
    pub aborted: bool,
    pub failures: Vec<StepFailure>,
    /// Plugins of the environment that were skipped at load.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugin_diagnostics: Vec<PluginDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_after: Option<String>,
}

impl FileReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            task_id: None,
            outcome: FileOutcome::Ok,
            env: None,
            interface: None,
            actions: 0,
            repaired: 0,
            aborted: false,
            failures: Vec::new(),
            plugin_diagnostics: Vec::new(),
            digest_before: None,
            digest_after: None,
        }
    }

    pub fn failed(mut self, failure: StepFailure) -> Self {
        self.outcome = FileOutcome::Failed;
        self.failures.push(failure);
        self
    }

    pub fn is_load_failure(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.step.is_none() && f.kind == FailureKind::LoadFailure)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files: usize,
    pub ok: usize,
    pub updated: usize,
    pub failed: usize,
    pub load_failures: usize,
    pub mismatches: usize,
    pub actions: usize,
}

impl RunSummary {
    pub fn record(&mut self, report: &FileReport) {
        self.files += 1;
        match report.outcome {
            FileOutcome::Ok => self.ok += 1,
            FileOutcome::Updated => self.updated += 1,
            FileOutcome::Failed => self.failed += 1,
        }
        if report.is_load_failure() {
            self.load_failures += 1;
        }
        self.mismatches += report.failures.iter().filter(|f| f.step.is_some()).count();
        self.actions += report.actions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_counts_outcomes_and_step_failures() {
        let mut summary = RunSummary::default();
        summary.record(&FileReport::new("a.json"));
        summary.record(
            &FileReport::new("b.json")
                .failed(StepFailure::file_level(FailureKind::LoadFailure, "bad json")),
        );
        let mut c = FileReport::new("c.json");
        c.actions = 3;
        c.outcome = FileOutcome::Failed;
        c.failures.push(StepFailure {
            step: Some(1),
            operation: Some("get_user".to_string()),
            kind: FailureKind::Mismatch,
            reason: "differs".to_string(),
            expected: Some(json!(1)),
            actual: Some(json!(2)),
            normalized_actual: None,
        });
        summary.record(&c);
        assert_eq!(
            summary,
            RunSummary {
                files: 3,
                ok: 1,
                updated: 0,
                failed: 2,
                load_failures: 1,
                mismatches: 1,
                actions: 3,
            }
        );
        assert_eq!(
            serde_json::to_value(FailureKind::OperationUnknown).expect("kind"),
            json!("operation_unknown")
        );
        assert_eq!(RunMode::RepairOutput.to_string(), "repair-output");
    }
}
