use crate::report::{FileReport, RunMode, RunSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const LOG_SUFFIX: &str = "log.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    pub ts: String,
    pub mode: String,
    pub record: String,
    pub payload: Value,
}

pub trait ReportSink {
    fn append_file_report(&mut self, mode: RunMode, report: &FileReport) -> Result<()>;
    fn append_summary(&mut self, mode: RunMode, summary: &RunSummary) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Appends one JSON line per file report, plus a closing summary row.
pub struct JsonlReportSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlReportSink {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let writer = open_append(path)
            .with_context(|| format!("failed to open report log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<root>.<mode>.log.jsonl`, next to the input root.
pub fn default_log_path(input_root: &Path, mode: RunMode) -> PathBuf {
    let name = input_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "replay".to_string());
    input_root.with_file_name(format!("{}.{}.{}", name, mode.as_str(), LOG_SUFFIX))
}

impl ReportSink for JsonlReportSink {
    fn append_file_report(&mut self, mode: RunMode, report: &FileReport) -> Result<()> {
        append_row(&mut self.writer, &row(mode, "file", report)?)
    }

    fn append_summary(&mut self, mode: RunMode, summary: &RunSummary) -> Result<()> {
        append_row(&mut self.writer, &row(mode, "summary", summary)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Discards everything; for callers that only want the returned summary.
#[derive(Debug, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn append_file_report(&mut self, _mode: RunMode, _report: &FileReport) -> Result<()> {
        Ok(())
    }

    fn append_summary(&mut self, _mode: RunMode, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn row<T: Serialize>(mode: RunMode, record: &str, payload: &T) -> Result<ReportRow> {
    Ok(ReportRow {
        ts: Utc::now().to_rfc3339(),
        mode: mode.as_str().to_string(),
        record: record.to_string(),
        payload: serde_json::to_value(payload)?,
    })
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn append_row<T: Serialize>(writer: &mut BufWriter<File>, row: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, row)?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FailureKind, StepFailure};

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "replay_runner_sink_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn log_path_sits_beside_the_input_root() {
        assert_eq!(
            default_log_path(Path::new("/work/tasks"), RunMode::Verify),
            PathBuf::from("/work/tasks.verify.log.jsonl")
        );
        assert_eq!(
            default_log_path(Path::new("results.json"), RunMode::ReplayExternal),
            PathBuf::from("results.json.replay-external.log.jsonl")
        );
    }

    #[test]
    fn jsonl_sink_appends_rows() {
        let root = temp_root("append");
        let path = root.join("tasks.verify.log.jsonl");
        let mut sink = JsonlReportSink::new(&path).expect("sink should initialize");
        let report = FileReport::new("tasks/a.json")
            .failed(StepFailure::file_level(FailureKind::ConfigMissing, "no env"));
        sink.append_file_report(RunMode::Verify, &report)
            .expect("file row should append");
        let mut summary = RunSummary::default();
        summary.record(&report);
        sink.append_summary(RunMode::Verify, &summary)
            .expect("summary row should append");
        sink.flush().expect("flush should succeed");

        let text = fs::read_to_string(sink.path()).expect("log should exist");
        let rows: Vec<ReportRow> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("row json"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record, "file");
        assert_eq!(rows[0].payload["outcome"], "failed");
        assert_eq!(rows[0].payload["failures"][0]["kind"], "config_missing");
        assert_eq!(rows[1].record, "summary");
        assert_eq!(rows[1].payload["failed"], 1);
        let _ = fs::remove_dir_all(root);
    }
}
