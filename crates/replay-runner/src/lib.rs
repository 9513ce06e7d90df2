//! Drives recorded task files and external result logs through a live
//! `Session`, comparing each observed envelope against the recording and
//! either reporting the difference or writing the observed output back.

mod config;
mod report;
mod runner;
mod scratch;
mod sink;
mod steps;
mod task;
mod trajectory;

pub use config::{ReplayConfig, ShaRule, DEFAULT_ENVS_ROOT, DEFAULT_MAX_CONSECUTIVE_FAILURES};
pub use report::{FailureKind, FileOutcome, FileReport, RunMode, RunSummary, StepFailure};
pub use runner::{collect_task_files, Runner};
pub use scratch::{find_commit_sha, TaskScratch};
pub use sink::{default_log_path, JsonlReportSink, NullSink, ReportRow, ReportSink};
pub use steps::{
    drive_steps, normalized_actual, DriveOutcome, ReplayStep, StepOutcome, StepVerdict,
};
pub use task::TaskDoc;
pub use trajectory::{read_trials, Trial};
