use crate::config::ReplayConfig;
use crate::report::{FailureKind, RunMode, StepFailure};
use crate::scratch::TaskScratch;
use replay_compare::{
    coerce_ints_to_floats, error_text, first_difference, is_error_value, normalize_error_message,
    ComparePolicy, Difference,
};
use replay_tools::{Envelope, InvocationFailure, Session, STATUS_NOT_FOUND};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// One recorded invocation, independent of the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    pub name: String,
    pub arguments: Map<String, Value>,
    pub expected: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepVerdict {
    Pass,
    /// The recorded output should become this value.
    Repair(Value),
    /// Recorded and observed disagree; the run continues.
    Fail(StepFailure),
    /// The step cannot be repaired; the file must not be rewritten.
    HardFail(StepFailure),
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub index: usize,
    /// Arguments as dispatched, after sha substitution.
    pub arguments: Map<String, Value>,
    pub substituted: Vec<String>,
    pub envelope: Envelope,
    pub verdict: StepVerdict,
}

#[derive(Debug, Clone, Default)]
pub struct DriveOutcome {
    pub steps: Vec<StepOutcome>,
    /// Verify gave up after too many consecutive failures.
    pub aborted: bool,
    /// Repair hit a step it cannot fix.
    pub halted: bool,
}

impl DriveOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &StepFailure> {
        self.steps.iter().filter_map(|s| match &s.verdict {
            StepVerdict::Fail(f) | StepVerdict::HardFail(f) => Some(f),
            _ => None,
        })
    }
}

/// Runs `steps` in order against the session's current environment.
///
/// Each step sees every mutation made by the steps before it; a
/// `commit_sha` observed in one step's output feeds sha arguments of the
/// following steps.
pub fn drive_steps(
    session: &mut Session,
    steps: &[ReplayStep],
    mode: RunMode,
    config: &ReplayConfig,
    float_env: bool,
) -> DriveOutcome {
    let mut outcome = DriveOutcome::default();
    let mut scratch = TaskScratch::new();
    let mut consecutive_failures = 0usize;

    for (index, step) in steps.iter().enumerate() {
        let mut arguments = step.arguments.clone();
        let substituted = scratch.substitute(&mut arguments, config.sha_rule);
        if !substituted.is_empty() {
            debug!(step = index, keys = ?substituted, "substituted observed commit sha");
        }

        let envelope = session.invoke(&step.name, &arguments);
        debug!(step = index, operation = %step.name, status = envelope.status, "dispatched");
        scratch.observe_actual(&envelope.value);
        if let Some(expected) = &step.expected {
            scratch.observe_expected(expected);
        }

        let verdict = match mode {
            RunMode::RepairOutput => judge_repair(index, step, &envelope, &config.compare, float_env),
            RunMode::Verify | RunMode::ReplayExternal => {
                judge_verify(index, step, &envelope, &config.compare, float_env)
            }
        };
        let (failed, halt) = match &verdict {
            StepVerdict::Fail(f) => {
                warn!(step = index, operation = %step.name, kind = ?f.kind, "{}", f.reason);
                (true, false)
            }
            StepVerdict::HardFail(f) => {
                warn!(step = index, operation = %step.name, kind = ?f.kind, "{}", f.reason);
                (true, true)
            }
            StepVerdict::Pass | StepVerdict::Repair(_) => (false, false),
        };
        outcome.steps.push(StepOutcome {
            index,
            arguments,
            substituted,
            envelope,
            verdict,
        });

        if halt {
            outcome.halted = true;
            break;
        }
        consecutive_failures = if failed { consecutive_failures + 1 } else { 0 };
        if mode == RunMode::Verify && consecutive_failures >= config.max_consecutive_failures {
            warn!(
                failures = consecutive_failures,
                "too many consecutive failures; abandoning file"
            );
            outcome.aborted = true;
            break;
        }
    }
    outcome
}

fn is_error_envelope(envelope: &Envelope) -> bool {
    !envelope.is_ok() || is_error_value(&envelope.value)
}

fn envelope_failure_kind(envelope: &Envelope) -> FailureKind {
    match envelope.failure {
        Some(InvocationFailure::OperationUnknown) => FailureKind::OperationUnknown,
        Some(InvocationFailure::ArgumentMismatch) => FailureKind::ArgumentMismatch,
        Some(InvocationFailure::Raised) | None => FailureKind::ToolFailure,
    }
}

fn envelope_message(envelope: &Envelope) -> String {
    error_text(&envelope.value).unwrap_or_else(|| envelope.value.to_string())
}

/// Observed value with error messages rewritten to their normalized form.
pub fn normalized_actual(value: &Value) -> Value {
    if is_error_value(value) {
        if let Some(text) = error_text(value) {
            return Value::String(normalize_error_message(&text));
        }
    }
    value.clone()
}

fn failure(
    index: usize,
    step: &ReplayStep,
    kind: FailureKind,
    reason: String,
    actual: &Value,
) -> StepFailure {
    StepFailure {
        step: Some(index),
        operation: Some(step.name.clone()),
        kind,
        reason,
        expected: step.expected.clone(),
        actual: Some(actual.clone()),
        normalized_actual: Some(normalized_actual(actual)),
    }
}

/// Compares a recorded output with a live one. Float environments return
/// `7.0` where older recordings hold `7`, so there the recording also
/// matches with its ints read as floats. Neither side is modified.
fn recorded_difference(
    expected: &Value,
    actual: &Value,
    policy: &ComparePolicy,
    float_env: bool,
) -> Option<Difference> {
    let diff = first_difference(expected, actual, policy)?;
    if float_env && first_difference(&coerce_ints_to_floats(expected), actual, policy).is_none() {
        return None;
    }
    Some(diff)
}

fn judge_verify(
    index: usize,
    step: &ReplayStep,
    envelope: &Envelope,
    policy: &ComparePolicy,
    float_env: bool,
) -> StepVerdict {
    let actual = &envelope.value;
    if envelope.status == STATUS_NOT_FOUND {
        return StepVerdict::Fail(failure(
            index,
            step,
            FailureKind::OperationUnknown,
            envelope_message(envelope),
            actual,
        ));
    }
    let Some(expected) = &step.expected else {
        if is_error_envelope(envelope) {
            return StepVerdict::Fail(failure(
                index,
                step,
                envelope_failure_kind(envelope),
                format!("unexpected error: {}", envelope_message(envelope)),
                actual,
            ));
        }
        return StepVerdict::Pass;
    };
    match recorded_difference(expected, actual, policy, float_env) {
        None => StepVerdict::Pass,
        Some(diff) => {
            let kind = if is_error_envelope(envelope) && !is_error_value(expected) {
                envelope_failure_kind(envelope)
            } else {
                FailureKind::Mismatch
            };
            StepVerdict::Fail(failure(
                index,
                step,
                kind,
                format!("output differs at {}: {}", diff.path, diff.reason),
                actual,
            ))
        }
    }
}

/// The repaired output is always the envelope value exactly as returned.
fn judge_repair(
    index: usize,
    step: &ReplayStep,
    envelope: &Envelope,
    policy: &ComparePolicy,
    float_env: bool,
) -> StepVerdict {
    let actual = &envelope.value;
    if envelope.status == STATUS_NOT_FOUND {
        return StepVerdict::HardFail(failure(
            index,
            step,
            FailureKind::OperationUnknown,
            envelope_message(envelope),
            actual,
        ));
    }
    if !is_error_envelope(envelope) {
        return match &step.expected {
            Some(expected) if recorded_difference(expected, actual, policy, float_env).is_none() => {
                StepVerdict::Pass
            }
            _ => StepVerdict::Repair(actual.clone()),
        };
    }
    match &step.expected {
        Some(expected) if is_error_value(expected) => {
            let error_policy = ComparePolicy {
                error_fuzz: true,
                ..*policy
            };
            if first_difference(expected, actual, &error_policy).is_none() {
                StepVerdict::Pass
            } else {
                StepVerdict::Repair(actual.clone())
            }
        }
        _ => StepVerdict::HardFail(failure(
            index,
            step,
            envelope_failure_kind(envelope),
            format!(
                "tool failed where the recording succeeded: {}",
                envelope_message(envelope)
            ),
            actual,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_tools::{PluginCatalog, ToolDescriptor, ToolError};
    use serde_json::json;
    use std::sync::Arc;

    /// A session over an environment directory holding an empty `data/`.
    fn session(root: &std::path::Path) -> Session {
        std::fs::create_dir_all(root.join("vc").join("data")).expect("data dir");
        let mut catalog = PluginCatalog::new();
        catalog
            .register_fn(
                "vc",
                "1",
                ToolDescriptor::new("create_commit", "")
                    .required_param("repository_id", "string", "")
                    .param("parent_sha", "string", ""),
                |db, args| {
                    let next = db.next_record_id("commits");
                    let record = json!({
                        "parent_sha": args.get("parent_sha").cloned().unwrap_or(Value::Null)
                    });
                    db.table_entry("commits").insert(next.clone(), record);
                    Ok(json!({"commit_sha": format!("sha{}", next)}))
                },
            )
            .expect("create_commit");
        catalog
            .register_fn(
                "vc",
                "1",
                ToolDescriptor::new("get_parent", "").required_param("commit_id", "string", ""),
                |db, args| {
                    let id = args.get("commit_id").and_then(Value::as_str).unwrap_or_default();
                    db.record("commits", id)
                        .and_then(|r| r.get("parent_sha"))
                        .cloned()
                        .ok_or_else(|| ToolError::failed("commit not found"))
                },
            )
            .expect("get_parent");
        let mut session = Session::new(root, Arc::new(catalog));
        session.switch("vc", "1").expect("switch");
        session
    }

    fn temp_root(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "replay_steps_{}_{}_{}",
            label,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ))
    }

    fn step(name: &str, arguments: Value, expected: Option<Value>) -> ReplayStep {
        ReplayStep {
            name: name.to_string(),
            arguments: arguments.as_object().expect("object").clone(),
            expected,
        }
    }

    #[test]
    fn observed_sha_flows_into_the_next_step() {
        let root = temp_root("sha");
        let mut session = session(&root);
        let steps = vec![
            step("create_commit", json!({"repository_id": "1"}), Some(json!({"commit_sha": "abc"}))),
            step(
                "create_commit",
                json!({"repository_id": "1", "parent_sha": "deadbeef"}),
                None,
            ),
            step("get_parent", json!({"commit_id": "2"}), Some(json!("sha1"))),
        ];
        let outcome = drive_steps(
            &mut session,
            &steps,
            RunMode::Verify,
            &ReplayConfig::default(),
            false,
        );
        assert_eq!(outcome.steps[1].substituted, vec!["parent_sha"]);
        assert_eq!(outcome.steps[1].arguments["parent_sha"], json!("sha1"));
        assert_eq!(outcome.steps[2].verdict, StepVerdict::Pass);
        // The first step's recorded sha differs from the live one.
        assert!(matches!(outcome.steps[0].verdict, StepVerdict::Fail(ref f) if f.kind == FailureKind::Mismatch));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn verify_aborts_after_consecutive_failures() {
        let root = temp_root("abort");
        let mut session = session(&root);
        let steps: Vec<ReplayStep> = (0..8)
            .map(|_| step("does_not_exist", json!({}), None))
            .collect();
        let config = ReplayConfig {
            max_consecutive_failures: 3,
            ..ReplayConfig::default()
        };
        let outcome = drive_steps(&mut session, &steps, RunMode::Verify, &config, false);
        assert!(outcome.aborted);
        assert_eq!(outcome.steps.len(), 3);
        let first = outcome.failures().next().expect("failure");
        assert_eq!(first.kind, FailureKind::OperationUnknown);
        assert!(first.reason.contains("not found"), "{}", first.reason);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn repair_rewrites_outputs_and_halts_on_new_errors() {
        let root = temp_root("repair");
        let mut session = session(&root);
        let steps = vec![
            step("create_commit", json!({"repository_id": "1"}), Some(json!({"commit_sha": "old"}))),
            step(
                "get_parent",
                json!({"commit_id": "1", "extra": "x"}),
                Some(json!("Error: GetParent.invoke() got an unexpected keyword argument 'other'")),
            ),
            step("get_parent", json!({"commit_id": "99"}), Some(json!("something"))),
            step("create_commit", json!({"repository_id": "1"}), None),
        ];
        let outcome = drive_steps(
            &mut session,
            &steps,
            RunMode::RepairOutput,
            &ReplayConfig::default(),
            false,
        );
        assert_eq!(
            outcome.steps[0].verdict,
            StepVerdict::Repair(json!({"commit_sha": "sha1"}))
        );
        assert_eq!(outcome.steps[1].verdict, StepVerdict::Pass);
        assert!(matches!(outcome.steps[2].verdict, StepVerdict::HardFail(_)));
        assert!(outcome.halted);
        assert_eq!(outcome.steps.len(), 3);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn float_environments_compare_loosely_but_record_values_as_returned() {
        let root = temp_root("float");
        let mut session = session(&root);
        let strict = ReplayConfig {
            compare: ComparePolicy::strict(),
            ..ReplayConfig::default()
        };
        let mut run = |stored: Value, mode: RunMode, float_env: bool| {
            session
                .fixtures_mut()
                .table_entry("commits")
                .insert("1".to_string(), json!({"parent_sha": stored}));
            let steps = vec![step("get_parent", json!({"commit_id": "1"}), Some(json!(7)))];
            drive_steps(&mut session, &steps, mode, &strict, float_env).steps[0]
                .verdict
                .clone()
        };

        assert_eq!(run(json!(7.0), RunMode::RepairOutput, true), StepVerdict::Pass);
        assert_eq!(run(json!(7.0), RunMode::Verify, true), StepVerdict::Pass);
        assert_eq!(run(json!(7), RunMode::RepairOutput, true), StepVerdict::Pass);
        assert_eq!(run(json!(7), RunMode::Verify, true), StepVerdict::Pass);
        assert_eq!(
            run(json!(8), RunMode::RepairOutput, true),
            StepVerdict::Repair(json!(8))
        );
        assert_eq!(
            run(json!(7.0), RunMode::RepairOutput, false),
            StepVerdict::Repair(json!(7.0))
        );
        let _ = std::fs::remove_dir_all(root);
    }
}
